//! Per-phase row and time counters
//!
//! Counters only, monotonic for the life of the request, updated with relaxed
//! atomics from every operator thread.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Execution phase an operator reports its work under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    PrimaryScan,
    IndexScan,
    SearchScan,
    SetScan,
    KeyScan,
    Fetch,
    Filter,
    Join,
    Nest,
    HashJoin,
    HashNest,
    IndexJoin,
    IndexNest,
    Insert,
    Update,
    Delete,
    Merge,
    Pipeline,
}

impl Phase {
    pub const ALL: [Phase; 18] = [
        Phase::PrimaryScan,
        Phase::IndexScan,
        Phase::SearchScan,
        Phase::SetScan,
        Phase::KeyScan,
        Phase::Fetch,
        Phase::Filter,
        Phase::Join,
        Phase::Nest,
        Phase::HashJoin,
        Phase::HashNest,
        Phase::IndexJoin,
        Phase::IndexNest,
        Phase::Insert,
        Phase::Update,
        Phase::Delete,
        Phase::Merge,
        Phase::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PrimaryScan => "primaryScan",
            Phase::IndexScan => "indexScan",
            Phase::SearchScan => "searchScan",
            Phase::SetScan => "setScan",
            Phase::KeyScan => "keyScan",
            Phase::Fetch => "fetch",
            Phase::Filter => "filter",
            Phase::Join => "join",
            Phase::Nest => "nest",
            Phase::HashJoin => "hashJoin",
            Phase::HashNest => "hashNest",
            Phase::IndexJoin => "indexJoin",
            Phase::IndexNest => "indexNest",
            Phase::Insert => "insert",
            Phase::Update => "update",
            Phase::Delete => "delete",
            Phase::Merge => "merge",
            Phase::Pipeline => "pipeline",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
struct PhaseSlot {
    count: AtomicU64,
    nanos: AtomicU64,
    operators: AtomicU64,
}

/// Row/time counters for every phase of one request.
#[derive(Debug)]
pub struct PhaseCounters {
    slots: Vec<PhaseSlot>,
}

impl Default for PhaseCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseCounters {
    pub fn new() -> Self {
        Self {
            slots: Phase::ALL.iter().map(|_| PhaseSlot::default()).collect(),
        }
    }

    /// Adds `rows` produced under `phase`.
    pub fn add_count(&self, phase: Phase, rows: u64) {
        self.slots[phase.index()]
            .count
            .fetch_add(rows, Ordering::Relaxed);
    }

    /// Adds time spent under `phase`.
    pub fn add_time(&self, phase: Phase, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.slots[phase.index()]
            .nanos
            .fetch_add(nanos, Ordering::Relaxed);
    }

    /// Records one more operator instance running under `phase`.
    pub fn add_operator(&self, phase: Phase) {
        self.slots[phase.index()]
            .operators
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, phase: Phase) -> u64 {
        self.slots[phase.index()].count.load(Ordering::Relaxed)
    }

    /// Snapshot of every phase that saw any activity.
    pub fn snapshot(&self) -> PhaseSnapshot {
        let mut phases = BTreeMap::new();
        for phase in Phase::ALL {
            let slot = &self.slots[phase.index()];
            let entry = PhaseEntry {
                count: slot.count.load(Ordering::Relaxed),
                time_nanos: slot.nanos.load(Ordering::Relaxed),
                operators: slot.operators.load(Ordering::Relaxed),
            };
            if entry.count > 0 || entry.time_nanos > 0 || entry.operators > 0 {
                phases.insert(phase.as_str().to_string(), entry);
            }
        }
        PhaseSnapshot { phases }
    }
}

/// Counters for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseEntry {
    pub count: u64,
    pub time_nanos: u64,
    pub operators: u64,
}

/// Point-in-time copy of all active phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSnapshot {
    pub phases: BTreeMap<String, PhaseEntry>,
}

impl PhaseSnapshot {
    pub fn count(&self, phase: Phase) -> u64 {
        self.phases.get(phase.as_str()).map_or(0, |e| e.count)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

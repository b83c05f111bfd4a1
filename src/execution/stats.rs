//! Per-operator statistics and the diagnostic stats tree

use std::time::Duration;

use serde::Serialize;

/// Lifecycle state of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorState {
    /// Built or reopened, not yet run
    Dormant,
    Running,
    /// Stop observed, unwinding
    Stopping,
    /// Run finished; may be reopened
    Completed,
    /// Torn down; terminal
    Done,
}

/// Counters accumulated by one operator instance across its runs.
#[derive(Debug, Clone, Default)]
pub struct StatCounters {
    pub runs: u64,
    pub in_docs: u64,
    pub out_docs: u64,
    /// Time spent inside the operator's run
    pub exec: Duration,
    /// Time parked on the input exchange
    pub kernel: Duration,
    /// Time spent in storage and index calls
    pub service: Duration,
}

/// Diagnostic statistics for one operator and its children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorStats {
    pub operator: String,
    pub phase: String,
    pub state: OperatorState,
    pub runs: u64,
    pub in_docs: u64,
    pub out_docs: u64,
    pub exec_time_us: u64,
    pub kernel_time_us: u64,
    pub service_time_us: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OperatorStats>,
}

impl OperatorStats {
    pub(crate) fn from_counters(operator: &str, phase: &str, state: OperatorState, c: &StatCounters) -> Self {
        Self {
            operator: operator.to_string(),
            phase: phase.to_string(),
            state,
            runs: c.runs,
            in_docs: c.in_docs,
            out_docs: c.out_docs,
            exec_time_us: c.exec.as_micros() as u64,
            kernel_time_us: c.kernel.as_micros() as u64,
            service_time_us: c.service.as_micros() as u64,
            children: Vec::new(),
        }
    }

    /// First operator named `name` in depth-first order.
    pub fn find(&self, name: &str) -> Option<&OperatorStats> {
        if self.operator == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Every operator named `name`.
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a OperatorStats>) {
        if self.operator == name {
            out.push(self);
        }
        for child in &self.children {
            child.find_all(name, out);
        }
    }

    /// Pretty JSON rendering for diagnostics.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_and_serialize() {
        let mut root = OperatorStats::from_counters("Sequence", "pipeline", OperatorState::Done, &StatCounters::default());
        let leaf = OperatorStats::from_counters(
            "PrimaryScan",
            "primaryScan",
            OperatorState::Done,
            &StatCounters {
                out_docs: 3,
                ..StatCounters::default()
            },
        );
        root.children.push(leaf);
        assert_eq!(root.find("PrimaryScan").map(|s| s.out_docs), Some(3));
        assert!(root.find("Filter").is_none());

        let json = root.to_json();
        assert!(json.contains("\"state\": \"done\""));
        assert!(json.contains("primaryScan"));
    }
}

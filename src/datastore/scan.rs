//! Index scan requests and entries

use std::cmp::Ordering;

use serde_json::Value;

use crate::value::{collate, collate_slices};

/// Which bounds of a span are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    Neither,
    Low,
    High,
    Both,
}

/// A range of composite index keys. Bounds compare on their own length, so a
/// one-element bound on a two-key index matches every entry with that prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub low: Option<Vec<Value>>,
    pub high: Option<Vec<Value>>,
    pub inclusion: Inclusion,
}

impl Span {
    /// Every entry.
    pub fn all() -> Self {
        Self {
            low: None,
            high: None,
            inclusion: Inclusion::Both,
        }
    }

    /// Entries whose key starts with `key`.
    pub fn exact(key: Vec<Value>) -> Self {
        Self {
            low: Some(key.clone()),
            high: Some(key),
            inclusion: Inclusion::Both,
        }
    }

    pub fn range(low: Option<Vec<Value>>, high: Option<Vec<Value>>, inclusion: Inclusion) -> Self {
        Self {
            low,
            high,
            inclusion,
        }
    }

    fn compare_prefix(entry: &[Value], bound: &[Value]) -> Ordering {
        let n = entry.len().min(bound.len());
        match collate_slices(&entry[..n], &bound[..n]) {
            Ordering::Equal if entry.len() < bound.len() => Ordering::Less,
            ord => ord,
        }
    }

    /// Whether `entry_key` falls inside the span.
    pub fn contains(&self, entry_key: &[Value]) -> bool {
        if let Some(low) = &self.low {
            let ord = Self::compare_prefix(entry_key, low);
            let low_inclusive = matches!(self.inclusion, Inclusion::Low | Inclusion::Both);
            if ord == Ordering::Less || (ord == Ordering::Equal && !low_inclusive) {
                return false;
            }
        }
        if let Some(high) = &self.high {
            let ord = Self::compare_prefix(entry_key, high);
            let high_inclusive = matches!(self.inclusion, Inclusion::High | Inclusion::Both);
            if ord == Ordering::Greater || (ord == Ordering::Equal && !high_inclusive) {
                return false;
            }
        }
        true
    }
}

/// Position after which a resumed scan continues.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    pub entry_key: Vec<Value>,
    pub primary_key: String,
}

impl ResumePoint {
    /// Whether an entry sorts strictly after this point.
    pub fn precedes(&self, entry_key: &[Value], primary_key: &str) -> bool {
        match collate_slices(entry_key, &self.entry_key) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => primary_key > self.primary_key.as_str(),
        }
    }
}

/// Parameters of one index scan call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub spans: Vec<Span>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    /// Continue strictly after this entry
    pub resume_after: Option<ResumePoint>,
}

impl ScanRequest {
    pub fn new(spans: Vec<Span>) -> Self {
        Self {
            spans,
            offset: None,
            limit: None,
            resume_after: None,
        }
    }

    /// Whether the entry is selected by the spans and the resume point.
    pub fn selects(&self, entry_key: &[Value], primary_key: &str) -> bool {
        if let Some(resume) = &self.resume_after {
            if !resume.precedes(entry_key, primary_key) {
                return false;
            }
        }
        self.spans.is_empty() || self.spans.iter().any(|s| s.contains(entry_key))
    }
}

/// Parameters of one search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Value,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

/// One index entry as streamed by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub entry_key: Vec<Value>,
    pub primary_key: String,
    pub meta: Option<Value>,
}

impl IndexEntry {
    pub fn new(entry_key: Vec<Value>, primary_key: impl Into<String>) -> Self {
        Self {
            entry_key,
            primary_key: primary_key.into(),
            meta: None,
        }
    }

    /// Sort order of entries within an index.
    pub fn index_order(&self, other: &Self) -> Ordering {
        collate_slices(&self.entry_key, &other.entry_key)
            .then_with(|| self.primary_key.cmp(&other.primary_key))
    }

    /// Whether the leading key element equals `value`.
    pub fn leads_with(&self, value: &Value) -> bool {
        self.entry_key
            .first()
            .is_some_and(|first| collate(first, value) == Ordering::Equal)
    }
}

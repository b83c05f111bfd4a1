//! Per-run document-key sets for deduplicating scans

use rustc_hash::FxHashSet;

/// What to do with a row offered to a [`KeySet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admit {
    Emit,
    /// New key consumed by the offset
    Skip,
    Duplicate,
}

/// Document keys seen in the current run plus offset/limit accounting.
#[derive(Debug, Default)]
pub(crate) struct KeySet {
    keys: FxHashSet<String>,
    offset: u64,
    limit: Option<u64>,
    emitted: u64,
}

impl KeySet {
    pub fn start(&mut self, offset: Option<u64>, limit: Option<u64>) {
        self.keys.clear();
        self.offset = offset.unwrap_or(0);
        self.limit = limit;
        self.emitted = 0;
    }

    pub fn admit(&mut self, key: &str) -> Admit {
        if self.keys.contains(key) {
            return Admit::Duplicate;
        }
        self.keys.insert(key.to_string());
        if self.offset > 0 {
            self.offset -= 1;
            return Admit::Skip;
        }
        self.emitted += 1;
        Admit::Emit
    }

    /// Whether the limit has been reached.
    pub fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn clear(&mut self) {
        self.keys = FxHashSet::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_then_limit() {
        let mut set = KeySet::default();
        set.start(Some(1), Some(2));
        assert_eq!(set.admit("a"), Admit::Skip);
        assert_eq!(set.admit("a"), Admit::Duplicate);
        assert_eq!(set.admit("b"), Admit::Emit);
        assert!(!set.is_full());
        assert_eq!(set.admit("b"), Admit::Duplicate);
        assert_eq!(set.admit("c"), Admit::Emit);
        assert!(set.is_full());
        assert_eq!(set.len(), 3);
    }
}

//! Pipeline configuration
//!
//! Batch sizes and exchange capacities apply to every operator built for a
//! request; parallelism caps every Parallel wrapper in the plan.

use serde::{Deserialize, Serialize};

/// Items accumulated before a batched storage call.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Capacity of exchanges between operators.
pub const DEFAULT_PIPELINE_CAPACITY: usize = 512;

/// Replicas per Parallel wrapper.
pub const DEFAULT_MAX_PARALLELISM: usize = 1;

/// Configuration for one request's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Items accumulated before a batched storage call
    pub batch_size: usize,
    /// Lower bound for adaptive batch shrinking
    pub min_batch_size: usize,
    /// Capacity of every operator-to-operator exchange
    pub pipeline_capacity: usize,
    /// Upper bound on replicas per Parallel wrapper
    pub max_parallelism: usize,
    /// Memory quota in bytes (0 = unlimited)
    pub memory_quota: u64,
    /// Whether the statement runs inside a transaction
    pub transactional: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_batch_size: 1,
            pipeline_capacity: DEFAULT_PIPELINE_CAPACITY,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            memory_quota: 0,
            transactional: false,
        }
    }
}

impl PipelineConfig {
    /// Config for a statement running inside a transaction.
    pub fn transactional() -> Self {
        Self {
            transactional: true,
            ..Self::default()
        }
    }

    /// Parses a JSON config document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pipeline_capacity(mut self, capacity: usize) -> Self {
        self.pipeline_capacity = capacity.max(1);
        self
    }

    pub fn with_max_parallelism(mut self, parallelism: usize) -> Self {
        self.max_parallelism = parallelism.max(1);
        self
    }

    pub fn with_memory_quota(mut self, bytes: u64) -> Self {
        self.memory_quota = bytes;
        self
    }

    /// Batch size never below 1.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Minimum batch size, clamped into `1..=batch_size`.
    pub fn effective_min_batch_size(&self) -> usize {
        self.min_batch_size.clamp(1, self.effective_batch_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.pipeline_capacity, 512);
        assert_eq!(config.max_parallelism, 1);
        assert!(!config.transactional);
    }

    #[test]
    fn test_from_json_partial() {
        let config = PipelineConfig::from_json(r#"{"batch_size": 4, "transactional": true}"#).unwrap();
        assert_eq!(config.batch_size, 4);
        assert!(config.transactional);
        assert_eq!(config.pipeline_capacity, DEFAULT_PIPELINE_CAPACITY);
    }

    #[test]
    fn test_builders_clamp() {
        let config = PipelineConfig::default()
            .with_batch_size(0)
            .with_pipeline_capacity(0)
            .with_max_parallelism(0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.pipeline_capacity, 1);
        assert_eq!(config.max_parallelism, 1);
    }

    #[test]
    fn test_min_batch_clamped() {
        let mut config = PipelineConfig::default().with_batch_size(4);
        config.min_batch_size = 10;
        assert_eq!(config.effective_min_batch_size(), 4);
    }
}

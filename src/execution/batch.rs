//! Adaptive batch sizing for operators that issue batched storage calls

use crate::context::PipelineConfig;

/// Chooses how many items to accumulate before the next storage call.
///
/// The size halves, down to the configured minimum, while the output exchange
/// is more than half full, and doubles back towards the configured maximum
/// once it drains below a quarter.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    max: usize,
    min: usize,
    current: usize,
}

impl BatchSizer {
    pub fn new(config: &PipelineConfig) -> Self {
        let max = config.effective_batch_size();
        Self {
            max,
            min: config.effective_min_batch_size(),
            current: max,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Adjusts the size from the output queue depth and returns it.
    pub fn adapt(&mut self, queued: usize, capacity: usize) -> usize {
        let capacity = capacity.max(1);
        if queued * 2 > capacity {
            self.current = (self.current / 2).max(self.min);
        } else if queued * 4 < capacity {
            self.current = (self.current * 2).min(self.max);
        }
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.max;
    }
}

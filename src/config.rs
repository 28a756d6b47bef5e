use crate::memory::MemoryPressureMonitor;

/// Construction options for [`AnimatedImage`](crate::AnimatedImage)
#[derive(Debug, Clone)]
pub struct AnimatedImageOptions {
    /// Preferred window size; 0 uses the size heuristic
    pub optimal_frame_cache_size: usize,
    /// Draw render buffers on the worker instead of on first use
    pub predrawing_enabled: bool,
    /// Hard cap on the window; 0 = unlimited
    pub frame_cache_size_max: usize,
    /// Fixed memory budget in bytes. `None` samples available system memory.
    pub memory_budget: Option<u64>,
    /// Monitor to subscribe to. `None` uses [`MemoryPressureMonitor::shared`].
    pub memory_monitor: Option<MemoryPressureMonitor>,
}

impl Default for AnimatedImageOptions {
    fn default() -> Self {
        Self {
            optimal_frame_cache_size: 0,
            predrawing_enabled: true,
            frame_cache_size_max: 0,
            memory_budget: None,
            memory_monitor: None,
        }
    }
}

impl AnimatedImageOptions {
    pub fn with_optimal_frame_cache_size(mut self, size: usize) -> Self {
        self.optimal_frame_cache_size = size;
        self
    }

    pub fn with_predrawing(mut self, enabled: bool) -> Self {
        self.predrawing_enabled = enabled;
        self
    }

    pub fn with_frame_cache_size_max(mut self, max: usize) -> Self {
        self.frame_cache_size_max = max;
        self
    }

    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn with_memory_monitor(mut self, monitor: MemoryPressureMonitor) -> Self {
        self.memory_monitor = Some(monitor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = AnimatedImageOptions::default();
        assert_eq!(options.optimal_frame_cache_size, 0);
        assert!(options.predrawing_enabled);
        assert_eq!(options.frame_cache_size_max, 0);
        assert!(options.memory_budget.is_none());
        assert!(options.memory_monitor.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let options = AnimatedImageOptions::default()
            .with_optimal_frame_cache_size(3)
            .with_predrawing(false)
            .with_frame_cache_size_max(2)
            .with_memory_budget(1 << 20);
        assert_eq!(options.optimal_frame_cache_size, 3);
        assert!(!options.predrawing_enabled);
        assert_eq!(options.frame_cache_size_max, 2);
        assert_eq!(options.memory_budget, Some(1 << 20));
    }
}

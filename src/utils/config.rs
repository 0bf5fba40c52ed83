//! JIT configuration

use crate::codegen::Target;
use log::warn;

/// Configuration for compiling and running pipelines
#[derive(Clone, Debug, PartialEq)]
pub struct JitConfig {
    /// Worker threads for parallel loops; `None` uses the global rayon pool
    pub num_threads: Option<usize>,

    /// Target the pipeline is compiled for
    pub target: Target,

    /// Log each lowered plan at info level
    pub log_plans: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            target: Target::host(),
            log_plans: false,
        }
    }
}

impl JitConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `PIXELFLOW_NUM_THREADS` and `PIXELFLOW_TARGET`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(threads) = std::env::var("PIXELFLOW_NUM_THREADS") {
            match threads.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.num_threads = Some(n),
                _ => warn!("ignoring PIXELFLOW_NUM_THREADS={}", threads),
            }
        }
        if let Ok(target) = std::env::var("PIXELFLOW_TARGET") {
            match target.parse::<Target>() {
                Ok(t) => config.target = t,
                Err(e) => warn!("ignoring PIXELFLOW_TARGET={}: {}", target, e),
            }
        }
        config
    }

    /// Set the number of worker threads
    pub fn threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n.max(1));
        self
    }

    /// Set the target
    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Enable/disable plan logging
    pub fn log_plans(mut self, on: bool) -> Self {
        self.log_plans = on;
        self
    }

    /// Single-threaded preset, useful for reproducible traces
    pub fn serial() -> Self {
        Self {
            num_threads: Some(1),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let c = JitConfig::new().threads(0).log_plans(true);
        assert_eq!(c.num_threads, Some(1));
        assert!(c.log_plans);
        assert_eq!(c.target, Target::host());
    }

    #[test]
    fn test_serial_preset() {
        assert_eq!(JitConfig::serial().num_threads, Some(1));
        assert!(!JitConfig::serial().log_plans);
    }
}

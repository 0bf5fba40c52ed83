//! Timing helpers and the regression policy used by the `process` harness.

use crate::codegen::GPU_FEATURES;
use std::fmt;
use std::time::Instant;

/// How much slower than the manual schedule an automatic schedule may be.
pub const MAX_AUTO_SLOWDOWN: f64 = 3.5;

/// Summary of a set of timing samples, in seconds.
#[derive(Clone, Debug)]
pub struct BenchmarkResult {
    /// Individual sample times
    pub times: Vec<f64>,
    /// Median time
    pub median_time: f64,
    /// Minimum time
    pub min_time: f64,
    /// Maximum time
    pub max_time: f64,
    /// Standard deviation
    pub std_dev: f64,
}

impl BenchmarkResult {
    /// Create a new result from times
    pub fn from_times(times: Vec<f64>) -> Self {
        if times.is_empty() {
            return Self {
                times,
                median_time: f64::INFINITY,
                min_time: f64::INFINITY,
                max_time: f64::INFINITY,
                std_dev: 0.0,
            };
        }

        let mut sorted = times.clone();
        sorted.sort_by(f64::total_cmp);

        let mean = times.iter().sum::<f64>() / times.len() as f64;
        let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / times.len() as f64;

        Self {
            median_time: sorted[sorted.len() / 2],
            min_time: sorted[0],
            max_time: sorted[sorted.len() - 1],
            std_dev: variance.sqrt(),
            times,
        }
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {:.3} ms, median {:.3} ms over {} samples",
            self.min_time * 1e3,
            self.median_time * 1e3,
            self.times.len()
        )
    }
}

/// Time `op` as `samples` groups of `iterations` calls and keep the mean
/// call time of each group. The minimum is the figure to report.
///
/// Stops at the first error `op` returns.
pub fn benchmark<E, F>(samples: usize, iterations: usize, mut op: F) -> Result<BenchmarkResult, E>
where
    F: FnMut() -> Result<(), E>,
{
    let iterations = iterations.max(1);
    let mut times = Vec::with_capacity(samples);
    for _ in 0..samples.max(1) {
        let start = Instant::now();
        for _ in 0..iterations {
            op()?;
        }
        times.push(start.elapsed().as_secs_f64() / iterations as f64);
    }
    Ok(BenchmarkResult::from_times(times))
}

/// Outcome of comparing an automatic schedule against a manual one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Within the allowed slowdown
    Pass,
    /// GPU targets are not held to the policy
    SkippedGpu,
    /// Automatic schedule more than `MAX_AUTO_SLOWDOWN` times slower
    Regression { ratio: f64 },
}

impl Verdict {
    pub fn is_regression(&self) -> bool {
        matches!(self, Verdict::Regression { .. })
    }
}

/// Whether a target descriptor names a GPU backend.
pub fn is_gpu_target(target: &str) -> bool {
    GPU_FEATURES.iter().any(|g| target.contains(g))
}

/// Apply the regression policy to two timings of the same pipeline.
pub fn check_performance(target: &str, manual_time: f64, auto_time: f64) -> Verdict {
    if is_gpu_target(target) {
        return Verdict::SkippedGpu;
    }
    if auto_time > manual_time * MAX_AUTO_SLOWDOWN {
        Verdict::Regression { ratio: auto_time / manual_time }
    } else {
        Verdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_statistics() {
        let r = BenchmarkResult::from_times(vec![3.0, 1.0, 2.0]);
        assert_eq!(r.min_time, 1.0);
        assert_eq!(r.median_time, 2.0);
        assert_eq!(r.max_time, 3.0);
        assert!(BenchmarkResult::from_times(vec![]).min_time.is_infinite());
    }

    #[test]
    fn test_benchmark_counts_calls() {
        let mut calls = 0;
        let r = benchmark::<(), _>(3, 4, || {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 12);
        assert_eq!(r.times.len(), 3);
    }

    #[test]
    fn test_benchmark_stops_on_error() {
        let r = benchmark(2, 2, || Err("boom"));
        assert_eq!(r.unwrap_err(), "boom");
    }

    #[test]
    fn test_performance_policy() {
        assert_eq!(check_performance("x86_64-linux-jit", 1.0, 3.0), Verdict::Pass);
        assert!(check_performance("x86_64-linux-jit", 1.0, 4.0).is_regression());
        assert_eq!(check_performance("x86_64-linux-cuda", 1.0, 40.0), Verdict::SkippedGpu);
    }
}

//! Code generation from lowered plans.
//!
//! Two backends share the same input, a [`Lowered`](crate::lower::Lowered)
//! plan: the closure-compiling JIT used by `realize`, and a C emitter used
//! by `compile_to_file`.

pub mod jit;
pub mod c;

pub use c::CCodeGen;
pub use jit::{CompiledPipeline, PipelineArgs};

use crate::utils::errors::{compile_error, CompileErrorKind, FlowError};
use std::fmt;
use std::str::FromStr;

/// Feature names that select a GPU backend.
pub const GPU_FEATURES: &[&str] = &["cuda", "opencl", "metal", "d3d12compute", "vulkan", "webgpu"];

/// Description of the machine a pipeline is compiled for, written
/// `arch-os[-feature...]`, e.g. `x86_64-linux-jit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub arch: String,
    pub os: String,
    pub features: Vec<String>,
}

impl Target {
    pub fn new(arch: &str, os: &str) -> Self {
        Self { arch: arch.to_string(), os: os.to_string(), features: Vec::new() }
    }

    /// The machine this process runs on, with the `jit` feature.
    pub fn host() -> Self {
        Self::new(std::env::consts::ARCH, std::env::consts::OS).with_feature("jit")
    }

    pub fn with_feature(mut self, feature: &str) -> Self {
        if !self.has_feature(feature) {
            self.features.push(feature.to_string());
        }
        self
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn has_gpu_feature(&self) -> bool {
        GPU_FEATURES.iter().any(|g| self.has_feature(g))
    }

    /// Whether the JIT can execute code for this target in this process.
    pub fn runs_on_host(&self) -> bool {
        self.arch == std::env::consts::ARCH && self.os == std::env::consts::OS && !self.has_gpu_feature()
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.arch, self.os)?;
        for feature in &self.features {
            write!(f, "-{}", feature)?;
        }
        Ok(())
    }
}

impl FromStr for Target {
    type Err = FlowError;

    /// Parse `arch-os[-feature...]`; `host` means [`Target::host`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "host" {
            return Ok(Self::host());
        }
        let mut parts = s.split('-').filter(|p| !p.is_empty());
        let (Some(arch), Some(os)) = (parts.next(), parts.next()) else {
            return Err(compile_error(
                CompileErrorKind::UnsupportedTarget,
                format!("Can't parse target \"{}\"; expected arch-os[-features]", s),
            ));
        };
        let target = parts.fold(Self::new(arch, os), |t, feature| t.with_feature(feature));
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_target() {
        let host = Target::host();
        assert!(host.runs_on_host());
        assert!(host.has_feature("jit"));
        assert!(!host.has_gpu_feature());
    }

    #[test]
    fn test_parse_and_display() {
        let t: Target = "x86_64-linux-avx2-cuda".parse().unwrap();
        assert_eq!(t.arch, "x86_64");
        assert_eq!(t.features, vec!["avx2", "cuda"]);
        assert!(t.has_gpu_feature());
        assert_eq!(t.to_string(), "x86_64-linux-avx2-cuda");
        assert!("x86_64".parse::<Target>().is_err());
    }
}

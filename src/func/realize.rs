//! Compiling and running Funcs.

use super::Func;
use crate::analysis::environment::{CacheKey, Environment};
use crate::buffer::Buffer;
use crate::codegen::{CCodeGen, CompiledPipeline, PipelineArgs, Target};
use crate::lower::{check_bindings, lower, lower_env};
use crate::utils::config::JitConfig;
use crate::utils::errors::{compile_error, internal_error, CompileErrorKind, FlowResult};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The last pipeline compiled for a Func, with what it was compiled from.
#[derive(Clone)]
pub struct CompiledEntry {
    pub key: CacheKey,
    pub config: JitConfig,
    pub pipeline: Arc<CompiledPipeline>,
}

impl Func {
    fn jit_config(&self) -> JitConfig {
        self.contents.borrow().jit_config.clone().unwrap_or_else(JitConfig::from_env)
    }

    fn compiled_for(&self, env: &Environment, config: &JitConfig) -> FlowResult<Arc<CompiledPipeline>> {
        let key = env.cache_key();
        if let Some(entry) = &self.contents.borrow().compiled {
            if entry.key == key && &entry.config == config {
                debug!("{}: reusing compiled pipeline", self.name());
                return Ok(Arc::clone(&entry.pipeline));
            }
        }
        let lowered = lower_env(env)?;
        let pipeline = Arc::new(CompiledPipeline::new(lowered, config)?);
        info!("compiled {} for {}", self.name(), pipeline.target());
        self.contents.borrow_mut().compiled = Some(CompiledEntry {
            key,
            config: config.clone(),
            pipeline: Arc::clone(&pipeline),
        });
        Ok(pipeline)
    }

    /// Compile this Func with the configuration from the environment, or
    /// reuse the pipeline compiled for its current definitions and
    /// schedules.
    pub fn compile_jit(&self) -> FlowResult<Arc<CompiledPipeline>> {
        let config = self.jit_config();
        self.compiled_for(&Environment::discover(self)?, &config)
    }

    /// Like [`compile_jit`](Self::compile_jit) with an explicit
    /// configuration, which later realizations keep using.
    pub fn compile_jit_with(&self, config: JitConfig) -> FlowResult<Arc<CompiledPipeline>> {
        self.contents.borrow_mut().jit_config = Some(config.clone());
        self.compiled_for(&Environment::discover(self)?, &config)
    }

    /// Target of the pipeline compiled for this Func.
    pub fn target(&self) -> FlowResult<Target> {
        Ok(self.compile_jit()?.target().clone())
    }

    /// Compute this Func over `[0, extent)` in each dimension.
    pub fn realize(&self, extents: &[usize]) -> FlowResult<Buffer> {
        if !self.defined() {
            return Err(compile_error(
                CompileErrorKind::UndefinedFunc,
                format!("Func {} has no definition", self.name()),
            )
            .with_subject(self.name()));
        }
        if self.outputs() != 1 {
            return Err(compile_error(
                CompileErrorKind::TypeMismatch,
                format!("{} has {} outputs; use realize_tuple", self.name(), self.outputs()),
            )
            .with_subject(self.name()));
        }
        self.realize_tuple(extents)?
            .pop()
            .ok_or_else(|| internal_error(format!("{} produced no output", self.name())))
    }

    /// Compute every output of a Tuple-valued Func.
    pub fn realize_tuple(&self, extents: &[usize]) -> FlowResult<Vec<Buffer>> {
        let env = Environment::discover(self)?;
        let mut outputs: Vec<Buffer> = self.output_types().into_iter().map(|ty| Buffer::new(ty, extents)).collect();
        self.run(&env, &mut outputs)?;
        Ok(outputs)
    }

    /// Compute the region covered by `buffer` into it.
    pub fn realize_into(&self, buffer: &mut Buffer) -> FlowResult<()> {
        self.realize_tuple_into(std::slice::from_mut(buffer))
    }

    pub fn realize_tuple_into(&self, buffers: &mut [Buffer]) -> FlowResult<()> {
        let env = Environment::discover(self)?;
        self.run(&env, buffers)
    }

    fn run(&self, env: &Environment, outputs: &mut [Buffer]) -> FlowResult<()> {
        check_bindings(env)?;
        let pipeline = self.compiled_for(env, &self.jit_config())?;
        let mut args = PipelineArgs::new();
        for p in env.params() {
            if let Some(v) = p.value() {
                args.set_scalar(&p.name(), v);
            }
        }
        for image in env.images() {
            if let Some(buffer) = image.buffer() {
                args.set_image(&image.name(), buffer);
            }
        }
        pipeline.run(&args, outputs).map_err(|e| e.with_subject(self.name()))
    }

    /// Write a C implementation of this Func to `<stem>.h` and `<stem>.c`.
    pub fn compile_to_file(&self, stem: impl AsRef<Path>) -> FlowResult<(PathBuf, PathBuf)> {
        let lowered = lower(self)?;
        CCodeGen::new(true).write_files(&lowered, stem.as_ref())
    }

    /// The lowered loop nest, pretty-printed.
    pub fn lower_to_string(&self) -> FlowResult<String> {
        Ok(lower(self)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;
    use crate::ir::var::Var;

    #[test]
    fn test_compiled_pipeline_is_reused() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x * 3).unwrap();
        let a = f.compile_jit().unwrap();
        let b = f.compile_jit().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        f.vectorize_by(x, 4);
        let c = f.compile_jit().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_upstream_change_invalidates() {
        let x = Var::new("x");
        let g = Func::new("g");
        g.define(&[x], x).unwrap();
        let f = Func::new("f");
        f.define(&[x], g.call([x]) + 1).unwrap();
        let a = f.compile_jit().unwrap();
        g.root();
        let b = f.compile_jit().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(f.realize(&[4]).unwrap().to_vec::<i32>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_realize_tuple() {
        let x = Var::new("x");
        let f = Func::new("pair");
        f.define_tuple(&[x], [x.into(), crate::ir::expr::cast(Type::float(32), x) * 0.5f32]).unwrap();
        assert!(f.realize(&[3]).is_err());
        let out = f.realize_tuple(&[3]).unwrap();
        assert_eq!(out[0].to_vec::<i32>(), vec![0, 1, 2]);
        assert_eq!(out[1].to_vec::<f32>(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_realize_undefined_func() {
        let f = Func::new("empty");
        let err = f.realize(&[4]).unwrap_err();
        let compile = err.as_compile().unwrap();
        assert_eq!(compile.kind, CompileErrorKind::UndefinedFunc);
        assert_eq!(compile.subject.as_deref(), Some("empty"));
    }

    #[test]
    fn test_compile_to_file() {
        let x = Var::new("x");
        let f = Func::new("ramp");
        f.define(&[x], x).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (h, c) = f.compile_to_file(dir.path().join("ramp")).unwrap();
        assert!(std::fs::read_to_string(h).unwrap().contains("int ramp("));
        assert!(std::fs::read_to_string(c).unwrap().contains("#include \"ramp.h\""));
    }
}

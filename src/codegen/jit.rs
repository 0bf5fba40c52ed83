//! The JIT: compiles a lowered plan into a tree of closures.
//!
//! Every variable and buffer named in the plan is resolved to a slot index
//! once, at compile time, so execution never looks up a name. Parallel
//! loops hand each iteration its own copy of the frame; buffers realized
//! inside such a loop are therefore private to the iteration, while
//! buffers realized outside it are shared and written through atomics.

use crate::buffer::Buffer;
use crate::codegen::Target;
use crate::ir::ops::{eval_binary, eval_cast, eval_compare, eval_math};
use crate::ir::plan::{AssertKind, ForKind, PExpr, PNode, Stmt};
use crate::ir::types::{Type, Value};
use crate::lower::{BufferInfo, Lowered, ScalarInfo};
use crate::utils::config::JitConfig;
use crate::utils::errors::{
    compile_error, internal_error, CompileErrorKind, FlowError, FlowResult, RuntimeError, RuntimeErrorKind,
};
use log::{debug, info};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Log target of `trace_stores` output.
pub const TRACE_TARGET: &str = "pixelflow::trace";

#[derive(Clone)]
enum Slot<'a> {
    Empty,
    Borrowed(&'a Buffer),
    Owned(Arc<Buffer>),
}

impl Slot<'_> {
    fn get(&self) -> Option<&Buffer> {
        match self {
            Slot::Empty => None,
            Slot::Borrowed(b) => Some(b),
            Slot::Owned(b) => Some(b),
        }
    }
}

/// Variable and buffer state of one thread of execution.
#[derive(Clone)]
pub struct Frame<'a> {
    vars: Vec<Value>,
    buffers: Vec<Slot<'a>>,
}

impl<'a> Frame<'a> {
    fn new(vars: usize, buffers: usize) -> Self {
        Self { vars: vec![Value::Int(0); vars], buffers: vec![Slot::Empty; buffers] }
    }

    fn buffer(&self, slot: usize, name: &str) -> FlowResult<&Buffer> {
        self.buffers
            .get(slot)
            .and_then(Slot::get)
            .ok_or_else(|| internal_error(format!("Buffer {} is used outside its realization", name)))
    }
}

type ExprFn = Box<dyn Fn(&mut Frame<'_>) -> FlowResult<Value> + Send + Sync>;
type StmtFn = Box<dyn Fn(&mut Frame<'_>) -> FlowResult<()> + Send + Sync>;

fn expr_fn<F>(f: F) -> ExprFn
where
    F: Fn(&mut Frame<'_>) -> FlowResult<Value> + Send + Sync + 'static,
{
    Box::new(f)
}

fn stmt_fn<F>(f: F) -> StmtFn
where
    F: Fn(&mut Frame<'_>) -> FlowResult<()> + Send + Sync + 'static,
{
    Box::new(f)
}

fn coords(args: &[ExprFn], frame: &mut Frame<'_>) -> FlowResult<Vec<i64>> {
    args.iter().map(|a| a(frame).map(|v| v.as_i64())).collect()
}

/// Name to slot resolution with lexical scoping.
#[derive(Default)]
struct Compiler {
    var_slots: HashMap<String, usize>,
    var_depth: HashMap<String, usize>,
    buffer_slots: HashMap<String, usize>,
    buffer_depth: HashMap<String, usize>,
    pool: Option<Arc<ThreadPool>>,
}

impl Compiler {
    fn bind_var(&mut self, name: &str) -> usize {
        let next = self.var_slots.len();
        let slot = *self.var_slots.entry(name.to_string()).or_insert(next);
        *self.var_depth.entry(name.to_string()).or_insert(0) += 1;
        slot
    }

    fn unbind_var(&mut self, name: &str) {
        if let Some(d) = self.var_depth.get_mut(name) {
            *d = d.saturating_sub(1);
        }
    }

    fn var(&self, name: &str) -> FlowResult<usize> {
        match (self.var_slots.get(name), self.var_depth.get(name)) {
            (Some(&slot), Some(&depth)) if depth > 0 => Ok(slot),
            _ => Err(internal_error(format!("Variable {} is used outside its scope", name))),
        }
    }

    fn bind_buffer(&mut self, name: &str) -> usize {
        let next = self.buffer_slots.len();
        let slot = *self.buffer_slots.entry(name.to_string()).or_insert(next);
        *self.buffer_depth.entry(name.to_string()).or_insert(0) += 1;
        slot
    }

    fn unbind_buffer(&mut self, name: &str) {
        if let Some(d) = self.buffer_depth.get_mut(name) {
            *d = d.saturating_sub(1);
        }
    }

    fn buffer(&self, name: &str) -> FlowResult<usize> {
        match (self.buffer_slots.get(name), self.buffer_depth.get(name)) {
            (Some(&slot), Some(&depth)) if depth > 0 => Ok(slot),
            _ => Err(internal_error(format!("Buffer {} is used outside its realization", name))),
        }
    }

    fn expr(&mut self, e: &PExpr) -> FlowResult<ExprFn> {
        let ty = e.ty;
        Ok(match &e.node {
            PNode::Const(v) => {
                let v = *v;
                expr_fn(move |_| Ok(v))
            }
            PNode::Var(name) => {
                let slot = self.var(name)?;
                expr_fn(move |f| Ok(f.vars[slot]))
            }
            PNode::Cast(a) => {
                let a = self.expr(a)?;
                expr_fn(move |f| Ok(eval_cast(ty, a(f)?)))
            }
            PNode::Binary(op, a, b) => {
                let (op, operand_ty) = (*op, a.ty);
                let (a, b) = (self.expr(a)?, self.expr(b)?);
                expr_fn(move |f| Ok(eval_binary(op, operand_ty, a(f)?, b(f)?)))
            }
            PNode::Compare(op, a, b) => {
                let (op, operand_ty) = (*op, a.ty);
                let (a, b) = (self.expr(a)?, self.expr(b)?);
                expr_fn(move |f| Ok(Value::Bool(eval_compare(op, operand_ty, a(f)?, b(f)?))))
            }
            PNode::And(a, b) => {
                let (a, b) = (self.expr(a)?, self.expr(b)?);
                expr_fn(move |f| Ok(Value::Bool(a(f)?.as_bool() && b(f)?.as_bool())))
            }
            PNode::Or(a, b) => {
                let (a, b) = (self.expr(a)?, self.expr(b)?);
                expr_fn(move |f| Ok(Value::Bool(a(f)?.as_bool() || b(f)?.as_bool())))
            }
            PNode::Not(a) => {
                let a = self.expr(a)?;
                expr_fn(move |f| Ok(Value::Bool(!a(f)?.as_bool())))
            }
            PNode::Select(c, t, e) => {
                let (c, t, e) = (self.expr(c)?, self.expr(t)?, self.expr(e)?);
                expr_fn(move |f| if c(f)?.as_bool() { t(f) } else { e(f) })
            }
            PNode::Math(func, args) => {
                let func = *func;
                let args = args.iter().map(|a| self.expr(a)).collect::<FlowResult<Vec<_>>>()?;
                expr_fn(move |f| {
                    let values = args.iter().map(|a| a(f)).collect::<FlowResult<Vec<_>>>()?;
                    Ok(eval_math(func, ty, &values))
                })
            }
            PNode::Load { buffer, args } => {
                let slot = self.buffer(buffer)?;
                let args = args.iter().map(|a| self.expr(a)).collect::<FlowResult<Vec<_>>>()?;
                let name = buffer.clone();
                expr_fn(move |f| {
                    let at = coords(&args, f)?;
                    f.buffer(slot, &name)?.load(&at).map_err(|e| e.with_subject(name.as_str()))
                })
            }
            PNode::Let { name, value, body } => {
                let value = self.expr(value)?;
                let slot = self.bind_var(name);
                let body = self.expr(body);
                self.unbind_var(name);
                let body = body?;
                expr_fn(move |f| {
                    let v = value(f)?;
                    let saved = std::mem::replace(&mut f.vars[slot], v);
                    let result = body(f);
                    f.vars[slot] = saved;
                    result
                })
            }
        })
    }

    fn stmt(&mut self, s: &Stmt) -> FlowResult<StmtFn> {
        Ok(match s {
            Stmt::For { name, min, extent, kind, body } => {
                let (min, extent) = (self.expr(min)?, self.expr(extent)?);
                let slot = self.bind_var(name);
                let body = self.stmt(body);
                self.unbind_var(name);
                let body = body?;
                if *kind == ForKind::Parallel {
                    self.parallel_loop(slot, min, extent, body)
                } else {
                    stmt_fn(move |f| {
                        let lo = min(f)?.as_i64();
                        let n = extent(f)?.as_i64();
                        let saved = f.vars[slot];
                        for i in lo..lo + n {
                            f.vars[slot] = Value::Int(i);
                            body(f)?;
                        }
                        f.vars[slot] = saved;
                        Ok(())
                    })
                }
            }
            Stmt::LetStmt { name, value, body } => {
                let value = self.expr(value)?;
                let slot = self.bind_var(name);
                let body = self.stmt(body);
                self.unbind_var(name);
                let body = body?;
                stmt_fn(move |f| {
                    let v = value(f)?;
                    let saved = std::mem::replace(&mut f.vars[slot], v);
                    let result = body(f);
                    f.vars[slot] = saved;
                    result
                })
            }
            Stmt::Store { buffer, args, value, trace } => {
                let slot = self.buffer(buffer)?;
                let args = args.iter().map(|a| self.expr(a)).collect::<FlowResult<Vec<_>>>()?;
                let value = self.expr(value)?;
                let (name, trace) = (buffer.clone(), *trace);
                stmt_fn(move |f| {
                    let at = coords(&args, f)?;
                    let v = value(f)?;
                    if trace {
                        info!(target: TRACE_TARGET, "store {}{:?} = {}", name, at, v);
                    }
                    f.buffer(slot, &name)?.store(&at, v).map_err(|e| e.with_subject(name.as_str()))
                })
            }
            Stmt::Realize { buffers, bounds, body } => {
                let bounds = bounds
                    .iter()
                    .map(|(m, e)| Ok((self.expr(m)?, self.expr(e)?)))
                    .collect::<FlowResult<Vec<_>>>()?;
                let allocs: Vec<(usize, Type)> = buffers.iter().map(|b| (self.bind_buffer(&b.name), b.ty)).collect();
                let body = self.stmt(body);
                buffers.iter().for_each(|b| self.unbind_buffer(&b.name));
                let body = body?;
                stmt_fn(move |f| {
                    let region = bounds
                        .iter()
                        .map(|(m, e)| Ok((m(f)?.as_i64(), e(f)?.as_i64())))
                        .collect::<FlowResult<Vec<_>>>()?;
                    let mut saved = Vec::with_capacity(allocs.len());
                    for &(slot, ty) in &allocs {
                        let buffer = Arc::new(Buffer::with_bounds(ty, &region));
                        saved.push(std::mem::replace(&mut f.buffers[slot], Slot::Owned(buffer)));
                    }
                    let result = body(f);
                    for (&(slot, _), old) in allocs.iter().zip(saved) {
                        f.buffers[slot] = old;
                    }
                    result
                })
            }
            Stmt::Block(stmts) => {
                let stmts = stmts.iter().map(|s| self.stmt(s)).collect::<FlowResult<Vec<_>>>()?;
                stmt_fn(move |f| stmts.iter().try_for_each(|s| s(f)))
            }
            Stmt::IfThenElse { condition, then_case } => {
                let condition = self.expr(condition)?;
                let then_case = self.stmt(then_case)?;
                stmt_fn(move |f| if condition(f)?.as_bool() { then_case(f) } else { Ok(()) })
            }
            Stmt::Assert { condition, message, values, kind } => {
                let condition = self.expr(condition)?;
                let values = values.iter().map(|v| self.expr(v)).collect::<FlowResult<Vec<_>>>()?;
                let (message, kind) = (message.clone(), *kind);
                stmt_fn(move |f| {
                    if condition(f)?.as_bool() {
                        return Ok(());
                    }
                    let shown = values
                        .iter()
                        .map(|v| v(f).map(|v| v.to_string()))
                        .collect::<FlowResult<Vec<_>>>()?;
                    let error_kind = match kind {
                        AssertKind::ParamRange => RuntimeErrorKind::ParamOutOfRange,
                        AssertKind::Generic => RuntimeErrorKind::AssertionFailed,
                    };
                    Err(RuntimeError::new(error_kind, format!("{} ({})", message, shown.join(", "))).into())
                })
            }
        })
    }

    fn parallel_loop(&self, slot: usize, min: ExprFn, extent: ExprFn, body: StmtFn) -> StmtFn {
        let pool = self.pool.clone();
        stmt_fn(move |f| {
            let lo = min(f)?.as_i64();
            let n = extent(f)?.as_i64();
            let base: &Frame<'_> = &*f;
            let run = || {
                (lo..lo + n).into_par_iter().try_for_each(|i| {
                    let mut local = base.clone();
                    local.vars[slot] = Value::Int(i);
                    body(&mut local)
                })
            };
            match &pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        })
    }
}

/// Scalar and image inputs for one execution.
#[derive(Clone, Default)]
pub struct PipelineArgs {
    scalars: HashMap<String, Value>,
    images: HashMap<String, Arc<Buffer>>,
}

impl PipelineArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(mut self, name: &str, value: Value) -> Self {
        self.set_scalar(name, value);
        self
    }

    pub fn image(mut self, name: &str, buffer: Arc<Buffer>) -> Self {
        self.set_image(name, buffer);
        self
    }

    pub fn set_scalar(&mut self, name: &str, value: Value) {
        self.scalars.insert(name.to_string(), value);
    }

    pub fn set_image(&mut self, name: &str, buffer: Arc<Buffer>) {
        self.images.insert(name.to_string(), buffer);
    }
}

struct ImageSlots {
    info: BufferInfo,
    buffer: usize,
    mins: Vec<usize>,
    extents: Vec<usize>,
}

fn bad_arguments(message: String) -> FlowError {
    RuntimeError::new(RuntimeErrorKind::BadArguments, message).into()
}

/// A lowered pipeline ready to run on the host.
pub struct CompiledPipeline {
    plan: Lowered,
    target: Target,
    body: StmtFn,
    num_vars: usize,
    num_buffers: usize,
    outputs: Vec<usize>,
    output_mins: Vec<usize>,
    output_extents: Vec<usize>,
    params: Vec<(ScalarInfo, usize)>,
    images: Vec<ImageSlots>,
}

impl CompiledPipeline {
    pub fn new(plan: Lowered, config: &JitConfig) -> FlowResult<Self> {
        if !config.target.runs_on_host() {
            return Err(compile_error(
                CompileErrorKind::UnsupportedTarget,
                format!("The JIT can't run code for {} on this machine", config.target),
            )
            .with_subject(plan.name.as_str()));
        }
        let pool = match config.num_threads {
            Some(n) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| internal_error(format!("Can't start {} worker threads: {}", n, e)))?,
            )),
            None => None,
        };
        let mut compiler = Compiler { pool, ..Compiler::default() };

        let dims = plan.outputs.first().map_or(0, |b| b.dims);
        let output_mins = (0..dims).map(|i| compiler.bind_var(&format!("{}.min.{}", plan.name, i))).collect();
        let output_extents = (0..dims).map(|i| compiler.bind_var(&format!("{}.extent.{}", plan.name, i))).collect();
        let outputs = plan.outputs.iter().map(|b| compiler.bind_buffer(&b.name)).collect();
        let params = plan.params.iter().map(|p| (p.clone(), compiler.bind_var(&p.name))).collect();
        let images = plan
            .images
            .iter()
            .map(|info| ImageSlots {
                buffer: compiler.bind_buffer(&info.name),
                mins: (0..info.dims).map(|d| compiler.bind_var(&format!("{}.min.{}", info.name, d))).collect(),
                extents: (0..info.dims).map(|d| compiler.bind_var(&format!("{}.extent.{}", info.name, d))).collect(),
                info: info.clone(),
            })
            .collect();

        let body = compiler.stmt(&plan.body).map_err(|e| e.with_subject(plan.name.as_str()))?;
        if config.log_plans {
            info!("compiled plan for {}:\n{}", plan.name, plan);
        }
        debug!(
            "compiled {} for {}: {} variable slots, {} buffer slots",
            plan.name,
            config.target,
            compiler.var_slots.len(),
            compiler.buffer_slots.len()
        );
        Ok(Self {
            target: config.target.clone(),
            num_vars: compiler.var_slots.len(),
            num_buffers: compiler.buffer_slots.len(),
            body,
            outputs,
            output_mins,
            output_extents,
            params,
            images,
            plan,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn plan(&self) -> &Lowered {
        &self.plan
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|(p, _)| p.name.clone()).collect()
    }

    pub fn image_names(&self) -> Vec<String> {
        self.images.iter().map(|i| i.info.name.clone()).collect()
    }

    /// Compute the region covered by `outputs` into them.
    ///
    /// All outputs must have the pipeline's types, its dimensionality and
    /// one shared shape.
    pub fn run(&self, args: &PipelineArgs, outputs: &mut [Buffer]) -> FlowResult<()> {
        if outputs.len() != self.outputs.len() {
            return Err(bad_arguments(format!(
                "{} produces {} outputs but {} buffers were passed",
                self.plan.name,
                self.outputs.len(),
                outputs.len()
            )));
        }
        for (info, buffer) in self.plan.outputs.iter().zip(outputs.iter()) {
            buffer.check_shape(&info.name, info.ty, info.dims)?;
            if buffer.dims() != outputs[0].dims() {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::BadBuffer,
                    format!("Output {} doesn't have the same shape as the other outputs", info.name),
                )
                .into());
            }
        }
        let outputs: &[Buffer] = outputs;
        let mut frame = Frame::new(self.num_vars, self.num_buffers);

        if let Some(first) = outputs.first() {
            for (d, (&min, &extent)) in self.output_mins.iter().zip(&self.output_extents).enumerate() {
                frame.vars[min] = Value::Int(first.min(d));
                frame.vars[extent] = Value::Int(first.extent(d));
            }
        }
        for (&slot, buffer) in self.outputs.iter().zip(outputs) {
            frame.buffers[slot] = Slot::Borrowed(buffer);
        }
        for (info, slot) in &self.params {
            let value = args
                .scalars
                .get(&info.name)
                .ok_or_else(|| bad_arguments(format!("No value passed for parameter {}", info.name)))?;
            frame.vars[*slot] = eval_cast(info.ty, *value);
        }
        for image in &self.images {
            let buffer = args
                .images
                .get(&image.info.name)
                .ok_or_else(|| bad_arguments(format!("No buffer passed for image {}", image.info.name)))?;
            buffer.check_shape(&image.info.name, image.info.ty, image.info.dims)?;
            for (d, (&min, &extent)) in image.mins.iter().zip(&image.extents).enumerate() {
                frame.vars[min] = Value::Int(buffer.min(d));
                frame.vars[extent] = Value::Int(buffer.extent(d));
            }
            frame.buffers[image.buffer] = Slot::Borrowed(buffer.as_ref());
        }

        (self.body)(&mut frame)
    }
}

impl fmt::Debug for CompiledPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompiledPipeline({} for {})", self.plan.name, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::Func;
    use crate::ir::expr::Expr;
    use crate::ir::var::Var;
    use crate::lower::lower;

    fn compile(f: &Func) -> CompiledPipeline {
        CompiledPipeline::new(lower(f).unwrap(), &JitConfig::default()).unwrap()
    }

    #[test]
    fn test_run_pure_func() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let f = Func::new("f");
        f.define(&[x, y], x + y * 10).unwrap();
        let pipeline = compile(&f);
        let mut out = [Buffer::new(Type::int(32), &[3, 2])];
        pipeline.run(&PipelineArgs::new(), &mut out).unwrap();
        assert_eq!(out[0].to_vec::<i32>(), vec![0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let f = Func::new("f");
        f.define(&[x, y], x * y).unwrap();
        f.parallel(y);
        let pipeline = CompiledPipeline::new(lower(&f).unwrap(), &JitConfig::new().threads(3)).unwrap();
        let mut out = [Buffer::new(Type::int(32), &[5, 7])];
        pipeline.run(&PipelineArgs::new(), &mut out).unwrap();
        assert_eq!(out[0].get::<i32>(&[4, 6]), Some(24));
    }

    #[test]
    fn test_wrong_output_type() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        let pipeline = compile(&f);
        let mut out = [Buffer::new(Type::float(32), &[4])];
        let err = pipeline.run(&PipelineArgs::new(), &mut out).unwrap_err();
        assert_eq!(err.as_runtime().map(|e| e.kind), Some(RuntimeErrorKind::BadBuffer));
    }

    #[test]
    fn test_missing_scalar() {
        let x = Var::new("x");
        let p = crate::ir::param::Param::new("k", Type::int(32));
        let f = Func::new("f");
        f.define(&[x], Expr::from(x) + &p).unwrap();
        let pipeline = compile(&f);
        assert_eq!(pipeline.param_names(), vec!["k".to_string()]);
        let mut out = [Buffer::new(Type::int(32), &[4])];
        assert!(pipeline.run(&PipelineArgs::new(), &mut out).is_err());
        pipeline.run(&PipelineArgs::new().scalar("k", Value::Int(5)), &mut out).unwrap();
        assert_eq!(out[0].to_vec::<i32>(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_gpu_target_rejected() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        let config = JitConfig::new().target(Target::host().with_feature("cuda"));
        let err = CompiledPipeline::new(lower(&f).unwrap(), &config).unwrap_err();
        assert_eq!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::UnsupportedTarget));
    }

    #[test]
    fn test_select_is_lazy() {
        let body = Stmt::Store {
            buffer: "out".into(),
            args: vec![PExpr::int(0)],
            value: PExpr::select(
                PExpr::compare(crate::ir::expr::CmpOp::Lt, PExpr::int_var("out.extent.0"), PExpr::int(0)),
                PExpr::load("out", Type::int(32), vec![PExpr::int(100)]),
                PExpr::int(9),
            ),
            trace: false,
        };
        let plan = Lowered {
            name: "out".into(),
            body,
            outputs: vec![BufferInfo { name: "out".into(), ty: Type::int(32), dims: 1 }],
            images: vec![],
            params: vec![],
            key: Default::default(),
        };
        let pipeline = CompiledPipeline::new(plan, &JitConfig::default()).unwrap();
        let mut out = [Buffer::new(Type::int(32), &[1])];
        pipeline.run(&PipelineArgs::new(), &mut out).unwrap();
        assert_eq!(out[0].get::<i32>(&[0]), Some(9));
    }
}

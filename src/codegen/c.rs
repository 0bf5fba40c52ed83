//! C code generation.
//!
//! Emits a header declaring the pipeline entry point and a source file
//! implementing it. The source relies on GNU statement expressions for
//! expression-level lets, so it needs gcc or clang.

use crate::ir::expr::{BinOp, MathFn};
use crate::ir::plan::{ForKind, PExpr, PNode, Stmt};
use crate::ir::types::{Type, TypeCode, Value};
use crate::lower::Lowered;
use crate::utils::errors::FlowResult;
use crate::utils::pretty::{c_identifier, CodeFormatter};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

const BUFFER_TYPEDEF: &str = "\
#ifndef PIXELFLOW_BUFFER_T_DEFINED
#define PIXELFLOW_BUFFER_T_DEFINED
#define PIXELFLOW_MAX_DIMS 8
typedef struct pixelflow_buffer_t {
    void *host;
    int32_t dimensions;
    int32_t min[PIXELFLOW_MAX_DIMS];
    int32_t extent[PIXELFLOW_MAX_DIMS];
    int32_t stride[PIXELFLOW_MAX_DIMS];
} pixelflow_buffer_t;
#endif";

const HELPERS: &str = "\
#define PF_MIN(a, b) ((a) < (b) ? (a) : (b))
#define PF_MAX(a, b) ((a) > (b) ? (a) : (b))
#define PF_ABS(a) ((a) < 0 ? -(a) : (a))

static inline int64_t pf_div(int64_t a, int64_t b) {
    if (b == 0) return 0;
    int64_t q = a / b, r = a % b;
    if (r < 0) q += (b > 0) ? -1 : 1;
    return q;
}

static inline int64_t pf_mod(int64_t a, int64_t b) {
    if (b == 0) return 0;
    int64_t r = a % b;
    if (r < 0) r += (b > 0) ? b : -b;
    return r;
}";

/// C code generator.
pub struct CCodeGen {
    /// Enable OpenMP pragmas on parallel loops
    openmp: bool,
}

impl CCodeGen {
    pub fn new(openmp: bool) -> Self {
        Self { openmp }
    }

    fn signature(&self, plan: &Lowered) -> String {
        let mut params: Vec<String> = plan
            .params
            .iter()
            .map(|p| format!("{} {}", p.ty.c_name(), c_identifier(&p.name)))
            .collect();
        params.extend(plan.images.iter().map(|b| format!("pixelflow_buffer_t *{}", c_identifier(&b.name))));
        params.extend(plan.outputs.iter().map(|b| format!("pixelflow_buffer_t *{}", c_identifier(&b.name))));
        format!("int {}({})", c_identifier(&plan.name), params.join(", "))
    }

    /// The header declaring the entry point.
    pub fn header(&self, plan: &Lowered) -> String {
        let guard = format!("PIXELFLOW_{}_H", c_identifier(&plan.name).to_uppercase());
        let mut f = CodeFormatter::new("    ");
        f.writeln(&format!("#ifndef {}", guard));
        f.writeln(&format!("#define {}", guard));
        f.newline();
        f.writeln("#include <stdint.h>");
        f.newline();
        f.writeln(BUFFER_TYPEDEF);
        f.newline();
        f.writeln("#ifdef __cplusplus");
        f.writeln("extern \"C\" {");
        f.writeln("#endif");
        f.newline();
        f.writeln("/* Returns 0 on success, -1 if an assertion or store bound fails, -2 if an allocation fails. */");
        f.writeln(&format!("{};", self.signature(plan)));
        f.newline();
        f.writeln("#ifdef __cplusplus");
        f.writeln("}");
        f.writeln("#endif");
        f.newline();
        f.writeln(&format!("#endif /* {} */", guard));
        f.finish()
    }

    /// The source implementing the entry point declared in `header_name`.
    pub fn source(&self, plan: &Lowered, header_name: &str) -> String {
        let mut f = CodeFormatter::new("    ");
        f.writeln("#include <stdbool.h>");
        f.writeln("#include <stdint.h>");
        f.writeln("#include <stdio.h>");
        f.writeln("#include <stdlib.h>");
        f.writeln("#include <math.h>");
        if self.openmp {
            f.writeln("#include <omp.h>");
        }
        f.writeln(&format!("#include \"{}\"", header_name));
        f.newline();
        f.writeln(HELPERS);
        f.newline();
        f.block(&self.signature(plan), |f| {
            if let Some(first) = plan.outputs.first() {
                let out = c_identifier(&first.name);
                for d in 0..first.dims {
                    let min = c_identifier(&format!("{}.min.{}", plan.name, d));
                    let extent = c_identifier(&format!("{}.extent.{}", plan.name, d));
                    f.writeln(&format!("const int32_t {} = {}->min[{}];", min, out, d));
                    f.writeln(&format!("const int32_t {} = {}->extent[{}];", extent, out, d));
                }
            }
            for image in &plan.images {
                let buf = c_identifier(&image.name);
                for d in 0..image.dims {
                    let min = c_identifier(&format!("{}.min.{}", image.name, d));
                    let extent = c_identifier(&format!("{}.extent.{}", image.name, d));
                    f.writeln(&format!("const int32_t {} = {}->min[{}];", min, buf, d));
                    f.writeln(&format!("const int32_t {} = {}->extent[{}];", extent, buf, d));
                }
            }
            f.writeln("int pf_status = 0;");
            self.stmt(f, &plan.body, false);
            f.writeln("return pf_status;");
        });
        f.finish()
    }

    /// Write `<stem>.h` and `<stem>.c`.
    pub fn write_files(&self, plan: &Lowered, stem: &Path) -> FlowResult<(PathBuf, PathBuf)> {
        let header_path = stem.with_extension("h");
        let source_path = stem.with_extension("c");
        let header_name = header_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.h", plan.name));
        fs::write(&header_path, self.header(plan))?;
        fs::write(&source_path, self.source(plan, &header_name))?;
        info!("wrote {} and {}", header_path.display(), source_path.display());
        Ok((header_path, source_path))
    }

    /// Leave the entry point with `code`. Inside an OpenMP region the
    /// code is recorded in `pf_status` instead, since branching out of the
    /// region is not allowed.
    fn fail(&self, f: &mut CodeFormatter, code: i32, in_region: bool) {
        if in_region {
            f.writeln(&format!("pf_status = {};", code));
        } else {
            f.writeln(&format!("return {};", code));
        }
    }

    fn opens_region(&self, kind: ForKind) -> bool {
        match kind {
            ForKind::Parallel => self.openmp,
            ForKind::Vectorized => true,
            ForKind::Serial | ForKind::Unrolled => false,
        }
    }

    fn stmts(&self, f: &mut CodeFormatter, stmts: &[Stmt], in_region: bool) {
        for (i, s) in stmts.iter().enumerate() {
            match s {
                // Whatever follows a failed assertion is skipped.
                Stmt::Assert { condition, message, .. } if in_region => {
                    self.assert_failure(f, condition, message, true);
                    let rest = &stmts[i + 1..];
                    if !rest.is_empty() {
                        f.block("else", |f| self.stmts(f, rest, true));
                    }
                    return;
                }
                _ => self.stmt(f, s, in_region),
            }
        }
    }

    fn assert_failure(&self, f: &mut CodeFormatter, condition: &PExpr, message: &str, in_region: bool) {
        f.block(&format!("if (!({}))", self.expr(condition)), |f| {
            f.writeln(&format!("fprintf(stderr, \"%s\\n\", \"{}\");", message.replace('"', "\\\"")));
            self.fail(f, -1, in_region);
        });
    }

    fn stmt(&self, f: &mut CodeFormatter, s: &Stmt, in_region: bool) {
        match s {
            Stmt::For { name, min, extent, kind, body } => {
                let var = c_identifier(name);
                let inner_region = in_region || self.opens_region(*kind);
                f.block("", |f| {
                    f.writeln(&format!("const int32_t {}_lo = {};", var, self.expr(min)));
                    f.writeln(&format!("const int32_t {}_n = {};", var, self.expr(extent)));
                    match kind {
                        ForKind::Parallel if self.openmp => f.directive("#pragma omp parallel for"),
                        ForKind::Vectorized => f.directive("#pragma omp simd"),
                        ForKind::Unrolled => f.directive("#pragma GCC unroll 8"),
                        _ => {}
                    }
                    f.block(
                        &format!("for (int32_t {v} = {v}_lo; {v} < {v}_lo + {v}_n; {v}++)", v = var),
                        |f| self.stmt(f, body, inner_region),
                    );
                });
                if inner_region && !in_region {
                    f.writeln("if (pf_status) return pf_status;");
                }
            }
            Stmt::LetStmt { name, value, body } => {
                f.writeln(&format!("const {} {} = {};", value.ty.c_name(), c_identifier(name), self.expr(value)));
                self.stmt(f, body, in_region);
            }
            Stmt::Store { buffer, args, value, trace } => {
                let id = c_identifier(buffer);
                f.block("", |f| {
                    let coords: Vec<String> = (0..args.len()).map(|d| format!("pf_c{}", d)).collect();
                    for (c, a) in coords.iter().zip(args) {
                        f.writeln(&format!("const int64_t {} = {};", c, self.expr(a)));
                    }
                    let inside: Vec<String> = coords
                        .iter()
                        .enumerate()
                        .map(|(d, c)| {
                            format!(
                                "{c} >= {b}->min[{d}] && {c} < (int64_t){b}->min[{d}] + {b}->extent[{d}]",
                                c = c,
                                b = id,
                                d = d
                            )
                        })
                        .collect();
                    let inside = if inside.is_empty() { "true".to_string() } else { inside.join(" && ") };
                    f.block(&format!("if ({})", inside), |f| {
                        if *trace {
                            let fmt = vec!["%lld"; args.len()].join(", ");
                            let mut printed: Vec<String> = coords.iter().map(|c| format!("(long long){}", c)).collect();
                            printed.push(format!("(double)({})", self.expr(value)));
                            f.writeln(&format!(
                                "fprintf(stderr, \"store {}[{}] = %f\\n\", {});",
                                buffer,
                                fmt,
                                printed.join(", ")
                            ));
                        }
                        f.writeln(&format!("{} = {};", self.element_at(buffer, value.ty, &coords), self.expr(value)));
                    });
                    f.block("else", |f| {
                        f.writeln(&format!("fprintf(stderr, \"%s\\n\", \"Store to {} is out of bounds\");", buffer));
                        self.fail(f, -1, in_region);
                    });
                });
            }
            Stmt::Realize { buffers, bounds, body } => {
                f.block("", |f| {
                    for b in buffers {
                        let id = c_identifier(&b.name);
                        f.writeln(&format!("pixelflow_buffer_t {}_storage;", id));
                        f.writeln(&format!("pixelflow_buffer_t *{} = &{}_storage;", id, id));
                        f.writeln(&format!("{}->dimensions = {};", id, bounds.len()));
                        f.writeln(&format!("int64_t {}_size = 1;", id));
                        for (d, (min, extent)) in bounds.iter().enumerate() {
                            f.writeln(&format!("{}->min[{}] = {};", id, d, self.expr(min)));
                            f.writeln(&format!("{}->extent[{}] = PF_MAX({}, 0);", id, d, self.expr(extent)));
                            f.writeln(&format!("{}->stride[{}] = (int32_t){}_size;", id, d, id));
                            f.writeln(&format!("{}_size *= {}->extent[{}];", id, id, d));
                        }
                        f.writeln(&format!("{}->host = calloc((size_t)PF_MAX({}_size, 1), sizeof({}));", id, id, b.ty.c_name()));
                    }
                    let ids: Vec<String> = buffers.iter().map(|b| c_identifier(&b.name)).collect();
                    let missing: Vec<String> = ids.iter().map(|id| format!("!{}->host", id)).collect();
                    let free_all = |f: &mut CodeFormatter| {
                        for id in &ids {
                            f.writeln(&format!("free({}->host);", id));
                        }
                    };
                    if missing.is_empty() {
                        self.stmt(f, body, in_region);
                    } else if in_region {
                        f.block(&format!("if ({})", missing.join(" || ")), |f| self.fail(f, -2, true));
                        f.block("else", |f| self.stmt(f, body, true));
                    } else {
                        f.block(&format!("if ({})", missing.join(" || ")), |f| {
                            free_all(f);
                            self.fail(f, -2, false);
                        });
                        self.stmt(f, body, false);
                    }
                    free_all(f);
                });
            }
            Stmt::Block(stmts) => self.stmts(f, stmts, in_region),
            Stmt::IfThenElse { condition, then_case } => {
                f.block(&format!("if ({})", self.expr(condition)), |f| self.stmt(f, then_case, in_region));
            }
            Stmt::Assert { condition, message, .. } => self.assert_failure(f, condition, message, in_region),
        }
    }

    fn element(&self, buffer: &str, ty: Type, args: &[PExpr]) -> String {
        let coords: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
        self.element_at(buffer, ty, &coords)
    }

    fn element_at(&self, buffer: &str, ty: Type, coords: &[String]) -> String {
        let id = c_identifier(buffer);
        let index: Vec<String> = coords
            .iter()
            .enumerate()
            .map(|(d, c)| format!("(({}) - {}->min[{}]) * {}->stride[{}]", c, id, d, id, d))
            .collect();
        let index = if index.is_empty() { "0".to_string() } else { index.join(" + ") };
        format!("(({} *){}->host)[{}]", ty.c_name(), id, index)
    }

    fn constant(ty: Type, v: Value) -> String {
        match (ty.code, ty.bits, v) {
            (TypeCode::Bool, _, v) => if v.as_bool() { "true" } else { "false" }.to_string(),
            (TypeCode::Float, 32, v) => format!("{:?}f", v.as_f64() as f32),
            (TypeCode::Float, _, v) => format!("{:?}", v.as_f64()),
            (TypeCode::Int, 64, v) => format!("{}LL", v.as_i64()),
            (TypeCode::Int, _, v) => format!("({}){}", ty.c_name(), v.as_i64()),
            (TypeCode::UInt, 64, v) => format!("{}ULL", v.as_u64()),
            (TypeCode::UInt, _, v) => format!("({}){}u", ty.c_name(), v.as_u64()),
        }
    }

    fn expr(&self, e: &PExpr) -> String {
        let ty = e.ty;
        match &e.node {
            PNode::Const(v) => Self::constant(ty, *v),
            PNode::Var(name) => c_identifier(name),
            PNode::Cast(a) => format!("(({})({}))", ty.c_name(), self.expr(a)),
            PNode::Binary(op, a, b) => {
                let (x, y) = (self.expr(a), self.expr(b));
                match (op, a.ty.code) {
                    (BinOp::Min, _) => format!("PF_MIN({}, {})", x, y),
                    (BinOp::Max, _) => format!("PF_MAX({}, {})", x, y),
                    (BinOp::Div, TypeCode::Int) => format!("(({})pf_div({}, {}))", ty.c_name(), x, y),
                    (BinOp::Mod, TypeCode::Int) => format!("(({})pf_mod({}, {}))", ty.c_name(), x, y),
                    (BinOp::Div | BinOp::Mod, TypeCode::UInt) => {
                        format!("(({}) == 0 ? 0 : ({}) {} ({}))", y, x, op.symbol(), y)
                    }
                    (BinOp::Mod, TypeCode::Float) => {
                        format!("(({}) - ({}) * floor(({}) / ({})))", x, y, x, y)
                    }
                    _ => format!("(({})({} {} {}))", ty.c_name(), x, op.symbol(), y),
                }
            }
            PNode::Compare(op, a, b) => format!("({} {} {})", self.expr(a), op.symbol(), self.expr(b)),
            PNode::And(a, b) => format!("({} && {})", self.expr(a), self.expr(b)),
            PNode::Or(a, b) => format!("({} || {})", self.expr(a), self.expr(b)),
            PNode::Not(a) => format!("!({})", self.expr(a)),
            PNode::Select(c, t, f) => format!("({} ? {} : {})", self.expr(c), self.expr(t), self.expr(f)),
            PNode::Math(MathFn::Abs, args) => {
                let a = args.first().map(|a| self.expr(a)).unwrap_or_else(|| "0".into());
                format!("(({})PF_ABS({}))", ty.c_name(), a)
            }
            PNode::Math(func, args) => {
                let args: Vec<String> = args.iter().map(|a| format!("(double)({})", self.expr(a))).collect();
                format!("(({}){}({}))", ty.c_name(), func.name(), args.join(", "))
            }
            PNode::Load { buffer, args } => self.element(buffer, ty, args),
            PNode::Let { name, value, body } => format!(
                "({{ const {} {} = {}; {}; }})",
                value.ty.c_name(),
                c_identifier(name),
                self.expr(value),
                self.expr(body)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::Func;
    use crate::ir::var::Var;
    use crate::lower::lower;

    #[test]
    fn test_header_declares_entry_point() {
        let x = Var::new("x");
        let f = Func::new("brighten");
        f.define(&[x], x + 1).unwrap();
        let header = CCodeGen::new(false).header(&lower(&f).unwrap());
        assert!(header.contains("#ifndef PIXELFLOW_BRIGHTEN_H"));
        assert!(header.contains("int brighten(pixelflow_buffer_t *brighten);"));
    }

    #[test]
    fn test_parallel_loop_gets_pragma() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let f = Func::new("grid");
        f.define(&[x, y], x * y).unwrap();
        f.parallel(y);
        let plan = lower(&f).unwrap();
        let with = CCodeGen::new(true).source(&plan, "grid.h");
        assert!(with.contains("#pragma omp parallel for"));
        assert!(with.contains("#include \"grid.h\""));
        let without = CCodeGen::new(false).source(&plan, "grid.h");
        assert!(!without.contains("#pragma omp parallel for"));
    }

    /// The text of the first parallel loop, up to the status check that
    /// follows it.
    fn parallel_region(source: &str) -> &str {
        let start = source.find("#pragma omp parallel for").unwrap();
        let rest = &source[start..];
        &rest[..rest.find("if (pf_status) return pf_status;").unwrap()]
    }

    #[test]
    fn test_every_store_is_bounds_checked() {
        let x = Var::new("x");
        let f = Func::new("f3");
        f.define(&[x], x).unwrap();
        f.vectorize_by(x, 8);
        let source = CCodeGen::new(false).source(&lower(&f).unwrap(), "f3.h");
        assert!(source.contains("if (pf_c0 >= f3->min[0] && pf_c0 < (int64_t)f3->min[0] + f3->extent[0])"));
        assert!(source.contains("Store to f3 is out of bounds"));
        // The failing lane is reported, not returned from inside the simd loop.
        assert!(source.contains("pf_status = -1;"));
        assert!(source.contains("return pf_status;"));
    }

    #[test]
    fn test_no_branch_out_of_parallel_loop() {
        let (x, y, xi, yi) = (Var::new("x"), Var::new("y"), Var::new("xi"), Var::new("yi"));
        let g = Func::new("g");
        g.define(&[x, y], x + y).unwrap();
        g.root();
        let s = Func::new("s");
        s.define(&[x, y], g.call([x, y])).unwrap();
        s.at([x, y]).add_assign(1).unwrap();
        s.chunk(y);
        let out = Func::new("out");
        out.define(&[x, y], s.call([x, y]) * 2).unwrap();
        out.tile(x, y, xi, yi, 8, 4).parallel(y).vectorize(xi);

        let source = CCodeGen::new(true).source(&lower(&out).unwrap(), "out.h");
        let region = parallel_region(&source);
        assert!(region.contains("calloc("));
        assert!(region.contains("pf_status = -2;"));
        assert!(!region.contains("return"));

        // Without OpenMP the parallel loop is plain C and may return directly.
        let serial = CCodeGen::new(false).source(&lower(&out).unwrap(), "out.h");
        assert!(serial.contains("return -2;"));
    }

    #[test]
    fn test_euclidean_helpers_used() {
        let x = Var::new("x");
        let f = Func::new("m");
        f.define(&[x], crate::ir::expr::Expr::from(x) % 3).unwrap();
        let source = CCodeGen::new(false).source(&lower(&f).unwrap(), "m.h");
        assert!(source.contains("pf_mod("));
    }
}

//! # PixelFlow - an embedded language for array pipelines
//!
//! Pipelines are written as pure functions over integer coordinates
//! (`Func`s), optionally followed by update definitions that iterate a
//! reduction domain (`RDom`). How each Func is evaluated (loop order,
//! splitting, vectorization, parallelism, and where its values are
//! stored) is described separately by its schedule, so the same
//! algorithm can be retuned without being rewritten.
//!
//! ## Architecture
//!
//! ```text
//! Func graph + schedules → Environment → lower (bounds, loop nests, realizations)
//!                                          → JIT closures (CompiledPipeline) → realize
//!                                          → C source (compile_to_file)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use pixelflow::prelude::*;
//!
//! let (x, y) = (Var::new("x"), Var::new("y"));
//! let gradient = Func::new("gradient");
//! gradient.define(&[x, y], x + y)?;
//! gradient.vectorize_by(x, 4).parallel(y);
//!
//! let out = gradient.realize(&[640, 480])?;
//! assert_eq!(out.get::<i32>(&[3, 4]), Some(7));
//! ```

#![warn(clippy::all)]

pub mod ir;
pub mod func;
pub mod transform;
pub mod analysis;
pub mod lower;
pub mod codegen;
pub mod buffer;
pub mod bench;
pub mod apps;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports for writing pipelines.

    pub use crate::buffer::Buffer;
    pub use crate::codegen::{CompiledPipeline, Target};
    pub use crate::func::{lambda, maximum, minimum, product, sum, Func, FuncRef};
    pub use crate::ir::expr::{
        abs, cast, ceil, clamp, cos, exp, floor, log, max, min, pow, round, select, sin, sqrt,
    };
    pub use crate::ir::{Element, Expr, ImageParam, Param, RDom, RVar, Range, Type, Value, Var};
    pub use crate::utils::config::JitConfig;
    pub use crate::utils::errors::*;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_prelude_pipeline() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let gradient = Func::new("gradient");
        gradient.define(&[x, y], x + y).unwrap();
        gradient.vectorize_by(x, 4).parallel(y);
        let out = gradient.realize(&[8, 3]).unwrap();
        assert_eq!(out.get::<i32>(&[3, 2]), Some(5));
    }
}

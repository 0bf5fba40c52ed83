//! Analysis passes used during lowering.
//!
//! - `environment`: which Funcs and parameters a pipeline depends on
//! - `bounds`: symbolic regions read or written by a plan
//! - `modulus`: divisibility facts used to drop split guards

pub mod environment;
pub mod bounds;
pub mod modulus;

pub use environment::{CacheKey, Environment};
pub use bounds::{bounds_of, region_accessed, region_required, Interval, Scope};
pub use modulus::{modulus_remainder, modulus_remainder_plan, ModulusRemainder};

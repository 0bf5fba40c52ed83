//! Schedule transformations.
//!
//! Each directive a user issues on a Func becomes a `Transform` that
//! rewrites the Func's loop structure. Transforms never change what a
//! Func computes, only the order and placement of the computation.

pub mod directive;
pub mod schedule;
pub mod tiling;
pub mod interchange;
pub mod unrolling;
pub mod random;
pub mod scheduler;

pub use directive::ScheduleDirective;
pub use schedule::{ComputeLevel, Dim, Schedule, SplitRecord};
pub use scheduler::Scheduler;

use crate::utils::errors::FlowResult;

/// A rewrite of a Func's loop structure.
pub trait Transform {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()>;

    fn name(&self) -> &str;
}

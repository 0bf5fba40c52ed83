//! Resolving a Func's directives into a concrete schedule.

use crate::func::Func;
use crate::ir::plan::ForKind;
use crate::transform::schedule::{ComputeLevel, Schedule};
use crate::transform::Transform;
use crate::utils::errors::FlowResult;

/// Run a loop's iterations concurrently.
#[derive(Debug, Clone)]
pub struct Parallel {
    pub var: String,
}

impl Transform for Parallel {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        let target = schedule.resolve(&self.var)?;
        schedule.set_kind(&target, ForKind::Parallel)
    }

    fn name(&self) -> &str {
        "parallel"
    }
}

/// Set where the Func is computed. The last one issued wins.
#[derive(Debug, Clone)]
pub struct ComputeAt(pub ComputeLevel);

impl Transform for ComputeAt {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        schedule.compute = self.0.clone();
        Ok(())
    }

    fn name(&self) -> &str {
        match self.0 {
            ComputeLevel::Inline => "inline",
            ComputeLevel::Root => "root",
            ComputeLevel::Chunk(_) => "chunk",
        }
    }
}

/// Replays directives in issue order.
#[derive(Debug, Default)]
pub struct Scheduler {
    log_steps: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the schedule after every directive at debug level.
    pub fn with_step_logging(mut self, enable: bool) -> Self {
        self.log_steps = enable;
        self
    }

    /// The schedule of `func`'s pure definition.
    pub fn resolve(&self, func: &Func) -> FlowResult<Schedule> {
        let name = func.name();
        let mut schedule = Schedule::new(&func.args());
        for directive in func.schedule_directives() {
            let transform = directive.to_transform().map_err(|e| e.with_subject(name.clone()))?;
            transform.apply(&mut schedule).map_err(|e| e.with_subject(name.clone()))?;
            if self.log_steps {
                log::debug!("{}: after {}: {}", name, directive, schedule);
            }
        }
        Ok(schedule)
    }
}

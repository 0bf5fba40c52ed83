//! Seeded random schedules, for testing that scheduling never changes
//! results.
//!
//! Only semantics-preserving choices are drawn: guarded splits, loop
//! interchange, a parallel outer loop, and root or inline computation.
//! The same seed on the same Func always gives the same schedule.

use crate::ir::plan::ForKind;
use crate::transform::schedule::{ComputeLevel, Schedule};
use crate::transform::Transform;
use crate::utils::errors::FlowResult;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const SPLIT_FACTORS: [i64; 3] = [2, 4, 8];

#[derive(Debug, Clone)]
pub struct RandomSchedule {
    pub seed: u64,
}

impl RandomSchedule {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Transform for RandomSchedule {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        if schedule.dims.len() >= 2 && rng.gen_bool(0.5) {
            let picked: Vec<String> = schedule
                .dims
                .choose_multiple(&mut rng, 2)
                .map(|d| d.name.clone())
                .collect();
            schedule.swap(&picked[0], &picked[1])?;
        }

        let serial: Vec<String> = schedule
            .dims
            .iter()
            .filter(|d| d.kind == ForKind::Serial)
            .map(|d| d.name.clone())
            .collect();
        for name in serial {
            if !rng.gen_bool(0.25) {
                continue;
            }
            let factor = *SPLIT_FACTORS.choose(&mut rng).unwrap_or(&2);
            let (outer, inner) = (format!("{}$ro", name), format!("{}$ri", name));
            schedule.split_dim(&name, &outer, &inner, factor)?;
        }

        if rng.gen_bool(0.5) {
            if let Some(outermost) = schedule.dims.last_mut() {
                outermost.kind = ForKind::Parallel;
            }
        }

        schedule.compute = if rng.gen_bool(0.5) { ComputeLevel::Root } else { ComputeLevel::Inline };
        log::debug!("random schedule (seed {}): {}", self.seed, schedule);
        Ok(())
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::Var;

    fn random_schedule(seed: u64) -> Schedule {
        let mut s = Schedule::new(&[Var::new("x"), Var::new("y")]);
        RandomSchedule::new(seed).apply(&mut s).unwrap();
        s
    }

    #[test]
    fn test_deterministic() {
        for seed in 0..16 {
            let a = random_schedule(seed);
            let b = random_schedule(seed);
            assert_eq!(a.dims, b.dims);
            assert_eq!(a.splits, b.splits);
            assert_eq!(a.compute, b.compute);
        }
    }

    #[test]
    fn test_never_unguarded() {
        for seed in 0..64 {
            let s = random_schedule(seed);
            assert!(s
                .dims
                .iter()
                .all(|d| !matches!(d.kind, ForKind::Vectorized | ForKind::Unrolled)));
            assert!(s.splits.iter().all(|sp| SPLIT_FACTORS.contains(&sp.factor)));
        }
    }
}

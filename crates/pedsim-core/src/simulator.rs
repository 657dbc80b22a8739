//! Timestep driver: snapshot, force evaluation, integration.

use rayon::prelude::*;
use std::time::Instant;

use crate::{GoalCrossing, SimulationState, TimeStep, Vector2, fluctuation};

/// Advances [`SimulationState`]s one synchronous pass at a time.
///
/// Every pass freezes all positions and velocities before any agent moves, so the result does
/// not depend on iteration order. Forces are evaluated in parallel and collected in index order,
/// which keeps trajectories bit-identical regardless of the rayon thread count.
#[derive(Debug, Default)]
pub struct Simulator {
    last_pass: Option<Instant>,
}

impl Simulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one timestep to `state`, returning the goal crossings it produced.
    pub fn simulate(&mut self, state: &mut SimulationState) -> Vec<GoalCrossing> {
        let dt = self.next_dt(state.config().time_step);
        state.set_dt(dt);

        let agent_count = state.agent_count();
        let amplitude = state.config().forces.fluctuation;
        let noise: Vec<Vector2> = {
            let rng = state.rng();
            (0..agent_count).map(|_| fluctuation(&mut *rng, amplitude)).collect()
        };

        let snapshot = state.snapshot();
        let forces: Vec<Vector2> = {
            let ctx = state.force_context(&snapshot);
            state
                .agents()
                .par_iter()
                .enumerate()
                .map(|(idx, agent)| agent.compute_acceleration(idx, &ctx, noise[idx]))
                .collect()
        };

        state.integrate(&forces)
    }

    /// Run passes until the trial's crossing target is met or `step_limit` passes have run.
    ///
    /// Returns the number of passes executed by this call and whether the target was reached.
    pub fn run_to_target(
        &mut self,
        state: &mut SimulationState,
        step_limit: Option<u64>,
    ) -> (u64, bool) {
        let mut steps = 0;
        while !state.target_reached() {
            if step_limit.is_some_and(|limit| steps >= limit) {
                return (steps, false);
            }
            self.simulate(state);
            steps += 1;
        }
        (steps, true)
    }

    fn next_dt(&mut self, time_step: TimeStep) -> f64 {
        match time_step {
            TimeStep::Fixed { dt } => dt,
            TimeStep::Measured { fallback } => {
                let now = Instant::now();
                let dt = self
                    .last_pass
                    .map_or(fallback, |last| now.duration_since(last).as_secs_f64());
                self.last_pass = Some(now);
                if dt > 0.0 { dt } else { fallback }
            }
        }
    }
}

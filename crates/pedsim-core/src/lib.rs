//! Core types for the Pedsim social-force crowd simulation.
//!
//! The crate is split leaf-first: [`Vector2`] and [`BoundaryMap`] carry no simulation logic,
//! [`Agent`] owns the force model and per-step integration, [`SimulationState`] holds a single
//! trial, [`Simulator`] advances it, and [`ExperimentDriver`] sweeps the behavioural parameter
//! grid and aggregates efficiency/discomfort metrics.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod boundary;
pub mod experiment;
pub mod simulator;
pub mod state;
pub mod vector;

pub use agent::{
    Accumulators, Agent, AgentError, Attractor, ForceContext, GoalCrossing, GoalState, Group,
    Kinematics, StepContext, VELOCITY_NUDGE, fluctuation, pair_repulsion,
};
pub use boundary::{BoundaryError, BoundaryMap};
pub use experiment::{
    ExperimentDriver, ExperimentError, ExperimentRow, LinearRange, NullProgress, NullSink,
    ProgressObserver, ResultsSink, SweepConfig, SweepProgress, TrialMetrics, TrialOutcome,
    trial_seed,
};
pub use simulator::Simulator;
pub use state::{AgentFrame, Frame, SimulationState, StateError};
pub use vector::Vector2;

/// Wall repulsion coefficients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WallParams {
    /// Overall scale of the barrier; 0 disables wall repulsion.
    pub strength: f64,
    /// Decay constant `k` in `exp(k / distance) - 1`.
    pub range: f64,
    /// Component-wise scaling of the barrier force. The barrier only acts along `y`
    /// (it comes from the top and bottom walls), so `anisotropy.x` never changes the result
    /// and only `anisotropy.y` rescales it.
    pub anisotropy: Vector2,
}

impl Default for WallParams {
    fn default() -> Self {
        Self {
            strength: 1.0,
            range: 0.5,
            anisotropy: Vector2::new(1.0, 1.0),
        }
    }
}

/// Inverse-square repulsion between a pair of agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RepulsionParams {
    /// Interaction radius; pairs further apart than this do not interact.
    pub radius: f64,
    pub strength: f64,
    pub anisotropy: Vector2,
}

impl RepulsionParams {
    /// Combined coefficient `strength * anisotropy`.
    #[must_use]
    pub fn coefficient(&self) -> Vector2 {
        self.anisotropy * self.strength
    }

    #[must_use]
    pub fn radius_squared(&self) -> f64 {
        self.radius * self.radius
    }
}

/// All force-model coefficients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForceParams {
    pub wall: WallParams,
    /// Repulsion between members of the same group.
    pub same_group: RepulsionParams,
    /// Repulsion from members of the opposing stream.
    pub cross_group: RepulsionParams,
    /// Amplitude of the uniform `[-1, 1]` noise term; 0 disables it.
    pub fluctuation: f64,
    /// Floor on pair distance; squared distances below `min_separation²` are clamped.
    pub min_separation: f64,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            wall: WallParams::default(),
            same_group: RepulsionParams {
                radius: 1.0,
                strength: 0.3,
                anisotropy: Vector2::new(1.0, 1.0),
            },
            cross_group: RepulsionParams {
                radius: 2.0,
                strength: 1.0,
                anisotropy: Vector2::new(0.5, 1.0),
            },
            fluctuation: 1.0,
            min_separation: 0.05,
        }
    }
}

/// How the integration step length is chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimeStep {
    /// Constant `dt`; required for reproducible experiments.
    Fixed { dt: f64 },
    /// Wall-clock time between consecutive passes, `fallback` for the first one.
    Measured { fallback: f64 },
}

impl TimeStep {
    /// Step length used before any wall-clock measurement exists.
    #[must_use]
    pub const fn initial(&self) -> f64 {
        match *self {
            Self::Fixed { dt } => dt,
            Self::Measured { fallback } => fallback,
        }
    }

    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed { .. })
    }
}

impl Default for TimeStep {
    fn default() -> Self {
        Self::Fixed { dt: 0.05 }
    }
}

/// Static configuration for one simulation trial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PedsimConfig {
    /// Number of agents; even indices walk right (group 0), odd indices walk left (group 1).
    pub num_agents: usize,
    pub time_step: TimeStep,
    /// Respawn agents at their spawn x after each goal crossing.
    pub continuous: bool,
    /// Crossings per agent required to end a continuous-mode trial.
    pub average_goals_per_agent: f64,
    /// Desired walking speed (magnitude of every preferred velocity).
    pub preferred_speed: f64,
    /// Velocity relaxation time in seconds.
    pub relaxation: f64,
    /// Hard cap on agent speed.
    pub max_speed: f64,
    /// Minimum clearance kept between agents and the horizontal walls.
    pub wall_width: f64,
    /// Distance of each goal line from its end of the map.
    pub goal_margin: f64,
    /// Accumulate per-agent statistics every timestep.
    pub record_metrics: bool,
    pub forces: ForceParams,
    /// Optional RNG seed for reproducible placement and fluctuation.
    pub rng_seed: Option<u64>,
}

impl Default for PedsimConfig {
    fn default() -> Self {
        Self {
            num_agents: 40,
            time_step: TimeStep::default(),
            continuous: false,
            average_goals_per_agent: 2.0,
            preferred_speed: 1.34,
            relaxation: 0.5,
            max_speed: 2.0,
            wall_width: 0.5,
            goal_margin: 5.0,
            record_metrics: true,
            forces: ForceParams::default(),
            rng_seed: None,
        }
    }
}

impl PedsimConfig {
    /// Validates scalar parameters that do not depend on the boundary map.
    pub fn validate(&self) -> Result<(), StateError> {
        if self.num_agents == 0 {
            return Err(StateError::InvalidConfig("num_agents must be non-zero"));
        }
        let dt = self.time_step.initial();
        if !(dt.is_finite() && dt > 0.0) {
            return Err(StateError::InvalidConfig("time step must be positive"));
        }
        if !(self.relaxation.is_finite() && self.relaxation > 0.0) {
            return Err(StateError::InvalidConfig("relaxation must be positive"));
        }
        if !(self.preferred_speed.is_finite() && self.preferred_speed > 0.0) {
            return Err(StateError::InvalidConfig("preferred_speed must be positive"));
        }
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            return Err(StateError::InvalidConfig("max_speed must be positive"));
        }
        if !(positive(self.wall_width) && positive(self.goal_margin)) {
            return Err(StateError::InvalidConfig("wall_width and goal_margin must be positive"));
        }
        if !self.average_goals_per_agent.is_finite()
            || (self.continuous && self.average_goals_per_agent <= 0.0)
        {
            return Err(StateError::InvalidConfig(
                "average_goals_per_agent must be finite and positive in continuous mode",
            ));
        }
        let forces = &self.forces;
        if !(non_negative(forces.wall.strength)
            && non_negative(forces.wall.range)
            && non_negative(forces.same_group.strength)
            && non_negative(forces.cross_group.strength)
            && non_negative(forces.fluctuation))
        {
            return Err(StateError::InvalidConfig(
                "force strengths, wall range, and fluctuation must be finite and non-negative",
            ));
        }
        if !(finite(forces.wall.anisotropy)
            && finite(forces.same_group.anisotropy)
            && finite(forces.cross_group.anisotropy))
        {
            return Err(StateError::InvalidConfig("anisotropy components must be finite"));
        }
        if !(positive(forces.same_group.radius) && positive(forces.cross_group.radius)) {
            return Err(StateError::InvalidConfig("repulsion radii must be positive"));
        }
        if !positive(forces.min_separation) {
            return Err(StateError::InvalidConfig("min_separation must be positive"));
        }
        Ok(())
    }

    /// Goal crossings that end a trial.
    #[must_use]
    pub fn target_crossings(&self) -> u64 {
        if self.continuous {
            (self.num_agents as f64 * self.average_goals_per_agent).ceil() as u64
        } else {
            self.num_agents as u64
        }
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn finite(value: Vector2) -> bool {
    value.x.is_finite() && value.y.is_finite()
}

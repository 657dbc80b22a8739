//! Pedestrian agents: social-force evaluation, integration, and the goal state machine.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BoundaryMap, ForceParams, RepulsionParams, Vector2};

/// Minimum |v.x| an agent keeps in its walking direction after the direction clamp.
pub const VELOCITY_NUDGE: f64 = 1e-3;

/// Errors raised when constructing an agent.
#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("relaxation time must be positive and finite (got {0})")]
    InvalidRelaxation(f64),
    #[error("preferred velocity must be non-zero and finite")]
    InvalidPreferredVelocity,
}

/// The two opposing pedestrian streams.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    /// Group 0: walks towards +x and targets the right goal line.
    #[default]
    Rightward,
    /// Group 1: walks towards -x and targets the left goal line.
    Leftward,
}

impl Group {
    /// Numeric group label (0 or 1).
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Rightward => 0,
            Self::Leftward => 1,
        }
    }

    /// Sign of the walking direction along x.
    #[must_use]
    pub const fn direction(self) -> f64 {
        match self {
            Self::Rightward => 1.0,
            Self::Leftward => -1.0,
        }
    }

    /// Group assignment for the agent at `index` (alternating streams).
    #[must_use]
    pub const fn for_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::Rightward
        } else {
            Self::Leftward
        }
    }
}

/// Goal state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    #[default]
    Traveling,
    InGoal,
}

/// Marker returned by [`Agent::update`] when a goal line was crossed this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalCrossing {
    /// Position at the moment of crossing, before any continuous-mode reset.
    pub position: Vector2,
}

/// Frozen kinematic state used as force input for a whole simulation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    pub position: Vector2,
    pub velocity: Vector2,
    pub group: Group,
}

/// Named attraction point. The attraction term is currently inert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Attractor {
    pub position: Vector2,
    pub strength: f64,
}

/// Running sums folded in once per timestep while recording.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Accumulators {
    pub cum_speed: f64,
    pub cum_velocity: Vector2,
    /// Sum of the velocity projected onto the preferred direction.
    pub cum_speed_preferred: f64,
    pub cum_speed_squared: f64,
}

/// Shared inputs for evaluating the behavioural force of one agent.
#[derive(Debug, Clone, Copy)]
pub struct ForceContext<'a> {
    pub snapshot: &'a [Kinematics],
    pub boundary_map: &'a BoundaryMap,
    pub params: &'a ForceParams,
    pub wall_width: f64,
    pub attractors: &'a [Attractor],
}

/// Per-pass integration parameters.
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub dt: f64,
    pub max_speed: f64,
    pub wall_width: f64,
    /// Y coordinate of the bottom wall (`rows - 1`).
    pub vertical_extent: f64,
    pub goal_line_left: f64,
    pub goal_line_right: f64,
    pub continuous: bool,
}

/// A single pedestrian.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    position: Vector2,
    position0: Vector2,
    velocity: Vector2,
    acceleration: Vector2,
    preferred_velocity: Vector2,
    preferred_speed: f64,
    relaxation: f64,
    group: Group,
    goal: GoalState,
    goals_reached: u32,
    accumulators: Accumulators,
}

impl Agent {
    /// Create an agent at its spawn location.
    pub fn new(
        position: Vector2,
        velocity: Vector2,
        preferred_velocity: Vector2,
        relaxation: f64,
        group: Group,
    ) -> Result<Self, AgentError> {
        if !(relaxation.is_finite() && relaxation > 0.0) {
            return Err(AgentError::InvalidRelaxation(relaxation));
        }
        let preferred_speed = preferred_velocity.norm();
        if !(preferred_speed.is_finite() && preferred_speed > 0.0) {
            return Err(AgentError::InvalidPreferredVelocity);
        }
        Ok(Self {
            position,
            position0: position,
            velocity,
            acceleration: Vector2::ZERO,
            preferred_velocity,
            preferred_speed,
            relaxation,
            group,
            goal: GoalState::Traveling,
            goals_reached: 0,
            accumulators: Accumulators::default(),
        })
    }

    #[must_use]
    pub const fn position(&self) -> Vector2 {
        self.position
    }

    /// Spawn location captured at construction.
    #[must_use]
    pub const fn spawn_position(&self) -> Vector2 {
        self.position0
    }

    #[must_use]
    pub const fn velocity(&self) -> Vector2 {
        self.velocity
    }

    /// Velocity increment applied during the most recent update.
    #[must_use]
    pub const fn acceleration(&self) -> Vector2 {
        self.acceleration
    }

    #[must_use]
    pub const fn preferred_velocity(&self) -> Vector2 {
        self.preferred_velocity
    }

    #[must_use]
    pub const fn preferred_speed(&self) -> f64 {
        self.preferred_speed
    }

    #[must_use]
    pub const fn relaxation(&self) -> f64 {
        self.relaxation
    }

    #[must_use]
    pub const fn group(&self) -> Group {
        self.group
    }

    #[must_use]
    pub const fn goal_state(&self) -> GoalState {
        self.goal
    }

    #[must_use]
    pub const fn in_goal(&self) -> bool {
        matches!(self.goal, GoalState::InGoal)
    }

    /// Number of goal crossings credited to this agent.
    #[must_use]
    pub const fn goals_reached(&self) -> u32 {
        self.goals_reached
    }

    #[must_use]
    pub const fn accumulators(&self) -> &Accumulators {
        &self.accumulators
    }

    /// Snapshot of the kinematic fields read by other agents' force terms.
    #[must_use]
    pub const fn kinematics(&self) -> Kinematics {
        Kinematics {
            position: self.position,
            velocity: self.velocity,
            group: self.group,
        }
    }

    /// Overwrite the current velocity.
    pub fn set_velocity(&mut self, velocity: Vector2) {
        self.velocity = velocity;
    }

    /// Behavioural force for the agent stored at `index` of `ctx.snapshot`.
    ///
    /// Reads only the snapshot, never live agent state, so every agent in a pass sees the same
    /// world. `fluctuation` is the pre-drawn noise sample for this agent.
    #[must_use]
    pub fn compute_acceleration(
        &self,
        index: usize,
        ctx: &ForceContext<'_>,
        fluctuation: Vector2,
    ) -> Vector2 {
        self.relaxation_term()
            + self.wall_repulsion(ctx.boundary_map, ctx.params, ctx.wall_width)
            + self.repulsive_interactions(index, ctx.snapshot, ctx.params)
            + self.attraction(ctx.attractors)
            + fluctuation
    }

    /// Drives velocity towards the preferred velocity with time constant `relaxation`.
    #[must_use]
    pub fn relaxation_term(&self) -> Vector2 {
        (self.preferred_velocity - self.velocity) / self.relaxation
    }

    /// Exponential barrier pushing the agent away from the nearer horizontal wall.
    #[must_use]
    pub fn wall_repulsion(
        &self,
        boundary_map: &BoundaryMap,
        params: &ForceParams,
        wall_width: f64,
    ) -> Vector2 {
        let wall = &params.wall;
        if wall.strength == 0.0 {
            return Vector2::ZERO;
        }
        let to_top = self.position.y;
        let to_bottom = boundary_map.vertical_extent() - self.position.y;
        let (distance, direction) = if to_top <= to_bottom {
            (to_top, 1.0)
        } else {
            (to_bottom, -1.0)
        };
        let clearance = distance.max(wall_width);
        let magnitude = wall.strength * ((wall.range / clearance).exp() - 1.0);
        Vector2::new(0.0, direction * magnitude).hadamard(wall.anisotropy)
    }

    /// Sum of pairwise repulsion from every other agent in the snapshot. O(N).
    #[must_use]
    pub fn repulsive_interactions(
        &self,
        index: usize,
        snapshot: &[Kinematics],
        params: &ForceParams,
    ) -> Vector2 {
        let me = self.kinematics();
        snapshot
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != index)
            .fold(Vector2::ZERO, |sum, (_, other)| {
                sum + pair_repulsion(&me, other, params)
            })
    }

    /// Attraction towards named attractors. Always zero.
    #[must_use]
    pub fn attraction(&self, _attractors: &[Attractor]) -> Vector2 {
        Vector2::ZERO
    }

    /// Integrate one timestep from a precomputed behavioural force and run the goal check.
    pub fn update(&mut self, behavioral: Vector2, ctx: &StepContext) -> Option<GoalCrossing> {
        let dt = ctx.dt;
        self.acceleration = behavioral * dt;
        self.velocity += self.acceleration * dt;

        match self.group {
            Group::Rightward if self.velocity.x < 0.0 => self.velocity.x = VELOCITY_NUDGE,
            Group::Leftward if self.velocity.x > 0.0 => self.velocity.x = -VELOCITY_NUDGE,
            _ => {}
        }

        if self.velocity.norm() > ctx.max_speed {
            self.velocity = self.velocity.with_length(ctx.max_speed);
        }

        self.position += self.velocity * dt;
        self.position.y = self
            .position
            .y
            .clamp(ctx.wall_width, ctx.vertical_extent - ctx.wall_width);

        self.check_goal(ctx)
    }

    /// `Traveling → InGoal` transition; resets to the spawn x in continuous mode.
    pub fn check_goal(&mut self, ctx: &StepContext) -> Option<GoalCrossing> {
        if self.in_goal() {
            return None;
        }
        let crossed = match self.group {
            Group::Rightward => self.position.x > ctx.goal_line_right,
            Group::Leftward => self.position.x < ctx.goal_line_left,
        };
        if !crossed {
            return None;
        }

        let crossing = GoalCrossing {
            position: self.position,
        };
        self.goal = GoalState::InGoal;
        self.goals_reached += 1;
        if ctx.continuous {
            self.position.x = self.position0.x;
            self.goal = GoalState::Traveling;
        }
        Some(crossing)
    }

    /// Fold the current velocity into the running sums.
    pub fn record(&mut self) {
        let velocity = self.velocity;
        let speed = velocity.norm();
        let acc = &mut self.accumulators;
        acc.cum_speed += speed;
        acc.cum_velocity += velocity;
        acc.cum_speed_preferred += velocity.dot(self.preferred_velocity) / self.preferred_speed;
        acc.cum_speed_squared += velocity.norm_squared();
    }

    pub fn reset_accumulators(&mut self) {
        self.accumulators = Accumulators::default();
    }

    /// Mean preferred-direction speed over `timesteps`, relative to the preferred speed.
    #[must_use]
    pub fn efficiency(&self, timesteps: u64) -> Option<f64> {
        if timesteps == 0 {
            return None;
        }
        let n = timesteps as f64;
        Some((self.accumulators.cum_speed_preferred / n) / self.preferred_speed)
    }

    /// `1 - |mean velocity|² / mean squared speed`; 0 for an agent that never moved.
    #[must_use]
    pub fn discomfort(&self, timesteps: u64) -> Option<f64> {
        if timesteps == 0 {
            return None;
        }
        let n = timesteps as f64;
        let mean_velocity = self.accumulators.cum_velocity / n;
        let mean_squared_speed = self.accumulators.cum_speed_squared / n;
        if mean_squared_speed <= 0.0 {
            return Some(0.0);
        }
        Some(1.0 - mean_velocity.norm_squared() / mean_squared_speed)
    }
}

/// Repulsion felt by `a` from `b`.
///
/// Same-group pairs inside `same_group.radius` and cross-group pairs inside `cross_group.radius`
/// contribute `C · rab / |rab|²`; a cross-group pair outside its own radius but inside the
/// same-group radius falls back to the same-group coefficient. Squared distances are floored at
/// `min_separation²`, so coincident agents yield a zero force instead of NaN.
#[must_use]
pub fn pair_repulsion(a: &Kinematics, b: &Kinematics, params: &ForceParams) -> Vector2 {
    let rab = a.position - b.position;
    let distance_sq = rab.norm_squared();
    let same = &params.same_group;
    let cross = &params.cross_group;

    let floor = params.min_separation * params.min_separation;
    let push = |p: &RepulsionParams| p.coefficient().hadamard(rab) / distance_sq.max(floor);

    if a.group != b.group && distance_sq < cross.radius_squared() {
        push(cross)
    } else if distance_sq < same.radius_squared() {
        push(same)
    } else {
        Vector2::ZERO
    }
}

/// Uniform `[-1, 1]²` noise scaled by `amplitude`.
pub fn fluctuation(rng: &mut dyn RngCore, amplitude: f64) -> Vector2 {
    let x = rng.random_range(-1.0..=1.0);
    let y = rng.random_range(-1.0..=1.0);
    Vector2::new(x, y) * amplitude
}

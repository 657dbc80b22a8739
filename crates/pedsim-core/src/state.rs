//! A single simulation trial: agents, goal lines, counters, and running ledgers.

use rand::{Rng, RngCore, rngs::SmallRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    Agent, AgentError, Attractor, BoundaryMap, ForceContext, GoalCrossing, GoalState, Group,
    Kinematics, PedsimConfig, StepContext, Vector2,
};

/// Candidate spawn points tried per agent before placement gives up.
const MAX_PLACEMENT_ATTEMPTS: usize = 256;
/// Normal draws tried per spawn offset before falling back to a uniform draw.
const MAX_OFFSET_DRAWS: usize = 64;

/// Errors that can occur when constructing simulation state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("could not place agent {agent} without overlap after {attempts} attempts")]
    PlacementExhausted { agent: usize, attempts: usize },
}

/// Telemetry for one agent, captured between passes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentFrame {
    pub position: Vector2,
    pub velocity: Vector2,
    pub acceleration: Vector2,
    pub group: Group,
    pub goal: GoalState,
}

/// Everything an external visualiser needs to draw one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub tick: u64,
    pub elapsed: f64,
    pub agents_in_goal: u64,
    pub agents: Vec<AgentFrame>,
}

/// One trial instance.
pub struct SimulationState {
    config: PedsimConfig,
    agents: Vec<Agent>,
    boundary_map: Arc<BoundaryMap>,
    attractors: Vec<Attractor>,
    rng: SmallRng,
    dt: f64,
    goal_line_left: f64,
    goal_line_right: f64,
    num_agents_in_goal: u64,
    n_timesteps: u64,
    elapsed: f64,
    total_distance: f64,
    mean: f64,
    variance: f64,
    recording: bool,
}

impl fmt::Debug for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationState")
            .field("agent_count", &self.agents.len())
            .field("dt", &self.dt)
            .field("goal_lines", &(self.goal_line_left, self.goal_line_right))
            .field("num_agents_in_goal", &self.num_agents_in_goal)
            .field("n_timesteps", &self.n_timesteps)
            .field("mean", &self.mean)
            .field("variance", &self.variance)
            .finish()
    }
}

impl SimulationState {
    /// Build a trial with randomly placed agents.
    ///
    /// Even-indexed agents walk right and spawn in the left band `[1, goal_line_left]`,
    /// odd-indexed agents walk left and spawn in the mirrored right band
    /// `[goal_line_right, cols - 2]`. The offset into the band is drawn from
    /// `Normal(mean, sqrt(variance))` and redrawn until it falls inside the band (uniform
    /// fallback after a bounded number of draws); `y` is uniform over the walkable extent.
    /// Candidates closer than `min_separation` to an already placed agent are rejected.
    pub fn new(
        config: PedsimConfig,
        boundary_map: Arc<BoundaryMap>,
        mean: f64,
        variance: f64,
    ) -> Result<Self, StateError> {
        let mut state = Self::empty(config, boundary_map, mean, variance)?;
        state.place_agents()?;
        Ok(state)
    }

    /// Build a trial around an explicit agent list; `mean`/`variance` are reported as zero.
    pub fn with_agents(
        config: PedsimConfig,
        boundary_map: Arc<BoundaryMap>,
        agents: Vec<Agent>,
    ) -> Result<Self, StateError> {
        let mut state = Self::empty(config, boundary_map, 0.0, 0.0)?;
        state.agents = agents;
        Ok(state)
    }

    fn empty(
        config: PedsimConfig,
        boundary_map: Arc<BoundaryMap>,
        mean: f64,
        variance: f64,
    ) -> Result<Self, StateError> {
        config.validate()?;
        if !(mean.is_finite() && variance.is_finite() && variance >= 0.0) {
            return Err(StateError::InvalidConfig(
                "mean must be finite and variance non-negative",
            ));
        }
        let cols = boundary_map.cols();
        if boundary_map.vertical_extent() <= 2.0 * config.wall_width {
            return Err(StateError::InvalidConfig(
                "boundary map is too narrow for the configured wall_width",
            ));
        }
        let goal_line_left = config.goal_margin;
        let goal_line_right = (cols as f64 - 1.0) - config.goal_margin;
        if goal_line_left <= 1.0 || goal_line_left >= goal_line_right {
            return Err(StateError::InvalidConfig(
                "goal_margin leaves no spawn band or no room between goal lines",
            ));
        }

        Ok(Self {
            rng: config.seeded_rng(),
            dt: config.time_step.initial(),
            recording: config.record_metrics,
            agents: Vec::with_capacity(config.num_agents),
            attractors: Vec::new(),
            config,
            boundary_map,
            goal_line_left,
            goal_line_right,
            num_agents_in_goal: 0,
            n_timesteps: 0,
            elapsed: 0.0,
            total_distance: 0.0,
            mean,
            variance,
        })
    }

    fn place_agents(&mut self) -> Result<(), StateError> {
        let normal = Normal::new(self.mean, self.variance.sqrt())
            .map_err(|_| StateError::InvalidConfig("invalid spawn distribution"))?;
        let band_width = self.goal_line_left - 1.0;
        let right_edge = self.boundary_map.cols() as f64 - 2.0;
        let y_min = self.config.wall_width;
        let y_max = self.boundary_map.vertical_extent() - self.config.wall_width;
        let min_sep_sq = self.config.forces.min_separation * self.config.forces.min_separation;

        for index in 0..self.config.num_agents {
            let group = Group::for_index(index);
            let mut placed = None;
            for _ in 0..MAX_PLACEMENT_ATTEMPTS {
                let offset = sample_offset(&mut self.rng, &normal, band_width);
                let x = match group {
                    Group::Rightward => 1.0 + offset,
                    Group::Leftward => right_edge - offset,
                };
                let y = self.rng.random_range(y_min..=y_max);
                let candidate = Vector2::new(x, y);
                let clear = self
                    .agents
                    .iter()
                    .all(|other| (other.position() - candidate).norm_squared() >= min_sep_sq);
                if clear {
                    placed = Some(candidate);
                    break;
                }
            }
            let Some(position) = placed else {
                return Err(StateError::PlacementExhausted {
                    agent: index,
                    attempts: MAX_PLACEMENT_ATTEMPTS,
                });
            };
            let preferred = Vector2::new(group.direction() * self.config.preferred_speed, 0.0);
            self.agents.push(Agent::new(
                position,
                preferred,
                preferred,
                self.config.relaxation,
                group,
            )?);
        }
        Ok(())
    }

    #[must_use]
    pub const fn config(&self) -> &PedsimConfig {
        &self.config
    }

    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn boundary_map(&self) -> &BoundaryMap {
        &self.boundary_map
    }

    #[must_use]
    pub fn attractors(&self) -> &[Attractor] {
        &self.attractors
    }

    /// Current integration step length.
    #[must_use]
    pub const fn dt(&self) -> f64 {
        self.dt
    }

    pub(crate) fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    #[must_use]
    pub const fn goal_lines(&self) -> (f64, f64) {
        (self.goal_line_left, self.goal_line_right)
    }

    /// Goal crossings counted so far.
    #[must_use]
    pub const fn num_agents_in_goal(&self) -> u64 {
        self.num_agents_in_goal
    }

    /// Number of completed `simulate` passes.
    #[must_use]
    pub const fn n_timesteps(&self) -> u64 {
        self.n_timesteps
    }

    /// Simulated seconds elapsed.
    #[must_use]
    pub const fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Summed `|velocity| * dt` of every agent over all passes.
    #[must_use]
    pub const fn total_distance(&self) -> f64 {
        self.total_distance
    }

    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    #[must_use]
    pub const fn variance(&self) -> f64 {
        self.variance
    }

    #[must_use]
    pub const fn recording(&self) -> bool {
        self.recording
    }

    /// Whether enough crossings were counted to end the trial.
    #[must_use]
    pub fn target_reached(&self) -> bool {
        self.num_agents_in_goal >= self.config.target_crossings()
    }

    /// Clear per-agent accumulators and the timestep counter.
    pub fn reset_statistics(&mut self) {
        for agent in &mut self.agents {
            agent.reset_accumulators();
        }
        self.n_timesteps = 0;
    }

    pub(crate) fn snapshot(&self) -> Vec<Kinematics> {
        self.agents.iter().map(Agent::kinematics).collect()
    }

    pub(crate) fn step_context(&self) -> StepContext {
        StepContext {
            dt: self.dt,
            max_speed: self.config.max_speed,
            wall_width: self.config.wall_width,
            vertical_extent: self.boundary_map.vertical_extent(),
            goal_line_left: self.goal_line_left,
            goal_line_right: self.goal_line_right,
            continuous: self.config.continuous,
        }
    }

    pub(crate) fn force_context<'a>(&'a self, snapshot: &'a [Kinematics]) -> ForceContext<'a> {
        ForceContext {
            snapshot,
            boundary_map: &self.boundary_map,
            params: &self.config.forces,
            wall_width: self.config.wall_width,
            attractors: &self.attractors,
        }
    }

    pub(crate) fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }

    /// Apply precomputed behavioural forces to every agent, in order, then close the pass.
    ///
    /// Returns the goal crossings of this pass; each one adds exactly one to
    /// `num_agents_in_goal`.
    pub(crate) fn integrate(&mut self, forces: &[Vector2]) -> Vec<GoalCrossing> {
        debug_assert_eq!(forces.len(), self.agents.len());
        let ctx = self.step_context();
        let mut crossings = Vec::new();
        let mut distance = 0.0;
        for (agent, force) in self.agents.iter_mut().zip(forces) {
            if let Some(crossing) = agent.update(*force, &ctx) {
                crossings.push(crossing);
            }
            distance += (agent.velocity() * ctx.dt).norm();
            if self.recording {
                agent.record();
            }
        }
        self.num_agents_in_goal += crossings.len() as u64;
        self.total_distance += distance;
        self.n_timesteps += 1;
        self.elapsed += ctx.dt;
        crossings
    }

    /// Telemetry for the current state.
    #[must_use]
    pub fn frame(&self) -> Frame {
        Frame {
            tick: self.n_timesteps,
            elapsed: self.elapsed,
            agents_in_goal: self.num_agents_in_goal,
            agents: self
                .agents
                .iter()
                .map(|agent| AgentFrame {
                    position: agent.position(),
                    velocity: agent.velocity(),
                    acceleration: agent.acceleration(),
                    group: agent.group(),
                    goal: agent.goal_state(),
                })
                .collect(),
        }
    }
}

fn sample_offset(rng: &mut SmallRng, normal: &Normal<f64>, band_width: f64) -> f64 {
    for _ in 0..MAX_OFFSET_DRAWS {
        let offset = normal.sample(rng);
        if (0.0..=band_width).contains(&offset) {
            return offset;
        }
    }
    rng.random_range(0.0..=band_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corridor() -> Arc<BoundaryMap> {
        Arc::new(BoundaryMap::corridor(12, 40).expect("map"))
    }

    fn seeded(num_agents: usize, seed: u64) -> PedsimConfig {
        PedsimConfig {
            num_agents,
            rng_seed: Some(seed),
            ..PedsimConfig::default()
        }
    }

    #[test]
    fn placement_respects_bands_and_separation() {
        let state = SimulationState::new(seeded(30, 3), corridor(), 2.0, 1.0).expect("state");
        let (left, right) = state.goal_lines();
        assert_eq!(left, 5.0);
        assert_eq!(right, 34.0);
        assert_eq!(state.agent_count(), 30);
        let min_sep = state.config().forces.min_separation;
        for (idx, agent) in state.agents().iter().enumerate() {
            let pos = agent.position();
            assert_eq!(agent.spawn_position(), pos);
            assert!(pos.y >= 0.5 && pos.y <= 10.5);
            match agent.group() {
                Group::Rightward => {
                    assert_eq!(idx % 2, 0);
                    assert!((1.0..=left).contains(&pos.x));
                    assert!(agent.preferred_velocity().x > 0.0);
                }
                Group::Leftward => {
                    assert!((right..=38.0).contains(&pos.x));
                    assert!(agent.preferred_velocity().x < 0.0);
                }
            }
            for other in &state.agents()[idx + 1..] {
                assert!((other.position() - pos).norm() >= min_sep);
            }
        }
    }

    #[test]
    fn placement_is_seed_deterministic() {
        let a = SimulationState::new(seeded(10, 99), corridor(), 1.0, 0.5).expect("a");
        let b = SimulationState::new(seeded(10, 99), corridor(), 1.0, 0.5).expect("b");
        assert_eq!(a.agents(), b.agents());
    }

    #[test]
    fn zero_variance_stacks_agents_on_one_column() {
        let state = SimulationState::new(seeded(8, 1), corridor(), 2.0, 0.0).expect("state");
        for agent in state.agents() {
            let x = agent.position().x;
            match agent.group() {
                Group::Rightward => assert_eq!(x, 3.0),
                Group::Leftward => assert_eq!(x, 36.0),
            }
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let err = SimulationState::new(seeded(4, 1), corridor(), 1.0, -1.0).unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(_)));

        let tiny = Arc::new(BoundaryMap::corridor(2, 40).expect("map"));
        assert!(SimulationState::new(seeded(4, 1), tiny, 1.0, 1.0).is_err());

        let short = Arc::new(BoundaryMap::corridor(12, 10).expect("map"));
        assert!(SimulationState::new(seeded(4, 1), short, 1.0, 1.0).is_err());
    }

    #[test]
    fn crowded_band_exhausts_placement() {
        let mut config = seeded(400, 2);
        config.forces.min_separation = 1.5;
        let err = SimulationState::new(config, corridor(), 2.0, 1.0).unwrap_err();
        assert!(matches!(err, StateError::PlacementExhausted { .. }));
    }

    #[test]
    fn frame_mirrors_agents() {
        let state = SimulationState::new(seeded(6, 7), corridor(), 2.0, 1.0).expect("state");
        let frame = state.frame();
        assert_eq!(frame.tick, 0);
        assert_eq!(frame.agents_in_goal, 0);
        assert_eq!(frame.agents.len(), 6);
        assert_eq!(frame.agents[1].position, state.agents()[1].position());
        assert_eq!(frame.agents[1].group, Group::Leftward);
    }
}

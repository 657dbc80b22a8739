use pedsim_core::{
    Agent, BoundaryMap, ForceParams, GoalState, Group, Kinematics, PedsimConfig, SimulationState,
    Simulator, TrialMetrics, Vector2, WallParams, pair_repulsion,
};
use std::sync::Arc;

const STEP_LIMIT: u64 = 50_000;

fn corridor(rows: usize, cols: usize) -> Arc<BoundaryMap> {
    Arc::new(BoundaryMap::corridor(rows, cols).expect("corridor"))
}

fn seeded(num_agents: usize, seed: u64) -> PedsimConfig {
    PedsimConfig {
        num_agents,
        rng_seed: Some(seed),
        ..PedsimConfig::default()
    }
}

fn quiet_forces() -> ForceParams {
    ForceParams {
        wall: WallParams {
            strength: 0.0,
            ..WallParams::default()
        },
        fluctuation: 0.0,
        ..ForceParams::default()
    }
}

#[test]
fn goal_counter_is_monotonic_and_terminal_without_recycling() {
    let mut state = SimulationState::new(seeded(10, 5), corridor(12, 40), 2.0, 1.0).expect("state");
    let mut sim = Simulator::new();
    let mut previous = 0;
    while !state.target_reached() {
        assert!(state.n_timesteps() < STEP_LIMIT, "trial did not terminate");
        sim.simulate(&mut state);
        let current = state.num_agents_in_goal();
        assert!(current >= previous);
        previous = current;
    }
    assert_eq!(state.num_agents_in_goal(), 10);
    for agent in state.agents() {
        assert_eq!(agent.goal_state(), GoalState::InGoal);
        assert_eq!(agent.goals_reached(), 1);
    }

    for _ in 0..100 {
        sim.simulate(&mut state);
    }
    assert_eq!(state.num_agents_in_goal(), 10);
    assert!(state.agents().iter().all(Agent::in_goal));
}

#[test]
fn continuous_mode_recycles_agents() {
    let config = PedsimConfig {
        continuous: true,
        average_goals_per_agent: 3.0,
        ..seeded(6, 11)
    };
    assert_eq!(config.target_crossings(), 18);
    let mut state = SimulationState::new(config, corridor(12, 40), 2.0, 1.0).expect("state");
    let (steps, reached) = Simulator::new().run_to_target(&mut state, Some(STEP_LIMIT));
    assert!(reached, "continuous trial stalled after {steps} steps");
    assert!(state.num_agents_in_goal() >= 18);
    let per_agent: u64 = state
        .agents()
        .iter()
        .map(|a| u64::from(a.goals_reached()))
        .sum();
    assert_eq!(state.num_agents_in_goal(), per_agent);
    assert!(state.agents().iter().any(|a| a.goals_reached() >= 2));
    assert!(
        state
            .agents()
            .iter()
            .all(|a| a.goal_state() == GoalState::Traveling)
    );
    for agent in state.agents() {
        assert!((0.0..=39.0).contains(&agent.position().x));
    }
}

#[test]
fn each_crossing_counts_exactly_once() {
    let config = PedsimConfig {
        continuous: true,
        average_goals_per_agent: 4.0,
        ..seeded(8, 17)
    };
    let mut state = SimulationState::new(config, corridor(12, 40), 2.0, 1.0).expect("state");
    let (left, right) = state.goal_lines();
    let mut sim = Simulator::new();
    let mut seen = 0;
    while !state.target_reached() {
        assert!(state.n_timesteps() < STEP_LIMIT, "trial did not terminate");
        let before = state.num_agents_in_goal();
        let crossings = sim.simulate(&mut state);
        assert_eq!(state.num_agents_in_goal() - before, crossings.len() as u64);
        for crossing in &crossings {
            assert!(crossing.position.x > right || crossing.position.x < left);
        }
        seen += crossings.len() as u64;
    }

    let per_agent: u64 = state
        .agents()
        .iter()
        .map(|a| u64::from(a.goals_reached()))
        .sum();
    assert_eq!(state.num_agents_in_goal(), per_agent);
    assert_eq!(state.num_agents_in_goal(), seen);
    assert!(seen >= 32);
}

#[test]
fn kinematic_bounds_hold_over_a_long_run() {
    let config = PedsimConfig {
        max_speed: 1.5,
        forces: ForceParams {
            fluctuation: 4.0,
            ..ForceParams::default()
        },
        ..seeded(40, 23)
    };
    let mut state = SimulationState::new(config, corridor(10, 60), 3.0, 4.0).expect("state");
    let extent = state.boundary_map().vertical_extent();
    let wall_width = state.config().wall_width;
    let mut sim = Simulator::new();
    for _ in 0..500 {
        sim.simulate(&mut state);
        for agent in state.agents() {
            let v = agent.velocity();
            match agent.group() {
                Group::Rightward => assert!(v.x >= 0.0),
                Group::Leftward => assert!(v.x <= 0.0),
            }
            assert!(v.norm() <= 1.5 + 1e-9);
            let y = agent.position().y;
            assert!(y >= wall_width && y <= extent - wall_width);
            assert!(agent.position().is_finite());
        }
    }
    assert_eq!(state.n_timesteps(), 500);
}

#[test]
fn pairwise_repulsion_is_antisymmetric() {
    let params = ForceParams::default();
    let a = Kinematics {
        position: Vector2::new(3.0, 4.0),
        velocity: Vector2::new(1.0, 0.0),
        group: Group::Rightward,
    };
    for group in [Group::Rightward, Group::Leftward] {
        let b = Kinematics {
            position: Vector2::new(3.4, 4.3),
            velocity: Vector2::new(-1.0, 0.0),
            group,
        };
        let ab = pair_repulsion(&a, &b, &params);
        let ba = pair_repulsion(&b, &a, &params);
        assert_ne!(ab, Vector2::ZERO);
        assert_eq!(ab, -ba);
    }
}

#[test]
fn lone_agent_walks_at_full_efficiency() {
    let config = PedsimConfig {
        num_agents: 1,
        relaxation: 0.02,
        forces: quiet_forces(),
        ..PedsimConfig::default()
    };
    let preferred = Vector2::new(1.0, 0.0);
    let agent = Agent::new(
        Vector2::new(1.0, 6.0),
        Vector2::new(0.5, 0.0),
        preferred,
        0.02,
        Group::Rightward,
    )
    .expect("agent");
    let mut state =
        SimulationState::with_agents(config, corridor(12, 400), vec![agent]).expect("state");
    let (_, reached) = Simulator::new().run_to_target(&mut state, Some(STEP_LIMIT));
    assert!(reached);

    let metrics = TrialMetrics::from_state(&state).expect("metrics");
    assert!((metrics.efficiency - 1.0).abs() < 0.01);
    assert!(metrics.discomfort >= 0.0 && metrics.discomfort < 0.01);
    assert_eq!(state.agents()[0].velocity().y, 0.0);
}

#[test]
fn constant_velocity_has_zero_discomfort() {
    let config = PedsimConfig {
        num_agents: 2,
        forces: quiet_forces(),
        ..PedsimConfig::default()
    };
    let right = Vector2::new(1.0, 0.0);
    let left = Vector2::new(-0.5, 0.0);
    let agents = vec![
        Agent::new(Vector2::new(1.0, 3.0), right, right, 0.5, Group::Rightward).expect("agent"),
        Agent::new(Vector2::new(38.0, 8.0), left, left, 0.5, Group::Leftward).expect("agent"),
    ];
    let mut state = SimulationState::with_agents(config, corridor(12, 40), agents).expect("state");
    let (_, reached) = Simulator::new().run_to_target(&mut state, Some(STEP_LIMIT));
    assert!(reached);

    let n = state.n_timesteps();
    for agent in state.agents() {
        assert_eq!(agent.discomfort(n), Some(0.0));
        assert_eq!(agent.efficiency(n), Some(1.0));
    }
    let metrics = TrialMetrics::from_state(&state).expect("metrics");
    assert_eq!(metrics.discomfort, 0.0);
    assert_eq!(metrics.efficiency, 1.0);
}

#[test]
fn fixed_seed_replays_identically_across_thread_counts() {
    let run = || {
        let mut state =
            SimulationState::new(seeded(30, 77), corridor(12, 50), 2.0, 2.0).expect("state");
        let mut sim = Simulator::new();
        for _ in 0..200 {
            sim.simulate(&mut state);
        }
        state
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .expect("pool");
    let single = pool.install(run);
    let default = run();

    assert_eq!(single.agents(), default.agents());
    assert_eq!(single.frame(), default.frame());
    assert_eq!(single.num_agents_in_goal(), default.num_agents_in_goal());
    assert_eq!(single.total_distance(), default.total_distance());
}

#[test]
fn reset_statistics_clears_the_ledger() {
    let mut state = SimulationState::new(seeded(4, 2), corridor(12, 40), 2.0, 1.0).expect("state");
    let mut sim = Simulator::new();
    for _ in 0..10 {
        sim.simulate(&mut state);
    }
    state.reset_statistics();
    assert_eq!(state.n_timesteps(), 0);
    assert!(TrialMetrics::from_state(&state).is_none());
    assert!(
        state
            .agents()
            .iter()
            .all(|a| a.accumulators().cum_speed == 0.0)
    );
}

//! Headless drivers behind the `run` and `sweep` subcommands.

use anyhow::{Context, Result};
use pedsim_core::{
    ExperimentDriver, ExperimentRow, NullSink, ProgressObserver, SimulationState, Simulator,
    TrialMetrics,
};
use pedsim_storage::{FrameLog, OutputFormat, ResultsStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::AppConfig;

/// Options for a single simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Spawn-offset mean.
    pub mean: f64,
    /// Spawn-offset variance.
    pub variance: f64,
    /// Stop after this many steps even if the goal target has not been met.
    pub max_steps: Option<u64>,
    /// JSON-lines telemetry destination; one frame per step plus the initial frame.
    pub frames: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mean: 2.0,
            variance: 1.0,
            max_steps: None,
            frames: None,
        }
    }
}

/// What a single run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub crossings: u64,
    pub target_reached: bool,
    pub elapsed: f64,
    pub total_distance: f64,
    pub metrics: Option<TrialMetrics>,
}

/// Simulate one trial until its crossing target is met or `max_steps` passes have run.
pub fn run_simulation(config: &AppConfig, options: &RunOptions) -> Result<RunSummary> {
    let map = config.map.build()?;
    let mut state = SimulationState::new(
        config.simulation.clone(),
        map,
        options.mean,
        options.variance,
    )
    .context("failed to initialise simulation state")?;
    let limit = options.max_steps.or(config.sweep.step_limit);

    let mut frames = options
        .frames
        .as_ref()
        .map(FrameLog::create)
        .transpose()
        .context("failed to open frame log")?;
    if let Some(log) = frames.as_mut() {
        log.append(&state.frame())?;
    }

    info!(
        agents = state.agent_count(),
        target = state.config().target_crossings(),
        continuous = state.config().continuous,
        "starting simulation"
    );
    let mut sim = Simulator::new();
    while !state.target_reached() {
        if limit.is_some_and(|limit| state.n_timesteps() >= limit) {
            warn!(
                steps = state.n_timesteps(),
                crossings = state.num_agents_in_goal(),
                "step limit reached before the goal target"
            );
            break;
        }
        sim.simulate(&mut state);
        if let Some(log) = frames.as_mut() {
            log.append(&state.frame())?;
        }
    }
    if let Some(mut log) = frames {
        log.flush()?;
    }

    let summary = RunSummary {
        steps: state.n_timesteps(),
        crossings: state.num_agents_in_goal(),
        target_reached: state.target_reached(),
        elapsed: state.elapsed(),
        total_distance: state.total_distance(),
        metrics: TrialMetrics::from_state(&state),
    };
    info!(
        steps = summary.steps,
        crossings = summary.crossings,
        elapsed = summary.elapsed,
        distance = summary.total_distance,
        "simulation finished"
    );
    Ok(summary)
}

/// Where sweep rows are written.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutput {
    pub path: PathBuf,
    pub format: OutputFormat,
}

/// Run the configured parameter sweep.
pub fn run_sweep(
    config: &AppConfig,
    output: Option<&SweepOutput>,
    observer: Arc<dyn ProgressObserver>,
) -> Result<Vec<ExperimentRow>> {
    let map = config.map.build()?;
    let driver = ExperimentDriver::new(config.simulation.clone(), map, config.sweep.clone())
        .context("invalid sweep configuration")?
        .with_observer(observer);

    let Some(output) = output else {
        return Ok(driver.run(&mut NullSink)?);
    };
    let mut store = ResultsStore::create(&output.path, output.format)
        .with_context(|| format!("failed to create {}", output.path.display()))?;
    let rows = driver.run(&mut store)?;
    let written = store.finish()?;
    info!(path = %output.path.display(), rows = written, "results written");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedsim_core::{LinearRange, PedsimConfig, SweepConfig};
    use pedsim_storage::load_frames;

    fn small() -> AppConfig {
        AppConfig {
            simulation: PedsimConfig {
                num_agents: 4,
                rng_seed: Some(9),
                ..PedsimConfig::default()
            },
            sweep: SweepConfig {
                means: LinearRange::constant(1.0),
                variances: LinearRange::new(0.0, 1.0, 2),
                repeats: 1,
                ..SweepConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn run_reaches_target_and_logs_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frames = dir.path().join("frames.jsonl");
        let options = RunOptions {
            frames: Some(frames.clone()),
            ..RunOptions::default()
        };
        let summary = run_simulation(&small(), &options)?;
        assert!(summary.target_reached);
        assert_eq!(summary.crossings, 4);
        assert!(summary.metrics.is_some());

        let logged = load_frames(&frames)?;
        assert_eq!(logged.len() as u64, summary.steps + 1);
        Ok(())
    }

    #[test]
    fn run_stops_at_max_steps() -> Result<()> {
        let options = RunOptions {
            max_steps: Some(3),
            ..RunOptions::default()
        };
        let summary = run_simulation(&small(), &options)?;
        assert_eq!(summary.steps, 3);
        assert!(!summary.target_reached);
        Ok(())
    }

    #[test]
    fn sweep_writes_requested_format() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = SweepOutput {
            path: dir.path().join("rows.json"),
            format: OutputFormat::Json,
        };
        let rows = run_sweep(&small(), Some(&output), Arc::new(pedsim_core::NullProgress))?;
        assert_eq!(rows.len(), 2);
        assert_eq!(pedsim_storage::load_results(&output.path, OutputFormat::Json)?, rows);
        Ok(())
    }
}

//! Parameter sweep over the spawn distribution with per-configuration metric aggregation.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::{BoundaryMap, PedsimConfig, SimulationState, Simulator, StateError};

/// Errors surfaced by the experiment driver.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("invalid sweep configuration: {0}")]
    InvalidSweep(&'static str),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("trial (mean {mean}, variance {variance}, repeat {repeat}) exceeded {steps} steps")]
    StepLimit {
        mean: f64,
        variance: f64,
        repeat: usize,
        steps: u64,
    },
    #[error("experiments require a fixed time step")]
    NonReproducibleTimeStep,
}

/// `steps` evenly spaced values from `start` to `end` inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LinearRange {
    pub start: f64,
    pub end: f64,
    pub steps: usize,
}

impl LinearRange {
    #[must_use]
    pub const fn new(start: f64, end: f64, steps: usize) -> Self {
        Self { start, end, steps }
    }

    /// A single-point range.
    #[must_use]
    pub const fn constant(value: f64) -> Self {
        Self::new(value, value, 1)
    }

    /// The grid values. A single step yields `[start]`.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        match self.steps {
            0 => Vec::new(),
            1 => vec![self.start],
            steps => {
                let stride = (self.end - self.start) / (steps - 1) as f64;
                (0..steps)
                    .map(|i| {
                        if i == steps - 1 {
                            self.end
                        } else {
                            self.start + stride * i as f64
                        }
                    })
                    .collect()
            }
        }
    }
}

/// Sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    /// Spawn-offset means, outer loop.
    pub means: LinearRange,
    /// Spawn-offset variances, inner loop.
    pub variances: LinearRange,
    /// Trials per `(mean, variance)` pair.
    pub repeats: usize,
    /// Collect per-agent statistics; metric columns are `None` when disabled.
    pub record_metrics: bool,
    /// Abort a trial that has not met its crossing target after this many steps.
    pub step_limit: Option<u64>,
    /// Run configurations on the rayon pool.
    pub parallel: bool,
    /// Root of the per-trial seed derivation.
    pub base_seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            means: LinearRange::new(0.0, 4.0, 5),
            variances: LinearRange::new(0.0, 2.0, 5),
            repeats: 3,
            record_metrics: true,
            step_limit: Some(100_000),
            parallel: false,
            base_seed: 0x5EED_0F_CAFE,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.means.steps == 0 || self.variances.steps == 0 {
            return Err(ExperimentError::InvalidSweep(
                "mean and variance ranges need at least one step",
            ));
        }
        if self.repeats == 0 {
            return Err(ExperimentError::InvalidSweep("repeats must be non-zero"));
        }
        let ranges = [self.means, self.variances];
        if ranges
            .iter()
            .any(|r| !(r.start.is_finite() && r.end.is_finite()))
        {
            return Err(ExperimentError::InvalidSweep("range bounds must be finite"));
        }
        if self.variances.start < 0.0 || self.variances.end < 0.0 {
            return Err(ExperimentError::InvalidSweep(
                "variance range must be non-negative",
            ));
        }
        if self.step_limit == Some(0) {
            return Err(ExperimentError::InvalidSweep("step_limit must be non-zero"));
        }
        Ok(())
    }

    /// Number of trials the sweep will run.
    #[must_use]
    pub fn total_trials(&self) -> usize {
        self.means.steps * self.variances.steps * self.repeats
    }
}

/// Aggregated result for one `(mean, variance)` configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRow {
    pub mean: f64,
    pub variance: f64,
    pub efficiency: Option<f64>,
    pub discomfort: Option<f64>,
}

/// Crowd-level metrics of one finished trial.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrialMetrics {
    pub efficiency: f64,
    pub discomfort: f64,
}

impl TrialMetrics {
    /// Mean of the per-agent efficiency and discomfort; `None` when nothing was recorded.
    #[must_use]
    pub fn from_state(state: &SimulationState) -> Option<Self> {
        if !state.recording() || state.agent_count() == 0 {
            return None;
        }
        let n = state.n_timesteps();
        let count = state.agent_count() as f64;
        let mut efficiency = 0.0;
        let mut discomfort = 0.0;
        for agent in state.agents() {
            efficiency += agent.efficiency(n)?;
            discomfort += agent.discomfort(n)?;
        }
        Some(Self {
            efficiency: efficiency / count,
            discomfort: discomfort / count,
        })
    }
}

/// Summary of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialOutcome {
    pub steps: u64,
    pub crossings: u64,
    pub elapsed: f64,
    pub metrics: Option<TrialMetrics>,
}

/// Snapshot of sweep progress handed to observers after every trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepProgress {
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl SweepProgress {
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    #[must_use]
    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// Linear extrapolation of the remaining wall-clock time.
    #[must_use]
    pub fn estimated_remaining(&self) -> Option<Duration> {
        if self.completed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.completed) as f64;
        let per_trial = self.elapsed.as_secs_f64() / self.completed as f64;
        Some(Duration::from_secs_f64(per_trial * remaining))
    }
}

/// Receives progress updates; may be called from rayon workers.
pub trait ProgressObserver: Send + Sync {
    fn on_trial(&self, progress: &SweepProgress);
}

/// Observer that ignores every update.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn on_trial(&self, _progress: &SweepProgress) {}
}

/// Destination for finished experiment rows, delivered in configuration order.
pub trait ResultsSink: Send {
    fn on_row(&mut self, row: &ExperimentRow);
}

/// Sink that discards rows.
#[derive(Debug, Default)]
pub struct NullSink;

impl ResultsSink for NullSink {
    fn on_row(&mut self, _row: &ExperimentRow) {}
}

impl ResultsSink for Vec<ExperimentRow> {
    fn on_row(&mut self, row: &ExperimentRow) {
        self.push(*row);
    }
}

/// Deterministic per-trial seed from the sweep seed, configuration index, and repeat.
#[must_use]
pub const fn trial_seed(base_seed: u64, config_index: usize, repeat: usize) -> u64 {
    let mut seed = base_seed ^ (config_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    seed ^= (repeat as u64).wrapping_add(1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    seed ^ (seed >> 31)
}

struct Tracker<'a> {
    observer: &'a dyn ProgressObserver,
    completed: AtomicUsize,
    total: usize,
    started: Instant,
}

impl Tracker<'_> {
    fn bump(&self) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.observer.on_trial(&SweepProgress {
            completed,
            total: self.total,
            elapsed: self.started.elapsed(),
        });
    }
}

/// Runs the `(mean, variance)` grid, `repeats` trials per point.
pub struct ExperimentDriver {
    config: PedsimConfig,
    boundary_map: Arc<BoundaryMap>,
    sweep: SweepConfig,
    observer: Arc<dyn ProgressObserver>,
}

impl std::fmt::Debug for ExperimentDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentDriver")
            .field("config", &self.config)
            .field("sweep", &self.sweep)
            .finish_non_exhaustive()
    }
}

impl ExperimentDriver {
    /// Validate inputs and build a driver. Measured time steps are rejected.
    pub fn new(
        config: PedsimConfig,
        boundary_map: Arc<BoundaryMap>,
        sweep: SweepConfig,
    ) -> Result<Self, ExperimentError> {
        config.validate()?;
        sweep.validate()?;
        if !config.time_step.is_fixed() {
            return Err(ExperimentError::NonReproducibleTimeStep);
        }
        Ok(Self {
            config,
            boundary_map,
            sweep,
            observer: Arc::new(NullProgress),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub const fn sweep(&self) -> &SweepConfig {
        &self.sweep
    }

    #[must_use]
    pub const fn config(&self) -> &PedsimConfig {
        &self.config
    }

    /// `(mean, variance)` pairs in sweep order: means outer, variances inner.
    #[must_use]
    pub fn configurations(&self) -> Vec<(f64, f64)> {
        let variances = self.sweep.variances.values();
        self.sweep
            .means
            .values()
            .into_iter()
            .flat_map(|mean| variances.iter().map(move |&variance| (mean, variance)))
            .collect()
    }

    /// Run one trial on a fresh state until its crossing target is met.
    pub fn run_trial(
        &self,
        mean: f64,
        variance: f64,
        config_index: usize,
        repeat: usize,
    ) -> Result<TrialOutcome, ExperimentError> {
        let config = PedsimConfig {
            rng_seed: Some(trial_seed(self.sweep.base_seed, config_index, repeat)),
            record_metrics: self.sweep.record_metrics,
            ..self.config.clone()
        };
        let mut state =
            SimulationState::new(config, Arc::clone(&self.boundary_map), mean, variance)?;
        let (steps, reached) = Simulator::new().run_to_target(&mut state, self.sweep.step_limit);
        if !reached {
            return Err(ExperimentError::StepLimit {
                mean,
                variance,
                repeat,
                steps,
            });
        }
        let outcome = TrialOutcome {
            steps,
            crossings: state.num_agents_in_goal(),
            elapsed: state.elapsed(),
            metrics: TrialMetrics::from_state(&state),
        };
        debug!(
            mean,
            variance,
            repeat,
            steps,
            crossings = outcome.crossings,
            "trial finished"
        );
        Ok(outcome)
    }

    /// Run the whole sweep, handing each row to `sink` in configuration order.
    pub fn run(&self, sink: &mut dyn ResultsSink) -> Result<Vec<ExperimentRow>, ExperimentError> {
        let configurations = self.configurations();
        let tracker = Tracker {
            observer: self.observer.as_ref(),
            completed: AtomicUsize::new(0),
            total: self.sweep.total_trials(),
            started: Instant::now(),
        };
        info!(
            configurations = configurations.len(),
            repeats = self.sweep.repeats,
            agents = self.config.num_agents,
            parallel = self.sweep.parallel,
            "starting sweep"
        );

        let rows = if self.sweep.parallel {
            let rows = configurations
                .par_iter()
                .enumerate()
                .map(|(idx, &(mean, variance))| {
                    self.run_configuration(idx, mean, variance, &tracker)
                })
                .collect::<Result<Vec<_>, _>>()?;
            for row in &rows {
                sink.on_row(row);
            }
            rows
        } else {
            let mut rows = Vec::with_capacity(configurations.len());
            for (idx, &(mean, variance)) in configurations.iter().enumerate() {
                let row = self.run_configuration(idx, mean, variance, &tracker)?;
                sink.on_row(&row);
                rows.push(row);
            }
            rows
        };

        info!(
            rows = rows.len(),
            elapsed_secs = tracker.started.elapsed().as_secs_f64(),
            "sweep finished"
        );
        Ok(rows)
    }

    fn run_configuration(
        &self,
        config_index: usize,
        mean: f64,
        variance: f64,
        tracker: &Tracker<'_>,
    ) -> Result<ExperimentRow, ExperimentError> {
        let mut metrics = Vec::with_capacity(self.sweep.repeats);
        for repeat in 0..self.sweep.repeats {
            let outcome = self.run_trial(mean, variance, config_index, repeat)?;
            metrics.push(outcome.metrics);
            tracker.bump();
        }
        let recorded: Option<Vec<TrialMetrics>> = metrics.into_iter().collect();
        let (efficiency, discomfort) = match recorded {
            Some(trials) if !trials.is_empty() => {
                let n = trials.len() as f64;
                let efficiency = trials.iter().map(|m| m.efficiency).sum::<f64>() / n;
                let discomfort = trials.iter().map(|m| m.discomfort).sum::<f64>() / n;
                (Some(efficiency), Some(discomfort))
            }
            _ => (None, None),
        };
        info!(mean, variance, ?efficiency, ?discomfort, "configuration finished");
        Ok(ExperimentRow {
            mean,
            variance,
            efficiency,
            discomfort,
        })
    }
}

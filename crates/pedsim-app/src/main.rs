use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pedsim_app::{
    AppConfig, ProgressBarObserver, RunOptions, SweepOutput, run_simulation, run_sweep,
};
use pedsim_core::{LinearRange, TimeStep};
use pedsim_storage::OutputFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "pedsim",
    version,
    about = "Social-force simulation of two opposing pedestrian streams"
)]
struct Cli {
    /// TOML file with [simulation], [sweep] and [map] tables.
    #[arg(long, global = true, env = "PEDSIM_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug)]
struct ModelArgs {
    /// Number of agents.
    #[arg(short = 'n', long = "agents", global = true)]
    agents: Option<usize>,
    /// Fixed integration step in seconds.
    #[arg(long, global = true)]
    dt: Option<f64>,
    /// Respawn agents after each goal crossing.
    #[arg(long, global = true)]
    continuous: bool,
    /// Crossings per agent that end a continuous-mode trial.
    #[arg(long, global = true)]
    goals_per_agent: Option<f64>,
    /// ASCII boundary map (`#` wall, `.` floor).
    #[arg(long, global = true)]
    map: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single headless simulation.
    Run {
        /// RNG seed for placement and fluctuation.
        #[arg(long)]
        seed: Option<u64>,
        /// Stop after this many steps.
        #[arg(long)]
        steps: Option<u64>,
        /// Spawn-offset mean.
        #[arg(long, default_value_t = 2.0)]
        mean: f64,
        /// Spawn-offset variance.
        #[arg(long, default_value_t = 1.0)]
        variance: f64,
        /// Write one JSON telemetry frame per step to this file.
        #[arg(long)]
        frames: Option<PathBuf>,
        /// Use wall-clock time between steps; `--dt` becomes the first-step fallback.
        #[arg(long)]
        realtime: bool,
    },
    /// Sweep the spawn mean/variance grid and aggregate efficiency and discomfort.
    Sweep(SweepArgs),
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[arg(long)]
    mean_min: Option<f64>,
    #[arg(long)]
    mean_max: Option<f64>,
    #[arg(long)]
    mean_steps: Option<usize>,
    #[arg(long)]
    var_min: Option<f64>,
    #[arg(long)]
    var_max: Option<f64>,
    #[arg(long)]
    var_steps: Option<usize>,
    /// Trials per (mean, variance) pair.
    #[arg(short, long)]
    repeats: Option<usize>,
    /// Base seed for per-trial seed derivation.
    #[arg(long)]
    seed: Option<u64>,
    /// Abort when a trial has not finished after this many steps.
    #[arg(long)]
    step_limit: Option<u64>,
    /// Run configurations in parallel.
    #[arg(long)]
    parallel: bool,
    /// Skip metric collection; rows carry empty metric columns.
    #[arg(long)]
    no_record: bool,
    /// Results file; rows are printed to stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Output format; inferred from the output extension when omitted.
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    /// Hide the progress bar.
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => Self::Csv,
            FormatArg::Json => Self::Json,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    apply_model_args(&mut config, &cli.model);

    match cli.command {
        Command::Run {
            seed,
            steps,
            mean,
            variance,
            frames,
            realtime,
        } => {
            if seed.is_some() {
                config.simulation.rng_seed = seed;
            }
            if realtime {
                let fallback = config.simulation.time_step.initial();
                config.simulation.time_step = TimeStep::Measured { fallback };
            }
            let options = RunOptions {
                mean,
                variance,
                max_steps: steps,
                frames,
            };
            let summary = run_simulation(&config, &options)?;
            println!(
                "steps={} crossings={} target_reached={} elapsed={:.3}s distance={:.3}",
                summary.steps,
                summary.crossings,
                summary.target_reached,
                summary.elapsed,
                summary.total_distance
            );
            if let Some(metrics) = summary.metrics {
                println!(
                    "efficiency={:.4} discomfort={:.4}",
                    metrics.efficiency, metrics.discomfort
                );
            }
        }
        Command::Sweep(args) => {
            apply_sweep_args(&mut config, &args);
            let output = match &args.output {
                Some(path) => {
                    let format = match args.format {
                        Some(format) => format.into(),
                        None => OutputFormat::from_path(path)
                            .context("pass --format or use a .csv/.json output path")?,
                    };
                    Some(SweepOutput {
                        path: path.clone(),
                        format,
                    })
                }
                None => None,
            };

            let total = config.sweep.total_trials();
            let observer = if args.quiet {
                ProgressBarObserver::hidden(total)
            } else {
                ProgressBarObserver::new(total)?
            };
            let rows = run_sweep(&config, output.as_ref(), Arc::new(observer.clone()))?;
            observer.finish();
            info!(rows = rows.len(), "sweep complete");

            if output.is_none() {
                println!("mean,variance,efficiency,discomfort");
                for row in &rows {
                    println!(
                        "{},{},{},{}",
                        row.mean,
                        row.variance,
                        row.efficiency.map(|v| v.to_string()).unwrap_or_default(),
                        row.discomfort.map(|v| v.to_string()).unwrap_or_default()
                    );
                }
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_model_args(config: &mut AppConfig, args: &ModelArgs) {
    let simulation = &mut config.simulation;
    if let Some(agents) = args.agents {
        simulation.num_agents = agents;
    }
    if let Some(dt) = args.dt {
        simulation.time_step = TimeStep::Fixed { dt };
    }
    if args.continuous {
        simulation.continuous = true;
    }
    if let Some(goals) = args.goals_per_agent {
        simulation.average_goals_per_agent = goals;
    }
    if let Some(map) = &args.map {
        config.map.file = Some(map.clone());
    }
}

fn apply_sweep_args(config: &mut AppConfig, args: &SweepArgs) {
    let sweep = &mut config.sweep;
    sweep.means = override_range(sweep.means, args.mean_min, args.mean_max, args.mean_steps);
    sweep.variances = override_range(sweep.variances, args.var_min, args.var_max, args.var_steps);
    if let Some(repeats) = args.repeats {
        sweep.repeats = repeats;
    }
    if let Some(seed) = args.seed {
        sweep.base_seed = seed;
    }
    if args.step_limit.is_some() {
        sweep.step_limit = args.step_limit;
    }
    if args.parallel {
        sweep.parallel = true;
    }
    if args.no_record {
        sweep.record_metrics = false;
    }
}

fn override_range(
    range: LinearRange,
    start: Option<f64>,
    end: Option<f64>,
    steps: Option<usize>,
) -> LinearRange {
    LinearRange {
        start: start.unwrap_or(range.start),
        end: end.unwrap_or(range.end),
        steps: steps.unwrap_or(range.steps),
    }
}

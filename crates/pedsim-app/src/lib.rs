//! Shared application plumbing for the `pedsim` command-line front end.

pub mod config;
pub mod progress;
pub mod runner;

pub use config::{AppConfig, MapConfig, MapLayout};
pub use progress::ProgressBarObserver;
pub use runner::{RunOptions, RunSummary, SweepOutput, run_simulation, run_sweep};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use pedsim_core::{ProgressObserver, SweepProgress};
use std::time::Duration;

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} trials {msg}";

/// Renders sweep progress as a terminal progress bar.
#[derive(Clone)]
pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl std::fmt::Debug for ProgressBarObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBarObserver")
            .field("position", &self.bar.position())
            .field("length", &self.bar.length())
            .finish()
    }
}

impl ProgressBarObserver {
    pub fn new(total_trials: usize) -> Result<Self> {
        let bar = ProgressBar::new(total_trials as u64);
        bar.set_style(ProgressStyle::default_bar().template(TEMPLATE)?.progress_chars("#>-"));
        Ok(Self { bar })
    }

    /// Observer that tracks progress without drawing anything.
    #[must_use]
    pub fn hidden(total_trials: usize) -> Self {
        let bar =
            ProgressBar::with_draw_target(Some(total_trials as u64), ProgressDrawTarget::hidden());
        Self { bar }
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_trial(&self, progress: &SweepProgress) {
        self.bar.set_position(progress.completed as u64);
        let eta = progress
            .estimated_remaining()
            .map_or_else(|| "--:--:--".to_string(), format_duration);
        self.bar
            .set_message(format!("{:5.1}% eta {eta}", progress.percent()));
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

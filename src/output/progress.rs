use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_red, bright_yellow, dim};
use crate::report::StageStatus;

/// Per-stage spinners for a run, drawn on stderr.
pub struct RunProgress {
    enabled: bool,
    total: usize,
}

/// Spinner for the stage currently executing.
pub struct StageSpinner {
    pb: ProgressBar,
    label: String,
}

impl RunProgress {
    pub fn new(enabled: bool, total: usize) -> Self {
        if enabled {
            eprintln!("{}  {}", bright("⚙️"), bright("Stages").underlined());
        }
        Self { enabled, total }
    }

    fn label(&self, name: &str, idx: usize) -> String {
        format!("Stage {}/{}: {name}", idx + 1, self.total)
    }

    pub fn start(&self, name: &str, idx: usize) -> StageSpinner {
        let label = self.label(name, idx);
        let pb = if self.enabled {
            create_spinner(bright_yellow(&label).to_string())
        } else {
            ProgressBar::hidden()
        };
        StageSpinner { pb, label }
    }

    pub fn skipped(&self, name: &str, idx: usize, reason: &str) {
        if self.enabled {
            eprintln!(
                "  {} {}",
                dim(format!("{} ⏭", self.label(name, idx))),
                dim(format!("({reason})"))
            );
        }
    }

    pub fn rejected(&self, name: &str, idx: usize) {
        if self.enabled {
            eprintln!(
                "  {}",
                bright_red(format!("{} ✋ approval rejected", self.label(name, idx)))
            );
        }
    }
}

impl StageSpinner {
    pub fn finish(self, status: StageStatus, duration_secs: f64) {
        let message = format!("{} ({duration_secs:.1}s)", self.label);
        let styled = match status {
            StageStatus::Succeeded => bright_green(format!("{message} ✓")),
            StageStatus::TimedOut => bright_red(format!("{message} ⏱ timed out")),
            _ => bright_red(format!("{message} ✗")),
        };
        self.pb.finish_with_message(styled.to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

use console::{style, StyledObject};

use crate::report::{RunStatus, StageStatus};

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

pub fn run_status(status: RunStatus) -> StyledObject<String> {
    let label = status.as_str().to_uppercase();
    match status {
        RunStatus::Succeeded => bright_green(label),
        RunStatus::Rejected => bright_yellow(label),
        RunStatus::Failed => bright_red(label),
        RunStatus::Running => dim(label),
    }
}

pub fn stage_status_symbol(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Succeeded => "✓",
        StageStatus::Failed => "✗",
        StageStatus::TimedOut => "⏱",
        StageStatus::Skipped => "⏭",
        StageStatus::Rejected => "✋",
        StageStatus::Pending | StageStatus::Running => "…",
    }
}

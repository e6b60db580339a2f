use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use super::styling::stage_status_symbol;
use crate::report::{RunStatus, StageStatus};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn stage_status_cell(status: StageStatus, continue_on_error: bool) -> Cell {
    let text = format!("{} {}", stage_status_symbol(status), status.as_str());
    let color = match status {
        StageStatus::Succeeded => TableColor::Green,
        StageStatus::Failed | StageStatus::TimedOut if continue_on_error => TableColor::Yellow,
        StageStatus::Failed | StageStatus::TimedOut => TableColor::Red,
        StageStatus::Rejected => TableColor::Yellow,
        StageStatus::Skipped | StageStatus::Pending | StageStatus::Running => {
            TableColor::DarkGrey
        }
    };
    Cell::new(text).fg(color)
}

pub fn run_status_cell(status: RunStatus) -> Cell {
    let color = match status {
        RunStatus::Succeeded => TableColor::Green,
        RunStatus::Rejected => TableColor::Yellow,
        RunStatus::Failed => TableColor::Red,
        RunStatus::Running => TableColor::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

pub fn format_duration(seconds: f64) -> String {
    if seconds >= 60.0 {
        format!("{:.1}min", seconds / 60.0)
    } else {
        format!("{seconds:.1}s")
    }
}

pub fn duration_cell(seconds: f64) -> Cell {
    let text = format_duration(seconds);
    if seconds <= 300.0 {
        Cell::new(text).fg(TableColor::Green)
    } else if seconds <= 900.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

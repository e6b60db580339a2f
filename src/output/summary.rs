use std::fmt::Write;

use comfy_table::{Cell, Color as TableColor};

use super::styling::{bright, bright_red, bright_yellow, cyan, dim, run_status};
use super::tables::{
    create_table, duration_cell, format_duration, header, run_status_cell, stage_status_cell,
};
use crate::pipeline::{PipelineDefinition, StageGraph};
use crate::report::{RunReport, RunStatus, StageReport, StageStatus};

/// Lines of failing output shown under the stage table.
const FAILURE_EXCERPT_LINES: usize = 15;

/// Prints a human-readable summary of a finished run to stdout.
///
/// Shows an overview, a color-coded stage table, the tail of output from
/// failing commands and what to do next.
pub fn print_run_summary(report: &RunReport) {
    println!("{}", render_run_summary(report));
}

pub fn print_plan(definition: &PipelineDefinition, graph: &StageGraph) {
    println!("{}", render_plan(definition, graph));
}

pub fn print_history(pipeline: &str, runs: &[RunReport]) {
    println!("{}", render_history(pipeline, runs));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn gate_note(stage: &StageReport) -> String {
    if let Some(approval) = &stage.approval {
        let verb = if approval.approved() {
            "approved"
        } else {
            "rejected"
        };
        return format!("{verb} by {}", approval.decided_by);
    }
    stage.skip_reason.clone().unwrap_or_default()
}

fn last_lines(text: &str, limit: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].to_vec()
}

pub(crate) fn render_run_summary(report: &RunReport) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Run");
    let _ = write!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Pipeline:"),
        cyan(&report.pipeline),
        dim("Run:"),
        bright_yellow(format!("#{}", report.id)),
        dim("Trigger:"),
        bright_yellow(report.trigger),
        dim("Status:"),
        run_status(report.status),
        dim("Duration:"),
        bright_yellow(format_duration(report.duration_secs)),
        dim("Started:"),
        dim(report.started_at.format("%Y-%m-%d %H:%M UTC"))
    );

    add_section_header(&mut output, "📋", "Stages");

    let mut table = create_table();
    table.set_header(header(&["#", "Stage", "Status", "Attempts", "Duration", "Notes"]));

    for (idx, stage) in report.stages.iter().enumerate() {
        let duration = if stage.started_at.is_some() {
            duration_cell(stage.duration_secs)
        } else {
            Cell::new("-").fg(TableColor::DarkGrey)
        };
        let mut notes = gate_note(stage);
        if stage.continue_on_error && stage.status.is_failure() {
            notes = "failure allowed".to_string();
        }

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(&stage.name),
            stage_status_cell(stage.status, stage.continue_on_error),
            Cell::new(stage.attempts),
            duration,
            Cell::new(notes),
        ]);
    }

    let _ = writeln!(output, "{table}\n");

    let failures: Vec<&StageReport> = report
        .stages
        .iter()
        .filter(|s| s.status.is_failure())
        .collect();

    for stage in &failures {
        let Some(command) = stage.commands.last() else {
            continue;
        };
        add_section_header(&mut output, "❌", &format!("Output of '{}'", stage.name));
        let _ = writeln!(output, "  {} {}", dim("$"), command.command);
        let exit = command
            .exit_code
            .map_or_else(|| "none".to_string(), |c| c.to_string());
        let _ = writeln!(output, "  {} {}", dim("exit code:"), bright_red(exit));
        for line in last_lines(&command.stderr, FAILURE_EXCERPT_LINES) {
            let _ = writeln!(output, "  {}", dim(line));
        }
        output.push('\n');
    }

    add_section_header(&mut output, "💡", "Next Steps");
    match report.status {
        RunStatus::Succeeded => {
            let _ = writeln!(
                output,
                "  {} All {} stages passed or were skipped by their conditions",
                cyan("•"),
                report.stages.len()
            );
        }
        RunStatus::Failed => {
            let _ = writeln!(
                output,
                "  {} Fix the failing stage and re-run; use {} for full logs",
                cyan("•"),
                bright_yellow("--format json")
            );
        }
        RunStatus::Rejected => {
            let _ = writeln!(
                output,
                "  {} Approve the gate with {} or answer the prompt",
                cyan("•"),
                bright_yellow("--approve <stage>")
            );
        }
        RunStatus::Running => {}
    }

    output
}

pub(crate) fn render_plan(definition: &PipelineDefinition, graph: &StageGraph) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🗺️", &format!("Plan for '{}'", definition.name));
    if let Some(description) = &definition.description {
        let _ = writeln!(output, "  {}", dim(description));
    }

    let mut table = create_table();
    table.set_header(header(&["#", "Stage", "Needs", "When", "Gate", "Commands"]));

    for (idx, name) in graph.order().iter().enumerate() {
        let Some(stage) = definition.stage(name) else {
            continue;
        };
        let needs = graph.parents(name);
        let gate = if stage.approval.is_some() {
            Cell::new("manual approval").fg(TableColor::Yellow)
        } else {
            Cell::new("-").fg(TableColor::DarkGrey)
        };

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(match &stage.description {
                Some(description) => format!("{name}\n{description}"),
                None => name.clone(),
            }),
            Cell::new(if needs.is_empty() {
                "-".to_string()
            } else {
                needs.join("\n")
            }),
            Cell::new(stage.when.to_string()),
            gate,
            Cell::new(stage.commands.join("\n")),
        ]);
    }

    let _ = writeln!(output, "{table}");

    if !definition.secrets.is_empty() {
        let _ = writeln!(
            output,
            "  {} {}",
            dim("Secrets:"),
            cyan(definition.secrets.join(", "))
        );
    }

    output
}

pub(crate) fn render_history(pipeline: &str, runs: &[RunReport]) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🕘", &format!("History for '{pipeline}'"));

    if runs.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No runs recorded."));
        return output;
    }

    let mut table = create_table();
    table.set_header(header(&["Run", "Status", "Trigger", "Started", "Duration", "Stages"]));

    for run in runs {
        let passed = run.count(StageStatus::Succeeded);
        table.add_row(vec![
            Cell::new(format!("#{}", run.id)),
            run_status_cell(run.status),
            Cell::new(run.trigger),
            Cell::new(run.started_at.format("%Y-%m-%d %H:%M")),
            duration_cell(run.duration_secs),
            Cell::new(format!("{passed}/{} passed", run.stages.len())),
        ]);
    }

    let _ = writeln!(output, "{table}");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::{RunCondition, Trigger};
    use crate::pipeline::gate::{Approval, Decision};
    use crate::report::CommandReport;
    use chrono::Utc;

    fn stage(name: &str, status: StageStatus) -> StageReport {
        let mut stage = StageReport::pending(name, vec![], RunCondition::OnSuccess, false);
        stage.status = status;
        if status != StageStatus::Skipped {
            stage.started_at = Some(Utc::now());
            stage.attempts = 1;
        }
        stage
    }

    fn report(status: RunStatus, stages: Vec<StageReport>) -> RunReport {
        RunReport {
            id: 12,
            pipeline: "delivery".to_string(),
            trigger: Trigger::Push,
            status,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            duration_secs: 42.0,
            stages,
        }
    }

    #[test]
    fn test_render_successful_run() {
        let output = render_run_summary(&report(
            RunStatus::Succeeded,
            vec![stage("build", StageStatus::Succeeded)],
        ));

        assert!(output.contains("delivery"));
        assert!(output.contains("#12"));
        assert!(output.contains("build"));
        assert!(output.contains("SUCCEEDED"));
        assert!(!output.contains("Output of"));
    }

    #[test]
    fn test_render_failed_run_shows_output_tail() {
        let mut failed = stage("test", StageStatus::Failed);
        failed.commands.push(CommandReport {
            command: "mvn test".to_string(),
            exit_code: Some(1),
            timed_out: false,
            duration_secs: 3.0,
            stdout: String::new(),
            stderr: "BUILD FAILURE\nTests run: 4, Failures: 1".to_string(),
        });

        let output = render_run_summary(&report(
            RunStatus::Failed,
            vec![failed, stage("deploy", StageStatus::Skipped)],
        ));

        assert!(output.contains("Output of 'test'"));
        assert!(output.contains("mvn test"));
        assert!(output.contains("Failures: 1"));
        assert!(output.contains("--format json"));
    }

    #[test]
    fn test_render_rejected_gate() {
        let mut deploy = stage("deploy", StageStatus::Rejected);
        deploy.approval = Some(Approval::new(Decision::Rejected, "alice", None));

        let output = render_run_summary(&report(RunStatus::Rejected, vec![deploy]));

        assert!(output.contains("rejected by alice"));
        assert!(output.contains("--approve <stage>"));
    }

    #[test]
    fn test_render_plan() {
        let definition: PipelineDefinition = serde_yaml::from_str(
            r"
name: delivery
description: Ships the web app
secrets: [EC2_HOST]
stages:
  - {name: build, commands: [mvn package], description: compile}
  - {name: deploy, commands: [ssh host], approval: {}}
",
        )
        .unwrap();
        let graph = StageGraph::build(&definition).unwrap();

        let output = render_plan(&definition, &graph);
        assert!(output.contains("Plan for 'delivery'"));
        assert!(output.contains("Ships the web app"));
        assert!(output.contains("compile"));
        assert!(output.contains("manual approval"));
        assert!(output.contains("on_success"));
        assert!(output.contains("EC2_HOST"));
    }

    #[test]
    fn test_render_history() {
        let empty = render_history("delivery", &[]);
        assert!(empty.contains("No runs recorded"));

        let runs = vec![report(
            RunStatus::Failed,
            vec![
                stage("build", StageStatus::Succeeded),
                stage("test", StageStatus::Failed),
            ],
        )];
        let output = render_history("delivery", &runs);
        assert!(output.contains("#12"));
        assert!(output.contains("1/2 passed"));
    }
}

use std::collections::HashSet;
use std::future::Future;
use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use console::Term;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::definition::RunCondition;
use crate::error::{Result, StagegateError};
use crate::report::StageReport;

/// Outcome of a stage's run condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Skip(String),
}

/// Decides whether a stage may start given its parents' final reports.
///
/// A root stage has nothing to fail, so `on_failure` skips it while the other
/// conditions let it run.
pub fn evaluate(condition: RunCondition, parents: &[&StageReport]) -> GateDecision {
    match condition {
        RunCondition::Always => GateDecision::Proceed,
        RunCondition::OnSuccess => {
            if parents.iter().all(|p| p.passed()) {
                GateDecision::Proceed
            } else {
                GateDecision::Skip("upstream stage did not succeed".to_string())
            }
        }
        RunCondition::OnFailure => {
            if parents.iter().any(|p| p.status.is_failure()) {
                GateDecision::Proceed
            } else {
                GateDecision::Skip("no upstream stage failed".to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// Record of a manual approval, kept in the stage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub decision: Decision,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Approval {
    pub fn new(decision: Decision, decided_by: &str, note: Option<String>) -> Self {
        Self {
            decision,
            decided_by: decided_by.to_string(),
            decided_at: Utc::now(),
            note,
        }
    }

    pub fn approved(&self) -> bool {
        self.decision == Decision::Approved
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub pipeline: String,
    pub stage: String,
    pub run_id: u64,
    pub message: Option<String>,
}

/// How gates are answered when no explicit approval was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    #[default]
    Prompt,
    Auto,
    Deny,
}

pub trait Approver {
    fn approve(
        &self,
        request: &ApprovalRequest,
    ) -> impl Future<Output = Result<Approval>> + Send;
}

/// Asks a human on the terminal. Without an interactive stdin the gate is
/// rejected rather than left hanging.
#[derive(Debug, Clone, Default)]
pub struct PromptApprover;

impl Approver for PromptApprover {
    async fn approve(&self, request: &ApprovalRequest) -> Result<Approval> {
        if !std::io::stdin().is_terminal() {
            warn!(
                "Stage '{}' needs approval but stdin is not a terminal",
                request.stage
            );
            return Ok(Approval::new(
                Decision::Rejected,
                "prompt",
                Some("no interactive terminal available".to_string()),
            ));
        }

        let request = request.clone();
        tokio::task::spawn_blocking(move || prompt(&request))
            .await
            .map_err(|e| StagegateError::Approval(e.to_string()))?
    }
}

fn prompt(request: &ApprovalRequest) -> Result<Approval> {
    let term = Term::stderr();
    let message = request
        .message
        .clone()
        .unwrap_or_else(|| format!("Run stage '{}'?", request.stage));

    term.write_line("")?;
    term.write_line(&format!(
        "  ⏸  {} (pipeline {}, run #{})",
        console::style(&message).bold(),
        request.pipeline,
        request.run_id
    ))?;
    term.write_str("  Approve? [y/N] ")?;

    let answer = term.read_line()?;
    let decision = parse_answer(&answer);
    let user = std::env::var("USER").unwrap_or_else(|_| "terminal".to_string());

    Ok(Approval::new(decision, &user, None))
}

fn parse_answer(answer: &str) -> Decision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Approved,
        _ => Decision::Rejected,
    }
}

/// Answers gates from command-line choices, then falls back to the
/// configured [`ApprovalMode`].
#[derive(Debug, Clone, Default)]
pub struct PresetApprover {
    pub stages: HashSet<String>,
    pub approve_all: bool,
    pub fallback: ApprovalMode,
}

impl PresetApprover {
    pub fn new<I: IntoIterator<Item = String>>(
        stages: I,
        approve_all: bool,
        fallback: ApprovalMode,
    ) -> Self {
        Self {
            stages: stages.into_iter().collect(),
            approve_all,
            fallback,
        }
    }
}

impl Approver for PresetApprover {
    async fn approve(&self, request: &ApprovalRequest) -> Result<Approval> {
        if self.approve_all || self.stages.contains(&request.stage) {
            info!("Stage '{}' approved from the command line", request.stage);
            return Ok(Approval::new(Decision::Approved, "command-line", None));
        }

        match self.fallback {
            ApprovalMode::Auto => Ok(Approval::new(Decision::Approved, "config:auto", None)),
            ApprovalMode::Deny => Ok(Approval::new(
                Decision::Rejected,
                "config:deny",
                Some("approvals are denied by configuration".to_string()),
            )),
            ApprovalMode::Prompt => PromptApprover.approve(request).await,
        }
    }
}

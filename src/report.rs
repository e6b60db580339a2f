use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::definition::{RunCondition, Trigger};
use crate::pipeline::gate::Approval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
    Rejected,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Record of one pipeline run, as printed and stored in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: u64,
    pub pipeline: String,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub needs: Vec<String>,
    pub status: StageStatus,
    pub condition: RunCondition,
    pub approval: Option<Approval>,
    pub skip_reason: Option<String>,
    pub attempts: u32,
    pub continue_on_error: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub commands: Vec<CommandReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReport {
    /// Command as run, with secret values masked
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_secs: f64,
    pub stdout: String,
    pub stderr: String,
}

impl StageReport {
    pub fn pending(
        name: &str,
        needs: Vec<String>,
        condition: RunCondition,
        continue_on_error: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            needs,
            status: StageStatus::Pending,
            condition,
            approval: None,
            skip_reason: None,
            attempts: 0,
            continue_on_error,
            started_at: None,
            finished_at: None,
            duration_secs: 0.0,
            commands: Vec::new(),
        }
    }

    /// Whether this stage counts as passed for `on_success` dependents.
    pub fn passed(&self) -> bool {
        self.status == StageStatus::Succeeded
            || (self.continue_on_error && self.status.is_failure())
    }
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Derives the final run status from stage outcomes.
    ///
    /// Hard failures win over rejections; anything else is a success.
    pub fn final_status(&self) -> RunStatus {
        let failed = self
            .stages
            .iter()
            .any(|s| s.status.is_failure() && !s.continue_on_error);
        if failed {
            return RunStatus::Failed;
        }

        if self.stages.iter().any(|s| s.status == StageStatus::Rejected) {
            return RunStatus::Rejected;
        }

        RunStatus::Succeeded
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }
}

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StagegateError};

/// A pipeline as declared in a `stagegate` definition file.
///
/// Stages are listed in declaration order. A stage without `needs` runs after
/// the stage declared right before it, so a plain list reads top to bottom.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineDefinition {
    /// Pipeline name, used for history and reports
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Triggers this pipeline accepts; empty accepts any trigger
    #[serde(default)]
    pub triggers: Vec<Trigger>,

    /// Environment shared by every stage
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Names of secrets that must resolve before the run starts
    #[serde(default)]
    pub secrets: Vec<String>,

    pub stages: Vec<StageDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StageDefinition {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Shell commands, run one after another
    pub commands: Vec<String>,

    /// Explicit parents. `None` means "the previous stage".
    #[serde(default)]
    pub needs: Option<Vec<String>>,

    #[serde(default)]
    pub when: RunCondition,

    /// Manual approval required before the stage runs
    #[serde(default)]
    pub approval: Option<ApprovalGate>,

    #[serde(default)]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extra attempts after a failure
    #[serde(default)]
    pub retries: u32,

    /// A failure of this stage does not fail the run
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Condition on parent outcomes that lets a stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    #[default]
    OnSuccess,
    OnFailure,
    Always,
}

impl fmt::Display for RunCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OnSuccess => "on_success",
            Self::OnFailure => "on_failure",
            Self::Always => "always",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGate {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Push,
    PullRequest,
    Schedule,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Manual => "manual",
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::Schedule => "schedule",
        };
        f.write_str(label)
    }
}

impl PipelineDefinition {
    /// Loads a definition file, picking the format from the extension.
    ///
    /// `.yml`/`.yaml`, `.toml` and `.json` are parsed directly; any other
    /// extension tries YAML, then TOML, then JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, cannot be parsed, or
    /// breaks one of the definition rules checked by [`Self::check`].
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        let parsed: std::result::Result<Self, String> = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&contents).map_err(|e| e.to_string()),
            "toml" => toml::from_str(&contents).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(&contents).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str(&contents)
                .map_err(|e| e.to_string())
                .or_else(|_| toml::from_str(&contents).map_err(|e| e.to_string()))
                .or_else(|_| serde_json::from_str(&contents).map_err(|e| e.to_string())),
        };

        let definition = parsed.map_err(|e| {
            StagegateError::Definition(format!("failed to parse {}: {e}", path.display()))
        })?;

        debug!(
            "Loaded pipeline '{}' with {} stages from {}",
            definition.name,
            definition.stages.len(),
            path.display()
        );

        definition.check().map_err(|e| match e {
            StagegateError::Definition(msg) => {
                StagegateError::Definition(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        Ok(definition)
    }

    /// Checks the rules that do not depend on the stage graph.
    ///
    /// # Errors
    ///
    /// Returns [`StagegateError::Definition`] describing the first broken rule.
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StagegateError::Definition(
                "pipeline name must not be empty".to_string(),
            ));
        }

        for stage in &self.stages {
            if stage.commands.is_empty() {
                return Err(StagegateError::Definition(format!(
                    "stage '{}' has no commands",
                    stage.name
                )));
            }
        }

        for secret in &self.secrets {
            if !is_valid_secret_name(secret) {
                return Err(StagegateError::Definition(format!(
                    "invalid secret name '{secret}'; use upper-case letters, digits and '_'"
                )));
            }
        }

        Ok(())
    }

    pub fn accepts(&self, trigger: Trigger) -> bool {
        self.triggers.is_empty() || self.triggers.contains(&trigger)
    }

    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}

pub fn is_valid_stage_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn is_valid_secret_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

use thiserror::Error;

use crate::pipeline::graph::GraphError;

#[derive(Error, Debug)]
pub enum StagegateError {
    #[error("Invalid pipeline definition: {0}")]
    Definition(String),

    #[error("Invalid stage graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Missing secrets: {}", .0.join(", "))]
    MissingSecrets(Vec<String>),

    #[error("Interpolation failed: {0}")]
    Interpolation(String),

    #[error("Pipeline '{pipeline}' does not accept trigger '{trigger}'")]
    TriggerNotAccepted { pipeline: String, trigger: String },

    #[error("Could not run command: {0}")]
    Execution(String),

    #[error("Approval failed: {0}")]
    Approval(String),

    #[error("History error: {0}")]
    History(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StagegateError>;

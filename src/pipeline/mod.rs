pub mod definition;
pub mod executor;
pub mod gate;
pub mod graph;
pub mod runner;
pub mod secrets;

pub use definition::{PipelineDefinition, Trigger};
pub use executor::ShellExecutor;
pub use gate::{ApprovalMode, PresetApprover};
pub use graph::StageGraph;
pub use runner::{PipelineRunner, RunnerOptions};
pub use secrets::SecretStore;

//! gradeflow CI - staged deployment of grading functions
//!
//! Provides a pipeline orchestrator that:
//! - Runs lint and test-suite checks behind a test gate
//! - Builds the function image and publishes it per environment
//! - Sends the ensure call to each environment's control plane
//! - Records every stage and step into a JSON run report

pub mod build;
pub mod check;
pub mod fakes;
pub mod gate;
pub mod notify;
pub mod orchestrator;
pub mod publish;
pub mod report;
pub mod runner;
pub mod state;

// Re-export key types
pub use build::{context_digest, BuiltImage, ImageBuilder};
pub use check::{CheckConfig, CheckKind, CheckResult};
pub use gate::{GateVerdict, TestGate};
pub use notify::{DeploymentNotifier, HttpNotifier, NotifyReceipt};
pub use orchestrator::{DeploymentPlan, Orchestrator, PipelineSettings, PlannedDeployment};
pub use publish::RegistryPublisher;
pub use report::{EventKind, PipelineEvent, PipelineReport, StageReport, StepReport};
pub use runner::{CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor};
pub use state::{PipelineState, StageName, Trigger};

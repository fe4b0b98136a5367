//! Domain models for gradeflow.
//!
//! Canonical definitions for the entities a pipeline run passes around:
//! - `FunctionName` / `ImageRef`: the build artifact identity
//! - `DeploymentTarget`: per-environment registry and backend settings
//! - `DeploymentRequest`: body of the control-plane ensure call

pub mod environment;
pub mod error;
pub mod image;
pub mod request;

// Re-export main types and errors
pub use environment::{ecr_registry, DeploymentTarget, Environment, RegistryCredentials, ENSURE_PATH};
pub use error::{ConfigError, GradeflowError, Result};
pub use image::{FunctionName, ImageRef};
pub use request::DeploymentRequest;

//! gradeflow core library
//!
//! Domain types shared by the pipeline crates: the configuration record,
//! image references, deployment targets, the ensure-call body, the error
//! taxonomy, plus tracing setup and lifecycle log hooks.

pub mod config;
pub mod domain;
pub mod obs;
pub mod telemetry;

pub use config::{ConfigRecord, DEFAULT_CONFIG_PATH, FUNCTION_NAME_FIELD};
pub use domain::{
    ecr_registry, ConfigError, DeploymentRequest, DeploymentTarget, Environment, FunctionName,
    GradeflowError, ImageRef, RegistryCredentials, Result, ENSURE_PATH,
};
pub use telemetry::{init_tracing, LogFormat};

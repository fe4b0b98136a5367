//! Deployment environments and their per-environment settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{GradeflowError, Result};
use super::image::{FunctionName, ImageRef};

/// Path of the control-plane endpoint that ensures a grading function exists.
pub const ENSURE_PATH: &str = "/grading-function/ensure";

/// Target environment of a deploy stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    /// Deploy order: staging always precedes production.
    pub const ALL: [Environment; 2] = [Environment::Staging, Environment::Production];

    pub fn name(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn default_backend_url(&self) -> &'static str {
        match self {
            Environment::Staging => "https://staging-api.lambdafeedback.com",
            Environment::Production => "https://prod-api.lambdafeedback.com",
        }
    }

    pub fn default_repository(&self) -> &'static str {
        match self {
            Environment::Staging => "lambda-feedback-staging-functions-repository",
            Environment::Production => "lambda-feedback-prod-functions-repository",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = GradeflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(GradeflowError::InvalidSettings(format!(
                "unknown environment: {other}"
            ))),
        }
    }
}

/// Registry login credentials, supplied out-of-band by the CI host.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl RegistryCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// ECR registry host for an AWS account and region.
pub fn ecr_registry(account_id: &str, region: &str) -> String {
    format!("{}.dkr.ecr.{}.amazonaws.com", account_id.trim(), region.trim())
}

/// Everything a deploy stage needs to know about one environment.
#[derive(Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub environment: Environment,
    pub registry: String,
    pub repository: String,
    pub backend_url: String,
    pub api_key: String,
    pub credentials: Option<RegistryCredentials>,
}

impl DeploymentTarget {
    /// Target using the environment's default repository and backend URL.
    pub fn new(environment: Environment, registry: &str, api_key: &str) -> Self {
        Self {
            environment,
            registry: registry.to_string(),
            repository: environment.default_repository().to_string(),
            backend_url: environment.default_backend_url().to_string(),
            api_key: api_key.to_string(),
            credentials: None,
        }
    }

    pub fn with_repository(mut self, repository: &str) -> Self {
        self.repository = repository.to_string();
        self
    }

    pub fn with_backend_url(mut self, backend_url: &str) -> Self {
        self.backend_url = backend_url.to_string();
        self
    }

    pub fn with_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Image this environment deploys for the given function.
    pub fn image_for(&self, name: &FunctionName) -> ImageRef {
        ImageRef::new(&self.registry, &self.repository, name)
    }

    /// Full URL of the ensure endpoint.
    pub fn ensure_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), ENSURE_PATH)
    }

    /// Reject targets that could never deploy successfully.
    pub fn validate(&self) -> Result<()> {
        let env = self.environment;
        if self.registry.trim().is_empty() {
            return Err(GradeflowError::InvalidSettings(format!(
                "{env}: registry must not be empty"
            )));
        }
        if self.repository.trim().is_empty() {
            return Err(GradeflowError::InvalidSettings(format!(
                "{env}: repository must not be empty"
            )));
        }
        if !(self.backend_url.starts_with("https://") || self.backend_url.starts_with("http://")) {
            return Err(GradeflowError::InvalidSettings(format!(
                "{env}: backend URL must be http(s): {}",
                self.backend_url
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(GradeflowError::InvalidSettings(format!(
                "{env}: API key must not be empty"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentTarget")
            .field("environment", &self.environment)
            .field("registry", &self.registry)
            .field("repository", &self.repository)
            .field("backend_url", &self.backend_url)
            .field("api_key", &"<redacted>")
            .field("credentials", &self.credentials)
            .finish()
    }
}

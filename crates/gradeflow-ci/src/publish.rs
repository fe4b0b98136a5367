//! Registry publisher: optional `docker login`, then `docker push`.

use gradeflow_core::{DeploymentTarget, GradeflowError, ImageRef, RegistryCredentials, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::runner::{CommandExecutor, CommandSpec};

/// Pushes built images to a target's registry.
pub struct RegistryPublisher {
    executor: Arc<dyn CommandExecutor>,
    timeout_secs: u64,
}

impl RegistryPublisher {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            timeout_secs: 0,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// `docker login {registry} --username {user} --password-stdin`
    pub fn login_command(&self, registry: &str, credentials: &RegistryCredentials) -> CommandSpec {
        CommandSpec::new(
            "docker",
            [
                "login",
                registry,
                "--username",
                credentials.username.as_str(),
                "--password-stdin",
            ],
        )
        .with_stdin(credentials.password.clone())
        .with_timeout(self.timeout_secs)
    }

    pub fn push_command(&self, image: &ImageRef) -> CommandSpec {
        CommandSpec::new("docker", ["push".to_string(), image.uri()]).with_timeout(self.timeout_secs)
    }

    /// Log in (when the target carries credentials) and push `image`.
    ///
    /// Without credentials the host is assumed to be authenticated already.
    /// Every failure is a [`GradeflowError::Publish`].
    pub async fn publish(&self, target: &DeploymentTarget, image: &ImageRef) -> Result<()> {
        match &target.credentials {
            Some(credentials) => {
                let spec = self.login_command(&target.registry, credentials);
                self.run(&spec, "docker login").await?;
                debug!(registry = %target.registry, "Logged in to registry");
            }
            None => debug!(registry = %target.registry, "No registry credentials, skipping login"),
        }

        info!(image = %image, "Pushing image");
        self.run(&self.push_command(image), "docker push").await
    }

    async fn run(&self, spec: &CommandSpec, what: &str) -> Result<()> {
        let output = self
            .executor
            .execute(spec)
            .await
            .map_err(|e| GradeflowError::Publish(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(GradeflowError::Publish(format!(
                "{what} failed with {}",
                output.failure_summary()
            )))
        }
    }
}

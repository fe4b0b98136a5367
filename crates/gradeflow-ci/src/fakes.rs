//! In-memory fakes for the executor and notifier seams (testing only)
//!
//! `ScriptedExecutor` records every command and answers from a rule list;
//! `MemoryControlPlane` applies ensure calls to an in-memory deployment map.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gradeflow_core::{DeploymentRequest, GradeflowError, Result};

use crate::notify::{DeploymentNotifier, NotifyReceipt};
use crate::runner::{CommandExecutor, CommandOutput, CommandSpec};

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Outcome {
    Exit { code: i32, stderr: String },
    Error(String),
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    outcome: Outcome,
}

/// Command executor that never spawns processes.
///
/// Commands succeed with exit code 0 unless a rule whose pattern is a
/// substring of the command line says otherwise. The first matching rule
/// wins.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands matching `pattern` exit with `code` and `stderr`.
    pub fn fail_when(mut self, pattern: &str, code: i32, stderr: &str) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            outcome: Outcome::Exit {
                code,
                stderr: stderr.to_string(),
            },
        });
        self
    }

    /// Commands matching `pattern` cannot be run at all.
    pub fn error_when(mut self, pattern: &str, message: &str) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            outcome: Outcome::Error(message.to_string()),
        });
        self
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command_line().contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        let line = spec.command_line();
        let outcome = self
            .rules
            .iter()
            .find(|r| line.contains(&r.pattern))
            .map(|r| r.outcome.clone());

        match outcome {
            Some(Outcome::Error(message)) => Err(GradeflowError::Command(message)),
            Some(Outcome::Exit { code, stderr }) => Ok(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr,
                duration_ms: 0,
            }),
            None => Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryControlPlane
// ---------------------------------------------------------------------------

/// Control plane fake with ensure-semantics.
///
/// Deployed state maps `(ensure_url, function_name)` to the image URI, so
/// staging and production are tracked separately.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    deployed: Mutex<BTreeMap<(String, String), String>>,
    calls: Mutex<Vec<(String, DeploymentRequest)>>,
    failures: Vec<(String, u16)>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls whose URL contains `pattern` are answered with `status`.
    pub fn fail_when(mut self, pattern: &str, status: u16) -> Self {
        self.failures.push((pattern.to_string(), status));
        self
    }

    /// Every ensure call received, in order, failed ones included.
    pub fn calls(&self) -> Vec<(String, DeploymentRequest)> {
        self.calls.lock().unwrap().clone()
    }

    /// Image currently deployed for `function_name` behind `url`.
    pub fn deployed(&self, url: &str, function_name: &str) -> Option<String> {
        self.deployed
            .lock()
            .unwrap()
            .get(&(url.to_string(), function_name.to_string()))
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<(String, String), String> {
        self.deployed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentNotifier for MemoryControlPlane {
    async fn ensure(&self, url: &str, request: &DeploymentRequest) -> Result<NotifyReceipt> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), request.clone()));

        if let Some((_, status)) = self.failures.iter().find(|(p, _)| url.contains(p.as_str())) {
            return Err(GradeflowError::Notify {
                status: Some(*status),
                message: format!("{url} returned {status}"),
            });
        }

        self.deployed.lock().unwrap().insert(
            (url.to_string(), request.function_name.clone()),
            request.docker_image_uri.clone(),
        );

        Ok(NotifyReceipt {
            status: 200,
            body: serde_json::json!({
                "functionName": request.function_name,
                "dockerImageUri": request.docker_image_uri,
            })
            .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> DeploymentRequest {
        DeploymentRequest {
            api_key: "k".to_string(),
            docker_image_uri: uri.to_string(),
            function_name: "proof-eval-v1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_executor_rules() {
        let executor = ScriptedExecutor::new()
            .fail_when("docker push", 1, "denied")
            .error_when("flake8", "not installed");

        let ok = executor
            .execute(&CommandSpec::new("docker", ["build", "."]))
            .await
            .unwrap();
        assert!(ok.success());

        let failed = executor
            .execute(&CommandSpec::new("docker", ["push", "r/x:y"]))
            .await
            .unwrap();
        assert_eq!(failed.exit_code, 1);
        assert_eq!(failed.stderr, "denied");

        assert!(executor
            .execute(&CommandSpec::new("flake8", ["."]))
            .await
            .is_err());
        assert_eq!(executor.calls().len(), 3);
        assert_eq!(executor.count_matching("docker"), 2);
    }

    #[tokio::test]
    async fn test_control_plane_ensure_is_idempotent() {
        let plane = MemoryControlPlane::new();
        let url = "https://staging/grading-function/ensure";

        plane.ensure(url, &request("r/x:1")).await.unwrap();
        let first = plane.snapshot();
        plane.ensure(url, &request("r/x:1")).await.unwrap();
        assert_eq!(plane.snapshot(), first);
        assert_eq!(plane.calls().len(), 2);

        plane.ensure(url, &request("r/x:2")).await.unwrap();
        assert_eq!(plane.deployed(url, "proof-eval-v1").as_deref(), Some("r/x:2"));
        assert_eq!(plane.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_control_plane_failure_leaves_state_untouched() {
        let plane = MemoryControlPlane::new().fail_when("prod", 503);
        let err = plane
            .ensure("https://prod/grading-function/ensure", &request("r/x:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GradeflowError::Notify { status: Some(503), .. }));
        assert!(plane.snapshot().is_empty());
    }
}

//! Test-stage check definitions and results.

use gradeflow_core::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runner::{CommandOutput, CommandSpec};

/// What a check verifies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Syntax-error class lint over the whole repository.
    Lint,

    /// Evaluation-function test suite.
    EvaluationTests,

    /// Preview-function test suite.
    PreviewTests,

    /// Any additional user-supplied check.
    Custom,
}

impl CheckKind {
    /// Kinds that must all pass before staging is deployed.
    pub const REQUIRED: [CheckKind; 3] = [
        CheckKind::Lint,
        CheckKind::EvaluationTests,
        CheckKind::PreviewTests,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Lint => "lint",
            CheckKind::EvaluationTests => "evaluation_tests",
            CheckKind::PreviewTests => "preview_tests",
            CheckKind::Custom => "custom",
        }
    }

    /// Look up a builtin kind by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lint" => Some(CheckKind::Lint),
            "evaluation_tests" => Some(CheckKind::EvaluationTests),
            "preview_tests" => Some(CheckKind::PreviewTests),
            _ => None,
        }
    }

    /// Default command for builtin kinds.
    pub fn builtin_command(&self) -> Option<Vec<String>> {
        let argv: &[&str] = match self {
            CheckKind::Lint => &[
                "flake8",
                ".",
                "--count",
                "--select=E9,F63,F7,F82",
                "--show-source",
                "--statistics",
            ],
            CheckKind::EvaluationTests => &["python", "-m", "pytest", "app/evaluation_tests.py"],
            CheckKind::PreviewTests => &["python", "-m", "pytest", "app/preview_tests.py"],
            CheckKind::Custom => return None,
        };
        Some(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// Configuration for one check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckConfig {
    /// Human-readable check name.
    pub name: String,

    pub kind: CheckKind,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory; the current one when `None`.
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds; 0 means none.
    pub timeout_secs: u64,

    /// Whether this check is enabled.
    pub enabled: bool,
}

impl CheckConfig {
    /// Configuration for a builtin kind; `None` for [`CheckKind::Custom`].
    pub fn from_builtin(kind: CheckKind, timeout_secs: u64) -> Option<Self> {
        Some(Self {
            name: kind.name().to_string(),
            kind,
            command: kind.builtin_command()?,
            working_dir: None,
            timeout_secs,
            enabled: true,
        })
    }

    pub fn custom(name: &str, kind: CheckKind, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            command,
            working_dir: None,
            timeout_secs,
            enabled: true,
        }
    }

    /// Lint plus both test suites, in that order.
    pub fn defaults(timeout_secs: u64) -> Vec<Self> {
        CheckKind::REQUIRED
            .iter()
            .filter_map(|kind| Self::from_builtin(*kind, timeout_secs))
            .collect()
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn to_command_spec(&self) -> Result<CommandSpec> {
        let mut spec = CommandSpec::from_argv(&self.command)?.with_timeout(self.timeout_secs);
        if let Some(dir) = &self.working_dir {
            spec = spec.in_dir(dir);
        }
        Ok(spec)
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub kind: CheckKind,

    /// Exit code; -1 when the command never completed.
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,

    /// Set when the command could not be run (spawn failure, timeout).
    pub error: Option<String>,
}

impl CheckResult {
    pub fn from_output(config: &CheckConfig, output: CommandOutput) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
            error: None,
        }
    }

    pub fn errored(config: &CheckConfig, error: String) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            error: Some(error),
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }

    /// Why the check failed, or `None` if it passed.
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        if self.exit_code == 0 {
            return None;
        }
        let output = CommandOutput {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: self.stderr.clone(),
            duration_ms: self.duration_ms,
        };
        Some(output.failure_summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_round_trip() {
        for kind in CheckKind::REQUIRED {
            assert_eq!(CheckKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(CheckKind::from_name("custom"), None);
    }

    #[test]
    fn test_lint_selects_syntax_errors_only() {
        let cmd = CheckKind::Lint.builtin_command().unwrap();
        assert_eq!(cmd[0], "flake8");
        assert!(cmd.contains(&"--select=E9,F63,F7,F82".to_string()));
    }

    #[test]
    fn test_custom_has_no_builtin() {
        assert!(CheckKind::Custom.builtin_command().is_none());
        assert!(CheckConfig::from_builtin(CheckKind::Custom, 60).is_none());
    }

    #[test]
    fn test_defaults_cover_required_kinds() {
        let checks = CheckConfig::defaults(300);
        let kinds: Vec<_> = checks.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, CheckKind::REQUIRED.to_vec());
        assert!(checks.iter().all(|c| c.enabled && c.timeout_secs == 300));
    }

    #[test]
    fn test_to_command_spec() {
        let check = CheckConfig::from_builtin(CheckKind::PreviewTests, 120)
            .unwrap()
            .in_dir("/repo");
        let spec = check.to_command_spec().unwrap();
        assert_eq!(spec.program, "python");
        assert_eq!(spec.timeout_secs, 120);
        assert_eq!(spec.working_dir, Some(PathBuf::from("/repo")));

        let empty = CheckConfig::custom("empty", CheckKind::Custom, vec![], 0);
        assert!(empty.to_command_spec().is_err());
    }

    #[test]
    fn test_result_failure_reason() {
        let config = CheckConfig::from_builtin(CheckKind::Lint, 0).unwrap();
        let failed = CheckResult::from_output(
            &config,
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "./app/evaluation.py:3:1: E999 SyntaxError".to_string(),
                duration_ms: 10,
            },
        );
        assert!(!failed.passed());
        assert!(failed.failure_reason().unwrap().contains("E999"));

        let errored = CheckResult::errored(&config, "failed to spawn flake8".to_string());
        assert!(!errored.passed());
        assert_eq!(errored.failure_reason().unwrap(), "failed to spawn flake8");
    }
}

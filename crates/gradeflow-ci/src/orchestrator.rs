//! Stage orchestrator.
//!
//! Drives the state machine in [`crate::state`]: the configuration record is
//! read once, then each stage runs to completion and returns a
//! [`StageReport`] that decides whether the next stage is entered. A failed
//! stage ends the run; downstream stages are never attempted.

use chrono::Utc;
use futures::future::join_all;
use gradeflow_core::obs;
use gradeflow_core::{
    ConfigRecord, DeploymentRequest, DeploymentTarget, Environment, FunctionName, GradeflowError,
    Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::build::{BuiltImage, ImageBuilder};
use crate::check::{CheckConfig, CheckResult};
use crate::gate::TestGate;
use crate::notify::{DeploymentNotifier, NotifyReceipt};
use crate::publish::RegistryPublisher;
use crate::report::{
    EventKind, PipelineReport, RunLog, StageReport, StepReport, REPORT_SCHEMA_VERSION,
};
use crate::runner::CommandExecutor;
use crate::state::{PipelineState, StageName, Trigger};

/// Explicit configuration injected into every stage.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Configuration record path.
    pub config_path: PathBuf,

    /// Docker build context.
    pub build_context: PathBuf,

    /// Test-stage checks, run in order when sequential.
    pub checks: Vec<CheckConfig>,

    /// Run the Test-stage checks concurrently.
    pub concurrent_checks: bool,

    pub staging: DeploymentTarget,
    pub production: DeploymentTarget,

    /// Only pushes to this branch start a run.
    pub default_branch: String,

    /// Timeouts in seconds; 0 means none.
    pub build_timeout_secs: u64,
    pub push_timeout_secs: u64,
}

impl PipelineSettings {
    pub fn new(staging: DeploymentTarget, production: DeploymentTarget) -> Self {
        Self {
            config_path: PathBuf::from(gradeflow_core::DEFAULT_CONFIG_PATH),
            build_context: PathBuf::from("app"),
            checks: CheckConfig::defaults(0),
            concurrent_checks: true,
            staging,
            production,
            default_branch: "main".to_string(),
            build_timeout_secs: 0,
            push_timeout_secs: 0,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_build_context(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_context = path.into();
        self
    }

    pub fn with_checks(mut self, checks: Vec<CheckConfig>) -> Self {
        self.checks = checks;
        self
    }

    pub fn sequential_checks(mut self) -> Self {
        self.concurrent_checks = false;
        self
    }

    pub fn with_default_branch(mut self, branch: &str) -> Self {
        self.default_branch = branch.to_string();
        self
    }

    pub fn target(&self, environment: Environment) -> &DeploymentTarget {
        match environment {
            Environment::Staging => &self.staging,
            Environment::Production => &self.production,
        }
    }
}

/// One environment's resolved deployment, without side effects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedDeployment {
    pub environment: Environment,
    pub image_uri: String,
    pub ensure_url: String,
    pub registry_login: bool,
    /// Why this deployment would fail before building, if it would.
    pub problem: Option<String>,
}

/// What a full run would do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub function_name: String,
    pub config_path: PathBuf,
    pub build_context: PathBuf,
    pub checks: Vec<String>,
    pub deployments: Vec<PlannedDeployment>,
}

/// Mutable bookkeeping for a single run.
#[derive(Debug, Default)]
struct RunState {
    log: RunLog,
    stages: Vec<StageReport>,
    context_digest: Option<String>,
}

/// Step recorder for one stage.
struct StageRun<'a> {
    stage: StageName,
    log: &'a mut RunLog,
    steps: Vec<StepReport>,
    started: Instant,
}

impl<'a> StageRun<'a> {
    fn begin(stage: StageName, log: &'a mut RunLog) -> Self {
        obs::emit_stage_started(stage.name());
        log.record(EventKind::StageStarted, stage, None, json!({}));
        Self {
            stage,
            log,
            steps: Vec::new(),
            started: Instant::now(),
        }
    }

    fn step_started(&mut self, name: &str) {
        self.log
            .record(EventKind::StepStarted, self.stage, Some(name), json!({}));
    }

    fn record_step(
        &mut self,
        name: &str,
        duration_ms: u64,
        error: Option<&GradeflowError>,
        mut detail: Value,
    ) {
        let kind = match error {
            None => EventKind::StepSucceeded,
            Some(e) => {
                detail["error"] = json!(e.to_string());
                detail["error_class"] = json!(e.class());
                EventKind::StepFailed
            }
        };
        self.log.record(kind, self.stage, Some(name), detail);
        obs::emit_step_finished(
            self.stage.name(),
            name,
            error.map(|e| e as &dyn std::fmt::Display),
        );
        self.steps.push(StepReport {
            name: name.to_string(),
            passed: error.is_none(),
            duration_ms,
            error: error.map(|e| e.to_string()),
        });
    }

    /// Run one step, recording its start and outcome.
    async fn step<T, F, D>(&mut self, name: &str, fut: F, describe: D) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        D: FnOnce(&T) -> Value,
    {
        self.step_started(name);
        let started = Instant::now();
        let result = fut.await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(value) => self.record_step(name, duration_ms, None, describe(value)),
            Err(e) => self.record_step(name, duration_ms, Some(e), json!({})),
        }
        result
    }

    fn check_finished(&mut self, result: &CheckResult) {
        let error = result.failure_reason().map(GradeflowError::CheckFailed);
        self.record_step(
            &result.name,
            result.duration_ms,
            error.as_ref(),
            json!({ "kind": result.kind, "exit_code": result.exit_code }),
        );
    }

    fn finish(self, error: Option<&GradeflowError>) -> StageReport {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let passed = error.is_none();
        self.log.record(
            EventKind::StageFinished,
            self.stage,
            None,
            json!({
                "passed": passed,
                "error": error.map(|e| e.to_string()),
                "error_class": error.map(|e| e.class()),
            }),
        );
        obs::emit_stage_finished(self.stage.name(), passed, duration_ms);
        StageReport {
            stage: self.stage,
            passed,
            steps: self.steps,
            error: error.map(|e| e.to_string()),
            duration_ms,
        }
    }
}

/// Sequences Test → DeployStaging → DeployProduction.
pub struct Orchestrator {
    settings: PipelineSettings,
    notifier: Arc<dyn DeploymentNotifier>,
    executor: Arc<dyn CommandExecutor>,
    builder: ImageBuilder,
    publisher: RegistryPublisher,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        executor: Arc<dyn CommandExecutor>,
        notifier: Arc<dyn DeploymentNotifier>,
    ) -> Self {
        let builder =
            ImageBuilder::new(executor.clone()).with_timeout(settings.build_timeout_secs);
        let publisher =
            RegistryPublisher::new(executor.clone()).with_timeout(settings.push_timeout_secs);
        Self {
            settings,
            notifier,
            executor,
            builder,
            publisher,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Full run: Test, then staging, then production.
    pub async fn run(&self, trigger: Trigger) -> PipelineReport {
        self.drive(trigger, PipelineState::Test, StageName::DeployProduction)
            .await
    }

    /// Configuration plus the Test stage only.
    pub async fn run_test_stage(&self) -> PipelineReport {
        self.drive(Trigger::Manual, PipelineState::Test, StageName::Test)
            .await
    }

    /// Deploy up to `environment`, through every stage before it: staging
    /// runs Test first, production runs Test and staging first.
    pub async fn run_deploy_stage(&self, environment: Environment) -> PipelineReport {
        self.drive(
            Trigger::Manual,
            PipelineState::Test,
            StageName::for_environment(environment),
        )
        .await
    }

    /// Deploy `environment` alone, bypassing the Test stage and any earlier
    /// environment. The report records the bypass as `gate_skipped`.
    pub async fn run_deploy_stage_ungated(&self, environment: Environment) -> PipelineReport {
        self.drive(
            Trigger::Manual,
            PipelineState::deploying(environment),
            StageName::for_environment(environment),
        )
        .await
    }

    /// Resolve images and endpoints without executing anything.
    pub fn plan(&self) -> Result<DeploymentPlan> {
        let record = ConfigRecord::read(&self.settings.config_path)?;
        let name = record.function_name();

        let deployments = Environment::ALL
            .iter()
            .map(|env| {
                let target = self.settings.target(*env);
                PlannedDeployment {
                    environment: *env,
                    image_uri: target.image_for(name).uri(),
                    ensure_url: target.ensure_url(),
                    registry_login: target.credentials.is_some(),
                    problem: check_target(*env, target).err().map(|e| e.to_string()),
                }
            })
            .collect();

        let checks = self
            .settings
            .checks
            .iter()
            .filter(|c| c.enabled)
            .map(|c| format!("{}: {}", c.name, c.command.join(" ")))
            .collect();

        Ok(DeploymentPlan {
            function_name: name.to_string(),
            config_path: self.settings.config_path.clone(),
            build_context: self.settings.build_context.clone(),
            checks,
            deployments,
        })
    }

    async fn drive(
        &self,
        trigger: Trigger,
        entry: PipelineState,
        last: StageName,
    ) -> PipelineReport {
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string());
        self.drive_run(run_id, trigger, entry, last)
            .instrument(span)
            .await
    }

    async fn drive_run(
        &self,
        run_id: Uuid,
        trigger: Trigger,
        entry: PipelineState,
        last: StageName,
    ) -> PipelineReport {
        let started_at = Utc::now();
        let started = Instant::now();
        obs::emit_pipeline_started(&run_id.to_string(), &trigger.label());

        let mut run = RunState::default();
        let mut function_name = None;
        let gate_skipped = entry != PipelineState::Test;

        let final_state = if !trigger.starts_pipeline(&self.settings.default_branch) {
            info!(
                trigger = %trigger.label(),
                default_branch = %self.settings.default_branch,
                "Trigger does not start the pipeline"
            );
            PipelineState::Skipped
        } else {
            if gate_skipped {
                obs::emit_gate_skipped(&entry.label());
            }
            match self.configuration_stage(&mut run).await {
                None => PipelineState::Failed(StageName::Configuration),
                Some(name) => {
                    let state = self.run_stages(&name, entry, last, &mut run).await;
                    function_name = Some(name.to_string());
                    state
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_pipeline_finished(&run_id.to_string(), &final_state.label(), duration_ms);

        PipelineReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id,
            trigger,
            function_name,
            context_digest: run.context_digest,
            final_state,
            gate_skipped,
            stages: run.stages,
            events: run.log.into_events(),
            started_at,
            duration_ms,
        }
    }

    /// Step through the state machine from `entry`; reaching the end of
    /// `last` is success.
    async fn run_stages(
        &self,
        name: &FunctionName,
        entry: PipelineState,
        last: StageName,
        run: &mut RunState,
    ) -> PipelineState {
        let mut state = entry;
        while let Some(stage) = state.stage() {
            let report = match stage.environment() {
                Some(environment) => self.deploy_stage(environment, name, run).await,
                None => self.test_stage(run).await,
            };
            let passed = report.passed;
            run.stages.push(report);

            state = if passed && stage == last {
                PipelineState::Success
            } else {
                state.advance(passed)
            };
        }
        state
    }

    async fn configuration_stage(&self, run: &mut RunState) -> Option<FunctionName> {
        let path = &self.settings.config_path;
        let mut stage = StageRun::begin(StageName::Configuration, &mut run.log);

        let result = stage
            .step(
                "read_config",
                async { ConfigRecord::read(path).map_err(GradeflowError::from) },
                |record: &ConfigRecord| {
                    json!({
                        "path": path,
                        "function_name": record.function_name().as_str(),
                    })
                },
            )
            .await;

        let (report, name) = match result {
            Ok(record) => {
                info!(function = %record.function_name(), "Read configuration");
                (stage.finish(None), Some(record.function_name().clone()))
            }
            Err(e) => (stage.finish(Some(&e)), None),
        };
        run.stages.push(report);
        name
    }

    async fn test_stage(&self, run: &mut RunState) -> StageReport {
        let mut stage = StageRun::begin(StageName::Test, &mut run.log);

        let enabled: Vec<&CheckConfig> = self
            .settings
            .checks
            .iter()
            .filter(|c| {
                if !c.enabled {
                    info!(check = %c.name, "Skipping disabled check");
                }
                c.enabled
            })
            .collect();

        let results: Vec<CheckResult> = if self.settings.concurrent_checks {
            for check in &enabled {
                stage.step_started(&check.name);
            }
            let results = join_all(enabled.iter().map(|c| self.run_check(c))).await;
            for result in &results {
                stage.check_finished(result);
            }
            results
        } else {
            let mut results = Vec::with_capacity(enabled.len());
            for check in &enabled {
                stage.step_started(&check.name);
                let result = self.run_check(check).await;
                stage.check_finished(&result);
                results.push(result);
            }
            results
        };

        let verdict = TestGate::evaluate(&results);
        obs::emit_gate_evaluated(verdict.passed, verdict.violations.len());

        let error = (!verdict.passed)
            .then(|| GradeflowError::CheckFailed(verdict.violations.join("; ")));
        stage.record_step(
            "gate",
            0,
            error.as_ref(),
            json!({ "message": verdict.message, "violations": verdict.violations }),
        );
        stage.finish(error.as_ref())
    }

    async fn run_check(&self, check: &CheckConfig) -> CheckResult {
        let spec = match check.to_command_spec() {
            Ok(spec) => spec,
            Err(e) => return CheckResult::errored(check, e.to_string()),
        };
        match self.executor.execute(&spec).await {
            Ok(output) => CheckResult::from_output(check, output),
            Err(e) => CheckResult::errored(check, e.to_string()),
        }
    }

    async fn deploy_stage(
        &self,
        environment: Environment,
        name: &FunctionName,
        run: &mut RunState,
    ) -> StageReport {
        let mut stage = StageRun::begin(StageName::for_environment(environment), &mut run.log);

        match self.deploy_steps(environment, name, &mut stage).await {
            Ok(built) => {
                run.context_digest.get_or_insert(built.context_digest);
                stage.finish(None)
            }
            Err(e) => stage.finish(Some(&e)),
        }
    }

    /// validate → build → publish → notify; the first error stops the stage.
    async fn deploy_steps(
        &self,
        environment: Environment,
        name: &FunctionName,
        stage: &mut StageRun<'_>,
    ) -> Result<BuiltImage> {
        let target = self.settings.target(environment);
        let image = target.image_for(name);

        stage
            .step(
                "validate",
                async { check_target(environment, target) },
                |_| json!({ "environment": environment }),
            )
            .await?;

        let built = stage
            .step(
                "build",
                self.builder.build(&self.settings.build_context, &image),
                |b: &BuiltImage| {
                    json!({ "image": b.image.uri(), "context_digest": b.context_digest })
                },
            )
            .await?;

        stage
            .step(
                "publish",
                self.publisher.publish(target, &image),
                |_| json!({ "image": image.uri() }),
            )
            .await?;

        let request = DeploymentRequest::for_target(target, &image, name);
        let url = target.ensure_url();
        stage
            .step(
                "notify",
                self.notifier.ensure(&url, &request),
                |receipt: &NotifyReceipt| {
                    json!({ "url": &url, "status": receipt.status, "body": &receipt.body })
                },
            )
            .await?;

        Ok(built)
    }
}

/// A target must belong to the stage's environment and be complete.
fn check_target(environment: Environment, target: &DeploymentTarget) -> Result<()> {
    if target.environment != environment {
        return Err(GradeflowError::InvalidSettings(format!(
            "{environment} stage configured with a {} target",
            target.environment
        )));
    }
    target.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckKind;
    use crate::fakes::{MemoryControlPlane, ScriptedExecutor};

    fn settings(dir: &std::path::Path) -> PipelineSettings {
        PipelineSettings::new(
            DeploymentTarget::new(Environment::Staging, "staging.reg", "key-s"),
            DeploymentTarget::new(Environment::Production, "prod.reg", "key-p"),
        )
        .with_config_path(dir.join("config.json"))
        .with_build_context(dir.join("app"))
    }

    fn workspace(config: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), config).unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/Dockerfile"), "FROM python:3.11").unwrap();
        dir
    }

    #[test]
    fn test_settings_target_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        assert_eq!(s.target(Environment::Staging).registry, "staging.reg");
        assert_eq!(s.target(Environment::Production).registry, "prod.reg");
        assert!(s.concurrent_checks);
        assert!(!s.sequential_checks().concurrent_checks);
    }

    #[test]
    fn test_check_target_rejects_swapped_environment() {
        let target = DeploymentTarget::new(Environment::Production, "r", "k");
        let err = check_target(Environment::Staging, &target).unwrap_err();
        assert_eq!(err.class(), "invalid_settings");
    }

    #[test]
    fn test_plan_resolves_both_environments() {
        let dir = workspace(r#"{"EvaluationFunctionName": "proof-eval-v1"}"#);
        let mut s = settings(dir.path());
        s.production.api_key = String::new();
        let orchestrator = Orchestrator::new(
            s,
            Arc::new(ScriptedExecutor::new()),
            Arc::new(MemoryControlPlane::new()),
        );

        let plan = orchestrator.plan().expect("plan");
        assert_eq!(plan.function_name, "proof-eval-v1");
        assert_eq!(plan.checks.len(), 3);
        assert_eq!(
            plan.deployments[0].image_uri,
            "staging.reg/lambda-feedback-staging-functions-repository:proof-eval-v1"
        );
        assert!(plan.deployments[0].problem.is_none());
        assert!(plan.deployments[1]
            .problem
            .as_deref()
            .unwrap()
            .contains("API key"));
    }

    #[tokio::test]
    async fn test_sequential_checks_record_ordered_events() {
        let dir = workspace(r#"{"EvaluationFunctionName": "proof-eval-v1"}"#);
        let executor = Arc::new(ScriptedExecutor::new());
        let orchestrator = Orchestrator::new(
            settings(dir.path()).sequential_checks(),
            executor.clone(),
            Arc::new(MemoryControlPlane::new()),
        );

        let report = orchestrator.run_test_stage().await;
        assert_eq!(report.final_state, PipelineState::Success);

        let names: Vec<_> = executor.calls().iter().map(|c| c.command_line()).collect();
        assert!(names[0].starts_with("flake8"));
        assert!(names[1].contains("evaluation_tests.py"));
        assert!(names[2].contains("preview_tests.py"));

        let test_stage = report.stage(StageName::Test).unwrap();
        let steps: Vec<_> = test_stage.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(steps, vec!["lint", "evaluation_tests", "preview_tests", "gate"]);

        let seqs: Vec<u64> = report.events.iter().map(|e| e.seq).collect();
        let expected: Vec<u64> = (1..=report.events.len() as u64).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn test_disabled_required_check_fails_gate() {
        let dir = workspace(r#"{"EvaluationFunctionName": "proof-eval-v1"}"#);
        let checks = vec![
            CheckConfig::from_builtin(CheckKind::Lint, 0).unwrap(),
            CheckConfig::from_builtin(CheckKind::EvaluationTests, 0).unwrap(),
            CheckConfig::from_builtin(CheckKind::PreviewTests, 0)
                .unwrap()
                .disabled(),
        ];
        let orchestrator = Orchestrator::new(
            settings(dir.path()).with_checks(checks),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(MemoryControlPlane::new()),
        );

        let report = orchestrator.run_test_stage().await;
        assert_eq!(report.failed_stage(), Some(StageName::Test));
        let error = report.stage(StageName::Test).unwrap().error.clone().unwrap();
        assert!(error.contains("preview_tests"));
    }

    #[tokio::test]
    async fn test_invalid_target_fails_before_build() {
        let dir = workspace(r#"{"EvaluationFunctionName": "proof-eval-v1"}"#);
        let mut s = settings(dir.path());
        s.staging.registry = String::new();
        let executor = Arc::new(ScriptedExecutor::new());
        let plane = Arc::new(MemoryControlPlane::new());
        let orchestrator = Orchestrator::new(s, executor.clone(), plane.clone());

        let report = orchestrator.run_deploy_stage(Environment::Staging).await;
        assert_eq!(report.failed_stage(), Some(StageName::DeployStaging));
        assert_eq!(executor.count_matching("docker"), 0);
        assert!(plane.calls().is_empty());
    }
}

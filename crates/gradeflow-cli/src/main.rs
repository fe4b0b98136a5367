//! gradeflow - staged deployment for grading functions
//!
//! The `gradeflow` command runs the test, staging and production stages for
//! a grading-function repository.
//!
//! ## Commands
//!
//! - `run`: Full pipeline, gated stage by stage
//! - `test`: Lint and test suites only
//! - `deploy`: Test, then deploy up to the given environment
//! - `plan`: Show what a run would deploy, without side effects
//! - `function-name`: Print the function name from the configuration record

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gradeflow_ci::{
    CheckConfig, CheckKind, HttpNotifier, Orchestrator, PipelineReport, PipelineSettings,
    ProcessExecutor, Trigger,
};
use gradeflow_core::{
    ecr_registry, ConfigRecord, DeploymentTarget, Environment, LogFormat, RegistryCredentials,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "gradeflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Test, build and deploy grading functions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: test, deploy to staging, deploy to production
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// CI event that triggered the run (`push` starts only on the default branch)
        #[arg(long, env = "GITHUB_EVENT_NAME")]
        event_name: Option<String>,

        /// Branch or ref the event refers to
        #[arg(long, env = "GITHUB_REF_NAME")]
        ref_name: Option<String>,
    },

    /// Run lint and the test suites, then evaluate the test gate
    Test {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run the test stage, then deploy up to the given environment
    Deploy {
        /// Target environment (staging or production)
        environment: Environment,

        /// Deploy only this environment, bypassing the test stage and any
        /// earlier environment. Recorded in the run report.
        #[arg(long)]
        skip_gate: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the resolved deployment plan as JSON
    Plan {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Print the function name from the configuration record
    FunctionName {
        /// Configuration record path
        #[arg(short, long, env = "GRADEFLOW_CONFIG", default_value = "config.json")]
        config: PathBuf,
    },
}

/// Everything a pipeline needs, sourced from flags or the CI environment.
#[derive(Args, Debug, Clone)]
#[cfg_attr(test, derive(Default))]
struct PipelineArgs {
    /// Configuration record path
    #[arg(short, long, env = "GRADEFLOW_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Docker build context
    #[arg(long, default_value = "app")]
    context: PathBuf,

    /// Branch whose pushes start a run
    #[arg(long, default_value = "main")]
    default_branch: String,

    /// Run checks one after another instead of concurrently
    #[arg(long)]
    sequential_checks: bool,

    /// Override or add a check, as NAME=COMMAND (repeatable)
    #[arg(long = "check", value_name = "NAME=COMMAND")]
    checks: Vec<String>,

    /// Per-check timeout in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    check_timeout: u64,

    /// Image build timeout in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    build_timeout: u64,

    /// Registry login and push timeout in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    push_timeout: u64,

    /// Control-plane request timeout in seconds
    #[arg(long, default_value_t = 30)]
    notify_timeout: u64,

    /// API key shared by both environments
    #[arg(long, env = "FUNCTION_ADMIN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "STAGING_API_KEY", hide_env_values = true)]
    staging_api_key: Option<String>,

    #[arg(long, env = "PRODUCTION_API_KEY", hide_env_values = true)]
    production_api_key: Option<String>,

    #[arg(long, env = "STAGING_REGISTRY")]
    staging_registry: Option<String>,

    #[arg(long, env = "PRODUCTION_REGISTRY")]
    production_registry: Option<String>,

    /// Used with --aws-region to derive the ECR registry
    #[arg(long, env = "AWS_ACCOUNT_ID")]
    aws_account_id: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    aws_region: Option<String>,

    #[arg(long, env = "STAGING_REPOSITORY")]
    staging_repository: Option<String>,

    #[arg(long, env = "PRODUCTION_REPOSITORY")]
    production_repository: Option<String>,

    #[arg(long, env = "STAGING_BACKEND_URL")]
    staging_backend_url: Option<String>,

    #[arg(long, env = "PRODUCTION_BACKEND_URL")]
    production_backend_url: Option<String>,

    #[arg(long, env = "REGISTRY_USERNAME")]
    registry_username: Option<String>,

    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,
}

impl PipelineArgs {
    /// Resolve one environment's target. Missing values become empty
    /// strings, which the deploy stage rejects when it validates the target.
    fn target(&self, environment: Environment) -> DeploymentTarget {
        let (api_key, registry, repository, backend_url) = match environment {
            Environment::Staging => (
                &self.staging_api_key,
                &self.staging_registry,
                &self.staging_repository,
                &self.staging_backend_url,
            ),
            Environment::Production => (
                &self.production_api_key,
                &self.production_registry,
                &self.production_repository,
                &self.production_backend_url,
            ),
        };

        let api_key = api_key
            .as_deref()
            .or(self.api_key.as_deref())
            .unwrap_or_default();
        let registry = registry.clone().or_else(|| {
            match (self.aws_account_id.as_deref(), self.aws_region.as_deref()) {
                (Some(account), Some(region)) => Some(ecr_registry(account, region)),
                _ => None,
            }
        });

        let mut target =
            DeploymentTarget::new(environment, registry.as_deref().unwrap_or_default(), api_key);
        if let Some(repository) = repository {
            target = target.with_repository(repository);
        }
        if let Some(backend_url) = backend_url {
            target = target.with_backend_url(backend_url);
        }
        if let (Some(username), Some(password)) = (&self.registry_username, &self.registry_password)
        {
            target = target.with_credentials(RegistryCredentials::new(username, password));
        }
        target
    }

    fn checks(&self) -> Result<Vec<CheckConfig>> {
        let mut checks = CheckConfig::defaults(self.check_timeout);
        for raw in &self.checks {
            let (name, command) = raw
                .split_once('=')
                .with_context(|| format!("Check override must be NAME=COMMAND: {raw}"))?;
            let name = name.trim();
            let command: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if name.is_empty() || command.is_empty() {
                anyhow::bail!("Check override must be NAME=COMMAND: {raw}");
            }

            match checks.iter_mut().find(|c| c.name == name) {
                Some(existing) => existing.command = command,
                None => {
                    let kind = CheckKind::from_name(name).unwrap_or(CheckKind::Custom);
                    checks.push(CheckConfig::custom(name, kind, command, self.check_timeout));
                }
            }
        }
        Ok(checks)
    }

    fn settings(&self) -> Result<PipelineSettings> {
        let mut settings = PipelineSettings::new(
            self.target(Environment::Staging),
            self.target(Environment::Production),
        )
        .with_config_path(&self.config)
        .with_build_context(&self.context)
        .with_checks(self.checks()?)
        .with_default_branch(&self.default_branch);
        if self.sequential_checks {
            settings = settings.sequential_checks();
        }
        settings.build_timeout_secs = self.build_timeout;
        settings.push_timeout_secs = self.push_timeout;
        Ok(settings)
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        let notifier = HttpNotifier::new(Some(Duration::from_secs(self.notify_timeout)))
            .context("Failed to create control-plane client")?;
        Ok(Orchestrator::new(
            self.settings()?,
            Arc::new(ProcessExecutor),
            Arc::new(notifier),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    gradeflow_core::init_tracing(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Run {
            pipeline,
            report,
            event_name,
            ref_name,
        } => {
            let trigger = Trigger::from_ci_event(event_name.as_deref(), ref_name.as_deref());
            cmd_run(&pipeline, trigger, report.as_deref()).await
        }
        Commands::Test { pipeline, report } => cmd_test(&pipeline, report.as_deref()).await,
        Commands::Deploy {
            environment,
            skip_gate,
            pipeline,
            report,
        } => cmd_deploy(&pipeline, environment, skip_gate, report.as_deref()).await,
        Commands::Plan { pipeline } => cmd_plan(&pipeline),
        Commands::FunctionName { config } => cmd_function_name(&config),
    }
}

async fn cmd_run(args: &PipelineArgs, trigger: Trigger, report_path: Option<&Path>) -> Result<()> {
    let orchestrator = args.orchestrator()?;
    println!("Running pipeline ({})", trigger.label());
    println!("Config: {:?}", args.config);
    println!();

    let report = orchestrator.run(trigger).await;
    finish(&report, report_path)
}

async fn cmd_test(args: &PipelineArgs, report_path: Option<&Path>) -> Result<()> {
    let orchestrator = args.orchestrator()?;
    let report = orchestrator.run_test_stage().await;
    finish(&report, report_path)
}

async fn cmd_deploy(
    args: &PipelineArgs,
    environment: Environment,
    skip_gate: bool,
    report_path: Option<&Path>,
) -> Result<()> {
    let orchestrator = args.orchestrator()?;
    println!("Deploying to {environment}");
    println!();

    let report = if skip_gate {
        println!("⚠ Skipping the test gate");
        orchestrator.run_deploy_stage_ungated(environment).await
    } else {
        orchestrator.run_deploy_stage(environment).await
    };
    finish(&report, report_path)
}

fn cmd_plan(args: &PipelineArgs) -> Result<()> {
    let plan = args
        .orchestrator()?
        .plan()
        .context("Failed to resolve deployment plan")?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_function_name(config: &Path) -> Result<()> {
    let record = ConfigRecord::read(config).context("Failed to read configuration record")?;
    println!("{}", record.function_name());
    Ok(())
}

/// Print the summary, write the report, and map the outcome to an exit status.
fn finish(report: &PipelineReport, report_path: Option<&Path>) -> Result<()> {
    print_report(report);

    if let Some(path) = report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {path:?}"))?;
        info!(path = ?path, "Wrote run report");
    }

    match report.failed_stage() {
        None => Ok(()),
        Some(stage) => anyhow::bail!("Pipeline failed at stage {stage}"),
    }
}

fn print_report(report: &PipelineReport) {
    println!("Run ID: {}", report.run_id);
    if let Some(name) = &report.function_name {
        println!("Function: {name}");
    }
    println!(
        "Status: {}",
        if report.succeeded() {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    println!("Final state: {}", report.final_state.label());
    if report.gate_skipped {
        println!("Gate: skipped");
    }
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for stage in &report.stages {
        let status = if stage.passed { "✓" } else { "✗" };
        println!("  {} {} ({}ms)", status, stage.stage, stage.duration_ms);
        for step in &stage.steps {
            let status = if step.passed { "✓" } else { "✗" };
            match &step.error {
                Some(error) => println!("      {} {}: {}", status, step.name, error),
                None => println!("      {} {}", status, step.name),
            }
        }
    }

    if report.succeeded() && !report.stages.is_empty() {
        println!("\n✓ All stages passed!");
    }
}

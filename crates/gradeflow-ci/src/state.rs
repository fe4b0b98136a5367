//! Pipeline stages, states and triggers.

use gradeflow_core::Environment;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A phase of a run with its own success/failure outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Reading the configuration record. Precedes every other stage.
    Configuration,
    Test,
    DeployStaging,
    DeployProduction,
}

impl StageName {
    pub fn name(&self) -> &'static str {
        match self {
            StageName::Configuration => "configuration",
            StageName::Test => "test",
            StageName::DeployStaging => "deploy_staging",
            StageName::DeployProduction => "deploy_production",
        }
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Staging => StageName::DeployStaging,
            Environment::Production => StageName::DeployProduction,
        }
    }

    /// Environment a deploy stage targets; `None` for other stages.
    pub fn environment(&self) -> Option<Environment> {
        match self {
            StageName::DeployStaging => Some(Environment::Staging),
            StageName::DeployProduction => Some(Environment::Production),
            StageName::Configuration | StageName::Test => None,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of the stage orchestrator.
///
/// ```text
/// Test --ok--> DeployStaging --ok--> DeployProduction --ok--> Success
///   |               |                      |
///   +------err------+----------err---------+-------> Failed(stage)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Test,
    DeployStaging,
    DeployProduction,
    Success,
    Failed(StageName),
    /// The trigger did not start a run.
    Skipped,
}

impl PipelineState {
    /// State that runs `stage`. The configuration stage has no state of
    /// its own; a failure there goes straight to `Failed`.
    pub fn entering(stage: StageName) -> Option<Self> {
        match stage {
            StageName::Test => Some(PipelineState::Test),
            StageName::DeployStaging => Some(PipelineState::DeployStaging),
            StageName::DeployProduction => Some(PipelineState::DeployProduction),
            StageName::Configuration => None,
        }
    }

    /// State that deploys to `environment`.
    pub fn deploying(environment: Environment) -> Self {
        match environment {
            Environment::Staging => PipelineState::DeployStaging,
            Environment::Production => PipelineState::DeployProduction,
        }
    }

    /// Stage executed in this state; `None` for terminal states.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            PipelineState::Test => Some(StageName::Test),
            PipelineState::DeployStaging => Some(StageName::DeployStaging),
            PipelineState::DeployProduction => Some(StageName::DeployProduction),
            PipelineState::Success | PipelineState::Failed(_) | PipelineState::Skipped => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage().is_none()
    }

    /// Transition after the current stage finished. Terminal states stay put.
    pub fn advance(self, stage_passed: bool) -> Self {
        let Some(stage) = self.stage() else {
            return self;
        };
        if !stage_passed {
            return PipelineState::Failed(stage);
        }
        match self {
            PipelineState::Test => PipelineState::DeployStaging,
            PipelineState::DeployStaging => PipelineState::DeployProduction,
            _ => PipelineState::Success,
        }
    }

    pub fn label(&self) -> String {
        match self {
            PipelineState::Test => "test".to_string(),
            PipelineState::DeployStaging => "deploy_staging".to_string(),
            PipelineState::DeployProduction => "deploy_production".to_string(),
            PipelineState::Success => "success".to_string(),
            PipelineState::Failed(stage) => format!("failed({stage})"),
            PipelineState::Skipped => "skipped".to_string(),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Push { branch: String },
    /// `workflow_dispatch`, or a local run with no CI event.
    Manual,
    /// Any other CI event. Never starts a run.
    Other { event: String },
}

impl Trigger {
    /// Derive the trigger from CI event metadata (`GITHUB_EVENT_NAME`,
    /// `GITHUB_REF_NAME`). Only `workflow_dispatch` and a missing event are
    /// manual; a push without a ref cannot name its branch and is `Other`.
    pub fn from_ci_event(event_name: Option<&str>, ref_name: Option<&str>) -> Self {
        let event = event_name.map(str::trim).filter(|e| !e.is_empty());
        let reference = ref_name.map(str::trim).filter(|r| !r.is_empty());
        match (event, reference) {
            (None, _) | (Some("workflow_dispatch"), _) => Trigger::Manual,
            (Some("push"), Some(reference)) => Trigger::Push {
                branch: reference
                    .strip_prefix("refs/heads/")
                    .unwrap_or(reference)
                    .to_string(),
            },
            (Some(event), _) => Trigger::Other {
                event: event.to_string(),
            },
        }
    }

    /// Pushes start a run only on the default branch; manual runs always do.
    pub fn starts_pipeline(&self, default_branch: &str) -> bool {
        match self {
            Trigger::Push { branch } => branch == default_branch,
            Trigger::Manual => true,
            Trigger::Other { .. } => false,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Trigger::Push { branch } => format!("push:{branch}"),
            Trigger::Manual => "manual".to_string(),
            Trigger::Other { event } => format!("event:{event}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = PipelineState::Test;
        let mut visited = vec![];
        while let Some(stage) = state.stage() {
            visited.push(stage);
            state = state.advance(true);
        }
        assert_eq!(
            visited,
            vec![
                StageName::Test,
                StageName::DeployStaging,
                StageName::DeployProduction
            ]
        );
        assert_eq!(state, PipelineState::Success);
    }

    #[test]
    fn test_failure_short_circuits() {
        assert_eq!(
            PipelineState::Test.advance(false),
            PipelineState::Failed(StageName::Test)
        );
        assert_eq!(
            PipelineState::DeployStaging.advance(false),
            PipelineState::Failed(StageName::DeployStaging)
        );
        assert!(PipelineState::Failed(StageName::Test).is_terminal());
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        for state in [
            PipelineState::Success,
            PipelineState::Skipped,
            PipelineState::Failed(StageName::Configuration),
        ] {
            assert_eq!(state.advance(true), state);
            assert_eq!(state.advance(false), state);
        }
    }

    #[test]
    fn test_entering() {
        assert_eq!(
            PipelineState::entering(StageName::DeployProduction),
            Some(PipelineState::DeployProduction)
        );
        assert_eq!(PipelineState::entering(StageName::Configuration), None);
        for env in Environment::ALL {
            assert_eq!(
                PipelineState::deploying(env).stage(),
                Some(StageName::for_environment(env))
            );
        }
    }

    #[test]
    fn test_stage_environment_mapping() {
        for env in Environment::ALL {
            assert_eq!(StageName::for_environment(env).environment(), Some(env));
        }
        assert_eq!(StageName::Test.environment(), None);
    }

    #[test]
    fn test_state_serializes_with_stage() {
        let json = serde_json::to_value(PipelineState::Failed(StageName::DeployStaging)).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "deploy_staging");
        assert_eq!(PipelineState::Failed(StageName::Test).label(), "failed(test)");
    }

    #[test]
    fn test_trigger_from_ci_event() {
        assert_eq!(
            Trigger::from_ci_event(Some("push"), Some("refs/heads/main")),
            Trigger::Push {
                branch: "main".to_string()
            }
        );
        assert_eq!(
            Trigger::from_ci_event(Some("workflow_dispatch"), Some("main")),
            Trigger::Manual
        );
        assert_eq!(Trigger::from_ci_event(None, None), Trigger::Manual);
        assert_eq!(Trigger::from_ci_event(Some(""), Some("main")), Trigger::Manual);
    }

    #[test]
    fn test_other_ci_events_never_start() {
        for event in ["pull_request", "pull_request_target", "schedule", "release"] {
            let trigger = Trigger::from_ci_event(Some(event), Some("42/merge"));
            assert_eq!(
                trigger,
                Trigger::Other {
                    event: event.to_string()
                }
            );
            assert!(!trigger.starts_pipeline("main"));
        }

        let refless_push = Trigger::from_ci_event(Some("push"), None);
        assert!(!refless_push.starts_pipeline("main"));
        assert!(!Trigger::from_ci_event(Some("push"), Some(" ")).starts_pipeline("main"));
        assert_eq!(refless_push.label(), "event:push");
    }

    #[test]
    fn test_trigger_starts_pipeline() {
        let push = |b: &str| Trigger::Push {
            branch: b.to_string(),
        };
        assert!(push("main").starts_pipeline("main"));
        assert!(!push("feature/x").starts_pipeline("main"));
        assert!(Trigger::Manual.starts_pipeline("main"));
    }
}

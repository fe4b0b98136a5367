//! Run report: per-stage outcomes plus an append-only event log.

use chrono::{DateTime, Utc};
use gradeflow_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::state::{PipelineState, StageName, Trigger};

/// Report schema version written into every artifact.
pub const REPORT_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StageStarted,
    StepStarted,
    StepSucceeded,
    StepFailed,
    StageFinished,
}

/// One entry of the run's event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineEvent {
    /// Strictly increasing, starting at 1.
    pub seq: u64,
    pub kind: EventKind,
    pub stage: StageName,
    pub step: Option<String>,
    pub detail: Value,
    pub timestamp: DateTime<Utc>,
}

/// Append-only event log with sequence numbering.
#[derive(Debug, Default)]
pub struct RunLog {
    events: Vec<PipelineEvent>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: EventKind, stage: StageName, step: Option<&str>, detail: Value) {
        let seq = self.events.len() as u64 + 1;
        self.events.push(PipelineEvent {
            seq,
            kind,
            stage,
            step: step.map(str::to_string),
            detail,
            timestamp: Utc::now(),
        });
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<PipelineEvent> {
        self.events
    }
}

/// Outcome of one step inside a stage (a check, build, publish, notify).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Outcome of one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageReport {
    pub stage: StageName,
    pub passed: bool,
    pub steps: Vec<StepReport>,
    /// Error that failed the stage, prefixed with its class.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StageReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Everything that happened in one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineReport {
    pub schema_version: String,
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub function_name: Option<String>,
    pub context_digest: Option<String>,
    pub final_state: PipelineState,
    /// The run entered past the Test stage.
    #[serde(default)]
    pub gate_skipped: bool,
    pub stages: Vec<StageReport>,
    pub events: Vec<PipelineEvent>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineReport {
    /// `true` for `Success` and `Skipped`.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.final_state,
            PipelineState::Success | PipelineState::Skipped
        )
    }

    pub fn failed_stage(&self) -> Option<StageName> {
        match self.final_state {
            PipelineState::Failed(stage) => Some(stage),
            _ => None,
        }
    }

    pub fn stage(&self, stage: StageName) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Stages that were attempted, in order.
    pub fn attempted_stages(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

//! Structured observability hooks for the pipeline lifecycle.
//!
//! Every emitter logs a stable `event` field so CI log search can find the
//! stage a run failed in:
//!
//! | event | level |
//! |---|---|
//! | `pipeline.started` / `pipeline.finished` | info |
//! | `stage.started` / `stage.finished` | info (warn on failure) |
//! | `step.finished` | debug (warn on failure) |
//! | `gate.evaluated` | info |
//! | `gate.skipped` | warn |

use tracing::{debug, info, warn};

/// Run-scoped span tagged with the run id.
///
/// Attach it with `tracing::Instrument::instrument` rather than entering
/// it, so the run future stays `Send`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("gradeflow.run", run_id = %run_id)
}

pub fn emit_pipeline_started(run_id: &str, trigger: &str) {
    info!(event = "pipeline.started", run_id = %run_id, trigger = %trigger);
}

pub fn emit_pipeline_finished(run_id: &str, final_state: &str, duration_ms: u64) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        final_state = %final_state,
        duration_ms = duration_ms,
    );
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: &str, passed: bool, duration_ms: u64) {
    if passed {
        info!(event = "stage.finished", stage = %stage, passed = true, duration_ms = duration_ms);
    } else {
        warn!(event = "stage.finished", stage = %stage, passed = false, duration_ms = duration_ms);
    }
}

pub fn emit_step_finished(stage: &str, step: &str, error: Option<&dyn std::fmt::Display>) {
    match error {
        None => debug!(event = "step.finished", stage = %stage, step = %step, passed = true),
        Some(e) => warn!(
            event = "step.finished",
            stage = %stage,
            step = %step,
            passed = false,
            error = %e,
        ),
    }
}

pub fn emit_gate_evaluated(passed: bool, violations: usize) {
    info!(event = "gate.evaluated", passed = passed, violations = violations);
}

pub fn emit_gate_skipped(entry_stage: &str) {
    warn!(event = "gate.skipped", entry_stage = %entry_stage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _entered = span.enter();
    }

    #[test]
    fn test_emitters_without_subscriber() {
        emit_pipeline_started("r", "manual");
        emit_stage_started("test");
        emit_step_finished("test", "lint", None);
        emit_step_finished("test", "lint", Some(&"exit code 1"));
        emit_stage_finished("test", false, 12);
        emit_gate_evaluated(false, 1);
        emit_gate_skipped("deploy_production");
        emit_pipeline_finished("r", "failed", 12);
    }
}

//! Gate between the Test stage and staging deployment.

use serde::{Deserialize, Serialize};

use crate::check::{CheckKind, CheckResult};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Test-stage gate rules.
pub struct TestGate;

impl TestGate {
    /// Evaluate whether staging may be deployed.
    ///
    /// Gate rule:
    /// - every check that ran must have passed (custom ones included)
    /// - every [`CheckKind::REQUIRED`] kind must have at least one passing check
    pub fn evaluate(results: &[CheckResult]) -> GateVerdict {
        let mut violations: Vec<String> = results
            .iter()
            .filter_map(|r| {
                r.failure_reason()
                    .map(|reason| format!("Check '{}' failed: {}", r.name, reason))
            })
            .collect();

        for kind in CheckKind::REQUIRED {
            let ran = results.iter().any(|r| r.kind == kind);
            if !ran {
                violations.push(format!("Required check '{}' did not run", kind.name()));
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} checks passed", results.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

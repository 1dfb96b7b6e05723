//! Pass/fail decisions for each scenario family.
//!
//! Every procedure is a pure function of [`EvalInput`]. Nominal runs must
//! succeed cleanly; adversarial runs must be rejected, either by a non-zero
//! exit with a recognised error class or by explicit rejection counters.
//!
//! A zero exit without a summary always fails. A non-zero exit needs no
//! summary when its error text matches the family's error class; any other
//! non-zero exit fails.
use crate::classify::ErrorClass;
use crate::summary::SummaryCounters;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    ShieldedSmoke,
    SyntheticNegative,
    MalformedProof,
    BackupPrimaryFails,
    BackupRecovers,
    TimeoutDrill,
}

/// Observed outcome of one attempt, reduced to what evaluation may look at.
#[derive(Clone, Copy, Debug)]
pub struct EvalInput<'a> {
    pub exit_code: i32,
    pub counters: Option<SummaryCounters>,
    pub error_text: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Evaluation {
    pub pass: bool,
    pub reason: String,
}

impl Evaluation {
    fn pass(reason: impl Into<String>) -> Self {
        Self {
            pass: true,
            reason: reason.into(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            reason: reason.into(),
        }
    }
}

const MISSING_SUMMARY: &str = "missing summary payload";

impl ScenarioKind {
    pub fn evaluate(&self, input: &EvalInput<'_>) -> Evaluation {
        match self {
            ScenarioKind::ShieldedSmoke | ScenarioKind::BackupRecovers => evaluate_nominal(input),
            ScenarioKind::SyntheticNegative => evaluate_rejection(
                input,
                ErrorClass::ProofRejected,
                "expected fail-close proof rejection observed (non-zero exit)",
            ),
            ScenarioKind::MalformedProof => evaluate_rejection(
                input,
                ErrorClass::MalformedProof,
                "expected malformed-proof rejection observed (non-zero exit)",
            ),
            ScenarioKind::BackupPrimaryFails => evaluate_primary_rejected(input),
            ScenarioKind::TimeoutDrill => evaluate_timeout(input),
        }
    }
}

fn unexpected_exit(exit_code: i32) -> Evaluation {
    Evaluation::fail(format!("unexpected process exit code {exit_code}"))
}

/// Non-zero exit branch shared by every adversarial procedure.
fn classified_exit(input: &EvalInput<'_>, class: ErrorClass, pass_reason: &str) -> Evaluation {
    if class.matches(input.error_text) {
        Evaluation::pass(pass_reason)
    } else {
        unexpected_exit(input.exit_code)
    }
}

fn evaluate_nominal(input: &EvalInput<'_>) -> Evaluation {
    if input.exit_code != 0 {
        return Evaluation::fail(format!("process exit code {}", input.exit_code));
    }
    let Some(counters) = input.counters else {
        return Evaluation::fail(MISSING_SUMMARY);
    };
    let SummaryCounters {
        accepted,
        rejected,
        missed,
    } = counters;
    if accepted < 1 {
        return Evaluation::fail(format!("accepted={accepted} (expected >=1)"));
    }
    if rejected != 0 {
        return Evaluation::fail(format!("rejected={rejected} (expected 0)"));
    }
    if missed != 0 {
        return Evaluation::fail(format!("missed_deadlines={missed} (expected 0)"));
    }
    Evaluation::pass(format!(
        "accepted={accepted}, rejected={rejected}, missed={missed}"
    ))
}

fn evaluate_rejection(input: &EvalInput<'_>, class: ErrorClass, pass_reason: &str) -> Evaluation {
    if input.exit_code != 0 {
        return classified_exit(input, class, pass_reason);
    }
    let Some(counters) = input.counters else {
        return Evaluation::fail(MISSING_SUMMARY);
    };
    if counters.accepted != 0 {
        return Evaluation::fail(format!("accepted={} (expected 0)", counters.accepted));
    }
    if counters.rejected < 1 {
        return Evaluation::fail(format!("rejected={} (expected >=1)", counters.rejected));
    }
    Evaluation::pass(format!(
        "accepted={}, rejected={}",
        counters.accepted, counters.rejected
    ))
}

fn evaluate_primary_rejected(input: &EvalInput<'_>) -> Evaluation {
    if input.exit_code != 0 {
        return classified_exit(
            input,
            ErrorClass::AuthorityRejected,
            "primary prover rejected under backup authority gate",
        );
    }
    Evaluation::fail("primary prover unexpectedly succeeded")
}

fn evaluate_timeout(input: &EvalInput<'_>) -> Evaluation {
    if input.exit_code != 0 {
        return classified_exit(
            input,
            ErrorClass::DeadlineMissed,
            "expected timeout/deadline failure observed (non-zero exit)",
        );
    }
    let Some(counters) = input.counters else {
        return Evaluation::fail(MISSING_SUMMARY);
    };
    if counters.missed > 0 || counters.rejected > 0 {
        return Evaluation::pass(format!(
            "rejected={}, missed_deadlines={}",
            counters.rejected, counters.missed
        ));
    }
    Evaluation::fail("no missed deadline or rejection observed")
}

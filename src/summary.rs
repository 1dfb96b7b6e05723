//! zkbench `summary.json` access.
//!
//! The artifact is kept verbatim in the bundle; evaluation only reads the
//! counters of the first result block.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Batch counters that drive pass/fail decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SummaryCounters {
    #[serde(default, rename = "total_accepted_batches")]
    pub accepted: u64,
    #[serde(default, rename = "total_rejected_batches")]
    pub rejected: u64,
    #[serde(default, rename = "total_missed_proof_deadlines")]
    pub missed: u64,
}

impl SummaryCounters {
    pub fn new(accepted: u64, rejected: u64, missed: u64) -> Self {
        Self {
            accepted,
            rejected,
            missed,
        }
    }
}

/// Read and parse `path`; a missing file is `Ok(None)`, malformed JSON is an error.
pub fn load_summary(path: &Path) -> Result<Option<Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

/// Counters from `results[0].summary`, if that block exists.
///
/// Each counter is read on its own; a null, negative, or fractional value
/// counts as 0 without discarding its siblings.
pub fn primary_counters(summary: &Value) -> Option<SummaryCounters> {
    let block = summary.get("results")?.as_array()?.first()?.get("summary")?;
    if !block.is_object() {
        return None;
    }
    let counter = |key: &str| block.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some(SummaryCounters::new(
        counter("total_accepted_batches"),
        counter("total_rejected_batches"),
        counter("total_missed_proof_deadlines"),
    ))
}

//! One-shot module-cache recovery.
//!
//! `Attempt(n)` either completes, or (on a cache-corruption failure with
//! `n < MAX_CACHE_RETRIES`) moves to `ResetCache(n)` which wipes the cache and
//! re-enters `Attempt(n + 1)`. A cache failure on the last allowed attempt
//! ends in [`RecoveryOutcome::CacheStillCorrupted`]; the machine never loops
//! past its bound.
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub const MAX_CACHE_RETRIES: u32 = 1;

/// How one attempt ended, as far as recovery is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptVerdict {
    Success,
    CacheFailure,
    OtherFailure,
}

#[derive(Debug)]
pub enum RecoveryOutcome<T> {
    Completed { outcome: T, retries: u32 },
    CacheStillCorrupted { outcome: T, retries: u32 },
}

enum RecoveryState {
    Attempt(u32),
    ResetCache(u32),
}

/// Drive `execute` through at most `MAX_CACHE_RETRIES` cache resets.
pub fn run_with_cache_recovery<T>(
    mut execute: impl FnMut(u32) -> Result<T>,
    verdict: impl Fn(&T) -> AttemptVerdict,
    mut reset_cache: impl FnMut() -> Result<()>,
) -> Result<RecoveryOutcome<T>> {
    let mut state = RecoveryState::Attempt(0);
    loop {
        state = match state {
            RecoveryState::Attempt(attempt) => {
                let outcome = execute(attempt)?;
                match verdict(&outcome) {
                    AttemptVerdict::CacheFailure if attempt < MAX_CACHE_RETRIES => {
                        RecoveryState::ResetCache(attempt)
                    }
                    AttemptVerdict::CacheFailure => {
                        return Ok(RecoveryOutcome::CacheStillCorrupted {
                            outcome,
                            retries: attempt,
                        })
                    }
                    AttemptVerdict::Success | AttemptVerdict::OtherFailure => {
                        return Ok(RecoveryOutcome::Completed {
                            outcome,
                            retries: attempt,
                        })
                    }
                }
            }
            RecoveryState::ResetCache(attempt) => {
                tracing::warn!(attempt, "cache corruption detected; resetting module cache");
                reset_cache()?;
                RecoveryState::Attempt(attempt + 1)
            }
        };
    }
}

/// Delete and recreate `dir`. Not reentrant: callers must not share the
/// directory with a concurrently running harness.
pub fn reset_module_cache(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(())
}

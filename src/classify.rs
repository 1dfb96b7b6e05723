//! Error-text classifier for subprocess output.
//!
//! Control decisions that depend on captured stderr/stdout go through this one
//! table. Matching is case-insensitive substring search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Prover signer rejected after authority moved to the backup key.
    AuthorityRejected,
    /// Proof rejected by the verifier gate.
    ProofRejected,
    /// Proof envelope could not be decoded or verified.
    MalformedProof,
    /// Proof landed after its window or deadline.
    DeadlineMissed,
    /// Transient toolchain cache damage; eligible for one wipe-and-retry.
    CacheCorrupted,
    Unknown,
}

const SUBMIT_FAILED: &str = "submit_batch_proof execution failed";

const AUTHORITY_REJECTED: &[&str] = &["unauthorized", "prover authority", SUBMIT_FAILED];
const PROOF_REJECTED: &[&str] = &[
    "proof verification failed",
    "proof circuit mismatch",
    SUBMIT_FAILED,
];
const MALFORMED_PROOF: &[&str] = &[
    "invalid proof envelope",
    "proof verification failed",
    "failed to parse proof",
    "deserialize",
    SUBMIT_FAILED,
];
const DEADLINE_MISSED: &[&str] = &[
    "missed proof deadline",
    "proof deadline",
    "window close",
    SUBMIT_FAILED,
];
const CACHE_CORRUPTED: &[&str] = &[
    "cannot allocate memory",
    ".partial",
    "/go/pkg/mod/cache/download",
];

impl ErrorClass {
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            ErrorClass::AuthorityRejected => AUTHORITY_REJECTED,
            ErrorClass::ProofRejected => PROOF_REJECTED,
            ErrorClass::MalformedProof => MALFORMED_PROOF,
            ErrorClass::DeadlineMissed => DEADLINE_MISSED,
            ErrorClass::CacheCorrupted => CACHE_CORRUPTED,
            ErrorClass::Unknown => &[],
        }
    }

    /// True when `text` contains any of this class's patterns.
    pub fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.patterns()
            .iter()
            .any(|pattern| lowered.contains(&pattern.to_lowercase()))
    }
}

/// First matching class in priority order; `Unknown` when nothing matches.
pub fn classify(text: &str) -> ErrorClass {
    [
        ErrorClass::CacheCorrupted,
        ErrorClass::AuthorityRejected,
        ErrorClass::MalformedProof,
        ErrorClass::ProofRejected,
        ErrorClass::DeadlineMissed,
    ]
    .into_iter()
    .find(|class| class.matches(text))
    .unwrap_or(ErrorClass::Unknown)
}

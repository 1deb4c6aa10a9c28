//! The error taxonomy handlers and the delivery engine report against
//! (spec §7). Nothing here panics; `unwrap`/`expect` are confined to tests.

use thiserror::Error;

/// Configuration errors are the only ones fatal enough to stop the worker
/// host from starting (spec §7 "Configuration error").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing master secret: set DOCFLOW_MASTER_SECRET or config.encryption.master_secret")]
    MissingMasterSecret,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The result a pipeline handler reaches once it has run to completion —
/// success or one of the failure kinds that still leave the queue message
/// `completed` (spec §7: a handler exception never propagates past the
/// message boundary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The document advanced normally (including the pass-through and
    /// already-terminal no-op cases).
    Advanced,
    /// The referenced document no longer exists; the message is a no-op
    /// completion per I3.
    DocumentGone,
    /// A permanent handler error: the document's stage was marked
    /// `*_failed` and an error event was enqueued (best-effort).
    Failed { stage: &'static str, reason: String },
}

impl HandlerOutcome {
    pub fn failed(stage: &'static str, reason: impl Into<String>) -> Self {
        HandlerOutcome::Failed {
            stage,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_carries_stage_and_reason() {
        let outcome = HandlerOutcome::failed("ocr", "provider timed out");
        assert_eq!(
            outcome,
            HandlerOutcome::Failed {
                stage: "ocr",
                reason: "provider timed out".to_string(),
            }
        );
    }
}

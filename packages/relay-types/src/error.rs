use thiserror::Error;

/// The error taxonomy surfaced by kind, never by source-language names.
/// Each variant maps to one row of the propagation policy: ledger
/// invariant refusals are never retried automatically; upstream failures
/// in read paths are retried with backoff before surfacing.
#[derive(Debug, Error, Clone)]
pub enum RelayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("nonce too low: expected > {last_nonce}")]
    NonceTooLow { last_nonce: u64 },

    #[error("replay detected")]
    Replay,

    #[error("already processed")]
    AlreadyProcessed,

    #[error("pending: {0}")]
    Pending(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid signatures")]
    InvalidSignatures,
}

impl RelayError {
    /// Short, stable kind name for logging/metrics, matching §7's taxonomy
    /// names verbatim.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "invalidInput",
            RelayError::Unauthorized(_) => "unauthorized",
            RelayError::InsufficientBalance => "insufficientBalance",
            RelayError::NonceTooLow { .. } => "nonceTooLow",
            RelayError::Replay => "replay",
            RelayError::AlreadyProcessed => "alreadyProcessed",
            RelayError::Pending(_) => "pending",
            RelayError::NotFound(_) => "notFound",
            RelayError::Expired(_) => "expired",
            RelayError::Upstream(_) => "upstream",
            RelayError::Conflict(_) => "conflict",
            RelayError::InvalidSignatures => "invalidSignatures",
        }
    }

    /// Ledger invariant refusals are never retried automatically.
    pub fn is_ledger_refusal(&self) -> bool {
        matches!(
            self,
            RelayError::InsufficientBalance | RelayError::NonceTooLow { .. } | RelayError::Replay
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_taxonomy() {
        assert_eq!(RelayError::InsufficientBalance.kind(), "insufficientBalance");
        assert_eq!(
            RelayError::NonceTooLow { last_nonce: 3 }.kind(),
            "nonceTooLow"
        );
    }

    #[test]
    fn ledger_refusals_are_flagged() {
        assert!(RelayError::InsufficientBalance.is_ledger_refusal());
        assert!(!RelayError::Upstream("rpc down".into()).is_ledger_refusal());
    }
}

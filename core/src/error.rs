//! Error types for Tidepool

use crate::types::TxId;
use thiserror::Error;

/// Failure of a single provider call
///
/// Every provider operation resolves to either a value or exactly one of
/// these: the provider answered and refused, or the provider could not be
/// reached in time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        ProviderError::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// Main error type for Tidepool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TidepoolError {
    // ============ Connection Errors ============
    #[error("not connected to a wallet provider")]
    NotConnected,

    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("already connected")]
    AlreadyConnected,

    #[error("wallet does not provide an account")]
    NoAccounts,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    // ============ Transaction Errors ============
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(ProviderError),

    #[error("transaction reverted: {tx_id}")]
    TransactionReverted { tx_id: TxId },

    // ============ Read Errors ============
    #[error("failed to read {field}: {source}")]
    ReadFailed {
        field: &'static str,
        source: ProviderError,
    },

    // ============ Validation Errors ============
    #[error("invalid {field}: {}", .messages.join("; "))]
    Invalid { field: String, messages: Vec<String> },

    // ============ Configuration Errors ============
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl TidepoolError {
    /// Whether re-invoking the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TidepoolError::SubmissionFailed(_)
                | TidepoolError::ReadFailed { .. }
                | TidepoolError::Provider(_)
        )
    }
}

impl From<std::io::Error> for TidepoolError {
    fn from(err: std::io::Error) -> Self {
        TidepoolError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TidepoolError {
    fn from(err: serde_json::Error) -> Self {
        TidepoolError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash;

    #[test]
    fn test_retryable_classification() {
        let transport = ProviderError::Transport("connection reset".into());
        assert!(TidepoolError::SubmissionFailed(transport.clone()).is_retryable());
        assert!(TidepoolError::ReadFailed {
            field: "collectable",
            source: transport,
        }
        .is_retryable());
        assert!(!TidepoolError::TransactionReverted { tx_id: Hash::ZERO }.is_retryable());
        assert!(!TidepoolError::NotConnected.is_retryable());
    }

    #[test]
    fn test_invalid_message_joins_all_violations() {
        let err = TidepoolError::Invalid {
            field: "amount".into(),
            messages: vec!["is not a number".into(), "must be greater than 0".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid amount: is not a number; must be greater than 0"
        );
    }
}

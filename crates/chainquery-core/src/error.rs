//! Error types for the chainquery pipeline.

use thiserror::Error;

use crate::height::BlockHeight;

/// Errors returned by a [`QueryService`](crate::service::QueryService) implementation.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The call did not resolve within the configured fetch timeout.
    #[error("Timed out after {ms}ms: {what}")]
    Timeout { what: String, ms: u64 },

    /// Connection dropped, request rejected, malformed response, etc.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node does not (yet) know the requested block.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The new-heads subscription could not be established.
    #[error("Subscription error: {0}")]
    Subscription(String),
}

impl QueryError {
    /// Returns `true` if the error is transient and the same request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport(_) | Self::NotFound(_)
        )
    }
}

/// Errors that can occur while producing or processing blocks.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Query service error: {0}")]
    Query(#[from] QueryError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{handler}' at block {block_number}: {reason}")]
    Handler {
        handler: String,
        block_number: BlockHeight,
        reason: String,
    },

    #[error("Cannot start when already started")]
    AlreadyStarted,

    #[error("Cannot stop when not started")]
    NotStarted,

    #[error("Resume block {resume} is ahead of chain height {chain}")]
    ResumeAheadOfChain {
        resume: BlockHeight,
        chain: BlockHeight,
    },

    #[error("Malformed processing pack: {0}")]
    MalformedPack(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported reorg at block {block_number}: expected parent {expected}, got {actual}")]
    UnsupportedReorg {
        block_number: BlockHeight,
        expected: String,
        actual: String,
    },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` for usage and configuration errors, which are never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::AlreadyStarted
                | Self::NotStarted
                | Self::ResumeAheadOfChain { .. }
                | Self::MalformedPack(_)
                | Self::Config(_)
        )
    }

    /// Returns `true` if the error reports a chain reorganization.
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::UnsupportedReorg { .. })
    }

    /// Returns `true` if a block fetch failing with this error should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Query(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` if the error ends the run it occurred in.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("entity (de)serialization failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_errors_classified() {
        assert!(QueryError::Timeout { what: "hash".into(), ms: 5 }.is_retryable());
        assert!(QueryError::Transport("reset".into()).is_retryable());
        assert!(!QueryError::Subscription("refused".into()).is_retryable());
    }

    #[test]
    fn config_errors_are_not_retryable() {
        let err = IndexerError::ResumeAheadOfChain {
            resume: 10u64.into(),
            chain: 7u64.into(),
        };
        assert!(err.is_config());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Resume block 10 is ahead of chain height 7");
    }

    #[test]
    fn wrapped_query_error_is_retryable() {
        let err: IndexerError = QueryError::Transport("eof".into()).into();
        assert!(err.is_retryable());
        assert!(!err.is_config());
    }
}

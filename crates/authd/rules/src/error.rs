use crate::rule::RuleId;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures below the policy layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// Lock contention that outlived the retry budget.
    #[error("store busy")]
    Busy,

    #[error("rule {rule} delegates to unknown rule {delegate}")]
    UnresolvedDelegate { rule: String, delegate: String },

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {rule} delegates to unknown rule {delegate}")]
    UnresolvedDelegate { rule: String, delegate: String },

    #[error("rule {rule}: invalid {field}: {message}")]
    InvalidField {
        rule: String,
        field: &'static str,
        message: String,
    },

    #[error("invalid mechanism string: {0:?}")]
    InvalidMechanism(String),

    #[error("malformed rule row {id}: {message}")]
    MalformedRow { id: RuleId, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid policy document: {0}")]
    InvalidDocument(String),

    #[error("unresolved delegates after all passes: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

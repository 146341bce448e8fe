use authd_rules::{ImportError, RuleError, StoreError};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures below the decision layer.
///
/// Policy outcomes are never errors; the engine folds these into
/// `Outcome::Internal` where a decision is expected.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("delegation cycle through rule {rule}")]
    Cycle { rule: String },

    #[error("delegation deeper than {limit} at rule {rule}")]
    DepthExceeded { rule: String, limit: usize },

    #[error("mechanism {mechanism}: {message}")]
    Agent { mechanism: String, message: String },

    #[error("audit log: {0}")]
    Audit(String),
}

use authd_engine::EngineError;
use authd_rules::{ImportError, RuleError, StoreError};
use thiserror::Error;
use uuid::Uuid;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown authorization {0}")]
    UnknownAuthorization(Uuid),

    /// The blocking evaluation worker died.
    #[error("evaluation worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

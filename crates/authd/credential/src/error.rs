use thiserror::Error;

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("directory lookup failed: {0}")]
    Directory(String),

    #[error("membership check failed for group {group}: {message}")]
    Membership { group: String, message: String },
}

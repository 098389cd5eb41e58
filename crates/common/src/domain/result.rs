use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Failed to read credential file {path}: {message}")]
    CredentialReadError { path: String, message: String },

    #[error("Device directory request failed: {0}")]
    DirectoryFetchError(String),

    #[error("Device directory response could not be decoded: {0}")]
    DirectoryDecodeError(String),

    #[error("Payload is not valid JSON: {0}")]
    PayloadParseError(#[from] serde_json::Error),

    #[error("Document cannot be stored: {0}")]
    InvalidDocument(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

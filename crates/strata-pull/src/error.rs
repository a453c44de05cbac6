//! Pull engine errors.

use thiserror::Error;

use strata_fetch::FetchError;
use strata_repo::RepoError;
use strata_types::TypeError;

#[derive(Error, Debug)]
pub enum PullError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("{0}")]
    Integrity(String),
    #[error("{0}")]
    Trust(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Exceeded maximum recursion")]
    RecursionExceeded,
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<FetchError> for PullError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(url) => PullError::NotFound(url.to_string()),
            FetchError::Cancelled => PullError::Cancelled,
            FetchError::TooLarge { .. } | FetchError::InvalidUtf8(_) => {
                PullError::InvalidFormat(err.to_string())
            }
            FetchError::UnsupportedScheme(_) => PullError::Config(err.to_string()),
            FetchError::Network(_) | FetchError::Io(_) => PullError::Network(err.to_string()),
        }
    }
}

impl From<RepoError> for PullError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Type(err) => PullError::InvalidFormat(err.to_string()),
            RepoError::InvalidObject(msg) => PullError::InvalidFormat(msg),
            RepoError::Encoding(err) => PullError::InvalidFormat(err.to_string()),
            RepoError::BadSignature(msg) => PullError::Trust(msg),
            RepoError::MissingObject(name) => PullError::NotFound(name.to_string()),
            RepoError::RefNotFound(name) => PullError::NotFound(format!("ref '{name}'")),
            other => PullError::Storage(other.to_string()),
        }
    }
}

impl From<TypeError> for PullError {
    fn from(err: TypeError) -> Self {
        PullError::InvalidFormat(err.to_string())
    }
}

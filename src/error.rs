//! Explorer index error types

use thiserror::Error;

/// Explorer index result type
pub type Result<T> = std::result::Result<T, ExplorerError>;

/// Explorer index errors
#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Chain source error: {0}")]
    ChainSource(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ParityDB error: {0}")]
    ParityDB(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExplorerError {
    /// Whether the failure is transient and the operation may succeed on a later tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExplorerError::StoreUnavailable(_)
                | ExplorerError::ParityDB(_)
                | ExplorerError::Io(_)
                | ExplorerError::ChainSource(_)
        )
    }
}

impl From<parity_db::Error> for ExplorerError {
    fn from(err: parity_db::Error) -> Self {
        ExplorerError::ParityDB(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ExplorerError::StoreUnavailable("busy".into()).is_retryable());
        assert!(ExplorerError::ChainSource("timeout".into()).is_retryable());
        assert!(!ExplorerError::NotFound("abc".into()).is_retryable());
        assert!(!ExplorerError::InvalidInput("zz".into()).is_retryable());
        assert!(!ExplorerError::InconsistentState("gap".into()).is_retryable());
    }
}

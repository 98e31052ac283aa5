use complyscan_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested operation conflicts with the current state, e.g. it
    /// would move a job out of a terminal state.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cloud API error ({service}.{operation}): {message}")]
    Cloud {
        service: String,
        operation: String,
        message: String,
    },

    #[error("Rule evaluation failed: {0}")]
    Evaluation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    pub fn cloud(
        service: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ScanError::Cloud {
            service: service.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ScanError::Conflict(_))
    }
}

impl From<ModelError> for ScanError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidTransition { .. } => {
                ScanError::Conflict(err.to_string())
            }
            other => ScanError::Validation(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for ScanError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => {
                ScanError::NotFound("row not found".to_string())
            }
            other => ScanError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

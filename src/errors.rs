use tracing::{error, info, warn};

/// Error taxonomy for bank operations.
///
/// Validation errors reject a whole operation before any write. Resolution
/// problems inside a contribution pack are normally collected per question
/// (see `merge_engine::MergeIssue`) and only surface here for direct calls.
#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    Duplicate(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BankResult<T> = std::result::Result<T, BankError>;

impl From<sqlx::Error> for BankError {
    fn from(err: sqlx::Error) -> Self {
        BankError::Storage(anyhow::Error::from(err))
    }
}

impl From<tokio::task::JoinError> for BankError {
    fn from(err: tokio::task::JoinError) -> Self {
        BankError::Internal(format!("background task failed: {}", err))
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }
}

impl BankError {
    /// Short machine-friendly name, used as a log field and by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            BankError::Validation(_) => "validation",
            BankError::Resolution(_) => "resolution",
            BankError::NotFound(_) => "not_found",
            BankError::Duplicate(_) => "duplicate",
            BankError::Storage(_) => "storage",
            BankError::Internal(_) => "internal",
        }
    }

    /// Emits the error at a level matching its severity and hands it back.
    pub fn log_with_context(self, context: ErrorContext) -> Self {
        match &self {
            BankError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
            }
            BankError::Validation(_) | BankError::Resolution(_) | BankError::Duplicate(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error_kind = self.kind(),
                    error = %self,
                    "Operation rejected"
                );
            }
            BankError::Storage(_) | BankError::Internal(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error_kind = self.kind(),
                    error = %self,
                    "Operation failed"
                );
            }
        }
        self
    }
}

/// Maps raw storage failures onto the taxonomy by inspecting the message.
pub fn classify_storage_error(error: anyhow::Error) -> BankError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("unique constraint") || error_str.contains("already exists") {
        BankError::Duplicate(error.to_string())
    } else if error_str.contains("no rows") {
        BankError::NotFound(error.to_string())
    } else {
        BankError::Storage(error)
    }
}

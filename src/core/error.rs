use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Subject shape does not match its classification. Raised before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A relation or junction link points at an entity without a persisted id.
    #[error(
        "Cannot persist relation '{relation}' to {target}: the related entity is not persisted yet, or cascades are not set on the relation"
    )]
    CascadeResolution { target: String, relation: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Transaction error: {0}")]
    TransactionState(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub(crate) fn cascade(target: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::CascadeResolution {
            target: target.into(),
            relation: relation.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

use thiserror::Error;

/// Failures raised at the cloud adapter boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalError {
    /// The cloud reports that the object doesn't exist
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },

    /// The cloud rejected or failed the call
    #[error("{operation} failed: {reason}")]
    Request {
        operation: &'static str,
        reason: String,
    },

    #[error("image lookup for `{name}`: {reason}")]
    InvalidImage { name: String, reason: String },

    #[error("no cloud adapter available for account type `{0}`")]
    Unsupported(String),
}

impl CalError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CalError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn request(operation: &'static str, reason: impl Into<String>) -> Self {
        CalError::Request {
            operation,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CalError::NotFound { .. })
    }
}

//! Local provider error types

use landform_cloud::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("{resource_type}: missing required attribute '{attribute}'")]
    MissingAttribute {
        resource_type: String,
        attribute: String,
    },

    #[error("{attribute} refers to {expected} '{id}', which does not exist")]
    MissingReference {
        attribute: String,
        expected: String,
        id: String,
    },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("DependencyViolation: {id} is still referenced by {dependents}")]
    DependencyViolation { id: String, dependents: String },

    #[error("Object store {path} is unreadable: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LocalError>;

impl From<LocalError> for ProviderError {
    fn from(err: LocalError) -> Self {
        match err {
            LocalError::ObjectNotFound(id) => ProviderError::NotFound(id),
            LocalError::UnsupportedType(_)
            | LocalError::MissingAttribute { .. }
            | LocalError::MissingReference { .. }
            | LocalError::DependencyViolation { .. } => ProviderError::Validation(err.to_string()),
            LocalError::Corrupt { .. } | LocalError::Json(_) | LocalError::Io(_) => {
                ProviderError::Other(err.to_string())
            }
        }
    }
}

use thiserror::Error;

/// Errors produced by entity encoding and field access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid pid: {0:?}")]
    InvalidPid(String),

    #[error("pid {0:?} is reserved")]
    ReservedPid(String),

    #[error("root pid {0:?} must start with the root sentinel")]
    NotRootPid(String),

    #[error("record of type {type_name} is missing field {field}")]
    MissingField { type_name: String, field: String },

    #[error("field {field} of {type_name} has the wrong shape: expected {expected}")]
    FieldShape {
        type_name: String,
        field: String,
        expected: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid node name '{0}'")]
    InvalidName(String),

    #[error("invalid {expected} value: {input}")]
    InvalidValue { expected: String, input: String },

    #[error("unknown value type: {0}")]
    UnknownValueType(String),

    #[error("multi-valued property '{0}' requires at least one value")]
    EmptyValues(String),

    #[error("property '{name}' mixes value types {first} and {other}")]
    MixedValueTypes {
        name: String,
        first: String,
        other: String,
    },
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeaveError {
    #[error("Invalid pattern {pattern:?} at offset {offset}: {reason}")]
    InvalidPattern {
        pattern: String,
        offset: usize,
        reason: String,
    },

    #[error("Unsupported pattern construct {construct} in {pattern:?} at offset {offset}")]
    UnsupportedPattern {
        pattern: String,
        offset: usize,
        construct: String,
    },

    #[error("Binding error: {0}")]
    Binding(String),

    #[error("Unresolved: {0}")]
    Unresolved(String),

    #[error("Constraint violated: {0}")]
    ConstraintViolated(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WeaveError>;

//! Error taxonomy (spec §7): validation, evaluation, runtime, fatal.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HopsanError {
    /// Connect rules, required-port missing, unknown type.
    #[error("validation error: {0}")]
    Validation(String),

    /// Parameter reference unresolved, script syntax error.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// User code requested stop, log allocation failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Internal invariant broken.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl HopsanError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HopsanError::Validation(msg.into())
    }
    pub fn evaluation(msg: impl Into<String>) -> Self {
        HopsanError::Evaluation(msg.into())
    }
    pub fn runtime(msg: impl Into<String>) -> Self {
        HopsanError::Runtime(msg.into())
    }
    pub fn fatal(msg: impl Into<String>) -> Self {
        HopsanError::Fatal(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            HopsanError::Validation(m)
            | HopsanError::Evaluation(m)
            | HopsanError::Runtime(m)
            | HopsanError::Fatal(m) => m,
        }
    }
}

pub type HopsanResult<T> = Result<T, HopsanError>;

use std::error::Error;

use qwery_parser::SyntaxError;
use strum_macros::AsRefStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Where in the query lifecycle a runtime failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Parse,
    Compile,
    Open,
    Read,
    Write,
    Eval,
    Close,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A failure during execution, tagged with the phase it surfaced in.
#[derive(Debug, Error)]
#[error("{phase} error: {message}")]
pub struct RuntimeError {
    pub phase: Phase,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn Error + Send + Sync>>,
}

impl RuntimeError {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        phase: Phase,
        message: impl Into<String>,
        cause: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            phase,
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(Phase::Eval, message)
    }
}

/// Unknown fields, type mismatches, bad SHOW kinds and other meaning-level
/// failures, surfaced at compile or on first-row evaluation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SemanticError {
    pub message: String,
}

impl SemanticError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The error surface of the engine core.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl EngineError {
    pub fn semantic(message: impl Into<String>) -> Self {
        SemanticError::new(message).into()
    }

    pub fn eval(message: impl Into<String>) -> Self {
        RuntimeError::eval(message).into()
    }
}

use smol_str::SmolStr;
use thiserror::Error;

use crate::tokens::Token;

/// Raised when the statement surface cannot be consumed: a required token is
/// missing, a statement is unknown, or a template tag is malformed.
#[derive(Debug, Error)]
#[error("{message} at line {line}, column {col}")]
pub struct SyntaxError {
    pub message: String,
    pub token: Option<SmolStr>,
    pub line: u32,
    pub col: u32,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, token: Option<&Token>) -> Self {
        match token {
            Some(token) => Self {
                message: message.into(),
                token: Some(token.text.clone()),
                line: token.line,
                col: token.col,
            },
            None => Self::eof(message),
        }
    }

    /// An error with no offending token, reported past the end of the input.
    pub fn eof(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            token: None,
            line: 0,
            col: 0,
        }
    }

    pub fn expected(what: &str, found: Option<&Token>) -> Self {
        let message = match found {
            Some(token) => format!("Expected {what}, found '{}'", token.text),
            None => format!("Expected {what}, found end of input"),
        };
        Self::new(message, found)
    }
}

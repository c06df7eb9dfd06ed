use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidId(String),
    InvalidTarget(String),
    InvalidParameter(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidId(msg) => write!(f, "invalid id: {msg}"),
            ModelError::InvalidTarget(msg) => {
                write!(f, "invalid target: {msg}")
            }
            ModelError::InvalidParameter(msg) => {
                write!(f, "invalid parameter: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;

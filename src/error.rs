use crate::parser::ParseError;
use std::io;

/// Central error type for the skua engine.
#[derive(Debug)]
pub enum SkuaError {
    /// Underlying I/O error from the OS or network.
    Io(io::Error),
    /// Error during HTTP request parsing.
    Parse(ParseError),
    /// A worker thread could not be spawned.
    Thread(String),
    /// Generic or miscellaneous error.
    Other(String),
}

impl std::fmt::Display for SkuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkuaError::Io(e) => write!(f, "I/O error: {}", e),
            SkuaError::Parse(e) => write!(f, "Parse error: {:?}", e),
            SkuaError::Thread(msg) => write!(f, "Thread error: {}", msg),
            SkuaError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for SkuaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SkuaError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SkuaError {
    fn from(e: io::Error) -> Self {
        SkuaError::Io(e)
    }
}

impl From<ParseError> for SkuaError {
    fn from(e: ParseError) -> Self {
        SkuaError::Parse(e)
    }
}

pub type SkuaResult<T> = Result<T, SkuaError>;

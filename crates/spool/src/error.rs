//! Error types for spooling stacks
//!
//! Every fallible operation returns [`StackError`]. Callers that only care
//! about the empty case can match on [`StackError::EmptyStack`]; platform
//! failures arrive untouched inside [`StackError::Io`].

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, StackError>;

/// Error while encoding or decoding a bundle
#[derive(Debug)]
pub enum CodecError {
    /// JSON encoding/decoding error (preserves original error for debugging)
    Json(serde_json::Error),
    /// Bincode encoding/decoding error
    Bincode(Box<bincode::ErrorKind>),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "JSON error: {}", e),
            CodecError::Bincode(e) => write!(f, "Bincode error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Json(e) => Some(e),
            CodecError::Bincode(e) => Some(e.as_ref()),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e)
    }
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::Bincode(e)
    }
}

/// Error raised by stack and collection operations
#[derive(Debug)]
pub enum StackError {
    /// Pop with nothing in memory and nothing on disk
    EmptyStack,
    /// A bundle file name did not parse as `<prefix>.<index>`, or the
    /// discovered indices are not contiguous
    CorruptIndex { path: PathBuf, reason: String },
    /// A bundle could not be encoded or decoded
    Serialization { bundle: PathBuf, source: CodecError },
    /// The root directory survived a reset
    ResetIncomplete(PathBuf),
    /// No stack registered under this name
    NotFound(String),
    /// Invalid configuration value
    Config(String),
    /// Underlying filesystem error
    Io(io::Error),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::EmptyStack => write!(f, "pop from empty stack"),
            StackError::CorruptIndex { path, reason } => {
                write!(f, "corrupt bundle index at {}: {}", path.display(), reason)
            }
            StackError::Serialization { bundle, source } => write!(
                f,
                "could not serialize values for bundle {}: {}",
                bundle.display(),
                source
            ),
            StackError::ResetIncomplete(path) => {
                write!(f, "spool path {} still exists after reset", path.display())
            }
            StackError::NotFound(name) => write!(f, "no stack named '{}'", name),
            StackError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            StackError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StackError::Serialization { source, .. } => Some(source),
            StackError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StackError {
    fn from(e: io::Error) -> Self {
        StackError::Io(e)
    }
}

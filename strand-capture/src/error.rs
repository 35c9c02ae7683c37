//! Errors raised while resolving a spawn capture.

use std::fmt;
use std::path::PathBuf;

use strand_parser::ParseError;

/// A failure anywhere in the static capture pipeline. All variants are
/// reported synchronously from `spawn` — nothing here survives into the
/// worker protocol.
#[derive(Debug)]
pub enum CaptureError {
    /// No stack frame outside the runtime's own sources was found.
    CallSiteUnresolved,
    /// The caller's source file could not be read.
    SourceUnreadable { path: PathBuf, cause: std::io::Error },
    /// The caller's source file did not parse.
    ParseFailed { path: PathBuf, errors: Vec<ParseError> },
    /// No `spawn(...)` call expression contains the recorded offset.
    SpawnNotFound { path: PathBuf, line: u32, col: u32 },
    /// The first argument of the located `spawn` call is not a lambda.
    NotALambda { path: PathBuf, line: u32, col: u32 },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::CallSiteUnresolved => {
                write!(f, "could not resolve the spawn call site from the stack")
            }
            CaptureError::SourceUnreadable { path, cause } => {
                write!(f, "could not read source {}: {cause}", path.display())
            }
            CaptureError::ParseFailed { path, errors } => {
                write!(
                    f,
                    "source {} failed to parse ({} error{})",
                    path.display(),
                    errors.len(),
                    if errors.len() == 1 { "" } else { "s" }
                )
            }
            CaptureError::SpawnNotFound { path, line, col } => {
                write!(
                    f,
                    "no spawn(...) call found at {}:{line}:{col}",
                    path.display()
                )
            }
            CaptureError::NotALambda { path, line, col } => {
                write!(
                    f,
                    "spawn at {}:{line}:{col} must be passed an inline fn expression",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::SourceUnreadable { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

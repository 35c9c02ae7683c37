//! Runtime error representation.

use std::fmt;

use strand_capture::CaptureError;
use strand_parser::ast::Span;

/// What went wrong. The kinds mirror the failure surface of the worker
/// protocol: capture failures are synchronous, job failures arrive through
/// the reply channel, invariant violations are fatal in the primitive that
/// detects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong operand or argument type.
    Type,
    /// Unresolved identifier.
    Name,
    /// Wrong number of call arguments.
    Arity,
    /// Static capture pipeline failure (spawn is the only source).
    Capture,
    /// A non-replicable value reached wire conversion.
    Clone,
    /// Reading or writing a byte buffer whose contents were transferred away.
    DetachedBuffer,
    /// Releasing an unlocked mutex, or similar primitive misuse.
    InvariantViolation,
    /// The user function on the worker failed; message carries its error.
    JobFailed,
    /// The worker exited without replying (host error or shutdown).
    WorkerTerminated,
    /// Parse failure of runtime-evaluated text.
    Parse,
    /// Filesystem failure while generating or loading worker entries.
    Io,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::Type => "type error",
            ErrorKind::Name => "name error",
            ErrorKind::Arity => "arity error",
            ErrorKind::Capture => "capture error",
            ErrorKind::Clone => "clone error",
            ErrorKind::DetachedBuffer => "detached buffer",
            ErrorKind::InvariantViolation => "invariant violation",
            ErrorKind::JobFailed => "job failed",
            ErrorKind::WorkerTerminated => "worker terminated",
            ErrorKind::Parse => "parse error",
            ErrorKind::Io => "io error",
        }
    }
}

/// An error raised while evaluating Strand code or driving the worker
/// protocol.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Source span of the failing expression, when known.
    pub span: Option<Span>,
    /// Source path of the failing expression, when known.
    pub path: Option<String>,
}

impl RuntimeError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            path: None,
        }
    }

    /// Attach a source position if none is recorded yet. Innermost wins.
    #[must_use]
    pub fn at(mut self, path: &str, span: &Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span.clone());
            self.path = Some(path.to_string());
        }
        self
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    #[must_use]
    pub fn name_error(name: &str) -> Self {
        Self::new(ErrorKind::Name, format!("`{name}` is not defined"))
    }

    #[must_use]
    pub fn arity(callee: &str, expected: usize, got: usize) -> Self {
        Self::new(
            ErrorKind::Arity,
            format!("{callee} expects {expected} argument(s), got {got}"),
        )
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)?;
        if let (Some(path), Some(span)) = (&self.path, &self.span) {
            write!(f, " ({path} @ {}..{})", span.start, span.end)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl From<CaptureError> for RuntimeError {
    fn from(err: CaptureError) -> Self {
        RuntimeError::new(ErrorKind::Capture, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_position() {
        let err = RuntimeError::type_error("cannot add").at("/m.strand", &(4..9));
        let text = err.to_string();
        assert!(text.starts_with("type error: cannot add"));
        assert!(text.contains("/m.strand @ 4..9"));
    }

    #[test]
    fn innermost_position_wins() {
        let err = RuntimeError::name_error("x")
            .at("/inner.strand", &(1..2))
            .at("/outer.strand", &(5..6));
        assert_eq!(err.path.as_deref(), Some("/inner.strand"));
    }
}

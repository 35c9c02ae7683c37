//! Call-site resolution from a synthetic stack snapshot.
//!
//! The evaluator records a frame for every call it executes. When `spawn`
//! runs, the innermost frames belong to the runtime itself (the native call,
//! bridge evaluation, and so on); the spawn invocation is the innermost
//! frame whose source is a real file.

use std::path::PathBuf;

use crate::error::CaptureError;

/// Pseudo-path attributed to frames evaluating bridge or `eval` text.
/// Frames with this path (or any other `<...>` pseudo-path) are never call
/// sites.
pub const EVAL_PSEUDO_PATH: &str = "<eval>";

/// One frame of the evaluator's call stack, innermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Source path of the frame, or a `<...>` pseudo-path for synthetic
    /// runtime-injected sources.
    pub path: String,
    /// 1-based line of the call expression.
    pub line: u32,
    /// 1-based column of the call expression.
    pub col: u32,
}

impl StackFrame {
    /// Whether this frame belongs to the runtime rather than user source.
    #[must_use]
    pub fn is_runtime(&self) -> bool {
        self.path.starts_with('<')
    }
}

/// The resolved position of a `spawn` invocation. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub path: PathBuf,
    pub line: u32,
    pub col: u32,
}

impl CallSite {
    /// Stable key for caches and worker signatures: `path:line:col`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.path.display(), self.line, self.col)
    }
}

/// Pick the spawn call site out of a stack snapshot: the topmost
/// (innermost) frame whose source path is not one of the runtime's own.
///
/// # Errors
///
/// [`CaptureError::CallSiteUnresolved`] if every frame is runtime-internal.
pub fn locate(frames: &[StackFrame]) -> Result<CallSite, CaptureError> {
    frames
        .iter()
        .rev()
        .find(|frame| !frame.is_runtime())
        .map(|frame| CallSite {
            path: PathBuf::from(&frame.path),
            line: frame.line,
            col: frame.col,
        })
        .ok_or(CaptureError::CallSiteUnresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(path: &str, line: u32, col: u32) -> StackFrame {
        StackFrame {
            path: path.into(),
            line,
            col,
        }
    }

    #[test]
    fn innermost_user_frame_wins() {
        let frames = vec![
            frame("/app/main.strand", 3, 1),
            frame("/app/util.strand", 10, 5),
            frame(EVAL_PSEUDO_PATH, 1, 1),
        ];
        let site = locate(&frames).expect("resolvable");
        assert_eq!(site.path, PathBuf::from("/app/util.strand"));
        assert_eq!((site.line, site.col), (10, 5));
    }

    #[test]
    fn all_runtime_frames_fail() {
        let frames = vec![frame(EVAL_PSEUDO_PATH, 1, 1), frame("<native>", 1, 1)];
        assert!(matches!(
            locate(&frames),
            Err(CaptureError::CallSiteUnresolved)
        ));
    }

    #[test]
    fn key_format() {
        let site = CallSite {
            path: PathBuf::from("/app/main.strand"),
            line: 7,
            col: 9,
        };
        assert_eq!(site.key(), "/app/main.strand:7:9");
    }
}

//! Source loading and the process-wide parse cache.
//!
//! A source file is read and parsed at most once per process. The cache is
//! never invalidated: the library targets development and long-lived server
//! processes, and editing a source file mid-run requires a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use strand_parser::ast::Module;
use strand_parser::line::LineTable;
use strand_parser::parse_module;

use crate::error::CaptureError;

/// A parsed source file with everything the capture pipeline needs: the
/// raw text (for lambda extraction and import splicing), the AST, and the
/// line table for offset conversions.
#[derive(Debug)]
pub struct ParsedSource {
    pub path: PathBuf,
    pub text: String,
    pub module: Module,
    pub lines: LineTable,
}

static CACHE: LazyLock<Mutex<HashMap<PathBuf, Arc<ParsedSource>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Load and parse `path`, memoized by path.
///
/// # Errors
///
/// [`CaptureError::SourceUnreadable`] if the file cannot be read,
/// [`CaptureError::ParseFailed`] if it does not parse cleanly.
pub fn load_source(path: &Path) -> Result<Arc<ParsedSource>, CaptureError> {
    let mut cache = CACHE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(parsed) = cache.get(path) {
        return Ok(Arc::clone(parsed));
    }

    let text = std::fs::read_to_string(path).map_err(|cause| CaptureError::SourceUnreadable {
        path: path.to_path_buf(),
        cause,
    })?;
    let parsed = parse_text(path, text)?;
    cache.insert(path.to_path_buf(), Arc::clone(&parsed));
    Ok(parsed)
}

/// Parse already-loaded text under `path` without touching the filesystem.
/// Used by worker bootstrap, which reads its generated entry exactly once.
///
/// # Errors
///
/// [`CaptureError::ParseFailed`] if the text does not parse cleanly.
pub fn parse_text(path: &Path, text: String) -> Result<Arc<ParsedSource>, CaptureError> {
    let result = parse_module(&text);
    if !result.errors.is_empty() {
        return Err(CaptureError::ParseFailed {
            path: path.to_path_buf(),
            errors: result.errors,
        });
    }
    Ok(Arc::new(ParsedSource {
        path: path.to_path_buf(),
        lines: LineTable::new(&text),
        module: result.module,
        text,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cache_returns_same_parse() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cached.strand");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "let x = 1;").expect("write");

        let first = load_source(&path).expect("parse");
        let second = load_source(&path).expect("parse");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cache_is_never_invalidated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stale.strand");
        std::fs::write(&path, "let x = 1;").expect("write");

        let first = load_source(&path).expect("parse");
        // Rewriting the file on disk must not change what the cache serves.
        std::fs::write(&path, "let x = 2;").expect("rewrite");
        let second = load_source(&path).expect("parse");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.text.contains("= 1"));
    }

    #[test]
    fn unreadable_source_errors() {
        let err = load_source(Path::new("/nonexistent/nowhere.strand")).unwrap_err();
        assert!(matches!(err, CaptureError::SourceUnreadable { .. }));
    }

    #[test]
    fn parse_failure_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.strand");
        std::fs::write(&path, "let = ;").expect("write");
        let err = load_source(&path).unwrap_err();
        assert!(matches!(err, CaptureError::ParseFailed { .. }));
    }
}

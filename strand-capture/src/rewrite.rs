//! Import rewriting for generated worker entries.
//!
//! A worker entry lives under `.workers/`, so relative specifiers in the
//! copied caller module would resolve against the wrong directory. Every
//! specifier beginning with `./` or `../` is spliced to the absolute path
//! resolved against the caller's file. Splicing is line-preserving: the
//! module portion of a generated entry must keep its original line numbers,
//! because shared-memory location keys are derived from them.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use strand_parser::ast::Item;
use strand_parser::parser::quote_string;

use crate::source::ParsedSource;

static CACHE: LazyLock<Mutex<HashMap<PathBuf, Arc<String>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Return `src`'s text with every relative import specifier rewritten to
/// absolute form. Cached per source path.
pub fn rewrite_imports(src: &ParsedSource) -> Arc<String> {
    {
        let cache = CACHE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(rewritten) = cache.get(&src.path) {
            return Arc::clone(rewritten);
        }
    }

    let base = src.path.parent().unwrap_or_else(|| Path::new("/"));
    let mut splices: Vec<(std::ops::Range<usize>, String)> = Vec::new();
    for (item, _) in &src.module.items {
        let Item::Import(imp) = item else { continue };
        if !(imp.specifier.starts_with("./") || imp.specifier.starts_with("../")) {
            continue;
        }
        let absolute = normalize_path(&base.join(&imp.specifier));
        splices.push((
            imp.specifier_span.clone(),
            quote_string(&absolute.display().to_string()),
        ));
    }

    let rewritten = if splices.is_empty() {
        Arc::new(src.text.clone())
    } else {
        splices.sort_by_key(|(span, _)| span.start);
        let mut out = String::with_capacity(src.text.len());
        let mut cursor = 0;
        for (span, replacement) in splices {
            out.push_str(&src.text[cursor..span.start]);
            out.push_str(&replacement);
            cursor = span.end;
        }
        out.push_str(&src.text[cursor..]);
        Arc::new(out)
    };

    CACHE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(src.path.clone(), Arc::clone(&rewritten));
    rewritten
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse_text;

    #[test]
    fn relative_specifiers_become_absolute() {
        let source = "import { a } from \"./util.strand\";\n\
                      import { b } from \"../shared/lib.strand\";\n\
                      let x = 1;\n";
        let src = parse_text(Path::new("/app/sub/main.strand"), source.to_string())
            .expect("parse");
        let rewritten = rewrite_imports(&src);
        assert!(rewritten.contains("\"/app/sub/util.strand\""));
        assert!(rewritten.contains("\"/app/shared/lib.strand\""));
        assert!(rewritten.contains("let x = 1;"));
    }

    #[test]
    fn absolute_and_bare_specifiers_are_untouched() {
        let source = "import { a } from \"/lib/a.strand\";\n";
        let src = parse_text(Path::new("/app/untouched.strand"), source.to_string())
            .expect("parse");
        let rewritten = rewrite_imports(&src);
        assert_eq!(rewritten.as_str(), source);
    }

    #[test]
    fn rewriting_preserves_line_structure() {
        let source = "import { a } from \"./a.strand\";\nlet after = 2;\n";
        let src = parse_text(Path::new("/app/lines.strand"), source.to_string())
            .expect("parse");
        let rewritten = rewrite_imports(&src);
        assert_eq!(
            rewritten.lines().count(),
            source.lines().count(),
            "splicing must not add or remove lines"
        );
        assert_eq!(rewritten.lines().nth(1), Some("let after = 2;"));
    }

    #[test]
    fn cache_returns_same_result() {
        let source = "import { a } from \"./c.strand\";\n";
        let src = parse_text(Path::new("/app/cache-hit.strand"), source.to_string())
            .expect("parse");
        let first = rewrite_imports(&src);
        let second = rewrite_imports(&src);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d.strand")),
            PathBuf::from("/a/c/d.strand")
        );
    }
}

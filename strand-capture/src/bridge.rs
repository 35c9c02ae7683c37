//! Bridge emission.
//!
//! The bridge is a single expression handed back from `spawn`. Evaluated in
//! the caller's own scope, each `name: name` field captures the live value
//! of that binding; the top-level candidates are listed separately so the
//! dispatch entry can filter them (spec: they may be rebound on the worker
//! by the module's own execution).

use std::path::Path;

use strand_parser::parser::quote_string;

use crate::scope::SpawnCapture;

/// Callee of the emitted bridge expression; a native installed in every
/// isolate's root scope.
pub const DISPATCH_SENTINEL: &str = "__dispatch";

/// Emit the bridge expression for one analyzed spawn site:
///
/// ```text
/// __dispatch({a: a, top: top}, ["top"], "fn () { ... }", "/caller", "/caller:3:5")
/// ```
#[must_use]
pub fn emit_bridge(capture: &SpawnCapture, caller_path: &Path) -> String {
    let mut props = String::from("{");
    for name in capture
        .descriptor
        .locals
        .iter()
        .chain(&capture.descriptor.top_levels)
    {
        if props.len() > 1 {
            props.push_str(", ");
        }
        props.push_str(name);
        props.push_str(": ");
        props.push_str(name);
    }
    props.push('}');

    let mut tops = String::from("[");
    for name in &capture.descriptor.top_levels {
        if tops.len() > 1 {
            tops.push_str(", ");
        }
        tops.push_str(&quote_string(name));
    }
    tops.push(']');

    format!(
        "{DISPATCH_SENTINEL}({props}, {tops}, {}, {}, {})",
        quote_string(&capture.fn_text),
        quote_string(&caller_path.display().to_string()),
        quote_string(&capture.key),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeDescriptor, SpawnCapture};
    use strand_parser::Parser;

    fn capture(locals: &[&str], tops: &[&str]) -> SpawnCapture {
        SpawnCapture {
            descriptor: ScopeDescriptor {
                locals: locals.iter().map(ToString::to_string).collect(),
                top_levels: tops.iter().map(ToString::to_string).collect(),
            },
            fn_text: "fn () { return a + t; }".into(),
            fn_span: 0..0,
            key: "/app/main.strand:3:5".into(),
        }
    }

    #[test]
    fn emits_all_names_and_top_level_list() {
        let bridge = emit_bridge(&capture(&["a"], &["t"]), Path::new("/app/main.strand"));
        assert_eq!(
            bridge,
            "__dispatch({a: a, t: t}, [\"t\"], \"fn () { return a + t; }\", \
             \"/app/main.strand\", \"/app/main.strand:3:5\")"
        );
    }

    #[test]
    fn empty_capture_still_valid() {
        let bridge = emit_bridge(&capture(&[], &[]), Path::new("/app/main.strand"));
        assert!(bridge.starts_with("__dispatch({}, [], "));
    }

    #[test]
    fn bridge_parses_as_expression() {
        let bridge = emit_bridge(&capture(&["a", "b"], &["t"]), Path::new("/app/main.strand"));
        let mut parser = Parser::new(&bridge);
        let expr = parser.expr();
        assert!(expr.is_some(), "bridge must be a single valid expression");
    }

    #[test]
    fn fn_text_quoting_survives_embedded_quotes() {
        let mut cap = capture(&[], &[]);
        cap.fn_text = "fn () { return \"hi\"; }".into();
        let bridge = emit_bridge(&cap, Path::new("/app/main.strand"));
        assert!(bridge.contains("\\\"hi\\\""));
    }
}

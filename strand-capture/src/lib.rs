//! Static capture pipeline for `spawn`.
//!
//! Everything that happens between a `spawn(fn () { ... })` call and the
//! bridge expression handed back to the caller lives here:
//!
//! - [`callsite`] — resolve the spawn invocation's source position from a
//!   synthetic stack snapshot.
//! - [`source`] — load and parse the caller's file, memoized by path.
//! - [`scope`] — locate the lambda at the call site and partition its free
//!   variables into caller locals and module top-levels.
//! - [`rewrite`] — rewrite relative import specifiers to absolute form for
//!   generated worker entries.
//! - [`bridge`] — emit the expression that, evaluated in the caller's
//!   scope, gathers the captured values and calls the dispatch entry.

pub mod bridge;
pub mod callsite;
pub mod error;
pub mod rewrite;
pub mod scope;
pub mod source;

pub use bridge::emit_bridge;
pub use callsite::{locate, CallSite, StackFrame, EVAL_PSEUDO_PATH};
pub use error::CaptureError;
pub use rewrite::rewrite_imports;
pub use scope::{analyze_call_site, ScopeDescriptor, SpawnCapture};
pub use source::{load_source, ParsedSource};

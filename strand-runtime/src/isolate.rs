//! Embedding surface: run a Strand script as the host isolate.

use std::path::Path;

use crate::error::RuntimeError;
use crate::interp::Interp;
use crate::value::Value;

/// One isolate owned by the embedder. The host process typically holds a
/// single `Isolate` for its main script; worker isolates are provisioned
/// internally by spawn dispatch.
pub struct Isolate {
    interp: Interp,
}

impl Isolate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interp: Interp::new(),
        }
    }

    /// Evaluate the module at `path` (and, transitively, its imports),
    /// then invoke its `main` function if it declares one.
    ///
    /// Only the host isolate calls `main`: worker isolates evaluate the
    /// same module top-level (declarations, `Global` constructions) but
    /// run nothing else besides their entry function.
    ///
    /// # Errors
    ///
    /// Any parse or runtime error raised by the module's top-level code or
    /// by `main`.
    pub fn run_file(&mut self, path: &Path) -> Result<(), RuntimeError> {
        let env = self.interp.run_module(path)?;
        if let Some(Value::Lambda(main)) = env.lookup("main") {
            self.interp.call_entry(&main, Vec::new())?;
        }
        Ok(())
    }

    /// Read a top-level binding from a previously evaluated module.
    #[must_use]
    pub fn module_binding(&self, path: &Path, name: &str) -> Option<Value> {
        self.interp.module_env(path)?.lookup(name)
    }
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminate all pooled workers and reset counters. Idle workers are
/// joined; a worker mid-job finishes detached.
pub fn shutdown() {
    crate::pool::shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_file_invokes_main_and_exposes_bindings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("host.strand");
        std::fs::write(
            &path,
            "let ran = SharedBuf(4);\nfn main() { ran.store(0, 7); }\n",
        )
        .expect("write");

        let mut isolate = Isolate::new();
        isolate.run_file(&path).expect("script runs");

        let Some(Value::Shared(cell)) = isolate.module_binding(&path, "ran") else {
            panic!("expected the `ran` binding");
        };
        assert_eq!(cell.borrow().load(0), Some(7), "main ran on the host");
        assert!(isolate.module_binding(&path, "missing").is_none());
        std::mem::forget(dir);
    }

    #[test]
    fn module_without_main_is_fine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("no_main.strand");
        std::fs::write(&path, "let x = 1;\n").expect("write");
        Isolate::new().run_file(&path).expect("no main required");
        std::mem::forget(dir);
    }
}

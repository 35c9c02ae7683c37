//! Worker isolates: bootstrap, job loop, and the wire protocol.
//!
//! A worker thread evaluates its generated entry module eagerly on start —
//! module-level shared primitives constructed there park in the pending
//! hydration set until the first job delivers the memory snapshot. Each
//! job carries its own reply channel, so the protocol is exactly one
//! request and one response per job; the busy flag upstream guarantees a
//! worker never holds two jobs at once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;

use crate::error::RuntimeError;
use crate::interp::{Env, Interp};
use crate::pool;
use crate::registry;
use crate::shared::SharedBuf;
use crate::transfer::{collect_transferables, from_wire, to_wire, WireValue};
use crate::value::Value;

/// Module binding the entry template assigns the user function to.
pub const ENTRY_BINDING: &str = "__strand_entry";

/// Structural error info propagated from a failed job.
#[derive(Debug)]
pub struct JobError {
    pub message: String,
}

/// Worker → caller, exactly once per job.
#[derive(Debug)]
pub enum Reply {
    Success(WireValue),
    Error(JobError),
}

/// Caller → worker, exactly once per job: the capture payload, the
/// caller's registry snapshot, and the channel to answer on.
#[derive(Debug)]
pub struct Job {
    pub props: Vec<(String, WireValue)>,
    pub global_memory: Vec<(String, SharedBuf)>,
    pub reply: Sender<Reply>,
}

/// Handle to a spawned worker thread.
pub struct WorkerHandle {
    pub tx: Sender<Job>,
    pub join: JoinHandle<()>,
}

/// Spawn a worker isolate over the generated entry at `entry_path`.
///
/// `origin` is the caller file the entry's module portion was copied from;
/// location keys derived inside the entry are attributed to it so they
/// match the caller's. The worker reports back to pool entry
/// (`digest`, `id`) after every job.
///
/// # Errors
///
/// Propagates thread-spawn failure.
pub fn spawn_worker(
    entry_path: PathBuf,
    origin: PathBuf,
    digest: String,
    id: u64,
) -> std::io::Result<WorkerHandle> {
    let (tx, rx) = channel::<Job>();
    let join = std::thread::Builder::new()
        .name(format!("strand-worker-{digest}"))
        .spawn(move || {
            registry::begin_worker_hydration();
            let mut interp = Interp::new();
            interp.entry_alias = Some((entry_path.clone(), origin));

            // Eager module evaluation: runs the caller's module top-level
            // (imports, Globals, function definitions) before any job.
            let startup = interp.run_module(&entry_path);
            if let Err(err) = &startup {
                tracing::warn!(path = %entry_path.display(), %err, "worker module failed");
            }

            while let Ok(job) = rx.recv() {
                let Job {
                    props,
                    global_memory,
                    reply,
                } = job;
                registry::apply_snapshot(global_memory);

                let outcome = catch_unwind(AssertUnwindSafe(|| match &startup {
                    Ok(env) => run_job(&mut interp, env, props),
                    Err(err) => Reply::Error(JobError {
                        message: format!("worker entry failed to load: {err}"),
                    }),
                }));
                let message = outcome.unwrap_or_else(|_| {
                    Reply::Error(JobError {
                        message: "worker panicked".into(),
                    })
                });
                // Release before replying: a caller that awaits and
                // immediately spawns again must find this entry idle.
                // Per-job reply channels keep an eagerly enqueued next job
                // from crossing wires with this reply.
                pool::release(&digest, id);
                let _ = reply.send(message);
            }
        })?;
    Ok(WorkerHandle { tx, join })
}

fn run_job(interp: &mut Interp, env: &Env, props: Vec<(String, WireValue)>) -> Reply {
    match execute(interp, env, props) {
        Ok(wire) => Reply::Success(wire),
        Err(err) => Reply::Error(JobError {
            message: err.to_string(),
        }),
    }
}

fn execute(
    interp: &mut Interp,
    env: &Env,
    props: Vec<(String, WireValue)>,
) -> Result<WireValue, RuntimeError> {
    let entry = env.lookup(ENTRY_BINDING).ok_or_else(|| {
        RuntimeError::new(
            crate::error::ErrorKind::WorkerTerminated,
            format!("worker entry binding `{ENTRY_BINDING}` missing"),
        )
    })?;
    let Value::Lambda(lambda) = entry else {
        return Err(RuntimeError::type_error(
            "worker entry binding is not a function",
        ));
    };

    // Rehydrate the payload: shadows of registered primitives come back as
    // live shells over the snapshot's buffers.
    let bindings: Vec<(String, Value)> = props
        .into_iter()
        .map(|(name, wire)| (name, from_wire(wire)))
        .collect();

    let result = interp.call_entry(&lambda, bindings)?;

    let transfer = collect_transferables(&result);
    to_wire(&result, &transfer)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// End-to-end worker bootstrap without the dispatch layer: write an
    /// entry file by hand, spawn the worker, send one job.
    #[test]
    fn worker_runs_entry_with_props() {
        let dir = tempfile::tempdir().expect("tempdir");
        let entry_path = dir.path().join("entry.strand");
        std::fs::write(
            &entry_path,
            "let base = 30;\n\
             // synthetic entry for tests\n\
             let __strand_entry = fn () { return base + n; };\n",
        )
        .expect("write entry");

        let digest = "test-digest".to_string();
        let id = pool::allocate_entry_id();
        let handle = spawn_worker(entry_path.clone(), entry_path.clone(), digest, id)
            .expect("spawn worker");

        let (reply_tx, reply_rx) = channel();
        handle
            .tx
            .send(Job {
                props: vec![("n".into(), WireValue::Int(12))],
                global_memory: Vec::new(),
                reply: reply_tx,
            })
            .expect("send job");

        match reply_rx.recv().expect("reply") {
            Reply::Success(WireValue::Int(v)) => assert_eq!(v, 42),
            other => panic!("unexpected reply: {other:?}"),
        }

        drop(handle.tx);
        handle.join.join().expect("worker exits");
        std::mem::forget(dir);
    }

    #[test]
    fn module_failure_reports_per_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let entry_path = dir.path().join("broken.strand");
        std::fs::write(&entry_path, "let x = missing_name;\n").expect("write entry");

        let id = pool::allocate_entry_id();
        let handle = spawn_worker(
            entry_path.clone(),
            entry_path.clone(),
            "broken-digest".into(),
            id,
        )
        .expect("spawn worker");

        let (reply_tx, reply_rx) = channel();
        handle
            .tx
            .send(Job {
                props: Vec::new(),
                global_memory: Vec::new(),
                reply: reply_tx,
            })
            .expect("send job");

        match reply_rx.recv().expect("reply") {
            Reply::Error(err) => assert!(err.message.contains("failed to load")),
            Reply::Success(_) => panic!("expected module failure"),
        }

        drop(handle.tx);
        handle.join.join().expect("worker exits");
        std::mem::forget(dir);
    }
}

//! The dispatch entry: from an evaluated bridge to a job in flight.
//!
//! Receives the raw capture object, filters the top-level candidates,
//! computes the worker signature, obtains or constructs a pooled worker
//! (generating its entry source on disk), posts exactly one job, and hands
//! back a task for the caller to await.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::channel;

use strand_capture::{load_source, rewrite_imports};

use crate::error::{ErrorKind, RuntimeError};
use crate::interp::Interp;
use crate::pool::{self, Signature, Ticket};
use crate::registry;
use crate::transfer::{collect_transferables, is_clonable, to_wire, WireValue};
use crate::value::{TaskVal, Value};
use crate::worker::{spawn_worker, Job, ENTRY_BINDING};

/// Name of the dispatch native; bridges are emitted against it.
pub const DISPATCH_NAME: &str = strand_capture::bridge::DISPATCH_SENTINEL;

/// Marker separating the copied caller module from the appended entry
/// template. When a generated entry is itself re-read as caller source
/// (recursive spawns), everything from the marker on is stripped before
/// the next template is appended.
pub const INJECTION_MARKER: &str = "// __strand_worker_entry__";

/// Directory under the working directory that holds generated entries.
pub const WORKERS_DIR: &str = ".workers";

/// A location-keyed shared primitive is rematerialized on the worker from
/// the registry, so its captured shell is dropped from the payload.
fn is_location_keyed(value: &Value) -> bool {
    match value {
        Value::Shared(cell) => cell.borrow().is_registered(),
        Value::Mutex(mutex) => mutex.state_cell().borrow().is_registered(),
        Value::Semaphore(sem) => sem.state_cell().borrow().is_registered(),
        _ => false,
    }
}

/// Filter, route, post: the whole caller side of one job. Returns a task
/// value resolved by `await`.
pub fn dispatch_entry(
    interp: &mut Interp,
    mut props: HashMap<String, Value>,
    top_levels: &[String],
    fn_text: &str,
    caller_path: &str,
    call_site_key: &str,
) -> Result<Value, RuntimeError> {
    // Filter top-level candidates: registered primitives come back via the
    // registry; non-replicable values are visible to the worker through
    // the module's own execution.
    for name in top_levels {
        let drop_candidate = props
            .get(name)
            .is_some_and(|value| is_location_keyed(value) || !is_clonable(value));
        if drop_candidate {
            props.remove(name);
        }
    }

    // Signature over the surviving names.
    let names: Vec<String> = props.keys().cloned().collect();
    let signature = Signature::new(call_site_key, names);
    let digest = signature.digest();

    // First idle worker, or construct one from generated source. Either
    // way the entry comes back busy with its idle timer cancelled.
    let ticket = match pool::acquire_idle(&digest) {
        Some(ticket) => ticket,
        None => construct_worker(interp, &digest, fn_text, caller_path)?,
    };

    // Collect transferables reachable from the payload.
    let props_value = Value::Object(Rc::new(RefCell::new(props)));
    let transfer = collect_transferables(&props_value);

    // Snapshot the shared-memory registry as this isolate sees it.
    let global_memory = registry::snapshot();

    // Exactly one job message; payload conversion moves the transferables.
    // Conversion failure must still release the entry.
    let wire_props = match to_wire(&props_value, &transfer) {
        Ok(WireValue::Object(fields)) => fields,
        Ok(_) => unreachable!("object payloads convert to object wire values"),
        Err(err) => {
            pool::release(&ticket.digest, ticket.id);
            return Err(err);
        }
    };

    let (reply_tx, reply_rx) = channel();
    let job = Job {
        props: wire_props,
        global_memory,
        reply: reply_tx,
    };
    if ticket.tx.send(job).is_err() {
        // The worker died before taking the job.
        pool::discard(&ticket.digest, ticket.id);
        return Err(RuntimeError::new(
            ErrorKind::WorkerTerminated,
            "worker exited before accepting the job",
        ));
    }

    // The caller awaits the task; the worker releases the pool entry when
    // it replies.
    Ok(Value::Task(Rc::new(TaskVal {
        rx: RefCell::new(Some(reply_rx)),
    })))
}

/// Build the generated entry source, write it under `.workers/`, and spawn
/// a worker thread over it.
fn construct_worker(
    interp: &Interp,
    digest: &str,
    fn_text: &str,
    caller_path: &str,
) -> Result<Ticket, RuntimeError> {
    let caller = PathBuf::from(caller_path);
    let entry_dir = std::env::current_dir()
        .map_err(io_err)?
        .join(WORKERS_DIR);
    std::fs::create_dir_all(&entry_dir).map_err(io_err)?;
    let entry_path = entry_dir.join(format!("{digest}.strand"));

    // Deterministic content: the file only needs writing once per
    // signature per working directory.
    if !entry_path.exists() {
        let source = generate_entry_source(&caller, fn_text)?;
        std::fs::write(&entry_path, source).map_err(io_err)?;
    }

    // Location keys inside the entry's module portion must match the
    // caller's: attribute them to the caller's own origin.
    let origin = match &interp.entry_alias {
        Some((entry, origin)) if *entry == caller => origin.clone(),
        _ => caller,
    };

    let id = pool::allocate_entry_id();
    let handle = spawn_worker(entry_path.clone(), origin, digest.to_string(), id)
        .map_err(io_err)?;
    Ok(pool::insert_busy(
        digest,
        id,
        handle.tx,
        handle.join,
        entry_path,
    ))
}

/// Rewritten caller module, truncated at the injection marker, with the
/// entry template substituted in. Line numbers of the module portion are
/// preserved exactly.
fn generate_entry_source(caller: &Path, fn_text: &str) -> Result<String, RuntimeError> {
    let src = load_source(caller)?;
    let rewritten = rewrite_imports(&src);
    let module_portion = match rewritten.find(INJECTION_MARKER) {
        Some(idx) => &rewritten[..idx],
        None => rewritten.as_str(),
    };
    Ok(format!(
        "{}\n{INJECTION_MARKER}\nlet {ENTRY_BINDING} = {fn_text};\n",
        module_portion.trim_end_matches('\n')
    ))
}

fn io_err(err: std::io::Error) -> RuntimeError {
    RuntimeError::new(ErrorKind::Io, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::MutexVal;
    use crate::shared::SharedBuf;

    #[test]
    fn location_keyed_detection_follows_registration() {
        let plain = Value::Shared(Rc::new(RefCell::new(SharedBuf::new(4))));
        assert!(!is_location_keyed(&plain));

        let buf = SharedBuf::new(4);
        registry::register("/dispatch-test/a.strand:1:1::state", &buf);
        let keyed = Value::Shared(Rc::new(RefCell::new(buf)));
        assert!(is_location_keyed(&keyed));

        let mutex = MutexVal::new();
        registry::register(
            "/dispatch-test/b.strand:2:2::state",
            &mutex.state_cell().borrow(),
        );
        assert!(is_location_keyed(&Value::Mutex(Rc::new(mutex))));
    }

    #[test]
    fn entry_source_truncates_previous_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let caller = dir.path().join("gen.strand");
        std::fs::write(
            &caller,
            format!(
                "let top = 1;\n{INJECTION_MARKER}\nlet {ENTRY_BINDING} = fn () {{ return top; }};\n"
            ),
        )
        .expect("write");

        let source =
            generate_entry_source(&caller, "fn () { return top + 1; }").expect("generate");
        assert_eq!(
            source.matches(INJECTION_MARKER).count(),
            1,
            "previous template stripped before appending"
        );
        assert!(source.contains("return top + 1;"));
        assert!(!source.contains("return top; "));
        std::mem::forget(dir);
    }

    #[test]
    fn entry_source_preserves_module_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let caller = dir.path().join("lines.strand");
        std::fs::write(&caller, "let a = 1;\nlet b = 2;\n").expect("write");
        let source = generate_entry_source(&caller, "fn () { return a; }").expect("generate");
        let lines: Vec<&str> = source.lines().collect();
        assert_eq!(lines[0], "let a = 1;");
        assert_eq!(lines[1], "let b = 2;");
        assert_eq!(lines[2], INJECTION_MARKER);
        std::mem::forget(dir);
    }
}

//! End-to-end spawn scenarios, driven through real script files.
//!
//! Each test writes a module to a tempdir and runs it as the host isolate;
//! the scripts assert their own invariants, so a failing property surfaces
//! as the script's assertion message.
//!
//! Module top-levels hold declarations only (they re-execute on every
//! worker provisioned for the module); the host-side logic lives in
//! `fn main()`, which worker isolates never invoke.

use strand_runtime::{ErrorKind, Isolate, RuntimeError};

fn run_script(name: &str, source: &str) -> Result<(), RuntimeError> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    std::fs::write(&path, source).expect("write script");
    let result = Isolate::new().run_file(&path);
    // The process-wide parse cache pins this path for the process
    // lifetime; keep the backing file around with it.
    std::mem::forget(dir);
    result
}

fn assert_runs(name: &str, source: &str) {
    if let Err(err) = run_script(name, source) {
        panic!("script {name} failed: {err}");
    }
}

#[test]
fn deep_clone_round_trip() {
    assert_runs(
        "deep_clone.strand",
        r#"
fn main() {
    let payload = {
        n: 123.45,
        s: "Hi",
        m: Map([["a", 10]]),
        set: Set(["x"]),
        arr: [1, 2, 3, { deep: true }],
        buf: Global(SharedBuf(4)),
    };

    let task = eval(spawn(fn () {
        assert_eq(payload.n, 123.45);
        assert_eq(payload.s, "Hi");
        assert_eq(payload.m.get("a"), 10);
        assert(payload.set.has("x"), "set member survives the clone");
        assert_eq(payload.arr[0], 1);
        assert_eq(payload.arr[2], 3);
        assert(payload.arr[3].deep, "nested object survives the clone");

        payload.m.set("a", 99);
        payload.arr[0] = 77;
        payload.buf[0] = 42;
        return "ok";
    }));
    assert_eq(await(task), "ok");

    // The shared buffer is the same memory; everything else was a copy.
    assert_eq(payload.buf[0], 42);
    assert_eq(payload.m.get("a"), 10);
    assert_eq(payload.arr[0], 1);
}
"#,
    );
}

#[test]
fn cross_isolate_mutex() {
    assert_runs(
        "cross_mutex.strand",
        r#"
let lock = Global(Mutex(SharedBuf(4)));

fn main() {
    let held = lock.lock();
    held.data()[0] = 1;

    let task = eval(spawn(fn () {
        sleep(50);
        let guard = lock.lock();
        let seen = guard.data()[0];
        guard.data()[0] = 2;
        guard.release();
        return seen;
    }));

    sleep(100);
    held.release();

    // The worker's acquisition happened after our release: it observed
    // the value written while we held the lock.
    assert_eq(await(task), 1);

    let reguard = lock.lock();
    assert_eq(reguard.data()[0], 2);
    reguard.release();
}
"#,
    );
}

#[test]
fn nested_spawn_preserves_identity() {
    assert_runs(
        "nested_identity.strand",
        r#"
let board = Global(SharedBuf(4));

fn main() {
    let outer = eval(spawn(fn () {
        board.store(0, 200);
        let inner = eval(spawn(fn () {
            assert_eq(board.load(0), 200);
            board.store(0, 300);
            return board.load(0);
        }));
        return await(inner);
    }));

    assert_eq(await(outer), 300);
    assert_eq(board.load(0), 300);
}
"#,
    );
}

#[test]
fn signal_gated_nested_lock() {
    assert_runs(
        "signal_gate.strand",
        r#"
let lock = Global(Mutex(SharedBuf(4)));
let signal = Global(SharedBuf(4));

fn main() {
    let held = lock.lock();
    held.data()[0] = 9;

    let outer = eval(spawn(fn () {
        let inner = eval(spawn(fn () {
            // Announce readiness, then contend on the lock.
            signal.store(0, 1);
            signal.notify(0);
            let guard = lock.lock();
            let seen = guard.data()[0];
            guard.data()[0] = 10;
            guard.release();
            return seen;
        }));
        return await(inner);
    }));

    // Wait for the grandchild's ready signal before releasing.
    signal.wait(0, 0);
    held.release();

    // The inner lock acquisition happened after our release.
    assert_eq(await(outer), 9);

    let reguard = lock.lock();
    assert_eq(reguard.data()[0], 10);
    reguard.release();
}
"#,
    );
}

#[test]
fn non_clonable_top_levels_are_filtered() {
    assert_runs(
        "filtering.strand",
        r#"
let helper = fn (x) { return x * 2; };
let base = 21;

fn main() {
    let task = eval(spawn(fn () {
        // `helper` was dropped from the capture (not replicable); the
        // worker sees it through its own module execution. `base` was
        // captured by value.
        return helper(base);
    }));
    assert_eq(await(task), 42);
}
"#,
    );
}

#[test]
fn captured_locals_from_enclosing_function() {
    assert_runs(
        "locals.strand",
        r#"
let top = 40;

fn launch(offset) {
    let bonus = offset + 1;
    return eval(spawn(fn () { return top + bonus; }));
}

fn main() {
    assert_eq(await(launch(1)), 42);
}
"#,
    );
}

#[test]
fn job_failure_rejects_await_and_releases_entry() {
    let err = run_script(
        "job_error.strand",
        r#"
fn main() {
    let task = eval(spawn(fn () {
        assert(false, "exploding on purpose");
        return 1;
    }));
    await(task);
}
"#,
    )
    .expect_err("await must reject");
    assert_eq!(err.kind, ErrorKind::JobFailed);
    assert!(err.message.contains("exploding on purpose"), "{err}");
}

#[test]
fn pool_entry_survives_job_failure() {
    assert_runs(
        "job_error_recovery.strand",
        r#"
let attempt = Global(SharedBuf(4));

fn tick() {
    return eval(spawn(fn () {
        attempt[0] = attempt[0] + 1;
        assert(attempt[0] != 1, "first attempt explodes");
        return attempt[0];
    }));
}

fn main() {
    let first = tick();
    // Wait until the first job has run (and failed) before re-spawning.
    while (attempt[0] == 0) {
        sleep(5);
    }
    // The entry was released on failure, so the same signature runs again.
    let second = tick();
    assert_eq(await(second), 2);
}
"#,
    );
}

#[test]
fn semaphore_across_isolates() {
    assert_runs(
        "semaphore.strand",
        r#"
let gate = Global(Semaphore(0));
let results = Global(SharedBuf(8));

fn main() {
    let task = eval(spawn(fn () {
        // Blocks until the host releases a permit.
        let permit = gate.acquire(1);
        results.store(0, results.load(1) + 3);
        permit.release();
        return gate.count();
    }));

    sleep(30);
    results.store(1, 39);
    gate.release(1);
    assert_eq(await(task), 1);
    assert_eq(results.load(0), 42);
}
"#,
    );
}

#[test]
fn sequential_spawns_share_worker_module_state() {
    assert_runs(
        "reuse.strand",
        r#"
let counter = Global(SharedBuf(4));

fn tick() {
    return eval(spawn(fn () {
        counter[0] = counter[0] + 1;
        return counter[0];
    }));
}

fn main() {
    assert_eq(await(tick()), 1);
    assert_eq(await(tick()), 2);
    assert_eq(await(tick()), 3);
}
"#,
    );
}

#[test]
fn buffer_method_surface() {
    assert_runs(
        "buffer_methods.strand",
        r#"
fn main() {
    let buf = SharedBuf(4);
    buf.set(0, 200);
    buf.set(3, 5);
    assert_eq(buf.get(0), 200);
    assert_eq(buf.get(3), 5);
    assert_eq(buf.len(), 4);

    let chunk = Bytes(2);
    chunk.set(1, 7);
    assert_eq(chunk.get(1), 7);
    assert_eq(chunk.get(0), 0);
    assert_eq(chunk.len(), 2);

    // Method and bracket forms address the same bytes.
    buf[1] = 9;
    assert_eq(buf.get(1), 9);
    chunk[0] = 3;
    assert_eq(chunk.get(0), 3);
}
"#,
    );
}

#[test]
fn spawn_without_resolvable_site_fails_synchronously() {
    // A spawn reached only through runtime-evaluated text resolves to the
    // eval call site, where no spawn(...) call exists in source.
    let err = run_script(
        "bad_spawn.strand",
        r#"
fn main() {
    eval("spawn(fn () { return 1; })");
}
"#,
    )
    .expect_err("eval'd spawn has no user frame");
    assert_eq!(err.kind, ErrorKind::Capture);
}

#[test]
fn transferred_bytes_detach_from_caller() {
    let err = run_script(
        "transfer_bytes.strand",
        r#"
fn main() {
    let chunk = Bytes(3);
    chunk[0] = 7;

    let task = eval(spawn(fn () {
        return chunk[0];
    }));
    assert_eq(await(task), 7);

    // Ownership moved with the job; this read must fail.
    chunk[0];
}
"#,
    )
    .expect_err("detached buffer read must fail");
    assert_eq!(err.kind, ErrorKind::DetachedBuffer);
}

#[test]
fn worker_sees_imported_modules_through_rewritten_specifiers() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("mathutil.strand"),
        "fn triple(x) { return x * 3; }\n",
    )
    .expect("write util");
    let main_path = dir.path().join("imports.strand");
    std::fs::write(
        &main_path,
        r#"
import { triple } from "./mathutil.strand";

fn main() {
    let task = eval(spawn(fn () {
        return triple(14);
    }));
    assert_eq(await(task), 42);
}
"#,
    )
    .expect("write main");

    Isolate::new()
        .run_file(&main_path)
        .expect("imported helper resolves on the worker");
    std::mem::forget(dir);
}

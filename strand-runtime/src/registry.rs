//! The shared-memory registry: location keys → backing buffers.
//!
//! A module-level shared primitive is constructed independently in every
//! isolate that executes the module. The registry is what makes those
//! constructions resolve to the *same* memory: the first construction binds
//! the primitive's buffers under a key derived from its construction site,
//! and every later construction — in this isolate or any other — rebinds
//! its freshly-allocated buffers to the registered ones.
//!
//! The process-wide map is append-only: once a key is bound its buffer
//! never changes for the lifetime of the process.
//!
//! Worker isolates do not read the process map directly during bootstrap.
//! They evaluate their entry module eagerly, before the first job delivers
//! the memory snapshot, so constructions that race ahead of the snapshot
//! park in a pending set and are reconciled when it arrives. After
//! bootstrap a worker acts like any other caller and falls through to the
//! process map (nested spawns).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use crate::shared::SharedBuf;

/// Sub-key for a primitive's own synchronization word(s).
pub const STATE_SUFFIX: &str = "::state";
/// Sub-key for the user payload buffer a primitive wraps.
pub const DATA_SUFFIX: &str = "::data";

static REGISTRY: LazyLock<RwLock<HashMap<String, SharedBuf>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// A buffer parked on a worker until the bootstrap snapshot arrives.
/// `cell` is the primitive shell's buffer slot; reconciliation overwrites
/// its contents in place.
struct Parked {
    key: String,
    cell: std::rc::Rc<RefCell<SharedBuf>>,
}

/// Hydration state for a worker isolate's thread.
struct Hydration {
    cache: HashMap<String, SharedBuf>,
    bootstrapped: bool,
    pending: Vec<Parked>,
}

thread_local! {
    static HYDRATION: RefCell<Option<Hydration>> = const { RefCell::new(None) };
}

/// A shell's buffer slot: rebindable in place so parked primitives can be
/// reconciled after construction.
pub type SharedCell = std::rc::Rc<RefCell<SharedBuf>>;

/// Bind `buf` under `key` in the process map, or return the buffer already
/// bound there. The bound buffer is marked registered either way.
pub fn register(key: &str, buf: &SharedBuf) -> SharedBuf {
    let mut map = REGISTRY
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let bound = map
        .entry(key.to_string())
        .or_insert_with(|| buf.clone())
        .clone();
    bound.mark_registered();
    bound
}

/// Look up a key in the process map.
#[must_use]
pub fn lookup(key: &str) -> Option<SharedBuf> {
    REGISTRY
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(key)
        .cloned()
}

/// Snapshot the registry as seen by the calling isolate: the worker-local
/// hydration cache merged over the process map. This is what a dispatch
/// sends alongside the props.
#[must_use]
pub fn snapshot() -> Vec<(String, SharedBuf)> {
    let mut merged: HashMap<String, SharedBuf> = REGISTRY
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    HYDRATION.with(|state| {
        if let Some(state) = state.borrow().as_ref() {
            for (key, buf) in &state.cache {
                merged.insert(key.clone(), buf.clone());
            }
        }
    });
    merged.into_iter().collect()
}

/// Number of bound keys in the process map.
#[must_use]
pub fn len() -> usize {
    REGISTRY
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .len()
}

// ── Worker-side hydration ───────────────────────────────────────────────

/// Mark the calling thread as a worker isolate awaiting its bootstrap
/// snapshot. Location-keyed constructions on this thread will consult the
/// hydration cache and park on misses until [`apply_snapshot`] runs.
pub fn begin_worker_hydration() {
    HYDRATION.with(|state| {
        *state.borrow_mut() = Some(Hydration {
            cache: HashMap::new(),
            bootstrapped: false,
            pending: Vec::new(),
        });
    });
}

/// Whether the calling thread is a worker isolate.
#[must_use]
pub fn is_worker_isolate() -> bool {
    HYDRATION.with(|state| state.borrow().is_some())
}

/// Feed a memory snapshot into the worker-local cache, then reconcile every
/// parked primitive: buffers whose key arrived are rebound to the
/// registered memory; buffers whose key did not arrive are new sites first
/// constructed on this worker and are promoted into the process map.
pub fn apply_snapshot(entries: Vec<(String, SharedBuf)>) {
    HYDRATION.with(|state| {
        let mut state = state.borrow_mut();
        let Some(state) = state.as_mut() else {
            // Not a worker isolate; nothing to hydrate.
            return;
        };
        for (key, buf) in entries {
            state.cache.entry(key).or_insert(buf);
        }
        state.bootstrapped = true;
        for parked in state.pending.drain(..) {
            let bound = match state.cache.get(&parked.key) {
                Some(cached) => cached.clone(),
                None => register(&parked.key, &parked.cell.borrow()),
            };
            *parked.cell.borrow_mut() = bound;
        }
    });
}

/// Resolve `key` for a location-keyed construction on the calling thread,
/// binding `cell`'s current buffer when the key is unbound.
///
/// - Host isolates go straight to the process map.
/// - Worker isolates consult the hydration cache; before bootstrap a miss
///   parks the cell for reconciliation, after bootstrap it falls through to
///   the process map.
pub fn resolve(key: &str, cell: &SharedCell) -> SharedBuf {
    let hydrated = HYDRATION.with(|state| {
        let mut state = state.borrow_mut();
        let Some(state) = state.as_mut() else {
            return None; // host isolate
        };
        if let Some(cached) = state.cache.get(key) {
            return Some(cached.clone());
        }
        if !state.bootstrapped {
            state.pending.push(Parked {
                key: key.to_string(),
                cell: std::rc::Rc::clone(cell),
            });
            // Keep the locally-allocated buffer until reconciliation.
            return Some(cell.borrow().clone());
        }
        None // bootstrapped worker: fall through to the process map
    });
    match hydrated {
        Some(buf) => buf,
        None => register(key, &cell.borrow()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn cell(len: usize) -> SharedCell {
        Rc::new(RefCell::new(SharedBuf::new(len)))
    }

    #[test]
    fn register_is_first_binding_wins() {
        let a = SharedBuf::new(4);
        let b = SharedBuf::new(4);
        let key = "/reg-test/a.strand:1:1::state";
        let bound_a = register(key, &a);
        let bound_b = register(key, &b);
        assert!(bound_a.same(&a));
        assert!(bound_b.same(&a));
        assert!(a.is_registered());
        assert!(lookup(key).expect("bound").same(&a));
    }

    #[test]
    fn host_resolve_rebinds_to_registered() {
        let key = "/reg-test/b.strand:2:5::state";
        let first = cell(4);
        let resolved_first = resolve(key, &first);
        resolved_first.store(0, 7);

        let second = cell(4);
        let resolved_second = resolve(key, &second);
        assert!(resolved_second.same(&resolved_first));
        assert_eq!(resolved_second.load(0), Some(7));
    }

    #[test]
    fn worker_parks_until_snapshot() {
        let key = "/reg-test/c.strand:3:1::state";
        let host_buf = SharedBuf::new(4);
        host_buf.store(0, 41);
        let registered = register(key, &host_buf);

        std::thread::spawn({
            let registered = registered.clone();
            move || {
                begin_worker_hydration();
                assert!(is_worker_isolate());

                // Construction races ahead of the snapshot: parked.
                let shell = cell(4);
                let resolved = resolve(key, &shell);
                assert!(!resolved.same(&registered), "still the local buffer");

                apply_snapshot(vec![(key.to_string(), registered.clone())]);
                assert!(shell.borrow().same(&registered), "reconciled in place");
                assert_eq!(shell.borrow().load(0), Some(41));
            }
        })
        .join()
        .expect("worker thread");
    }

    #[test]
    fn worker_after_bootstrap_falls_through_to_process_map() {
        let key = "/reg-test/d.strand:9:9::state";
        std::thread::spawn(move || {
            begin_worker_hydration();
            apply_snapshot(Vec::new());

            let shell = cell(4);
            let resolved = resolve(key, &shell);
            // New site first constructed on the worker: promoted globally.
            assert!(lookup(key).expect("promoted").same(&resolved));
        })
        .join()
        .expect("worker thread");
    }

    #[test]
    fn unreconciled_parked_sites_are_promoted() {
        let key = "/reg-test/e.strand:4:2::state";
        std::thread::spawn(move || {
            begin_worker_hydration();
            let shell = cell(4);
            let local = resolve(key, &shell);
            // Snapshot does not carry this key.
            apply_snapshot(Vec::new());
            assert!(shell.borrow().same(&local));
            assert!(lookup(key).expect("promoted").same(&local));
        })
        .join()
        .expect("worker thread");
    }

    #[test]
    fn snapshot_merges_cache_over_process_map() {
        let process_key = "/reg-test/f.strand:1:1::state";
        register(process_key, &SharedBuf::new(4));
        std::thread::spawn(move || {
            begin_worker_hydration();
            let cached = SharedBuf::new(4);
            apply_snapshot(vec![("/reg-test/worker-only:1:1::state".into(), cached)]);
            let snap = snapshot();
            let keys: Vec<&str> = snap.iter().map(|(k, _)| k.as_str()).collect();
            assert!(keys.contains(&process_key));
            assert!(keys.contains(&"/reg-test/worker-only:1:1::state"));
        })
        .join()
        .expect("worker thread");
    }
}

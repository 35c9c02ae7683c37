//! Per-signature worker pool.
//!
//! Workers are keyed by their signature (call-site key + sorted surviving
//! capture names) because the generated entry source depends on nothing
//! else: any idle worker of the same signature can take the next job.
//! Selection is first-idle; a worker that finishes a job arms an
//! inactivity timer and is terminated by the reaper when it fires.
//!
//! A process-wide active count backs a soft warning when the pool grows
//! past 4× the reported hardware concurrency. There is no hard cap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{LazyLock, Mutex, Once};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::worker::Job;

/// Default inactivity window before an idle worker is evicted.
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// How often the reaper rescans for expired entries.
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// A worker signature: the spawn call site plus the sorted names that
/// survived capture filtering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub call_site_key: String,
    pub names: Vec<String>,
}

impl Signature {
    /// Build a signature; `names` is sorted here so equal sets compare
    /// equal regardless of capture order.
    #[must_use]
    pub fn new(call_site_key: impl Into<String>, mut names: Vec<String>) -> Self {
        names.sort();
        Self {
            call_site_key: call_site_key.into(),
            names,
        }
    }

    /// 128-bit digest of the signature, hex-encoded. Names the generated
    /// entry file, so it must be deterministic across processes.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.call_site_key.as_bytes());
        for name in &self.names {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
        }
        let full = hasher.finalize();
        full[..16].iter().map(|b| format!("{b:02x}")).collect()
    }
}

struct PoolEntry {
    id: u64,
    tx: Sender<Job>,
    join: Option<JoinHandle<()>>,
    busy: bool,
    idle_deadline: Option<Instant>,
    #[allow(dead_code)] // diagnostic: which generated entry backs this worker
    entry_path: PathBuf,
}

static POOLS: LazyLock<Mutex<HashMap<String, Vec<PoolEntry>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static ACTIVE_WORKERS: AtomicU64 = AtomicU64::new(0);
static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Idle timeout in ms; overridable via `STRAND_IDLE_TIMEOUT_MS` (read
/// once) or [`set_idle_timeout`].
static IDLE_TIMEOUT_MS: LazyLock<AtomicU64> = LazyLock::new(|| {
    let default = DEFAULT_IDLE_TIMEOUT_MS;
    let ms = match std::env::var("STRAND_IDLE_TIMEOUT_MS") {
        Ok(val) => match val.parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!("STRAND_IDLE_TIMEOUT_MS={val} is invalid, using default");
                default
            }
        },
        Err(_) => default,
    };
    AtomicU64::new(ms)
});

static REAPER: Once = Once::new();

fn lock_pools() -> std::sync::MutexGuard<'static, HashMap<String, Vec<PoolEntry>>> {
    POOLS.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Current idle-eviction timeout.
#[must_use]
pub fn idle_timeout() -> Duration {
    Duration::from_millis(IDLE_TIMEOUT_MS.load(Ordering::Relaxed))
}

/// Override the idle-eviction timeout for subsequent releases.
pub fn set_idle_timeout(timeout: Duration) {
    let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
    IDLE_TIMEOUT_MS.store(ms, Ordering::Relaxed);
}

/// Number of live workers across all signatures.
#[must_use]
pub fn active_worker_count() -> u64 {
    ACTIVE_WORKERS.load(Ordering::Relaxed)
}

/// Number of pool entries for one signature digest.
#[must_use]
pub fn entry_count(digest: &str) -> usize {
    lock_pools().get(digest).map_or(0, Vec::len)
}

/// Allocate the id a worker is spawned under; the worker reports job
/// completion back through it.
#[must_use]
pub fn allocate_entry_id() -> u64 {
    NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed)
}

/// A checked-out pool entry, ready to receive exactly one job.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub digest: String,
    pub id: u64,
    pub tx: Sender<Job>,
}

/// Check out the first idle entry for `digest`, marking it busy and
/// cancelling its idle timer.
#[must_use]
pub fn acquire_idle(digest: &str) -> Option<Ticket> {
    let mut pools = lock_pools();
    let entries = pools.get_mut(digest)?;
    let entry = entries.iter_mut().find(|e| !e.busy)?;
    entry.busy = true;
    entry.idle_deadline = None;
    Some(Ticket {
        digest: digest.to_string(),
        id: entry.id,
        tx: entry.tx.clone(),
    })
}

/// Register a freshly constructed worker as a busy entry. Bumps the active
/// count and emits the soft-threshold warning.
pub fn insert_busy(
    digest: &str,
    id: u64,
    tx: Sender<Job>,
    join: JoinHandle<()>,
    entry_path: PathBuf,
) -> Ticket {
    start_reaper();
    let active = ACTIVE_WORKERS.fetch_add(1, Ordering::Relaxed) + 1;
    let threshold = 4 * std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get) as u64;
    if active > threshold {
        tracing::warn!(
            active,
            threshold,
            "worker count exceeds 4x hardware concurrency"
        );
    }
    tracing::debug!(digest, id, path = %entry_path.display(), "worker spawned");

    let mut pools = lock_pools();
    pools.entry(digest.to_string()).or_default().push(PoolEntry {
        id,
        tx: tx.clone(),
        join: Some(join),
        busy: true,
        idle_deadline: None,
        entry_path,
    });
    Ticket {
        digest: digest.to_string(),
        id,
        tx,
    }
}

/// Return an entry to the idle state and arm its eviction timer. Called by
/// the worker itself after every reply, so entries are released even when
/// the job failed. Unknown ids (already shut down) are ignored.
pub fn release(digest: &str, id: u64) {
    let mut pools = lock_pools();
    if let Some(entry) = pools
        .get_mut(digest)
        .and_then(|entries| entries.iter_mut().find(|e| e.id == id))
    {
        entry.busy = false;
        entry.idle_deadline = Some(Instant::now() + idle_timeout());
    }
}

/// Drop an entry whose worker died before taking its job.
pub fn discard(digest: &str, id: u64) {
    let mut joins = Vec::new();
    {
        let mut pools = lock_pools();
        if let Some(entries) = pools.get_mut(digest) {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                let mut entry = entries.remove(pos);
                ACTIVE_WORKERS.fetch_sub(1, Ordering::Relaxed);
                if let Some(join) = entry.join.take() {
                    joins.push(join);
                }
            }
            if entries.is_empty() {
                pools.remove(digest);
            }
        }
    }
    for join in joins {
        let _ = join.join();
    }
}

/// Terminate every pooled worker and reset counters. Idle workers are
/// joined; busy workers are detached and finish their current job on their
/// own time. In-flight awaits observe a terminated-worker rejection only
/// if their worker exits without replying.
pub fn shutdown() {
    let mut joins = Vec::new();
    {
        let mut pools = lock_pools();
        for (_, entries) in pools.drain() {
            for mut entry in entries {
                // Dropping the sender ends the worker's receive loop.
                if !entry.busy {
                    if let Some(join) = entry.join.take() {
                        joins.push(join);
                    }
                }
            }
        }
        ACTIVE_WORKERS.store(0, Ordering::Relaxed);
    }
    for join in joins {
        let _ = join.join();
    }
    tracing::debug!("worker pool shut down");
}

fn start_reaper() {
    REAPER.call_once(|| {
        std::thread::Builder::new()
            .name("strand-pool-reaper".into())
            .spawn(|| loop {
                std::thread::sleep(REAP_INTERVAL);
                reap_expired();
            })
            .expect("failed to spawn pool reaper");
    });
}

fn reap_expired() {
    let now = Instant::now();
    let mut joins = Vec::new();
    {
        let mut pools = lock_pools();
        pools.retain(|digest, entries| {
            entries.retain_mut(|entry| {
                let expired = !entry.busy
                    && entry
                        .idle_deadline
                        .is_some_and(|deadline| deadline <= now);
                if expired {
                    ACTIVE_WORKERS.fetch_sub(1, Ordering::Relaxed);
                    tracing::debug!(digest = %digest, id = entry.id, "idle worker evicted");
                    if let Some(join) = entry.join.take() {
                        joins.push(join);
                    }
                }
                !expired
            });
            !entries.is_empty()
        });
    }
    // Joining outside the lock: eviction drops the sender, the worker's
    // receive loop ends, and idle workers exit promptly.
    for join in joins {
        let _ = join.join();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_sorts_names() {
        let a = Signature::new("/m.strand:1:1", vec!["b".into(), "a".into()]);
        let b = Signature::new("/m.strand:1:1", vec!["a".into(), "b".into()]);
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_is_stable_and_distinguishes() {
        let a = Signature::new("/m.strand:1:1", vec!["x".into()]);
        assert_eq!(a.digest(), a.digest());
        assert_eq!(a.digest().len(), 32);
        let b = Signature::new("/m.strand:1:1", vec!["y".into()]);
        assert_ne!(a.digest(), b.digest());
        let c = Signature::new("/m.strand:2:1", vec!["x".into()]);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn digest_avoids_name_concat_collisions() {
        let a = Signature::new("k", vec!["ab".into(), "c".into()]);
        let b = Signature::new("k", vec!["a".into(), "bc".into()]);
        assert_ne!(a.digest(), b.digest());
    }
}

//! Shared byte buffers with atomic word access and futex-style parking.
//!
//! A [`SharedBuf`] is the one kind of memory that crosses isolates by
//! identity instead of by copy: cloning the handle clones an `Arc`, so every
//! isolate holding it sees the same words. All mutation is sequentially
//! consistent; waiting is built from a per-buffer `Mutex`/`Condvar` pair the
//! same way the runtime's semaphore traditionally parks (check the word
//! under the lock, wait, recheck on wake).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct BufInner {
    /// Backing storage, one atomic per 32-bit word (little-endian bytes).
    words: Box<[AtomicU32]>,
    /// Byte length as requested at construction.
    len: usize,
    /// Set once the buffer is bound into the shared-memory registry.
    registered: AtomicBool,
    /// Parking lot for `wait`/`notify`. One pair per buffer; woken waiters
    /// recheck their own word.
    park: Mutex<()>,
    cond: Condvar,
}

/// A shared byte buffer handle. Cheap to clone; clones alias the same
/// memory across isolates.
#[derive(Clone)]
pub struct SharedBuf {
    inner: Arc<BufInner>,
}

impl std::fmt::Debug for SharedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuf")
            .field("len", &self.inner.len)
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

impl SharedBuf {
    /// Allocate a zeroed buffer of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(4);
        let words = (0..word_count).map(|_| AtomicU32::new(0)).collect();
        Self {
            inner: Arc::new(BufInner {
                words,
                len,
                registered: AtomicBool::new(false),
                park: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Byte length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Whether both handles alias the same backing memory.
    #[must_use]
    pub fn same(&self, other: &SharedBuf) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether this buffer has been bound into the shared-memory registry.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::Acquire)
    }

    pub(crate) fn mark_registered(&self) {
        self.inner.registered.store(true, Ordering::Release);
    }

    fn word(&self, index: usize) -> Option<&AtomicU32> {
        self.inner.words.get(index)
    }

    // ── Byte access ───────────────────────────────────────────────────

    /// Read the byte at `offset`. `None` when out of range.
    #[must_use]
    pub fn get_byte(&self, offset: usize) -> Option<u8> {
        if offset >= self.inner.len {
            return None;
        }
        let word = self.word(offset / 4)?.load(Ordering::SeqCst);
        Some((word >> ((offset % 4) * 8)) as u8)
    }

    /// Write the byte at `offset` via a read-modify-write on its word.
    /// Returns false when out of range.
    pub fn set_byte(&self, offset: usize, value: u8) -> bool {
        if offset >= self.inner.len {
            return false;
        }
        let Some(word) = self.word(offset / 4) else {
            return false;
        };
        let shift = (offset % 4) * 8;
        let mask = !(0xFFu32 << shift);
        let mut current = word.load(Ordering::SeqCst);
        loop {
            let next = (current & mask) | (u32::from(value) << shift);
            match word.compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    // ── Word access ───────────────────────────────────────────────────

    /// Number of addressable 32-bit words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.inner.words.len()
    }

    /// Atomically load word `index` (interpreted as signed).
    #[must_use]
    pub fn load(&self, index: usize) -> Option<i32> {
        Some(self.word(index)?.load(Ordering::SeqCst) as i32)
    }

    /// Atomically store `value` into word `index`.
    pub fn store(&self, index: usize, value: i32) -> bool {
        match self.word(index) {
            Some(word) => {
                word.store(value as u32, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Compare-exchange on word `index`. Returns `Ok(())` on success and
    /// `Err(observed)` on failure or out-of-range.
    pub fn compare_exchange(&self, index: usize, expected: i32, new: i32) -> Result<(), i32> {
        let Some(word) = self.word(index) else {
            return Err(0);
        };
        word.compare_exchange(
            expected as u32,
            new as u32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .map(|_| ())
        .map_err(|observed| observed as i32)
    }

    /// Atomic add on word `index`; returns the previous value.
    pub fn fetch_add(&self, index: usize, delta: i32) -> Option<i32> {
        Some(self.word(index)?.fetch_add(delta as u32, Ordering::SeqCst) as i32)
    }

    // ── Wait / notify ─────────────────────────────────────────────────

    /// Park the calling thread while word `index` still holds `expected`.
    /// Returns immediately if the word already differs. Spurious wakeups do
    /// not escape: the word is rechecked under the parking lock.
    pub fn wait(&self, index: usize, expected: i32) {
        let mut guard = self
            .inner
            .park
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while self.load(index) == Some(expected) {
            guard = self
                .inner
                .cond
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// [`SharedBuf::wait`] with a timeout. Returns false if the timeout
    /// elapsed while the word still held `expected`.
    pub fn wait_timeout(&self, index: usize, expected: i32, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self
            .inner
            .park
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while self.load(index) == Some(expected) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next, result) = self
                .inner
                .cond
                .wait_timeout(guard, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard = next;
            if result.timed_out() && self.load(index) == Some(expected) {
                return false;
            }
        }
        true
    }

    /// Wake one parked waiter. Only meaningful on buffers where all waiters
    /// park on the same word (the mutex state word); elsewhere use
    /// [`SharedBuf::notify_all`].
    pub fn notify_one(&self) {
        let _guard = self
            .inner
            .park
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.inner.cond.notify_one();
    }

    /// Wake every parked waiter; each rechecks its word.
    pub fn notify_all(&self) {
        let _guard = self
            .inner
            .park
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.inner.cond.notify_all();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

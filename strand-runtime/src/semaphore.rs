//! Cross-isolate counting semaphore over a shared permit word.
//!
//! One signed 32-bit word of available permits. Acquire loops
//! read → compare-exchange-down, parking on the observed value when short;
//! release is an atomic add followed by a wake-all (no fairness — woken
//! waiters race). Releasing more than was acquired is allowed and may push
//! the count above its initial value; that is the user's contract.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::registry::SharedCell;
use crate::shared::SharedBuf;

/// Per-isolate semaphore shell around the shared permit word.
#[derive(Debug)]
pub struct SemaphoreVal {
    state: SharedCell,
}

impl SemaphoreVal {
    /// A semaphore with `initial` permits available.
    #[must_use]
    pub fn new(initial: i32) -> Self {
        let buf = SharedBuf::new(4);
        buf.store(0, initial);
        Self {
            state: Rc::new(RefCell::new(buf)),
        }
    }

    /// Rebuild a shell around a permit word that crossed an isolate
    /// boundary.
    #[must_use]
    pub fn from_state(state: SharedBuf) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// The permit-word buffer slot (for registration and wire transfer).
    #[must_use]
    pub fn state_cell(&self) -> &SharedCell {
        &self.state
    }

    /// Current permit count — a racy snapshot.
    #[must_use]
    pub fn count(&self) -> i32 {
        self.state.borrow().load(0).unwrap_or(0)
    }

    /// Acquire `n` permits, parking until enough are available. Returns a
    /// one-shot token that releases them.
    #[must_use = "dropping the permit releases it immediately"]
    pub fn acquire(&self, n: i32) -> PermitVal {
        let state = self.state.borrow().clone();
        loop {
            let observed = state.load(0).unwrap_or(0);
            if observed >= n {
                if state.compare_exchange(0, observed, observed - n).is_ok() {
                    return PermitVal {
                        state,
                        n,
                        released: Cell::new(false),
                    };
                }
                // Lost the race; re-read.
                continue;
            }
            state.wait(0, observed);
        }
    }

    /// Non-blocking acquire attempt.
    #[must_use]
    pub fn try_acquire(&self, n: i32) -> Option<PermitVal> {
        let state = self.state.borrow().clone();
        loop {
            let observed = state.load(0).unwrap_or(0);
            if observed < n {
                return None;
            }
            if state.compare_exchange(0, observed, observed - n).is_ok() {
                return Some(PermitVal {
                    state,
                    n,
                    released: Cell::new(false),
                });
            }
        }
    }

    /// Return `n` permits and wake all waiters.
    pub fn release(&self, n: i32) {
        let state = self.state.borrow().clone();
        release_permits(&state, n);
    }
}

fn release_permits(state: &SharedBuf, n: i32) {
    state.fetch_add(0, n);
    state.notify_all();
}

/// One-shot token for acquired permits. Explicit [`PermitVal::release`] and
/// drop both return the permits; re-release is a no-op.
#[derive(Debug)]
pub struct PermitVal {
    state: SharedBuf,
    n: i32,
    released: Cell<bool>,
}

impl PermitVal {
    /// How many permits this token holds.
    #[must_use]
    pub fn permits(&self) -> i32 {
        self.n
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    /// Return the permits. Idempotent.
    pub fn release(&self) {
        if !self.released.replace(true) {
            release_permits(&self.state, self.n);
        }
    }
}

impl Drop for PermitVal {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_release_basic() {
        let sem = SemaphoreVal::new(2);
        let first = sem.acquire(1);
        assert_eq!(sem.count(), 1);
        let second = sem.acquire(1);
        assert_eq!(sem.count(), 0);
        first.release();
        assert_eq!(sem.count(), 1);
        second.release();
        assert_eq!(sem.count(), 2);
    }

    #[test]
    fn try_acquire_succeeds_and_fails() {
        let sem = SemaphoreVal::new(1);
        let permit = sem.try_acquire(1).expect("available");
        assert!(sem.try_acquire(1).is_none());
        permit.release();
        assert!(sem.try_acquire(1).is_some());
    }

    #[test]
    fn multi_permit_acquire_waits_for_enough() {
        let sem = SemaphoreVal::new(1);
        assert!(sem.try_acquire(2).is_none());
        sem.release(1);
        let permit = sem.try_acquire(2).expect("two available");
        assert_eq!(permit.permits(), 2);
    }

    #[test]
    fn permit_release_is_idempotent() {
        let sem = SemaphoreVal::new(1);
        let permit = sem.acquire(1);
        permit.release();
        permit.release();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn drop_returns_permits() {
        let sem = SemaphoreVal::new(3);
        {
            let _permit = sem.acquire(2);
            assert_eq!(sem.count(), 1);
        }
        assert_eq!(sem.count(), 3);
    }

    #[test]
    fn over_release_exceeds_initial_count() {
        let sem = SemaphoreVal::new(0);
        sem.release(5);
        assert_eq!(sem.count(), 5);
    }

    #[test]
    fn conservation_across_threads() {
        // permits_final = permits_initial + releases − acquires, at rest.
        let word = SharedBuf::new(4);
        word.store(0, 0);

        let producer = {
            let word = word.clone();
            thread::spawn(move || {
                let sem = SemaphoreVal::from_state(word);
                for _ in 0..50 {
                    sem.release(1);
                }
            })
        };
        let consumer = {
            let word = word.clone();
            thread::spawn(move || {
                let sem = SemaphoreVal::from_state(word);
                for _ in 0..50 {
                    let permit = sem.acquire(1);
                    // The permits are consumed, not returned.
                    permit.released.set(true);
                }
            })
        };

        producer.join().expect("producer");
        consumer.join().expect("consumer");
        let sem = SemaphoreVal::from_state(word);
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn waiter_wakes_on_release() {
        let word = SharedBuf::new(4);
        word.store(0, 0);
        let waiter = {
            let word = word.clone();
            thread::spawn(move || {
                let sem = SemaphoreVal::from_state(word);
                let permit = sem.acquire(1);
                permit.released.set(true); // consume
            })
        };
        thread::sleep(Duration::from_millis(20));
        SemaphoreVal::from_state(word).release(1);
        waiter.join().expect("waiter");
    }
}

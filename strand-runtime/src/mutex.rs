//! Cross-isolate mutex over a shared state word.
//!
//! The entire lock state is one 32-bit word in a [`SharedBuf`]: 0 unlocked,
//! 1 locked. Isolates that constructed their shell independently contend on
//! the same word because the registry rebinds every shell to the same
//! backing buffer.
//!
//! Not reentrant: an isolate taking its own lock twice deadlocks.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{ErrorKind, RuntimeError};
use crate::registry::SharedCell;
use crate::shared::SharedBuf;

const UNLOCKED: i32 = 0;
const LOCKED: i32 = 1;

/// Per-isolate mutex shell. The shell is plain data; all synchronization
/// lives in the shared state word.
#[derive(Debug)]
pub struct MutexVal {
    state: SharedCell,
    data: Option<SharedCell>,
}

impl MutexVal {
    /// A mutex protecting nothing but its own word.
    #[must_use]
    pub fn new() -> Self {
        Self::with_data(None)
    }

    /// A mutex wrapping `data` as its protected user buffer.
    #[must_use]
    pub fn with_data(data: Option<SharedBuf>) -> Self {
        Self {
            state: Rc::new(RefCell::new(SharedBuf::new(4))),
            data: data.map(|buf| Rc::new(RefCell::new(buf))),
        }
    }

    /// Rebuild a shell around buffers that crossed an isolate boundary.
    #[must_use]
    pub fn from_parts(state: SharedBuf, data: Option<SharedBuf>) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
            data: data.map(|buf| Rc::new(RefCell::new(buf))),
        }
    }

    /// The state-word buffer slot (for registration and wire transfer).
    #[must_use]
    pub fn state_cell(&self) -> &SharedCell {
        &self.state
    }

    /// The protected-data buffer slot, if any.
    #[must_use]
    pub fn data_cell(&self) -> Option<&SharedCell> {
        self.data.as_ref()
    }

    /// Snapshot of the protected data buffer.
    #[must_use]
    pub fn data(&self) -> Option<SharedBuf> {
        self.data.as_ref().map(|cell| cell.borrow().clone())
    }

    /// Acquire the lock, parking on the state word while it is held
    /// elsewhere. Returns a one-shot guard.
    #[must_use = "dropping the guard releases the lock immediately"]
    pub fn lock(&self) -> GuardVal {
        let state = self.state.borrow().clone();
        loop {
            if state.compare_exchange(0, UNLOCKED, LOCKED).is_ok() {
                return GuardVal {
                    state,
                    data: self.data(),
                    released: Cell::new(false),
                };
            }
            state.wait(0, LOCKED);
        }
    }

    /// Non-blocking acquire attempt.
    #[must_use]
    pub fn try_lock(&self) -> Option<GuardVal> {
        let state = self.state.borrow().clone();
        state
            .compare_exchange(0, UNLOCKED, LOCKED)
            .ok()
            .map(|()| GuardVal {
                state,
                data: self.data(),
                released: Cell::new(false),
            })
    }
}

impl Default for MutexVal {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot token for a held lock. Explicit [`GuardVal::release`] and drop
/// both release; re-release is a no-op.
#[derive(Debug)]
pub struct GuardVal {
    state: SharedBuf,
    data: Option<SharedBuf>,
    released: Cell<bool>,
}

impl GuardVal {
    /// The protected buffer, while the guard is live.
    #[must_use]
    pub fn data(&self) -> Option<SharedBuf> {
        self.data.clone()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    /// Release the lock and wake one waiter. Idempotent.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvariantViolation`] if the state word was not locked —
    /// the word was tampered with out from under a live guard.
    pub fn release(&self) -> Result<(), RuntimeError> {
        if self.released.replace(true) {
            return Ok(());
        }
        release_word(&self.state)
    }
}

impl Drop for GuardVal {
    fn drop(&mut self) {
        if !self.released.replace(true) {
            // Scoped release; a tampered word has nowhere to report here.
            let _ = release_word(&self.state);
        }
    }
}

fn release_word(state: &SharedBuf) -> Result<(), RuntimeError> {
    if state.compare_exchange(0, LOCKED, UNLOCKED).is_err() {
        return Err(RuntimeError::new(
            ErrorKind::InvariantViolation,
            "releasing a mutex that is not locked",
        ));
    }
    state.notify_one();
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────

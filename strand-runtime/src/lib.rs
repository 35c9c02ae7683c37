//! Strand runtime: closure-spawning concurrency for multi-isolate scripts.
//!
//! `spawn(fn () { ... })` in a Strand script executes the inline lambda in
//! a freshly provisioned worker isolate, with the free variables of its
//! enclosing lexical scope captured by static analysis, serialized, and
//! delivered to the worker — while module-level shared primitives
//! (`Global(Mutex(...))`, `Global(Semaphore(...))`, `Global(SharedBuf(...))`)
//! keep their identity across every isolate through the location-keyed
//! shared-memory registry.
//!
//! ```text
//! let state = Global(Mutex(SharedBuf(4)));
//! let n = 41;
//! let task = eval(spawn(fn () {
//!     let guard = state.lock();
//!     guard.data()[0] = 1;
//!     guard.release();
//!     return n + 1;
//! }));
//! assert_eq(await(task), 42);
//! ```
//!
//! The static half of the pipeline (call-site location, scope analysis,
//! import rewriting, bridge emission) lives in `strand-capture`; this crate
//! holds the evaluator, the worker pool and protocol, and the shared-memory
//! primitives.

pub mod dispatch;
pub mod error;
pub mod interp;
pub mod isolate;
pub mod mutex;
pub mod natives;
pub mod pool;
pub mod registry;
pub mod semaphore;
pub mod shared;
pub mod transfer;
pub mod value;
pub mod worker;

pub use error::{ErrorKind, RuntimeError};
pub use isolate::{shutdown, Isolate};
pub use mutex::{GuardVal, MutexVal};
pub use semaphore::{PermitVal, SemaphoreVal};
pub use shared::SharedBuf;
pub use value::Value;

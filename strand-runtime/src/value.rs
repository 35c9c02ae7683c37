//! Runtime values.
//!
//! Values are per-isolate shells: aggregates are `Rc`-shared within their
//! isolate and never cross a thread boundary as-is — crossing goes through
//! the wire form in [`crate::transfer`], which deep-copies plain data and
//! passes shared buffers by identity.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::interp::{Env, NativeFn, SourceCtx};
use crate::mutex::{GuardVal, MutexVal};
use crate::registry::SharedCell;
use crate::semaphore::{PermitVal, SemaphoreVal};
use crate::worker::Reply;
use strand_parser::ast::Block;

/// A byte buffer that transfers rather than copies: moving it across an
/// isolate boundary takes the bytes and leaves the source detached.
#[derive(Debug, Default)]
pub struct BytesBuf {
    pub data: Vec<u8>,
    pub detached: bool,
}

impl BytesBuf {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            detached: false,
        }
    }

    /// Move the contents out, leaving the buffer detached.
    pub fn take(&mut self) -> Vec<u8> {
        self.detached = true;
        std::mem::take(&mut self.data)
    }
}

/// A user lambda closed over its defining environment.
pub struct LambdaVal {
    pub params: Vec<String>,
    pub body: Rc<Block>,
    pub env: Env,
    /// Source context the body's spans refer to.
    pub ctx: Rc<SourceCtx>,
}

// The environment chain can reach back to the lambda's own binding, so
// deriving Debug would recurse forever.
impl std::fmt::Debug for LambdaVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaVal")
            .field("params", &self.params)
            .field("ctx", &self.ctx.path)
            .finish_non_exhaustive()
    }
}

/// A builtin installed in the root scope.
pub struct NativeVal {
    pub name: &'static str,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeVal({})", self.name)
    }
}

/// An in-flight spawn job. `await` consumes the receiver; the worker side
/// releases its pool entry on reply, so the task itself carries nothing but
/// the channel.
#[derive(Debug)]
pub struct TaskVal {
    pub rx: RefCell<Option<std::sync::mpsc::Receiver<Reply>>>,
}

/// Hashable scalar for map keys and set members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Key {
    /// Convert a value to a key. Only scalars qualify.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Str(s) => Some(Key::Str(s.to_string())),
            Value::Int(i) => Some(Key::Int(*i)),
            Value::Bool(b) => Some(Key::Bool(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Str(s) => Value::str(s.clone()),
            Key::Int(i) => Value::Int(*i),
            Key::Bool(b) => Value::Bool(*b),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<RefCell<BytesBuf>>),
    List(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<HashMap<String, Value>>>),
    Map(Rc<RefCell<HashMap<Key, Value>>>),
    Set(Rc<RefCell<HashSet<Key>>>),
    /// Rebindable shell over a shared buffer — the slot the registry's
    /// hydration reconciles in place on workers.
    Shared(SharedCell),
    Mutex(Rc<MutexVal>),
    Semaphore(Rc<SemaphoreVal>),
    Guard(Rc<GuardVal>),
    Permit(Rc<PermitVal>),
    Lambda(Rc<LambdaVal>),
    Native(Rc<NativeVal>),
    Task(Rc<TaskVal>),
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Shared(_) => "sharedbuf",
            Value::Mutex(_) => "mutex",
            Value::Semaphore(_) => "semaphore",
            Value::Guard(_) => "guard",
            Value::Permit(_) => "permit",
            Value::Lambda(_) => "fn",
            Value::Native(_) => "native fn",
            Value::Task(_) => "task",
        }
    }

    /// Condition truthiness: null and false are false, zero numbers and the
    /// empty string are false, everything else is true.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// `==` semantics: structural for scalars and strings (numerics compare
    /// across int/float), identity for aggregates and handles.
    #[must_use]
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Shared(a), Value::Shared(b)) => a.borrow().same(&b.borrow()),
            (Value::Mutex(a), Value::Mutex(b)) => Rc::ptr_eq(a, b),
            (Value::Semaphore(a), Value::Semaphore(b)) => Rc::ptr_eq(a, b),
            (Value::Guard(a), Value::Guard(b)) => Rc::ptr_eq(a, b),
            (Value::Permit(a), Value::Permit(b)) => Rc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Render for `print` and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::Str(s) => s.to_string(),
            Value::Bytes(b) => {
                let b = b.borrow();
                if b.detached {
                    "bytes(detached)".into()
                } else {
                    format!("bytes({})", b.data.len())
                }
            }
            Value::List(items) => {
                let inner: Vec<String> = items.borrow().iter().map(Value::display).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Object(fields) => {
                let mut inner: Vec<String> = fields
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.display()))
                    .collect();
                inner.sort();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Map(entries) => format!("map(size={})", entries.borrow().len()),
            Value::Set(members) => format!("set(size={})", members.borrow().len()),
            Value::Shared(cell) => format!("sharedbuf({})", cell.borrow().len()),
            Value::Mutex(_) => "mutex".into(),
            Value::Semaphore(sem) => format!("semaphore(count={})", sem.count()),
            Value::Guard(g) => {
                if g.is_released() {
                    "guard(released)".into()
                } else {
                    "guard(held)".into()
                }
            }
            Value::Permit(p) => format!("permit({})", p.permits()),
            Value::Lambda(_) => "fn".into(),
            Value::Native(n) => format!("native fn {}", n.name),
            Value::Task(_) => "task".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::Int(-1).truthy());
        assert!(Value::str("x").truthy());
        let shared = Rc::new(RefCell::new(crate::shared::SharedBuf::new(0)));
        assert!(Value::Shared(shared).truthy());
    }

    #[test]
    fn loose_eq_scalars_and_identity() {
        assert!(Value::Int(3).loose_eq(&Value::Float(3.0)));
        assert!(Value::str("a").loose_eq(&Value::str("a")));
        let list = Rc::new(RefCell::new(vec![Value::Int(1)]));
        assert!(Value::List(Rc::clone(&list)).loose_eq(&Value::List(Rc::clone(&list))));
        assert!(!Value::List(list).loose_eq(&Value::List(Rc::new(RefCell::new(vec![
            Value::Int(1)
        ])))));
    }

    #[test]
    fn keys_from_scalars_only() {
        assert_eq!(
            Key::from_value(&Value::str("k")),
            Some(Key::Str("k".into()))
        );
        assert_eq!(Key::from_value(&Value::Int(4)), Some(Key::Int(4)));
        assert_eq!(Key::from_value(&Value::Null), None);
        assert!(Key::from_value(&Value::List(Rc::new(RefCell::new(Vec::new())))).is_none());
    }

    #[test]
    fn bytes_take_detaches() {
        let mut buf = BytesBuf::new(vec![1, 2, 3]);
        assert_eq!(buf.take(), vec![1, 2, 3]);
        assert!(buf.detached);
        assert!(buf.data.is_empty());
    }

    #[test]
    fn float_display_keeps_decimal_point() {
        assert_eq!(Value::Float(2.0).display(), "2.0");
        assert_eq!(Value::Float(123.45).display(), "123.45");
    }
}

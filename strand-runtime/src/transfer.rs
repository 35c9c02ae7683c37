//! Clonability, transferable collection, and wire conversion.
//!
//! Crossing an isolate boundary has three distinct behaviors, decided per
//! node of the value graph:
//!
//! - plain data (scalars, strings, lists, objects, maps, sets) deep-copies;
//! - byte buffers *transfer*: the bytes move and the source detaches;
//! - shared buffers and the primitives built on them pass by identity —
//!   they are never in the transferable set by construction.
//!
//! Lambdas, natives, tasks, guards, and permits never cross.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::error::{ErrorKind, RuntimeError};
use crate::mutex::MutexVal;
use crate::semaphore::SemaphoreVal;
use crate::shared::SharedBuf;
use crate::value::{BytesBuf, Key, Value};

/// The Send form of a value, as carried by one job or reply message. A
/// sealed mirror of [`Value`] minus everything non-replicable.
#[derive(Debug)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Transferred bytes — moved, not copied.
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Object(Vec<(String, WireValue)>),
    Map(Vec<(Key, WireValue)>),
    Set(Vec<Key>),
    /// Identity-preserving shared buffer handle.
    Shared(SharedBuf),
    /// Typed shadow of a mutex: its backing buffers, nothing else.
    Mutex {
        state: SharedBuf,
        data: Option<SharedBuf>,
    },
    /// Typed shadow of a semaphore: its permit word.
    Semaphore { state: SharedBuf },
}

/// Identity handle for one collected transferable.
pub type Transferable = Rc<RefCell<BytesBuf>>;

fn ptr_id(bytes: &Transferable) -> usize {
    Rc::as_ptr(bytes) as usize
}

/// Breadth-first walk of `value` collecting every distinct reachable byte
/// buffer. Cycle-safe via an identity set. Shared buffers are excluded by
/// construction — they have cross-isolate identity and are never moved.
#[must_use]
pub fn collect_transferables(value: &Value) -> Vec<Transferable> {
    let mut queue = vec![value.clone()];
    let mut visited: HashSet<usize> = HashSet::new();
    let mut found: Vec<Transferable> = Vec::new();

    while let Some(next) = queue.pop() {
        match next {
            Value::Bytes(bytes) => {
                if visited.insert(ptr_id(&bytes)) {
                    found.push(bytes);
                }
            }
            Value::List(items) => {
                if visited.insert(Rc::as_ptr(&items) as usize) {
                    queue.extend(items.borrow().iter().cloned());
                }
            }
            Value::Object(fields) => {
                if visited.insert(Rc::as_ptr(&fields) as usize) {
                    queue.extend(fields.borrow().values().cloned());
                }
            }
            Value::Map(entries) => {
                if visited.insert(Rc::as_ptr(&entries) as usize) {
                    queue.extend(entries.borrow().values().cloned());
                }
            }
            _ => {}
        }
    }
    found
}

/// Whether `value` would survive wire conversion. Scalars, strings, byte
/// buffers, shared buffers and the primitives over them, and aggregates of
/// clonable values are clonable; lambdas, natives, tasks, guards, and
/// permits are not. Cycle-safe.
#[must_use]
pub fn is_clonable(value: &Value) -> bool {
    fn walk(value: &Value, visited: &mut HashSet<usize>) -> bool {
        match value {
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Bytes(_)
            | Value::Set(_)
            | Value::Shared(_)
            | Value::Mutex(_)
            | Value::Semaphore(_) => true,
            // A node already checked (diamond or cycle) does not fail the
            // predicate; truly cyclic payloads are rejected at conversion.
            Value::List(items) => {
                !visited.insert(Rc::as_ptr(items) as usize)
                    || items.borrow().iter().all(|v| walk(v, visited))
            }
            Value::Object(fields) => {
                !visited.insert(Rc::as_ptr(fields) as usize)
                    || fields.borrow().values().all(|v| walk(v, visited))
            }
            Value::Map(entries) => {
                !visited.insert(Rc::as_ptr(entries) as usize)
                    || entries.borrow().values().all(|v| walk(v, visited))
            }
            Value::Guard(_)
            | Value::Permit(_)
            | Value::Lambda(_)
            | Value::Native(_)
            | Value::Task(_) => false,
        }
    }
    walk(value, &mut HashSet::new())
}

/// Deep-convert `value` to its wire form. Byte buffers listed in
/// `transfer` are moved out (the source detaches); any others are copied.
///
/// # Errors
///
/// [`ErrorKind::Clone`] for non-replicable values, cyclic payloads, and
/// already-detached byte buffers.
pub fn to_wire(value: &Value, transfer: &[Transferable]) -> Result<WireValue, RuntimeError> {
    let transfer_ids: HashSet<usize> = transfer.iter().map(ptr_id).collect();
    let mut visiting = HashSet::new();
    convert(value, &transfer_ids, &mut visiting)
}

fn convert(
    value: &Value,
    transfer_ids: &HashSet<usize>,
    visiting: &mut HashSet<usize>,
) -> Result<WireValue, RuntimeError> {
    match value {
        Value::Null => Ok(WireValue::Null),
        Value::Bool(b) => Ok(WireValue::Bool(*b)),
        Value::Int(i) => Ok(WireValue::Int(*i)),
        Value::Float(f) => Ok(WireValue::Float(*f)),
        Value::Str(s) => Ok(WireValue::Str(s.to_string())),
        Value::Bytes(bytes) => {
            let mut buf = bytes.borrow_mut();
            if buf.detached {
                return Err(RuntimeError::new(
                    ErrorKind::Clone,
                    "cannot clone a detached byte buffer",
                ));
            }
            if transfer_ids.contains(&(Rc::as_ptr(bytes) as usize)) {
                Ok(WireValue::Bytes(buf.take()))
            } else {
                Ok(WireValue::Bytes(buf.data.clone()))
            }
        }
        Value::List(items) => {
            let id = Rc::as_ptr(items) as usize;
            if !visiting.insert(id) {
                return Err(cyclic());
            }
            let out = items
                .borrow()
                .iter()
                .map(|v| convert(v, transfer_ids, visiting))
                .collect::<Result<Vec<_>, _>>();
            visiting.remove(&id);
            Ok(WireValue::List(out?))
        }
        Value::Object(fields) => {
            let id = Rc::as_ptr(fields) as usize;
            if !visiting.insert(id) {
                return Err(cyclic());
            }
            let out = fields
                .borrow()
                .iter()
                .map(|(k, v)| Ok((k.clone(), convert(v, transfer_ids, visiting)?)))
                .collect::<Result<Vec<_>, RuntimeError>>();
            visiting.remove(&id);
            Ok(WireValue::Object(out?))
        }
        Value::Map(entries) => {
            let id = Rc::as_ptr(entries) as usize;
            if !visiting.insert(id) {
                return Err(cyclic());
            }
            let out = entries
                .borrow()
                .iter()
                .map(|(k, v)| Ok((k.clone(), convert(v, transfer_ids, visiting)?)))
                .collect::<Result<Vec<_>, RuntimeError>>();
            visiting.remove(&id);
            Ok(WireValue::Map(out?))
        }
        Value::Set(members) => Ok(WireValue::Set(members.borrow().iter().cloned().collect())),
        Value::Shared(cell) => Ok(WireValue::Shared(cell.borrow().clone())),
        Value::Mutex(mutex) => Ok(WireValue::Mutex {
            state: mutex.state_cell().borrow().clone(),
            data: mutex.data(),
        }),
        Value::Semaphore(sem) => Ok(WireValue::Semaphore {
            state: sem.state_cell().borrow().clone(),
        }),
        Value::Guard(_)
        | Value::Permit(_)
        | Value::Lambda(_)
        | Value::Native(_)
        | Value::Task(_) => Err(RuntimeError::new(
            ErrorKind::Clone,
            format!("{} values cannot cross isolates", value.type_name()),
        )),
    }
}

fn cyclic() -> RuntimeError {
    RuntimeError::new(ErrorKind::Clone, "cyclic payloads cannot cross isolates")
}

/// Rebuild a value from its wire form on the receiving isolate. Shared
/// buffers keep their identity; primitive shadows are promoted back to live
/// shells around the same backing memory.
#[must_use]
pub fn from_wire(wire: WireValue) -> Value {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(i) => Value::Int(i),
        WireValue::Float(f) => Value::Float(f),
        WireValue::Str(s) => Value::str(s),
        WireValue::Bytes(data) => Value::Bytes(Rc::new(RefCell::new(BytesBuf::new(data)))),
        WireValue::List(items) => Value::List(Rc::new(RefCell::new(
            items.into_iter().map(from_wire).collect(),
        ))),
        WireValue::Object(fields) => Value::Object(Rc::new(RefCell::new(
            fields
                .into_iter()
                .map(|(k, v)| (k, from_wire(v)))
                .collect(),
        ))),
        WireValue::Map(entries) => Value::Map(Rc::new(RefCell::new(
            entries
                .into_iter()
                .map(|(k, v)| (k, from_wire(v)))
                .collect(),
        ))),
        WireValue::Set(members) => {
            Value::Set(Rc::new(RefCell::new(members.into_iter().collect())))
        }
        WireValue::Shared(buf) => Value::Shared(Rc::new(RefCell::new(buf))),
        WireValue::Mutex { state, data } => {
            Value::Mutex(Rc::new(MutexVal::from_parts(state, data)))
        }
        WireValue::Semaphore { state } => {
            Value::Semaphore(Rc::new(SemaphoreVal::from_state(state)))
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn object(fields: Vec<(&str, Value)>) -> Value {
        let map: HashMap<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Value::Object(Rc::new(RefCell::new(map)))
    }

    fn bytes(data: Vec<u8>) -> Value {
        Value::Bytes(Rc::new(RefCell::new(BytesBuf::new(data))))
    }

    fn shared(buf: SharedBuf) -> Value {
        Value::Shared(Rc::new(RefCell::new(buf)))
    }

    #[test]
    fn collect_finds_nested_bytes_and_skips_shared() {
        let b = bytes(vec![1, 2]);
        let payload = object(vec![
            ("b", b.clone()),
            ("shared", shared(SharedBuf::new(4))),
            (
                "nested",
                Value::List(Rc::new(RefCell::new(vec![b.clone(), Value::Int(1)]))),
            ),
        ]);
        let found = collect_transferables(&payload);
        // The same buffer reached twice is collected once.
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn collect_is_idempotent_over_its_output() {
        let payload = object(vec![("a", bytes(vec![1])), ("b", bytes(vec![2]))]);
        let first = collect_transferables(&payload);
        let as_value = Value::List(Rc::new(RefCell::new(
            first.iter().cloned().map(Value::Bytes).collect(),
        )));
        let second = collect_transferables(&as_value);
        let first_ids: HashSet<usize> = first.iter().map(ptr_id).collect();
        let second_ids: HashSet<usize> = second.iter().map(ptr_id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn collect_survives_cycles() {
        let inner: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        inner.borrow_mut().push(Value::List(Rc::clone(&inner)));
        inner.borrow_mut().push(bytes(vec![9]));
        let found = collect_transferables(&Value::List(inner));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn clonability_predicate() {
        assert!(is_clonable(&Value::Int(1)));
        assert!(is_clonable(&bytes(vec![1])));
        assert!(is_clonable(&shared(SharedBuf::new(4))));
        assert!(is_clonable(&Value::Mutex(Rc::new(MutexVal::new()))));
        assert!(!is_clonable(&Value::Task(Rc::new(crate::value::TaskVal {
            rx: RefCell::new(None),
        }))));
        let with_task = object(vec![(
            "t",
            Value::Task(Rc::new(crate::value::TaskVal {
                rx: RefCell::new(None),
            })),
        )]);
        assert!(!is_clonable(&with_task));
    }

    #[test]
    fn transfer_detaches_source() {
        let b = bytes(vec![1, 2, 3]);
        let transfer = collect_transferables(&b);
        let wire = to_wire(&b, &transfer).expect("convert");
        let Value::Bytes(original) = b else { panic!() };
        assert!(original.borrow().detached);
        assert!(matches!(wire, WireValue::Bytes(data) if data == vec![1, 2, 3]));
    }

    #[test]
    fn untransferred_bytes_copy() {
        let b = bytes(vec![7]);
        let wire = to_wire(&b, &[]).expect("convert");
        let Value::Bytes(original) = b else { panic!() };
        assert!(!original.borrow().detached);
        assert!(matches!(wire, WireValue::Bytes(data) if data == vec![7]));
    }

    #[test]
    fn shared_keeps_identity_through_round_trip() {
        let buf = SharedBuf::new(4);
        buf.store(0, 5);
        let wire = to_wire(&shared(buf.clone()), &[]).expect("convert");
        let Value::Shared(back) = from_wire(wire) else {
            panic!()
        };
        assert!(back.borrow().same(&buf));
    }

    #[test]
    fn mutex_shadow_round_trip_shares_state() {
        let data = SharedBuf::new(8);
        let mutex = MutexVal::with_data(Some(data.clone()));
        let state = mutex.state_cell().borrow().clone();
        let wire = to_wire(&Value::Mutex(Rc::new(mutex)), &[]).expect("convert");
        let Value::Mutex(back) = from_wire(wire) else {
            panic!()
        };
        assert!(back.state_cell().borrow().same(&state));
        assert!(back.data().expect("data").same(&data));
    }

    #[test]
    fn deep_copy_is_disjoint() {
        let list = Value::List(Rc::new(RefCell::new(vec![Value::Int(1)])));
        let payload = object(vec![("l", list.clone())]);
        let wire = to_wire(&payload, &[]).expect("convert");
        let copy = from_wire(wire);
        let Value::Object(copy_fields) = copy else {
            panic!()
        };
        let Value::List(copy_list) = copy_fields.borrow().get("l").cloned().expect("l") else {
            panic!()
        };
        copy_list.borrow_mut().push(Value::Int(2));
        let Value::List(original) = list else { panic!() };
        assert_eq!(original.borrow().len(), 1, "copies do not alias");
    }

    #[test]
    fn cyclic_payload_is_rejected() {
        let inner: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        inner.borrow_mut().push(Value::List(Rc::clone(&inner)));
        let err = to_wire(&Value::List(inner), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Clone);
    }

    #[test]
    fn lambda_rejected_with_type_in_message() {
        let err = to_wire(
            &Value::Task(Rc::new(crate::value::TaskVal {
                rx: RefCell::new(None),
            })),
            &[],
        )
        .unwrap_err();
        assert!(err.message.contains("task"));
    }

    #[test]
    fn detached_buffer_rejected() {
        let b = bytes(vec![1]);
        let transfer = collect_transferables(&b);
        to_wire(&b, &transfer).expect("first transfer");
        let err = to_wire(&b, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Clone);
    }
}

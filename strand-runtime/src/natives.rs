//! Builtins installed in every isolate's root scope, plus the per-type
//! method table.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use strand_capture::{analyze_call_site, emit_bridge, load_source, locate, CallSite};
use strand_parser::ast::Span;

use crate::dispatch;
use crate::error::{ErrorKind, RuntimeError};
use crate::interp::{Env, Interp, NativeFn};
use crate::mutex::MutexVal;
use crate::registry;
use crate::semaphore::SemaphoreVal;
use crate::shared::SharedBuf;
use crate::value::{BytesBuf, Key, NativeVal, Value};
use crate::worker::Reply;

/// Install every builtin into `root`.
pub fn install(root: &Env) {
    let define = |name: &'static str, func: NativeFn| {
        root.define(name, Value::Native(Rc::new(NativeVal { name, func })));
    };
    define("spawn", native_spawn);
    define("eval", native_eval);
    define("await", native_await);
    define(dispatch::DISPATCH_NAME, native_dispatch);
    define("Global", native_global);
    define("Mutex", native_mutex);
    define("Semaphore", native_semaphore);
    define("SharedBuf", native_shared_buf);
    define("Bytes", native_bytes);
    define("Map", native_map);
    define("Set", native_set);
    define("sleep", native_sleep);
    define("print", native_print);
    define("len", native_len);
    define("str", native_str);
    define("assert", native_assert);
    define("assert_eq", native_assert_eq);
    define("now_ms", native_now_ms);
}

// ── Argument helpers ────────────────────────────────────────────────────

fn expect_arity(name: &str, args: &[Value], n: usize) -> Result<(), RuntimeError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(RuntimeError::arity(name, n, args.len()))
    }
}

fn int_arg(name: &str, args: &[Value], i: usize) -> Result<i64, RuntimeError> {
    match args.get(i) {
        Some(Value::Int(v)) => Ok(*v),
        Some(other) => Err(RuntimeError::type_error(format!(
            "{name}: argument {} must be an int, got {}",
            i + 1,
            other.type_name()
        ))),
        None => Err(RuntimeError::type_error(format!(
            "{name}: missing argument {}",
            i + 1
        ))),
    }
}

fn str_arg(name: &str, args: &[Value], i: usize) -> Result<Rc<str>, RuntimeError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(Rc::clone(s)),
        Some(other) => Err(RuntimeError::type_error(format!(
            "{name}: argument {} must be a string, got {}",
            i + 1,
            other.type_name()
        ))),
        None => Err(RuntimeError::type_error(format!(
            "{name}: missing argument {}",
            i + 1
        ))),
    }
}

fn usize_arg(name: &str, args: &[Value], i: usize) -> Result<usize, RuntimeError> {
    usize::try_from(int_arg(name, args, i)?).map_err(|_| {
        RuntimeError::type_error(format!("{name}: argument {} must be non-negative", i + 1))
    })
}

// ── The spawn surface ───────────────────────────────────────────────────

/// `spawn(fn () { ... })` — the argument value is deliberately unused: the
/// lambda is recovered from source text so its free variables can be
/// captured by name. Returns the bridge expression for the caller to
/// evaluate in place.
fn native_spawn(
    interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("spawn", &args, 1)?;
    let site = locate(&interp.stack)?;
    let src = load_source(&site.path)?;
    let capture = analyze_call_site(&src, &site)?;
    let bridge = emit_bridge(&capture, &site.path);
    Ok(Value::str(bridge))
}

/// `eval(text)` — the runtime evaluation facility: parse `text` as one
/// expression and evaluate it in the calling scope.
fn native_eval(
    interp: &mut Interp,
    env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("eval", &args, 1)?;
    let text = str_arg("eval", &args, 0)?;
    interp.eval_text(&text, env)
}

/// `await(task)` — block until the worker replies, then rehydrate the
/// result or re-raise the propagated error.
fn native_await(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("await", &args, 1)?;
    let Some(Value::Task(task)) = args.first() else {
        return Err(RuntimeError::type_error(format!(
            "await expects a task, got {}",
            args.first().map_or("nothing", Value::type_name)
        )));
    };
    let Some(rx) = task.rx.borrow_mut().take() else {
        return Err(RuntimeError::type_error("task was already awaited"));
    };
    match rx.recv() {
        Ok(Reply::Success(wire)) => Ok(crate::transfer::from_wire(wire)),
        Ok(Reply::Error(err)) => Err(RuntimeError::new(ErrorKind::JobFailed, err.message)),
        Err(_) => Err(RuntimeError::new(
            ErrorKind::WorkerTerminated,
            "worker exited before replying",
        )),
    }
}

/// `__dispatch(props, topLevels, fnText, callerPath, callSiteKey)` — only
/// ever called from bridge expressions.
fn native_dispatch(
    interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity(dispatch::DISPATCH_NAME, &args, 5)?;
    let Some(Value::Object(props)) = args.first() else {
        return Err(RuntimeError::type_error("dispatch: props must be an object"));
    };
    let props: HashMap<String, Value> = props.borrow().clone();
    let tops = match args.get(1) {
        Some(Value::List(items)) => items
            .borrow()
            .iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.to_string()),
                other => Err(RuntimeError::type_error(format!(
                    "dispatch: top-level names must be strings, got {}",
                    other.type_name()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(RuntimeError::type_error(
                "dispatch: top-level names must be a list",
            ))
        }
    };
    let fn_text = str_arg(dispatch::DISPATCH_NAME, &args, 2)?;
    let caller_path = str_arg(dispatch::DISPATCH_NAME, &args, 3)?;
    let key = str_arg(dispatch::DISPATCH_NAME, &args, 4)?;
    dispatch::dispatch_entry(interp, props, &tops, &fn_text, &caller_path, &key)
}

// ── Shared primitives ───────────────────────────────────────────────────

/// Base location key for the innermost user frame, with worker entry paths
/// aliased back to their origin so keys match across isolates.
fn location_base(interp: &Interp) -> Result<String, RuntimeError> {
    let site: CallSite = locate(&interp.stack)?;
    let path = match &interp.entry_alias {
        Some((entry, origin)) if *entry == site.path => origin.clone(),
        _ => site.path.clone(),
    };
    Ok(format!("{}:{}:{}", path.display(), site.line, site.col))
}

/// `Global(primitive)` — bind the primitive's backing buffers under its
/// construction-site key, or rebind them to the already-registered memory.
/// Returns the primitive itself, now carrying cross-isolate identity.
fn native_global(
    interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("Global", &args, 1)?;
    let base = location_base(interp)?;
    let inner = args.into_iter().next().expect("arity checked");
    match &inner {
        Value::Shared(cell) => {
            let bound = registry::resolve(&format!("{base}{}", registry::STATE_SUFFIX), cell);
            *cell.borrow_mut() = bound;
        }
        Value::Mutex(mutex) => {
            let state = mutex.state_cell();
            let bound = registry::resolve(&format!("{base}{}", registry::STATE_SUFFIX), state);
            *state.borrow_mut() = bound;
            if let Some(data) = mutex.data_cell() {
                let bound = registry::resolve(&format!("{base}{}", registry::DATA_SUFFIX), data);
                *data.borrow_mut() = bound;
            }
        }
        Value::Semaphore(sem) => {
            let state = sem.state_cell();
            let bound = registry::resolve(&format!("{base}{}", registry::STATE_SUFFIX), state);
            *state.borrow_mut() = bound;
        }
        other => {
            return Err(RuntimeError::type_error(format!(
                "Global expects a shared primitive, got {}",
                other.type_name()
            ))
            .at(&interp.current_ctx().path, span))
        }
    }
    Ok(inner)
}

/// `Mutex()`, `Mutex(sharedbuf)`, or `Mutex(size)` — the argument becomes
/// the protected user buffer.
fn native_mutex(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    let data = match args.first() {
        None => None,
        Some(Value::Shared(cell)) => Some(cell.borrow().clone()),
        Some(Value::Int(n)) => {
            let len = usize::try_from(*n).map_err(|_| {
                RuntimeError::type_error("Mutex: size must be non-negative")
            })?;
            Some(SharedBuf::new(len))
        }
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "Mutex expects a shared buffer or size, got {}",
                other.type_name()
            )))
        }
    };
    if args.len() > 1 {
        return Err(RuntimeError::arity("Mutex", 1, args.len()));
    }
    Ok(Value::Mutex(Rc::new(MutexVal::with_data(data))))
}

/// `Semaphore(initialPermits)` or `Semaphore(sharedbuf)`.
fn native_semaphore(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("Semaphore", &args, 1)?;
    let sem = match &args[0] {
        Value::Int(n) => {
            let permits = i32::try_from(*n).map_err(|_| {
                RuntimeError::type_error("Semaphore: permit count out of range")
            })?;
            SemaphoreVal::new(permits)
        }
        Value::Shared(cell) => SemaphoreVal::from_state(cell.borrow().clone()),
        other => {
            return Err(RuntimeError::type_error(format!(
                "Semaphore expects permits or a shared buffer, got {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Semaphore(Rc::new(sem)))
}

/// `SharedBuf(len)` — shared byte buffer with cross-isolate identity.
fn native_shared_buf(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("SharedBuf", &args, 1)?;
    let len = usize_arg("SharedBuf", &args, 0)?;
    Ok(Value::Shared(Rc::new(RefCell::new(SharedBuf::new(len)))))
}

/// `Bytes(len)` — plain transferable byte buffer, zero-filled.
fn native_bytes(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("Bytes", &args, 1)?;
    let len = usize_arg("Bytes", &args, 0)?;
    Ok(Value::Bytes(Rc::new(RefCell::new(BytesBuf::new(vec![
        0;
        len
    ])))))
}

/// `Map()` or `Map([[k, v], ...])`.
fn native_map(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    let mut entries = HashMap::new();
    match args.first() {
        None => {}
        Some(Value::List(pairs)) => {
            for pair in pairs.borrow().iter() {
                let Value::List(pair) = pair else {
                    return Err(RuntimeError::type_error(
                        "Map expects a list of [key, value] pairs",
                    ));
                };
                let pair = pair.borrow();
                let (Some(key), Some(value), 2) = (pair.first(), pair.get(1), pair.len())
                else {
                    return Err(RuntimeError::type_error(
                        "Map expects a list of [key, value] pairs",
                    ));
                };
                let key = Key::from_value(key).ok_or_else(|| {
                    RuntimeError::type_error("map keys must be scalars")
                })?;
                entries.insert(key, value.clone());
            }
        }
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "Map expects a list of pairs, got {}",
                other.type_name()
            )))
        }
    }
    if args.len() > 1 {
        return Err(RuntimeError::arity("Map", 1, args.len()));
    }
    Ok(Value::Map(Rc::new(RefCell::new(entries))))
}

/// `Set()` or `Set([items])`.
fn native_set(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    let mut members = HashSet::new();
    match args.first() {
        None => {}
        Some(Value::List(items)) => {
            for item in items.borrow().iter() {
                let key = Key::from_value(item).ok_or_else(|| {
                    RuntimeError::type_error("set members must be scalars")
                })?;
                members.insert(key);
            }
        }
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "Set expects a list, got {}",
                other.type_name()
            )))
        }
    }
    if args.len() > 1 {
        return Err(RuntimeError::arity("Set", 1, args.len()));
    }
    Ok(Value::Set(Rc::new(RefCell::new(members))))
}

// ── Utilities ───────────────────────────────────────────────────────────

fn native_sleep(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("sleep", &args, 1)?;
    let ms = match args[0] {
        Value::Int(i) if i >= 0 => i as u64,
        Value::Float(f) if f >= 0.0 => f as u64,
        _ => return Err(RuntimeError::type_error("sleep expects non-negative ms")),
    };
    std::thread::sleep(Duration::from_millis(ms));
    Ok(Value::Null)
}

fn native_print(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    let rendered: Vec<String> = args.iter().map(Value::display).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::Null)
}

fn native_len(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("len", &args, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Object(fields) => fields.borrow().len(),
        Value::Map(entries) => entries.borrow().len(),
        Value::Set(members) => members.borrow().len(),
        Value::Bytes(bytes) => bytes.borrow().data.len(),
        Value::Shared(cell) => cell.borrow().len(),
        other => {
            return Err(RuntimeError::type_error(format!(
                "len: unsupported type {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

fn native_str(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("str", &args, 1)?;
    Ok(Value::str(args[0].display()))
}

fn native_assert(
    interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    span: &Span,
) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::arity("assert", 1, args.len()));
    }
    if args[0].truthy() {
        return Ok(Value::Null);
    }
    let message = match args.get(1) {
        Some(value) => format!("assertion failed: {}", value.display()),
        None => "assertion failed".to_string(),
    };
    Err(RuntimeError::new(ErrorKind::Type, message).at(&interp.current_ctx().path, span))
}

fn native_assert_eq(
    interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("assert_eq", &args, 2)?;
    if args[0].loose_eq(&args[1]) {
        Ok(Value::Null)
    } else {
        Err(RuntimeError::new(
            ErrorKind::Type,
            format!(
                "assertion failed: {} != {}",
                args[0].display(),
                args[1].display()
            ),
        )
        .at(&interp.current_ctx().path, span))
    }
}

fn native_now_ms(
    _interp: &mut Interp,
    _env: &Env,
    args: Vec<Value>,
    _span: &Span,
) -> Result<Value, RuntimeError> {
    expect_arity("now_ms", &args, 0)?;
    let ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Ok(Value::Int(i64::try_from(ms).unwrap_or(i64::MAX)))
}

// ── Methods ─────────────────────────────────────────────────────────────

/// Dispatch `receiver.name(args)` for the builtin types.
pub fn call_method(
    interp: &mut Interp,
    receiver: Value,
    name: &str,
    args: Vec<Value>,
    span: &Span,
) -> Result<Value, RuntimeError> {
    let path = interp.current_ctx().path.clone();
    let err_at = |e: RuntimeError| e.at(&path, span);

    match (&receiver, name) {
        // Map
        (Value::Map(entries), "get") => {
            expect_arity("map.get", &args, 1).map_err(err_at)?;
            let key = Key::from_value(&args[0])
                .ok_or_else(|| RuntimeError::type_error("map keys must be scalars"))
                .map_err(err_at)?;
            Ok(entries.borrow().get(&key).cloned().unwrap_or(Value::Null))
        }
        (Value::Map(entries), "set") => {
            expect_arity("map.set", &args, 2).map_err(err_at)?;
            let key = Key::from_value(&args[0])
                .ok_or_else(|| RuntimeError::type_error("map keys must be scalars"))
                .map_err(err_at)?;
            entries.borrow_mut().insert(key, args[1].clone());
            Ok(Value::Null)
        }
        (Value::Map(entries), "has") => {
            expect_arity("map.has", &args, 1).map_err(err_at)?;
            let key = Key::from_value(&args[0])
                .ok_or_else(|| RuntimeError::type_error("map keys must be scalars"))
                .map_err(err_at)?;
            Ok(Value::Bool(entries.borrow().contains_key(&key)))
        }
        (Value::Map(entries), "delete") => {
            expect_arity("map.delete", &args, 1).map_err(err_at)?;
            let key = Key::from_value(&args[0])
                .ok_or_else(|| RuntimeError::type_error("map keys must be scalars"))
                .map_err(err_at)?;
            Ok(Value::Bool(entries.borrow_mut().remove(&key).is_some()))
        }
        (Value::Map(entries), "size") => Ok(Value::Int(entries.borrow().len() as i64)),

        // Set
        (Value::Set(members), "add") => {
            expect_arity("set.add", &args, 1).map_err(err_at)?;
            let key = Key::from_value(&args[0])
                .ok_or_else(|| RuntimeError::type_error("set members must be scalars"))
                .map_err(err_at)?;
            members.borrow_mut().insert(key);
            Ok(Value::Null)
        }
        (Value::Set(members), "has") => {
            expect_arity("set.has", &args, 1).map_err(err_at)?;
            let key = Key::from_value(&args[0])
                .ok_or_else(|| RuntimeError::type_error("set members must be scalars"))
                .map_err(err_at)?;
            Ok(Value::Bool(members.borrow().contains(&key)))
        }
        (Value::Set(members), "size") => Ok(Value::Int(members.borrow().len() as i64)),

        // List
        (Value::List(items), "push") => {
            expect_arity("list.push", &args, 1).map_err(err_at)?;
            items.borrow_mut().push(args[0].clone());
            Ok(Value::Null)
        }
        (Value::List(items), "pop") => Ok(items.borrow_mut().pop().unwrap_or(Value::Null)),
        (Value::List(items), "size") => Ok(Value::Int(items.borrow().len() as i64)),

        // Shared buffers — byte access, atomic word ops, and parking.
        (Value::Shared(cell), "len") => Ok(Value::Int(cell.borrow().len() as i64)),
        (Value::Shared(cell), "get") => {
            expect_arity("buf.get", &args, 1).map_err(err_at)?;
            let offset = usize_arg("buf.get", &args, 0).map_err(err_at)?;
            let buf = cell.borrow().clone();
            buf.get_byte(offset)
                .map(|b| Value::Int(i64::from(b)))
                .ok_or_else(|| {
                    err_at(RuntimeError::type_error(format!(
                        "byte index {offset} out of range"
                    )))
                })
        }
        (Value::Shared(cell), "set") => {
            expect_arity("buf.set", &args, 2).map_err(err_at)?;
            let offset = usize_arg("buf.set", &args, 0).map_err(err_at)?;
            let byte = byte_arg("buf.set", &args, 1).map_err(err_at)?;
            let buf = cell.borrow().clone();
            if buf.set_byte(offset, byte) {
                Ok(Value::Null)
            } else {
                Err(err_at(RuntimeError::type_error(format!(
                    "byte index {offset} out of range"
                ))))
            }
        }
        (Value::Shared(cell), "load") => {
            expect_arity("buf.load", &args, 1).map_err(err_at)?;
            let index = usize_arg("buf.load", &args, 0).map_err(err_at)?;
            let buf = cell.borrow().clone();
            buf.load(index)
                .map(|v| Value::Int(i64::from(v)))
                .ok_or_else(|| {
                    err_at(RuntimeError::type_error(format!(
                        "word index {index} out of range"
                    )))
                })
        }
        (Value::Shared(cell), "store") => {
            expect_arity("buf.store", &args, 2).map_err(err_at)?;
            let index = usize_arg("buf.store", &args, 0).map_err(err_at)?;
            let value = word_arg("buf.store", &args, 1).map_err(err_at)?;
            let buf = cell.borrow().clone();
            if buf.store(index, value) {
                Ok(Value::Null)
            } else {
                Err(err_at(RuntimeError::type_error(format!(
                    "word index {index} out of range"
                ))))
            }
        }
        (Value::Shared(cell), "add") => {
            expect_arity("buf.add", &args, 2).map_err(err_at)?;
            let index = usize_arg("buf.add", &args, 0).map_err(err_at)?;
            let delta = word_arg("buf.add", &args, 1).map_err(err_at)?;
            let buf = cell.borrow().clone();
            buf.fetch_add(index, delta)
                .map(|old| Value::Int(i64::from(old)))
                .ok_or_else(|| {
                    err_at(RuntimeError::type_error(format!(
                        "word index {index} out of range"
                    )))
                })
        }
        (Value::Shared(cell), "cas") => {
            expect_arity("buf.cas", &args, 3).map_err(err_at)?;
            let index = usize_arg("buf.cas", &args, 0).map_err(err_at)?;
            let expected = word_arg("buf.cas", &args, 1).map_err(err_at)?;
            let new = word_arg("buf.cas", &args, 2).map_err(err_at)?;
            let buf = cell.borrow().clone();
            Ok(Value::Bool(
                buf.compare_exchange(index, expected, new).is_ok(),
            ))
        }
        (Value::Shared(cell), "wait") => {
            expect_arity("buf.wait", &args, 2).map_err(err_at)?;
            let index = usize_arg("buf.wait", &args, 0).map_err(err_at)?;
            let expected = word_arg("buf.wait", &args, 1).map_err(err_at)?;
            let buf = cell.borrow().clone();
            buf.wait(index, expected);
            Ok(Value::Null)
        }
        (Value::Shared(cell), "wait_timeout") => {
            expect_arity("buf.wait_timeout", &args, 3).map_err(err_at)?;
            let index = usize_arg("buf.wait_timeout", &args, 0).map_err(err_at)?;
            let expected = word_arg("buf.wait_timeout", &args, 1).map_err(err_at)?;
            let ms = usize_arg("buf.wait_timeout", &args, 2).map_err(err_at)?;
            let buf = cell.borrow().clone();
            Ok(Value::Bool(buf.wait_timeout(
                index,
                expected,
                Duration::from_millis(ms as u64),
            )))
        }
        (Value::Shared(cell), "notify") => {
            // Wakes every waiter on the buffer; each rechecks its word.
            let buf = cell.borrow().clone();
            buf.notify_all();
            let _ = args;
            Ok(Value::Null)
        }

        // Bytes
        (Value::Bytes(bytes), "len") => {
            let bytes = bytes.borrow();
            if bytes.detached {
                return Err(err_at(RuntimeError::new(
                    ErrorKind::DetachedBuffer,
                    "byte buffer was transferred away",
                )));
            }
            Ok(Value::Int(bytes.data.len() as i64))
        }
        (Value::Bytes(bytes), "get") => {
            expect_arity("bytes.get", &args, 1).map_err(err_at)?;
            let offset = usize_arg("bytes.get", &args, 0).map_err(err_at)?;
            let bytes = bytes.borrow();
            if bytes.detached {
                return Err(err_at(RuntimeError::new(
                    ErrorKind::DetachedBuffer,
                    "byte buffer was transferred away",
                )));
            }
            bytes
                .data
                .get(offset)
                .map(|b| Value::Int(i64::from(*b)))
                .ok_or_else(|| {
                    err_at(RuntimeError::type_error(format!(
                        "byte index {offset} out of range (len {})",
                        bytes.data.len()
                    )))
                })
        }
        (Value::Bytes(bytes), "set") => {
            expect_arity("bytes.set", &args, 2).map_err(err_at)?;
            let offset = usize_arg("bytes.set", &args, 0).map_err(err_at)?;
            let byte = byte_arg("bytes.set", &args, 1).map_err(err_at)?;
            let mut bytes = bytes.borrow_mut();
            if bytes.detached {
                return Err(err_at(RuntimeError::new(
                    ErrorKind::DetachedBuffer,
                    "byte buffer was transferred away",
                )));
            }
            let len = bytes.data.len();
            match bytes.data.get_mut(offset) {
                Some(slot) => {
                    *slot = byte;
                    Ok(Value::Null)
                }
                None => Err(err_at(RuntimeError::type_error(format!(
                    "byte index {offset} out of range (len {len})"
                )))),
            }
        }

        // Mutex / guard
        (Value::Mutex(mutex), "lock") => {
            expect_arity("mutex.lock", &args, 0).map_err(err_at)?;
            Ok(Value::Guard(Rc::new(mutex.lock())))
        }
        (Value::Mutex(mutex), "try_lock") => {
            expect_arity("mutex.try_lock", &args, 0).map_err(err_at)?;
            Ok(mutex
                .try_lock()
                .map_or(Value::Null, |guard| Value::Guard(Rc::new(guard))))
        }
        (Value::Guard(guard), "release") => {
            expect_arity("guard.release", &args, 0).map_err(err_at)?;
            guard.release().map_err(err_at)?;
            Ok(Value::Null)
        }
        (Value::Guard(guard), "data") => {
            expect_arity("guard.data", &args, 0).map_err(err_at)?;
            Ok(guard
                .data()
                .map_or(Value::Null, |buf| Value::Shared(Rc::new(RefCell::new(buf)))))
        }

        // Semaphore / permit
        (Value::Semaphore(sem), "acquire") => {
            let n = optional_count("sem.acquire", &args).map_err(err_at)?;
            Ok(Value::Permit(Rc::new(sem.acquire(n))))
        }
        (Value::Semaphore(sem), "try_acquire") => {
            let n = optional_count("sem.try_acquire", &args).map_err(err_at)?;
            Ok(sem
                .try_acquire(n)
                .map_or(Value::Null, |permit| Value::Permit(Rc::new(permit))))
        }
        (Value::Semaphore(sem), "release") => {
            let n = optional_count("sem.release", &args).map_err(err_at)?;
            sem.release(n);
            Ok(Value::Null)
        }
        (Value::Semaphore(sem), "count") => Ok(Value::Int(i64::from(sem.count()))),
        (Value::Permit(permit), "release") => {
            expect_arity("permit.release", &args, 0).map_err(err_at)?;
            permit.release();
            Ok(Value::Null)
        }

        (receiver, name) => Err(err_at(RuntimeError::type_error(format!(
            "no method `{name}` on {}",
            receiver.type_name()
        )))),
    }
}

fn byte_arg(name: &str, args: &[Value], i: usize) -> Result<u8, RuntimeError> {
    u8::try_from(int_arg(name, args, i)?).map_err(|_| {
        RuntimeError::type_error(format!(
            "{name}: argument {} must be a byte value (0..=255)",
            i + 1
        ))
    })
}

fn word_arg(name: &str, args: &[Value], i: usize) -> Result<i32, RuntimeError> {
    i32::try_from(int_arg(name, args, i)?).map_err(|_| {
        RuntimeError::type_error(format!(
            "{name}: argument {} must fit a 32-bit word",
            i + 1
        ))
    })
}

fn optional_count(name: &str, args: &[Value]) -> Result<i32, RuntimeError> {
    match args.len() {
        0 => Ok(1),
        1 => {
            let n = word_arg(name, args, 0)?;
            if n <= 0 {
                Err(RuntimeError::type_error(format!(
                    "{name}: count must be positive"
                )))
            } else {
                Ok(n)
            }
        }
        n => Err(RuntimeError::arity(name, 1, n)),
    }
}

//! The tree-walking evaluator that runs one isolate.
//!
//! Each isolate is single-threaded and cooperative; parallelism exists only
//! between isolates. The evaluator maintains the synthetic call stack the
//! capture pipeline resolves spawn call sites against: one frame per call,
//! carrying the source path and 1-based position of the call expression.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use strand_capture::rewrite::normalize_path;
use strand_capture::{load_source, StackFrame, EVAL_PSEUDO_PATH};
use strand_parser::ast::{
    BinaryOp, Block, Expr, Item, Span, Spanned, Stmt, UnaryOp,
};
use strand_parser::line::LineTable;
use strand_parser::Parser;

use crate::error::{ErrorKind, RuntimeError};
use crate::natives;
use crate::value::{Key, LambdaVal, Value};

/// Call-depth ceiling; deeply recursive scripts fail instead of overflowing
/// the native stack.
const MAX_CALL_DEPTH: usize = 200;

// ── Source contexts ─────────────────────────────────────────────────────

/// The source a span belongs to: a path for display/capture plus the line
/// table to convert byte offsets.
#[derive(Debug)]
pub struct SourceCtx {
    pub path: String,
    pub lines: LineTable,
}

impl SourceCtx {
    #[must_use]
    pub fn new(path: impl Into<String>, text: &str) -> Rc<Self> {
        Rc::new(Self {
            path: path.into(),
            lines: LineTable::new(text),
        })
    }
}

// ── Environments ────────────────────────────────────────────────────────

/// One lexical scope: a mutable name table and a parent link.
#[derive(Debug)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Env>,
}

pub type Env = Rc<Scope>;

impl Scope {
    #[must_use]
    pub fn root() -> Env {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    #[must_use]
    pub fn child(parent: &Env) -> Env {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Bind `name` in this scope, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    /// Resolve `name` through the scope chain.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Overwrite the nearest existing binding of `name`. False if unbound.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if self.vars.borrow().contains_key(name) {
            self.vars.borrow_mut().insert(name.to_string(), value);
            return true;
        }
        self.parent
            .as_ref()
            .is_some_and(|p| p.assign(name, value))
    }
}

/// Signature of a builtin: full interpreter access, the calling scope (for
/// `eval`), the evaluated arguments, and the call span for diagnostics.
pub type NativeFn =
    fn(&mut Interp, &Env, Vec<Value>, &Span) -> Result<Value, RuntimeError>;

/// Statement outcome inside a block.
enum Flow {
    Normal,
    Return(Value),
}

// ── The interpreter ─────────────────────────────────────────────────────

pub struct Interp {
    /// Synthetic call stack, innermost last. Capture resolves against this.
    pub stack: Vec<StackFrame>,
    /// Source contexts, innermost last; spans resolve against the top.
    ctx_stack: Vec<Rc<SourceCtx>>,
    /// Root scope holding the builtins.
    pub root: Env,
    /// Per-isolate module cache: absolute path → module scope.
    modules: HashMap<PathBuf, Env>,
    /// Modules currently evaluating, for import-cycle detection.
    loading: HashSet<PathBuf>,
    /// Worker isolates evaluate a generated entry file whose module portion
    /// is a copy of the origin file; positions in the entry are attributed
    /// to the origin when deriving shared-memory location keys.
    pub entry_alias: Option<(PathBuf, PathBuf)>,
    depth: usize,
}

impl Interp {
    #[must_use]
    pub fn new() -> Self {
        let root = Scope::root();
        natives::install(&root);
        Self {
            stack: Vec::new(),
            ctx_stack: Vec::new(),
            root,
            modules: HashMap::new(),
            loading: HashSet::new(),
            entry_alias: None,
            depth: 0,
        }
    }

    /// The source context spans currently resolve against.
    ///
    /// # Panics
    ///
    /// Panics if called outside any evaluation — the evaluator always
    /// pushes a context before evaluating.
    #[must_use]
    pub fn current_ctx(&self) -> Rc<SourceCtx> {
        Rc::clone(self.ctx_stack.last().expect("no active source context"))
    }

    fn current_path(&self) -> String {
        self.ctx_stack
            .last()
            .map_or_else(|| EVAL_PSEUDO_PATH.to_string(), |ctx| ctx.path.clone())
    }

    // ── Modules ───────────────────────────────────────────────────────

    /// Evaluate the module at `path` (through the process-wide parse
    /// cache), returning its scope. Each isolate evaluates a module at most
    /// once.
    pub fn run_module(&mut self, path: &Path) -> Result<Env, RuntimeError> {
        let path = normalize_path(path);
        if let Some(env) = self.modules.get(&path) {
            return Ok(Rc::clone(env));
        }
        if !self.loading.insert(path.clone()) {
            return Err(RuntimeError::new(
                ErrorKind::Name,
                format!("import cycle through {}", path.display()),
            ));
        }

        let result = self.eval_module_items(&path);
        self.loading.remove(&path);
        let env = result?;
        self.modules.insert(path, Rc::clone(&env));
        Ok(env)
    }

    /// Scope of an already-evaluated module, if any.
    #[must_use]
    pub fn module_env(&self, path: &Path) -> Option<Env> {
        self.modules.get(&normalize_path(path)).cloned()
    }

    fn eval_module_items(&mut self, path: &Path) -> Result<Env, RuntimeError> {
        let src = load_source(path)?;
        let env = Scope::child(&self.root);
        let ctx = SourceCtx::new(path.display().to_string(), &src.text);
        self.ctx_stack.push(ctx);

        let result = (|| {
            for (item, span) in &src.module.items {
                match item {
                    Item::Import(imp) => {
                        let target = if Path::new(&imp.specifier).is_absolute() {
                            PathBuf::from(&imp.specifier)
                        } else {
                            let base = path.parent().unwrap_or_else(|| Path::new("/"));
                            normalize_path(&base.join(&imp.specifier))
                        };
                        let dep = self.run_module(&target)?;
                        for (name, name_span) in &imp.names {
                            let value = dep.lookup(name).ok_or_else(|| {
                                RuntimeError::new(
                                    ErrorKind::Name,
                                    format!(
                                        "`{name}` is not defined in {}",
                                        target.display()
                                    ),
                                )
                                .at(&self.current_path(), name_span)
                            })?;
                            env.define(name.clone(), value);
                        }
                    }
                    Item::Fn(decl) => {
                        let lambda = LambdaVal {
                            params: decl.params.iter().map(|(n, _)| n.clone()).collect(),
                            body: Rc::new(decl.body.clone()),
                            env: Rc::clone(&env),
                            ctx: self.current_ctx(),
                        };
                        env.define(decl.name.0.clone(), Value::Lambda(Rc::new(lambda)));
                    }
                    Item::Stmt(stmt) => {
                        if let Flow::Return(_) = self.eval_stmt(stmt, &env)? {
                            return Err(RuntimeError::new(
                                ErrorKind::Type,
                                "return outside a function",
                            )
                            .at(&self.current_path(), span));
                        }
                    }
                }
            }
            Ok(())
        })();

        self.ctx_stack.pop();
        result.map(|()| env)
    }

    // ── Statements ────────────────────────────────────────────────────

    fn eval_block(&mut self, block: &Block, env: &Env) -> Result<Flow, RuntimeError> {
        let scope = Scope::child(env);
        for (stmt, _) in &block.stmts {
            if let Flow::Return(value) = self.eval_stmt(stmt, &scope)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_stmt(&mut self, stmt: &Stmt, env: &Env) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.eval_expr(value, env)?;
                env.define(name.0.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value } => {
                let value = self.eval_expr(value, env)?;
                self.assign_target(target, value, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval_expr(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval_expr(cond, env)?.truthy() {
                    self.eval_block(then_block, env)
                } else if let Some(else_block) = else_block {
                    self.eval_block(else_block, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval_expr(cond, env)?.truthy() {
                    if let Flow::Return(value) = self.eval_block(body, env)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn assign_target(
        &mut self,
        target: &Spanned<Expr>,
        value: Value,
        env: &Env,
    ) -> Result<(), RuntimeError> {
        let path = self.current_path();
        match &target.0 {
            Expr::Ident(name) => {
                if env.assign(name, value) {
                    Ok(())
                } else {
                    Err(RuntimeError::name_error(name).at(&path, &target.1))
                }
            }
            Expr::Member { object, name } => {
                let object = self.eval_expr(object, env)?;
                match object {
                    Value::Object(fields) => {
                        fields.borrow_mut().insert(name.0.clone(), value);
                        Ok(())
                    }
                    other => Err(RuntimeError::type_error(format!(
                        "cannot set field `{}` on {}",
                        name.0,
                        other.type_name()
                    ))
                    .at(&path, &target.1)),
                }
            }
            Expr::Index { object, index } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                self.index_set(&object, &index, value, &target.1)
            }
            _ => Err(RuntimeError::type_error("invalid assignment target")
                .at(&path, &target.1)),
        }
    }

    // ── Expressions ───────────────────────────────────────────────────

    fn eval_expr(&mut self, expr: &Spanned<Expr>, env: &Env) -> Result<Value, RuntimeError> {
        let (node, span) = expr;
        match node {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s.clone())),
            Expr::Ident(name) => env
                .lookup(name)
                .ok_or_else(|| RuntimeError::name_error(name).at(&self.current_path(), span)),
            Expr::Array(elems) => {
                let mut items = Vec::with_capacity(elems.len());
                for elem in elems {
                    items.push(self.eval_expr(elem, env)?);
                }
                Ok(Value::List(Rc::new(RefCell::new(items))))
            }
            Expr::Object(field_exprs) => {
                let mut fields = HashMap::with_capacity(field_exprs.len());
                for ((key, _), value) in field_exprs {
                    fields.insert(key.clone(), self.eval_expr(value, env)?);
                }
                Ok(Value::Object(Rc::new(RefCell::new(fields))))
            }
            Expr::Lambda(lambda) => Ok(Value::Lambda(Rc::new(LambdaVal {
                params: lambda.params.iter().map(|(n, _)| n.clone()).collect(),
                body: Rc::new(lambda.body.clone()),
                env: Rc::clone(env),
                ctx: self.current_ctx(),
            }))),
            Expr::Member { object, name } => {
                let object = self.eval_expr(object, env)?;
                match &object {
                    Value::Object(fields) => {
                        fields.borrow().get(&name.0).cloned().ok_or_else(|| {
                            RuntimeError::type_error(format!("no field `{}`", name.0))
                                .at(&self.current_path(), &name.1)
                        })
                    }
                    other => Err(RuntimeError::type_error(format!(
                        "cannot read field `{}` of {}",
                        name.0,
                        other.type_name()
                    ))
                    .at(&self.current_path(), &name.1)),
                }
            }
            Expr::Index { object, index } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                self.index_get(&object, &index, span)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand, env)?;
                self.unary(*op, value, span)
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let lhs = self.eval_expr(lhs, env)?;
                    if lhs.truthy() {
                        Ok(Value::Bool(self.eval_expr(rhs, env)?.truthy()))
                    } else {
                        Ok(Value::Bool(false))
                    }
                }
                BinaryOp::Or => {
                    let lhs = self.eval_expr(lhs, env)?;
                    if lhs.truthy() {
                        Ok(Value::Bool(true))
                    } else {
                        Ok(Value::Bool(self.eval_expr(rhs, env)?.truthy()))
                    }
                }
                _ => {
                    let lhs = self.eval_expr(lhs, env)?;
                    let rhs = self.eval_expr(rhs, env)?;
                    self.binary(*op, lhs, rhs, span)
                }
            },
            Expr::Call { callee, args } => {
                // Method-call form dispatches on the receiver type first.
                if let Expr::Member { object, name } = &callee.0 {
                    let receiver = self.eval_expr(object, env)?;
                    let mut evaluated = Vec::with_capacity(args.len());
                    for arg in args {
                        evaluated.push(self.eval_expr(arg, env)?);
                    }
                    return self.call_method(receiver, &name.0, evaluated, span, env);
                }
                let callee_value = self.eval_expr(callee, env)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg, env)?);
                }
                self.call_value(callee_value, evaluated, span, env)
            }
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────

    fn push_frame(&mut self, span: &Span) {
        let ctx = self.current_ctx();
        let (line, col) = ctx.lines.line_col(span.start);
        self.stack.push(StackFrame {
            path: ctx.path.clone(),
            line,
            col,
        });
    }

    /// Invoke any callable with already-evaluated arguments. `env` is the
    /// calling scope, made available to natives (`eval` runs bridge text in
    /// it).
    pub fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        call_span: &Span,
        env: &Env,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Lambda(lambda) => self.call_lambda(&lambda, args, call_span, &[]),
            Value::Native(native) => {
                self.push_frame(call_span);
                let result = (native.func)(self, env, args, call_span);
                self.stack.pop();
                result
            }
            other => Err(RuntimeError::type_error(format!(
                "{} is not callable",
                other.type_name()
            ))
            .at(&self.current_path(), call_span)),
        }
    }

    /// Invoke a lambda. `extra` bindings are layered between the closure
    /// environment and the parameter scope — the worker entry uses this to
    /// make the hydrated props visible to the user function's body.
    pub fn call_lambda(
        &mut self,
        lambda: &Rc<LambdaVal>,
        args: Vec<Value>,
        call_span: &Span,
        extra: &[(String, Value)],
    ) -> Result<Value, RuntimeError> {
        if args.len() != lambda.params.len() {
            return Err(RuntimeError::arity("fn", lambda.params.len(), args.len())
                .at(&self.current_path(), call_span));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::type_error("call depth exceeded")
                .at(&self.current_path(), call_span));
        }

        self.push_frame(call_span);
        self.ctx_stack.push(Rc::clone(&lambda.ctx));
        self.depth += 1;

        let scope = if extra.is_empty() {
            Scope::child(&lambda.env)
        } else {
            let props = Scope::child(&lambda.env);
            for (name, value) in extra {
                props.define(name.clone(), value.clone());
            }
            Scope::child(&props)
        };
        for (param, arg) in lambda.params.iter().zip(args) {
            scope.define(param.clone(), arg);
        }

        let result = self.eval_block(&lambda.body, &scope);

        self.depth -= 1;
        self.ctx_stack.pop();
        self.stack.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    /// Invoke an entry lambda (a worker's `__strand_entry`, or the host's
    /// `main`) with optional extra bindings layered into scope. The
    /// synthetic `<entry>` frame keeps the call-site locator from ever
    /// resolving into the runtime's own invocation.
    pub fn call_entry(
        &mut self,
        lambda: &Rc<LambdaVal>,
        bindings: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeError> {
        let ctx = SourceCtx::new("<entry>", "");
        self.ctx_stack.push(ctx);
        let result = self.call_lambda(lambda, Vec::new(), &(0..0), &bindings);
        self.ctx_stack.pop();
        result
    }

    /// Parse and evaluate a single expression in `env` — the runtime
    /// evaluation facility the bridge contract depends on. The text is
    /// attributed to the `<eval>` pseudo-path, which the call-site locator
    /// skips.
    pub fn eval_text(&mut self, text: &str, env: &Env) -> Result<Value, RuntimeError> {
        let mut parser = Parser::new(text);
        let Some(expr) = parser.expr() else {
            return Err(RuntimeError::new(
                ErrorKind::Parse,
                format!("evaluated text is not an expression: {text:?}"),
            ));
        };
        let ctx = SourceCtx::new(EVAL_PSEUDO_PATH, text);
        self.ctx_stack.push(ctx);
        let result = self.eval_expr(&expr, env);
        self.ctx_stack.pop();
        result
    }

    // ── Operators ─────────────────────────────────────────────────────

    fn unary(&self, op: UnaryOp, value: Value, span: &Span) -> Result<Value, RuntimeError> {
        match (op, value) {
            (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
            (UnaryOp::Neg, other) => Err(RuntimeError::type_error(format!(
                "cannot negate {}",
                other.type_name()
            ))
            .at(&self.current_path(), span)),
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        span: &Span,
    ) -> Result<Value, RuntimeError> {
        use BinaryOp::{Add, Div, Eq, Ge, Gt, Le, Lt, Mul, NotEq, Rem, Sub};
        let path = self.current_path();
        let type_err = |msg: String| RuntimeError::type_error(msg).at(&path, span);

        match op {
            Eq => return Ok(Value::Bool(lhs.loose_eq(&rhs))),
            NotEq => return Ok(Value::Bool(!lhs.loose_eq(&rhs))),
            _ => {}
        }

        if let (Value::Str(a), Value::Str(b)) = (&lhs, &rhs) {
            return match op {
                Add => Ok(Value::str(format!("{a}{b}"))),
                Lt => Ok(Value::Bool(a < b)),
                Le => Ok(Value::Bool(a <= b)),
                Gt => Ok(Value::Bool(a > b)),
                Ge => Ok(Value::Bool(a >= b)),
                _ => Err(type_err(format!("unsupported string operator {op:?}"))),
            };
        }

        let as_float = |v: &Value| match v {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        };
        let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) else {
            return Err(type_err(format!(
                "cannot apply {op:?} to {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        };

        // Integer arithmetic stays integral when both operands are ints.
        if let (Value::Int(ia), Value::Int(ib)) = (&lhs, &rhs) {
            let (ia, ib) = (*ia, *ib);
            let int_result = match op {
                Add => Some(ia.wrapping_add(ib)),
                Sub => Some(ia.wrapping_sub(ib)),
                Mul => Some(ia.wrapping_mul(ib)),
                Div => {
                    if ib == 0 {
                        return Err(type_err("division by zero".into()));
                    }
                    Some(ia.wrapping_div(ib))
                }
                Rem => {
                    if ib == 0 {
                        return Err(type_err("division by zero".into()));
                    }
                    Some(ia.wrapping_rem(ib))
                }
                _ => None,
            };
            if let Some(value) = int_result {
                return Ok(Value::Int(value));
            }
        }

        match op {
            Add => Ok(Value::Float(a + b)),
            Sub => Ok(Value::Float(a - b)),
            Mul => Ok(Value::Float(a * b)),
            Div => Ok(Value::Float(a / b)),
            Rem => Ok(Value::Float(a % b)),
            Lt => Ok(Value::Bool(a < b)),
            Le => Ok(Value::Bool(a <= b)),
            Gt => Ok(Value::Bool(a > b)),
            Ge => Ok(Value::Bool(a >= b)),
            _ => unreachable!("logical and equality handled above"),
        }
    }

    // ── Indexing ──────────────────────────────────────────────────────

    fn index_get(
        &self,
        object: &Value,
        index: &Value,
        span: &Span,
    ) -> Result<Value, RuntimeError> {
        let path = self.current_path();
        match (object, index) {
            (Value::List(items), Value::Int(i)) => {
                let items = items.borrow();
                usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| {
                        RuntimeError::type_error(format!(
                            "index {i} out of range (len {})",
                            items.len()
                        ))
                        .at(&path, span)
                    })
            }
            (Value::Object(fields), Value::Str(key)) => Ok(fields
                .borrow()
                .get(key.as_ref())
                .cloned()
                .unwrap_or(Value::Null)),
            (Value::Map(entries), key) => {
                let key = Key::from_value(key).ok_or_else(|| {
                    RuntimeError::type_error("map keys must be scalars").at(&path, span)
                })?;
                Ok(entries.borrow().get(&key).cloned().unwrap_or(Value::Null))
            }
            (Value::Bytes(bytes), Value::Int(i)) => {
                let bytes = bytes.borrow();
                if bytes.detached {
                    return Err(RuntimeError::new(
                        ErrorKind::DetachedBuffer,
                        "byte buffer was transferred away",
                    )
                    .at(&path, span));
                }
                usize::try_from(*i)
                    .ok()
                    .and_then(|i| bytes.data.get(i).copied())
                    .map(|b| Value::Int(i64::from(b)))
                    .ok_or_else(|| {
                        RuntimeError::type_error(format!("byte index {i} out of range"))
                            .at(&path, span)
                    })
            }
            (Value::Shared(cell), Value::Int(i)) => {
                let buf = cell.borrow();
                usize::try_from(*i)
                    .ok()
                    .and_then(|i| buf.get_byte(i))
                    .map(|b| Value::Int(i64::from(b)))
                    .ok_or_else(|| {
                        RuntimeError::type_error(format!("byte index {i} out of range"))
                            .at(&path, span)
                    })
            }
            (object, index) => Err(RuntimeError::type_error(format!(
                "cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ))
            .at(&path, span)),
        }
    }

    fn index_set(
        &self,
        object: &Value,
        index: &Value,
        value: Value,
        span: &Span,
    ) -> Result<(), RuntimeError> {
        let path = self.current_path();
        match (object, index) {
            (Value::List(items), Value::Int(i)) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let slot = usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| {
                        RuntimeError::type_error(format!("index {i} out of range (len {len})"))
                            .at(&path, span)
                    })?;
                *slot = value;
                Ok(())
            }
            (Value::Object(fields), Value::Str(key)) => {
                fields.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            (Value::Map(entries), key) => {
                let key = Key::from_value(key).ok_or_else(|| {
                    RuntimeError::type_error("map keys must be scalars").at(&path, span)
                })?;
                entries.borrow_mut().insert(key, value);
                Ok(())
            }
            (Value::Bytes(bytes), Value::Int(i)) => {
                let byte = value_to_byte(&value)
                    .ok_or_else(|| {
                        RuntimeError::type_error("byte value must be 0..=255").at(&path, span)
                    })?;
                let mut bytes = bytes.borrow_mut();
                if bytes.detached {
                    return Err(RuntimeError::new(
                        ErrorKind::DetachedBuffer,
                        "byte buffer was transferred away",
                    )
                    .at(&path, span));
                }
                let len = bytes.data.len();
                let slot = usize::try_from(*i)
                    .ok()
                    .and_then(|i| bytes.data.get_mut(i))
                    .ok_or_else(|| {
                        RuntimeError::type_error(format!(
                            "byte index {i} out of range (len {len})"
                        ))
                        .at(&path, span)
                    })?;
                *slot = byte;
                Ok(())
            }
            (Value::Shared(cell), Value::Int(i)) => {
                let byte = value_to_byte(&value)
                    .ok_or_else(|| {
                        RuntimeError::type_error("byte value must be 0..=255").at(&path, span)
                    })?;
                let buf = cell.borrow();
                let ok = usize::try_from(*i)
                    .ok()
                    .is_some_and(|i| buf.set_byte(i, byte));
                if ok {
                    Ok(())
                } else {
                    Err(RuntimeError::type_error(format!("byte index {i} out of range"))
                        .at(&path, span))
                }
            }
            (object, index) => Err(RuntimeError::type_error(format!(
                "cannot index-assign {} with {}",
                object.type_name(),
                index.type_name()
            ))
            .at(&path, span)),
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        span: &Span,
        env: &Env,
    ) -> Result<Value, RuntimeError> {
        // Object fields holding callables take precedence so user objects
        // can act as method bags.
        if let Value::Object(fields) = &receiver {
            let field = fields.borrow().get(name).cloned();
            if let Some(callable @ (Value::Lambda(_) | Value::Native(_))) = field {
                return self.call_value(callable, args, span, env);
            }
        }
        self.push_frame(span);
        let result = natives::call_method(self, receiver, name, args, span);
        self.stack.pop();
        result
    }
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

fn value_to_byte(value: &Value) -> Option<u8> {
    match value {
        Value::Int(i) => u8::try_from(*i).ok(),
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

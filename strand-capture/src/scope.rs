//! Scope analysis for spawn lambdas.
//!
//! Finds the `spawn(...)` call containing a recorded byte offset, takes its
//! lambda argument, and partitions every identifier the lambda references
//! as a value into *locals* (bound between the lambda and the module root)
//! and *top-levels* (bound at the module scope of the caller's file,
//! imports included). Names bound inside the lambda itself and names that
//! never resolve (builtins, true globals) are not free and are ignored.
//!
//! Results are cached by call-site key — a spawn site's descriptor depends
//! only on the source text, which the parse cache pins for the process
//! lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, Mutex};

use strand_parser::ast::{Block, Expr, Item, LambdaExpr, Module, Span, Spanned, Stmt};

use crate::callsite::CallSite;
use crate::error::CaptureError;
use crate::source::ParsedSource;

/// Callee identifier that marks a capture-analyzed call.
pub const SPAWN_SENTINEL: &str = "spawn";

/// The two disjoint ordered name sets for one call site.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScopeDescriptor {
    /// Free variables bound in an enclosing scope below the module root,
    /// in first-reference order.
    pub locals: Vec<String>,
    /// Free variables bound at the module scope of the caller's file,
    /// in first-reference order.
    pub top_levels: Vec<String>,
}

/// Everything the bridge emitter and dispatch entry need about one spawn
/// call site.
#[derive(Debug)]
pub struct SpawnCapture {
    pub descriptor: ScopeDescriptor,
    /// Source text of the lambda argument, verbatim.
    pub fn_text: String,
    /// Span of the lambda argument within the caller's file.
    pub fn_span: Span,
    /// The call-site key this capture is cached under.
    pub key: String,
}

static SCOPE_CACHE: LazyLock<Mutex<HashMap<String, Arc<SpawnCapture>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Analyze the spawn call at `site`, consulting the descriptor cache first.
///
/// # Errors
///
/// [`CaptureError::SpawnNotFound`] if no `spawn(...)` call contains the
/// site's offset, [`CaptureError::NotALambda`] if its first argument is not
/// an inline fn expression.
pub fn analyze_call_site(
    src: &ParsedSource,
    site: &CallSite,
) -> Result<Arc<SpawnCapture>, CaptureError> {
    let key = site.key();
    {
        let cache = SCOPE_CACHE
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(capture) = cache.get(&key) {
            return Ok(Arc::clone(capture));
        }
    }

    let not_found = || CaptureError::SpawnNotFound {
        path: src.path.clone(),
        line: site.line,
        col: site.col,
    };
    let offset = src.lines.offset(site.line, site.col).ok_or_else(not_found)?;

    let mut finder = Finder {
        offset,
        frames: Vec::new(),
        best: None,
    };
    finder.module(&src.module);
    let candidate = finder.best.ok_or_else(not_found)?;

    let Some((Expr::Lambda(lambda), lambda_span)) = candidate.lambda else {
        return Err(CaptureError::NotALambda {
            path: src.path.clone(),
            line: site.line,
            col: site.col,
        });
    };

    let mut walker = FreeVars {
        outer: &candidate.frames,
        inner: Vec::new(),
        seen: HashSet::new(),
        descriptor: ScopeDescriptor::default(),
    };
    walker.lambda(lambda);

    let capture = Arc::new(SpawnCapture {
        descriptor: walker.descriptor,
        fn_text: src.text[lambda_span.clone()].to_string(),
        fn_span: lambda_span.clone(),
        key: key.clone(),
    });
    SCOPE_CACHE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(key, Arc::clone(&capture));
    Ok(capture)
}

// ── Binding frames ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// The source-file node: bindings here are top-levels.
    Module,
    /// Any enclosing function, block, or loop body scope.
    Inner,
}

#[derive(Debug, Clone)]
struct BindFrame {
    kind: FrameKind,
    names: HashSet<String>,
}

fn block_lets(block: &Block) -> HashSet<String> {
    block
        .stmts
        .iter()
        .filter_map(|(stmt, _)| match stmt {
            Stmt::Let { name, .. } => Some(name.0.clone()),
            _ => None,
        })
        .collect()
}

// ── Spawn-call finder ───────────────────────────────────────────────────

struct Candidate<'a> {
    call_span: Span,
    /// The call's first argument, if any.
    lambda: Option<&'a Spanned<Expr>>,
    /// Snapshot of the binding frames enclosing the call, outermost first.
    frames: Vec<BindFrame>,
}

/// Walks the module tracking binding frames, looking for the smallest
/// `spawn(...)` call whose text range contains the target offset.
struct Finder<'a> {
    offset: usize,
    frames: Vec<BindFrame>,
    best: Option<Candidate<'a>>,
}

impl<'a> Finder<'a> {
    fn module(&mut self, module: &'a Module) {
        let mut names = HashSet::new();
        for (item, _) in &module.items {
            match item {
                Item::Import(imp) => names.extend(imp.names.iter().map(|(n, _)| n.clone())),
                Item::Fn(decl) => {
                    names.insert(decl.name.0.clone());
                }
                Item::Stmt(Stmt::Let { name, .. }) => {
                    names.insert(name.0.clone());
                }
                Item::Stmt(_) => {}
            }
        }
        self.frames.push(BindFrame {
            kind: FrameKind::Module,
            names,
        });
        for (item, _) in &module.items {
            match item {
                Item::Import(_) => {}
                Item::Fn(decl) => self.function(&decl.params, &decl.body),
                Item::Stmt(stmt) => self.stmt(stmt),
            }
        }
        self.frames.pop();
    }

    fn function(&mut self, params: &'a [Spanned<String>], body: &'a Block) {
        self.frames.push(BindFrame {
            kind: FrameKind::Inner,
            names: params.iter().map(|(n, _)| n.clone()).collect(),
        });
        self.block(body);
        self.frames.pop();
    }

    fn block(&mut self, block: &'a Block) {
        self.frames.push(BindFrame {
            kind: FrameKind::Inner,
            names: block_lets(block),
        });
        for (stmt, _) in &block.stmts {
            self.stmt(stmt);
        }
        self.frames.pop();
    }

    fn stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Let { value, .. } => self.expr(value),
            Stmt::Assign { target, value } => {
                self.expr(target);
                self.expr(value);
            }
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Return(Some(expr)) => self.expr(expr),
            Stmt::Return(None) => {}
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(cond);
                self.block(then_block);
                if let Some(else_block) = else_block {
                    self.block(else_block);
                }
            }
            Stmt::While { cond, body } => {
                self.expr(cond);
                self.block(body);
            }
        }
    }

    fn expr(&mut self, expr: &'a Spanned<Expr>) {
        let (node, span) = expr;
        match node {
            Expr::Call { callee, args } => {
                if let Expr::Ident(name) = &callee.0 {
                    if name == SPAWN_SENTINEL
                        && span.start <= self.offset
                        && self.offset < span.end
                    {
                        let replace = match &self.best {
                            Some(best) => span.end - span.start < best.call_span.end - best.call_span.start,
                            None => true,
                        };
                        if replace {
                            self.best = Some(Candidate {
                                call_span: span.clone(),
                                lambda: args.first(),
                                frames: self.frames.clone(),
                            });
                        }
                    }
                }
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Lambda(lambda) => self.function(&lambda.params, &lambda.body),
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Array(elems) => {
                for elem in elems {
                    self.expr(elem);
                }
            }
            Expr::Object(fields) => {
                for (_, value) in fields {
                    self.expr(value);
                }
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Null
            | Expr::Bool(_)
            | Expr::Int(_)
            | Expr::Float(_)
            | Expr::Str(_)
            | Expr::Ident(_) => {}
        }
    }
}

// ── Free-variable walk ──────────────────────────────────────────────────

/// Walks the spawn lambda's body. `inner` tracks scopes introduced inside
/// the lambda (its own params, block lets, nested lambda params); a name
/// bound there is not free. Anything else resolves against the `outer`
/// frame snapshot, innermost frame first.
struct FreeVars<'a> {
    outer: &'a [BindFrame],
    inner: Vec<HashSet<String>>,
    seen: HashSet<String>,
    descriptor: ScopeDescriptor,
}

impl FreeVars<'_> {
    fn lambda(&mut self, lambda: &LambdaExpr) {
        self.inner
            .push(lambda.params.iter().map(|(n, _)| n.clone()).collect());
        self.block(&lambda.body);
        self.inner.pop();
    }

    fn block(&mut self, block: &Block) {
        self.inner.push(block_lets(block));
        for (stmt, _) in &block.stmts {
            self.stmt(stmt);
        }
        self.inner.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { value, .. } => self.expr(value),
            Stmt::Assign { target, value } => {
                self.expr(target);
                self.expr(value);
            }
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Return(Some(expr)) => self.expr(expr),
            Stmt::Return(None) => {}
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(cond);
                self.block(then_block);
                if let Some(else_block) = else_block {
                    self.block(else_block);
                }
            }
            Stmt::While { cond, body } => {
                self.expr(cond);
                self.block(body);
            }
        }
    }

    fn expr(&mut self, expr: &Spanned<Expr>) {
        match &expr.0 {
            Expr::Ident(name) => self.reference(name),
            Expr::Call { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Lambda(lambda) => self.lambda(lambda),
            // The property name side of a member access is not a value use.
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Array(elems) => {
                for elem in elems {
                    self.expr(elem);
                }
            }
            // Object literal keys are names, not value references.
            Expr::Object(fields) => {
                for (_, value) in fields {
                    self.expr(value);
                }
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => {}
        }
    }

    fn reference(&mut self, name: &str) {
        if self.inner.iter().any(|scope| scope.contains(name)) {
            return;
        }
        if !self.seen.insert(name.to_string()) {
            return;
        }
        // Nearest enclosing binder wins; module-frame hits are top-levels.
        for frame in self.outer.iter().rev() {
            if frame.names.contains(name) {
                match frame.kind {
                    FrameKind::Module => self.descriptor.top_levels.push(name.to_string()),
                    FrameKind::Inner => self.descriptor.locals.push(name.to_string()),
                }
                return;
            }
        }
        // Never resolved: a builtin or true global. Not captured.
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

//! Abstract syntax tree types for the Strand language.

use serde::{Deserialize, Serialize};

/// Source span with byte offsets.
pub type Span = std::ops::Range<usize>;

/// A value with an associated source span.
pub type Spanned<T> = (T, Span);

// ── Module ───────────────────────────────────────────────────────────

/// A parsed source file: a flat list of top-level items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub items: Vec<Spanned<Item>>,
}

// ── Items (top-level declarations) ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Import(ImportDecl),
    Fn(FnDecl),
    /// Any statement at module scope — Strand modules are scripts, and
    /// top-level `let` bindings are the module's top-level identifiers.
    Stmt(Stmt),
}

/// `import { a, b } from "./x.strand";`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDecl {
    /// Imported binding names, in source order.
    pub names: Vec<Spanned<String>>,
    /// Decoded module specifier (the string literal's value).
    pub specifier: String,
    /// Span of the specifier string literal, including the quotes.
    /// The import rewriter splices a replacement literal over this range.
    pub specifier_span: Span,
}

/// `fn name(params) { ... }` at module scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDecl {
    pub name: Spanned<String>,
    pub params: Vec<Spanned<String>>,
    pub body: Block,
}

// ── Statements ───────────────────────────────────────────────────────

/// A brace-delimited statement list. The span covers `{` through `}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `let name = expr;`
    Let {
        name: Spanned<String>,
        value: Spanned<Expr>,
    },
    /// `target = expr;` where target is an identifier, member, or index.
    Assign {
        target: Spanned<Expr>,
        value: Spanned<Expr>,
    },
    /// Bare expression statement.
    Expr(Spanned<Expr>),
    /// `return;` or `return expr;`
    Return(Option<Spanned<Expr>>),
    If {
        cond: Spanned<Expr>,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: Spanned<Expr>,
        body: Block,
    },
}

// ── Expressions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// `fn(params) { ... }` as a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaExpr {
    pub params: Vec<Spanned<String>>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    /// `[a, b, c]`
    Array(Vec<Spanned<Expr>>),
    /// `{ key: value, ... }` — keys are identifiers or string literals.
    Object(Vec<(Spanned<String>, Spanned<Expr>)>),
    Lambda(LambdaExpr),
    Call {
        callee: Box<Spanned<Expr>>,
        args: Vec<Spanned<Expr>>,
    },
    Member {
        object: Box<Spanned<Expr>>,
        name: Spanned<String>,
    },
    Index {
        object: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
}

impl Expr {
    /// Whether this expression may appear on the left of an assignment.
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
        )
    }
}

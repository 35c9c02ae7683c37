//! Hand-written recursive-descent parser with precedence climbing for
//! operator expressions.

use std::cell::Cell;

use strand_lexer::{lex, Token};

use crate::ast::{
    BinaryOp, Block, Expr, FnDecl, ImportDecl, Item, LambdaExpr, Module, Span, Spanned, Stmt,
    UnaryOp,
};

/// Maximum nesting depth for recursive parse functions.
const MAX_DEPTH: usize = 256;

/// Process escape sequences in a string literal body, converting `\n`, `\t`,
/// `\r`, `\\`, `\"`, and `\0` to their corresponding characters. Unknown
/// escapes are preserved as-is.
fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('0') => out.push('\0'),
                Some('\\') | None => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape a string value back into a double-quoted Strand literal.
///
/// Inverse of [`unescape_string`] for the escapes the lexer accepts; used by
/// the bridge emitter and import rewriter when emitting synthetic source.
#[must_use]
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    /// Optional actionable suggestion for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}..{}", self.message, self.span.start, self.span.end)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug)]
pub struct ParseResult {
    pub module: Module,
    pub errors: Vec<ParseError>,
}

/// Parse a complete source file.
#[must_use]
pub fn parse_module(source: &str) -> ParseResult {
    let mut parser = Parser::new(source);
    let module = parser.module();
    ParseResult {
        module,
        errors: parser.errors,
    }
}

/// Parser state wrapping a token stream.
#[derive(Debug)]
pub struct Parser<'src> {
    tokens: Vec<(Token<'src>, strand_lexer::Span)>,
    pos: usize,
    errors: Vec<ParseError>,
    depth: Cell<usize>,
    source_len: usize,
}

impl<'src> Parser<'src> {
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self {
            tokens: lex(source),
            pos: 0,
            errors: Vec::new(),
            depth: Cell::new(0),
            source_len: source.len(),
        }
    }

    // ── Token stream helpers ──────────────────────────────────────────

    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map_or(self.source_len..self.source_len, |(_, s)| s.clone())
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].1.end
        }
    }

    fn advance(&mut self) -> Option<(Token<'src>, Span)> {
        let (tok, span) = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some((tok, span))
    }

    fn eat(&mut self, tok: &Token<'src>) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token<'src>) -> bool {
        if self.eat(tok) {
            true
        } else {
            let found = self
                .peek()
                .map_or("end of input", strand_lexer::Token::describe);
            self.error(format!("expected {}, found {found}", tok.describe()));
            false
        }
    }

    fn expect_semi(&mut self) {
        if !self.eat(&Token::Semi) {
            let span = self.prev_end()..self.prev_end();
            self.errors.push(ParseError {
                message: "expected `;`".into(),
                span,
                hint: Some("statements end with a semicolon".into()),
            });
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let span = self.peek_span();
        self.errors.push(ParseError {
            message: message.into(),
            span,
            hint: None,
        });
    }

    fn ident(&mut self) -> Option<Spanned<String>> {
        if let Some(Token::Ident(name)) = self.peek() {
            let name = (*name).to_string();
            let span = self.peek_span();
            self.pos += 1;
            Some((name, span))
        } else {
            let found = self
                .peek()
                .map_or("end of input", strand_lexer::Token::describe);
            self.error(format!("expected identifier, found {found}"));
            None
        }
    }

    /// Guard against pathological nesting; returns false when exceeded.
    fn enter(&mut self) -> bool {
        let d = self.depth.get();
        if d >= MAX_DEPTH {
            self.error("expression nesting too deep");
            return false;
        }
        self.depth.set(d + 1);
        true
    }

    fn leave(&self) {
        self.depth.set(self.depth.get() - 1);
    }

    // ── Module and items ──────────────────────────────────────────────

    fn module(&mut self) -> Module {
        let mut items = Vec::new();
        while self.peek().is_some() {
            let start = self.peek_span().start;
            let before = self.pos;
            if let Some(item) = self.item() {
                items.push((item, start..self.prev_end()));
            } else if self.pos == before {
                // Recovery: skip the offending token so we always make progress.
                self.advance();
            }
        }
        Module { items }
    }

    fn item(&mut self) -> Option<Item> {
        match self.peek() {
            Some(Token::Import) => self.import_decl().map(Item::Import),
            // `fn name(...)` is a declaration; `fn (...)` is a lambda
            // expression and falls through to the statement parser.
            Some(Token::Fn) if matches!(self.tokens.get(self.pos + 1), Some((Token::Ident(_), _))) => {
                self.fn_decl().map(Item::Fn)
            }
            Some(_) => self.stmt().map(Item::Stmt),
            None => None,
        }
    }

    fn import_decl(&mut self) -> Option<ImportDecl> {
        self.expect(&Token::Import);
        self.expect(&Token::LBrace);
        let mut names = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            names.push(self.ident()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace);
                break;
            }
        }
        self.expect(&Token::From);
        let (specifier, specifier_span) = match self.peek() {
            Some(Token::StrLit(raw)) => {
                let decoded = unescape_string(&raw[1..raw.len() - 1]);
                let span = self.peek_span();
                self.pos += 1;
                (decoded, span)
            }
            _ => {
                self.error("expected module specifier string");
                return None;
            }
        };
        self.expect_semi();
        Some(ImportDecl {
            names,
            specifier,
            specifier_span,
        })
    }

    fn fn_decl(&mut self) -> Option<FnDecl> {
        self.expect(&Token::Fn);
        let name = self.ident()?;
        let params = self.param_list()?;
        let body = self.block()?;
        Some(FnDecl { name, params, body })
    }

    fn param_list(&mut self) -> Option<Vec<Spanned<String>>> {
        self.expect(&Token::LParen);
        let mut params = Vec::new();
        loop {
            if self.eat(&Token::RParen) {
                break;
            }
            params.push(self.ident()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen);
                break;
            }
        }
        Some(params)
    }

    // ── Statements ────────────────────────────────────────────────────

    fn block(&mut self) -> Option<Block> {
        let start = self.peek_span().start;
        if !self.expect(&Token::LBrace) {
            return None;
        }
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let stmt_start = self.peek_span().start;
                    let before = self.pos;
                    if let Some(stmt) = self.stmt() {
                        stmts.push((stmt, stmt_start..self.prev_end()));
                    } else if self.pos == before {
                        self.advance();
                    }
                }
                None => {
                    self.error("unclosed block");
                    break;
                }
            }
        }
        Some(Block {
            stmts,
            span: start..self.prev_end(),
        })
    }

    fn stmt(&mut self) -> Option<Stmt> {
        match self.peek() {
            Some(Token::Let) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Token::Eq);
                let value = self.expr()?;
                self.expect_semi();
                Some(Stmt::Let { name, value })
            }
            Some(Token::Return) => {
                self.pos += 1;
                if self.eat(&Token::Semi) {
                    Some(Stmt::Return(None))
                } else {
                    let value = self.expr()?;
                    self.expect_semi();
                    Some(Stmt::Return(Some(value)))
                }
            }
            Some(Token::If) => self.if_stmt(),
            Some(Token::While) => {
                self.pos += 1;
                self.expect(&Token::LParen);
                let cond = self.expr()?;
                self.expect(&Token::RParen);
                let body = self.block()?;
                Some(Stmt::While { cond, body })
            }
            Some(_) => {
                let expr = self.expr()?;
                if self.eat(&Token::Eq) {
                    if !expr.0.is_assignable() {
                        self.errors.push(ParseError {
                            message: "invalid assignment target".into(),
                            span: expr.1.clone(),
                            hint: Some(
                                "only identifiers, members, and index expressions are assignable"
                                    .into(),
                            ),
                        });
                    }
                    let value = self.expr()?;
                    self.expect_semi();
                    Some(Stmt::Assign {
                        target: expr,
                        value,
                    })
                } else {
                    self.expect_semi();
                    Some(Stmt::Expr(expr))
                }
            }
            None => None,
        }
    }

    fn if_stmt(&mut self) -> Option<Stmt> {
        self.expect(&Token::If);
        self.expect(&Token::LParen);
        let cond = self.expr()?;
        self.expect(&Token::RParen);
        let then_block = self.block()?;
        let else_block = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                // `else if` desugars to an else-block holding a single if.
                let start = self.peek_span().start;
                let stmt = self.if_stmt()?;
                let span = start..self.prev_end();
                Some(Block {
                    stmts: vec![(stmt, span.clone())],
                    span,
                })
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Some(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    // ── Expressions (precedence climbing) ─────────────────────────────

    pub fn expr(&mut self) -> Option<Spanned<Expr>> {
        if !self.enter() {
            return None;
        }
        let result = self.or_expr();
        self.leave();
        result
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> Option<Spanned<Expr>>,
        ops: &[(Token<'src>, BinaryOp)],
    ) -> Option<Spanned<Expr>> {
        let mut lhs = next(self)?;
        loop {
            let Some(tok) = self.peek() else { break };
            let Some((_, op)) = ops.iter().find(|(t, _)| t == tok) else {
                break;
            };
            let op = *op;
            self.pos += 1;
            let rhs = next(self)?;
            let span = lhs.1.start..rhs.1.end;
            lhs = (
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Some(lhs)
    }

    fn or_expr(&mut self) -> Option<Spanned<Expr>> {
        self.binary_chain(Self::and_expr, &[(Token::OrOr, BinaryOp::Or)])
    }

    fn and_expr(&mut self) -> Option<Spanned<Expr>> {
        self.binary_chain(Self::equality_expr, &[(Token::AndAnd, BinaryOp::And)])
    }

    fn equality_expr(&mut self) -> Option<Spanned<Expr>> {
        self.binary_chain(
            Self::comparison_expr,
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::NotEq)],
        )
    }

    fn comparison_expr(&mut self) -> Option<Spanned<Expr>> {
        self.binary_chain(
            Self::additive_expr,
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive_expr(&mut self) -> Option<Spanned<Expr>> {
        self.binary_chain(
            Self::multiplicative_expr,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative_expr(&mut self) -> Option<Spanned<Expr>> {
        self.binary_chain(
            Self::unary_expr,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary_expr(&mut self) -> Option<Spanned<Expr>> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.peek_span().start;
            self.pos += 1;
            if !self.enter() {
                return None;
            }
            let operand = self.unary_expr();
            self.leave();
            let operand = operand?;
            let span = start..operand.1.end;
            Some((
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ))
        } else {
            self.postfix_expr()
        }
    }

    fn postfix_expr(&mut self) -> Option<Spanned<Expr>> {
        let mut expr = self.primary_expr()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    loop {
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        args.push(self.expr()?);
                        if !self.eat(&Token::Comma) {
                            self.expect(&Token::RParen);
                            break;
                        }
                    }
                    let span = expr.1.start..self.prev_end();
                    expr = (
                        Expr::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.ident()?;
                    let span = expr.1.start..name.1.end;
                    expr = (
                        Expr::Member {
                            object: Box::new(expr),
                            name,
                        },
                        span,
                    );
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(&Token::RBracket);
                    let span = expr.1.start..self.prev_end();
                    expr = (
                        Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn primary_expr(&mut self) -> Option<Spanned<Expr>> {
        let span = self.peek_span();
        match self.peek() {
            Some(Token::Null) => {
                self.pos += 1;
                Some((Expr::Null, span))
            }
            Some(Token::True) => {
                self.pos += 1;
                Some((Expr::Bool(true), span))
            }
            Some(Token::False) => {
                self.pos += 1;
                Some((Expr::Bool(false), span))
            }
            Some(Token::IntLit(raw)) => {
                let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
                let value = match cleaned.parse::<i64>() {
                    Ok(v) => v,
                    Err(_) => {
                        self.error("integer literal out of range");
                        0
                    }
                };
                self.pos += 1;
                Some((Expr::Int(value), span))
            }
            Some(Token::FloatLit(raw)) => {
                let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
                let value = cleaned.parse::<f64>().unwrap_or(f64::NAN);
                self.pos += 1;
                Some((Expr::Float(value), span))
            }
            Some(Token::StrLit(raw)) => {
                let decoded = unescape_string(&raw[1..raw.len() - 1]);
                self.pos += 1;
                Some((Expr::Str(decoded), span))
            }
            Some(Token::Ident(name)) => {
                let name = (*name).to_string();
                self.pos += 1;
                Some((Expr::Ident(name), span))
            }
            Some(Token::Fn) => {
                self.pos += 1;
                let params = self.param_list()?;
                let body = self.block()?;
                let full = span.start..self.prev_end();
                Some((Expr::Lambda(LambdaExpr { params, body }), full))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(&Token::RParen);
                // Grouping is transparent; keep the inner node and span.
                Some(inner)
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let mut elems = Vec::new();
                loop {
                    if self.eat(&Token::RBracket) {
                        break;
                    }
                    elems.push(self.expr()?);
                    if !self.eat(&Token::Comma) {
                        self.expect(&Token::RBracket);
                        break;
                    }
                }
                Some((Expr::Array(elems), span.start..self.prev_end()))
            }
            Some(Token::LBrace) => {
                self.pos += 1;
                let mut fields = Vec::new();
                loop {
                    if self.eat(&Token::RBrace) {
                        break;
                    }
                    let key = match self.peek() {
                        Some(Token::Ident(name)) => {
                            let key = ((*name).to_string(), self.peek_span());
                            self.pos += 1;
                            key
                        }
                        Some(Token::StrLit(raw)) => {
                            let key = (unescape_string(&raw[1..raw.len() - 1]), self.peek_span());
                            self.pos += 1;
                            key
                        }
                        _ => {
                            self.error("expected object key");
                            return None;
                        }
                    };
                    self.expect(&Token::Colon);
                    let value = self.expr()?;
                    fields.push((key, value));
                    if !self.eat(&Token::Comma) {
                        self.expect(&Token::RBrace);
                        break;
                    }
                }
                Some((Expr::Object(fields), span.start..self.prev_end()))
            }
            other => {
                let found = other.map_or("end of input", strand_lexer::Token::describe);
                self.error(format!("expected expression, found {found}"));
                None
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        let result = parse_module(source);
        assert!(
            result.errors.is_empty(),
            "unexpected parse errors: {:?}",
            result.errors
        );
        result.module
    }

    fn only_expr(source: &str) -> Spanned<Expr> {
        let module = parse_ok(source);
        assert_eq!(module.items.len(), 1);
        match &module.items[0].0 {
            Item::Stmt(Stmt::Expr(e)) => e.clone(),
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn top_level_let_and_fn() {
        let module = parse_ok("let x = 1;\nfn add(a, b) { return a + b; }\n");
        assert_eq!(module.items.len(), 2);
        assert!(matches!(module.items[0].0, Item::Stmt(Stmt::Let { .. })));
        assert!(matches!(module.items[1].0, Item::Fn(_)));
    }

    #[test]
    fn import_decl_specifier_span() {
        let source = r#"import { a, b } from "./util.strand";"#;
        let module = parse_ok(source);
        let Item::Import(imp) = &module.items[0].0 else {
            panic!("expected import");
        };
        assert_eq!(imp.names.len(), 2);
        assert_eq!(imp.specifier, "./util.strand");
        assert_eq!(&source[imp.specifier_span.clone()], "\"./util.strand\"");
    }

    #[test]
    fn precedence() {
        let (expr, _) = only_expr("1 + 2 * 3;");
        let Expr::Binary { op, rhs, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(
            rhs.0,
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn logical_binds_looser_than_comparison() {
        let (expr, _) = only_expr("a < b && c >= d;");
        let Expr::Binary { op, lhs, rhs } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(lhs.0, Expr::Binary { op: BinaryOp::Lt, .. }));
        assert!(matches!(rhs.0, Expr::Binary { op: BinaryOp::Ge, .. }));
    }

    #[test]
    fn postfix_chain() {
        let (expr, _) = only_expr("obj.field[0](1, 2);");
        let Expr::Call { callee, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        assert!(matches!(callee.0, Expr::Index { .. }));
    }

    #[test]
    fn lambda_expression_span_covers_fn_through_brace() {
        let source = "let f = fn (x) { return x; };";
        let module = parse_ok(source);
        let Item::Stmt(Stmt::Let { value, .. }) = &module.items[0].0 else {
            panic!("expected let");
        };
        assert!(matches!(value.0, Expr::Lambda(_)));
        assert_eq!(&source[value.1.clone()], "fn (x) { return x; }");
    }

    #[test]
    fn spawn_call_shape() {
        let source = "let t = spawn(fn () { return n + 1; });";
        let module = parse_ok(source);
        let Item::Stmt(Stmt::Let { value, .. }) = &module.items[0].0 else {
            panic!("expected let");
        };
        let Expr::Call { callee, args } = &value.0 else {
            panic!("expected call");
        };
        assert!(matches!(&callee.0, Expr::Ident(name) if name == "spawn"));
        assert_eq!(args.len(), 1);
        assert!(matches!(args[0].0, Expr::Lambda(_)));
    }

    #[test]
    fn object_and_array_literals() {
        let (expr, _) = only_expr(r#"{ n: 1, "s": [1, 2.5, "x"] };"#);
        let Expr::Object(fields) = expr else {
            panic!("expected object");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].0 .0, "n");
        assert_eq!(fields[1].0 .0, "s");
        assert!(matches!(fields[1].1 .0, Expr::Array(ref v) if v.len() == 3));
    }

    #[test]
    fn assignment_targets() {
        let module = parse_ok("x = 1; a.b = 2; c[0] = 3;");
        assert_eq!(module.items.len(), 3);
        for (item, _) in &module.items {
            assert!(matches!(item, Item::Stmt(Stmt::Assign { .. })));
        }
    }

    #[test]
    fn invalid_assignment_target_reports() {
        let result = parse_module("1 + 2 = 3;");
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("invalid assignment target")));
    }

    #[test]
    fn else_if_chain() {
        let module = parse_ok("if (a) { x = 1; } else if (b) { x = 2; } else { x = 3; }");
        let Item::Stmt(Stmt::If { else_block, .. }) = &module.items[0].0 else {
            panic!("expected if");
        };
        let else_block = else_block.as_ref().expect("else block");
        assert!(matches!(else_block.stmts[0].0, Stmt::If { .. }));
    }

    #[test]
    fn missing_semi_has_hint() {
        let result = parse_module("let x = 1");
        assert!(result.errors.iter().any(|e| e.hint.is_some()));
    }

    #[test]
    fn recovery_continues_past_garbage() {
        let result = parse_module("let x = 1; @ let y = 2;");
        assert!(!result.errors.is_empty());
        let lets = result
            .module
            .items
            .iter()
            .filter(|(i, _)| matches!(i, Item::Stmt(Stmt::Let { .. })))
            .count();
        assert_eq!(lets, 2);
    }

    #[test]
    fn quote_string_round_trip() {
        let original = "line\n\"quoted\"\\tail";
        let quoted = quote_string(original);
        let decoded = unescape_string(&quoted[1..quoted.len() - 1]);
        assert_eq!(decoded, original);
    }
}

//! Tokenizer for Strand source text, built on a [`logos`]-derived DFA.
//!
//! The parser consumes the whole token stream up front, so the entry point
//! is a single [`lex`] call rather than an incremental lexer handle. Spans
//! are plain byte ranges into the input (the same representation the AST
//! uses, so no conversion happens at the parser boundary). Whitespace and
//! `//` comments never reach the parser; bytes the DFA rejects surface as
//! [`Token::Error`] so the parser can report them with a position instead
//! of bailing out.

use logos::Logos;

/// Byte range of a token within its source text.
pub type Span = std::ops::Range<usize>;

/// Tokenize `source`, mapping every lexer rejection to [`Token::Error`].
#[must_use]
pub fn lex(source: &str) -> Vec<(Token<'_>, Span)> {
    Token::lexer(source)
        .spanned()
        .map(|(result, span)| (result.unwrap_or(Token::Error), span))
        .collect()
}

/// A single token produced by the Strand lexer.
#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n]+")] // skip whitespace
#[logos(skip r"//[^\n]*")] // skip line comments
pub enum Token<'src> {
    // ── Keywords ──────────────────────────────────────────────────────
    #[token("let")]
    Let,
    #[token("fn")]
    Fn,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // ── Literals and identifiers ──────────────────────────────────────
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident(&'src str),
    /// Floating-point literal. Matched before plain integers.
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*", priority = 4)]
    FloatLit(&'src str),
    #[regex(r"[0-9][0-9_]*", priority = 3)]
    IntLit(&'src str),
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    StrLit(&'src str),

    // ── Punctuation ───────────────────────────────────────────────────
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    // ── Operators ─────────────────────────────────────────────────────
    #[token("=")]
    Eq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    /// Invalid input byte.
    Error,
}

impl Token<'_> {
    /// Human-readable token description for parse error messages.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Token::Let => "`let`",
            Token::Fn => "`fn`",
            Token::Import => "`import`",
            Token::From => "`from`",
            Token::Return => "`return`",
            Token::If => "`if`",
            Token::Else => "`else`",
            Token::While => "`while`",
            Token::True | Token::False => "boolean literal",
            Token::Null => "`null`",
            Token::Ident(_) => "identifier",
            Token::FloatLit(_) => "float literal",
            Token::IntLit(_) => "integer literal",
            Token::StrLit(_) => "string literal",
            Token::LParen => "`(`",
            Token::RParen => "`)`",
            Token::LBrace => "`{`",
            Token::RBrace => "`}`",
            Token::LBracket => "`[`",
            Token::RBracket => "`]`",
            Token::Comma => "`,`",
            Token::Semi => "`;`",
            Token::Colon => "`:`",
            Token::Dot => "`.`",
            Token::Eq => "`=`",
            Token::EqEq => "`==`",
            Token::NotEq => "`!=`",
            Token::Lt => "`<`",
            Token::Le => "`<=`",
            Token::Gt => "`>`",
            Token::Ge => "`>=`",
            Token::Plus => "`+`",
            Token::Minus => "`-`",
            Token::Star => "`*`",
            Token::Slash => "`/`",
            Token::Percent => "`%`",
            Token::AndAnd => "`&&`",
            Token::OrOr => "`||`",
            Token::Bang => "`!`",
            Token::Error => "invalid token",
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token<'_>> {
        lex(source).into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("let x = fn spawn"),
            vec![
                Token::Let,
                Token::Ident("x"),
                Token::Eq,
                Token::Fn,
                Token::Ident("spawn"),
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            kinds("1 23 1.5 123.45"),
            vec![
                Token::IntLit("1"),
                Token::IntLit("23"),
                Token::FloatLit("1.5"),
                Token::FloatLit("123.45"),
            ]
        );
    }

    #[test]
    fn string_literal_with_escapes() {
        assert_eq!(
            kinds(r#""hi \"there\"""#),
            vec![Token::StrLit(r#""hi \"there\"""#)]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("let a = 1; // trailing\n// whole line\nlet b = 2;"),
            vec![
                Token::Let,
                Token::Ident("a"),
                Token::Eq,
                Token::IntLit("1"),
                Token::Semi,
                Token::Let,
                Token::Ident("b"),
                Token::Eq,
                Token::IntLit("2"),
                Token::Semi,
            ]
        );
    }

    #[test]
    fn spans_are_byte_ranges() {
        let toks = lex("ab + cd");
        assert_eq!(toks[0].1, 0..2);
        assert_eq!(toks[1].1, 3..4);
        assert_eq!(toks[2].1, 5..7);
    }

    #[test]
    fn two_char_operators_win() {
        assert_eq!(
            kinds("a <= b == c && d"),
            vec![
                Token::Ident("a"),
                Token::Le,
                Token::Ident("b"),
                Token::EqEq,
                Token::Ident("c"),
                Token::AndAnd,
                Token::Ident("d"),
            ]
        );
    }

    #[test]
    fn invalid_byte_is_error_token() {
        let toks = kinds("let @ x");
        assert_eq!(toks, vec![Token::Let, Token::Error, Token::Ident("x")]);
    }
}

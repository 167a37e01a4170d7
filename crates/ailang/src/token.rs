use std::fmt;

use crate::span::Span;

/// A lexical token.
///
/// Newlines never appear here: the lexer treats them as plain whitespace,
/// which is what makes multi-line expressions parse without continuation
/// rules. See [`crate::lexer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    #[must_use]
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Reserved words of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    Module,
    Import,
    Export,
    Func,
    Let,
    Letrec,
    In,
    If,
    Then,
    Else,
    Match,
    Type,
    Class,
    Instance,
    True,
    False,
}

/// The kind (and payload) of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals and names. Escape processing happens in the lexer, so the
    // payloads here are already the decoded values.
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Ident(String),
    Keyword(Keyword),

    // Operators.
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AmpAmp,
    PipePipe,
    Bang,
    Eq,
    Arrow,
    FatArrow,
    ColonColon,
    Backslash,

    // Punctuation.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Colon,
    Comma,
    Dot,
    DotDotDot,
    Pipe,

    Eof,
}

impl TokenKind {
    /// Short human-readable description used in "expected X, found Y" errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Int(n) => format!("integer literal `{n}`"),
            Self::Float(x) => format!("float literal `{x}`"),
            Self::Str(_) => "string literal".to_owned(),
            Self::Char(c) => format!("char literal `{c}`"),
            Self::Ident(name) => format!("identifier `{name}`"),
            Self::Keyword(kw) => format!("keyword `{kw}`"),
            Self::Eof => "end of input".to_owned(),
            other => format!("`{}`", other.symbol()),
        }
    }

    /// The literal spelling of a fixed token, used by [`Self::describe`].
    fn symbol(&self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::StarStar => "**",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::PlusPlus => "++",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::AmpAmp => "&&",
            Self::PipePipe => "||",
            Self::Bang => "!",
            Self::Eq => "=",
            Self::Arrow => "->",
            Self::FatArrow => "=>",
            Self::ColonColon => "::",
            Self::Backslash => "\\",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Semicolon => ";",
            Self::Colon => ":",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::DotDotDot => "...",
            Self::Pipe => "|",
            _ => unreachable!("symbol() called on a payload token"),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

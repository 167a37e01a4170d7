//! The scanner: UTF-8 source text to a token stream.
//!
//! Two properties here are load-bearing for the rest of the pipeline:
//!
//! - Newlines are whitespace, never tokens. `skip_trivia` consumes spaces,
//!   tabs, carriage returns and newlines uniformly, so expressions split
//!   across lines tokenize the same as single-line ones.
//! - Every token carries a [`Span`]; the lexer is the only place line and
//!   column are ever counted.
//!
//! Comments are `--` to end of line and `(*` ... `*)` with nesting. String
//! literals support `\n \t \r \" \\ \b \f \xHH \uHHHH` escapes; `r"..."`
//! raw strings take their contents verbatim.

use std::str::FromStr;

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    span::{Pos, Span},
    token::{Keyword, Token, TokenKind},
};

/// Tokenizes an entire source string.
///
/// Fails on the first lexical error (invalid character, unterminated
/// string or comment, invalid escape), with a span pointing at it.
pub fn tokenize(source: &str) -> DiagResult<Vec<Token>> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let at_end = token.kind == TokenKind::Eof;
        tokens.push(token);
        if at_end {
            return Ok(tokens);
        }
    }
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// Consumes whitespace (including newlines) and comments.
    fn skip_trivia(&mut self) -> DiagResult<()> {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.bump();
                }
                Some('-') if self.peek2() == Some('-') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('(') if self.peek2() == Some('*') => {
                    self.block_comment()?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Consumes a `(* ... *)` comment, tracking nesting.
    fn block_comment(&mut self) -> DiagResult<()> {
        let start = self.pos();
        self.bump();
        self.bump();
        let mut depth = 1u32;
        while depth > 0 {
            match self.peek() {
                Some('(') if self.peek2() == Some('*') => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                Some('*') if self.peek2() == Some(')') => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                }
                Some(_) => {
                    self.bump();
                }
                None => {
                    return Err(Diagnostic::lex(
                        ErrorCode::LexUnterminatedComment,
                        "unterminated block comment",
                        Span::new(start, self.pos()),
                    ));
                }
            }
        }
        Ok(())
    }

    fn next_token(&mut self) -> DiagResult<Token> {
        self.skip_trivia()?;
        let start = self.pos();
        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, Span::new(start, start)));
        };

        let kind = match c {
            '0'..='9' => return self.number(start),
            '"' => return self.string(start, false),
            'r' if self.peek2() == Some('"') => {
                self.bump();
                return self.string(start, true);
            }
            '\'' => return self.char_literal(start),
            c if c.is_alphabetic() || c == '_' => return Ok(self.ident(start)),
            '+' => {
                self.bump();
                if self.peek() == Some('+') {
                    self.bump();
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                self.bump();
                if self.peek() == Some('>') {
                    self.bump();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                self.bump();
                if self.peek() == Some('*') {
                    self.bump();
                    TokenKind::StarStar
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                self.bump();
                TokenKind::Slash
            }
            '%' => {
                self.bump();
                TokenKind::Percent
            }
            '=' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        TokenKind::EqEq
                    }
                    Some('>') => {
                        self.bump();
                        TokenKind::FatArrow
                    }
                    _ => TokenKind::Eq,
                }
            }
            '!' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' if self.peek2() == Some('&') => {
                self.bump();
                self.bump();
                TokenKind::AmpAmp
            }
            '|' => {
                self.bump();
                if self.peek() == Some('|') {
                    self.bump();
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            ':' => {
                self.bump();
                if self.peek() == Some(':') {
                    self.bump();
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            '\\' => {
                self.bump();
                TokenKind::Backslash
            }
            '(' => {
                self.bump();
                TokenKind::LParen
            }
            ')' => {
                self.bump();
                TokenKind::RParen
            }
            '{' => {
                self.bump();
                TokenKind::LBrace
            }
            '}' => {
                self.bump();
                TokenKind::RBrace
            }
            '[' => {
                self.bump();
                TokenKind::LBracket
            }
            ']' => {
                self.bump();
                TokenKind::RBracket
            }
            ';' => {
                self.bump();
                TokenKind::Semicolon
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            '.' => {
                self.bump();
                if self.peek() == Some('.') && self.peek2() == Some('.') {
                    self.bump();
                    self.bump();
                    TokenKind::DotDotDot
                } else {
                    TokenKind::Dot
                }
            }
            other => {
                return Err(Diagnostic::lex(
                    ErrorCode::LexInvalidChar,
                    format!("invalid character `{other}`"),
                    Span::new(start, self.pos()),
                ));
            }
        };
        Ok(Token::new(kind, Span::new(start, self.pos())))
    }

    fn ident(&mut self, start: Pos) -> Token {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = match Keyword::from_str(&name) {
            Ok(kw) => TokenKind::Keyword(kw),
            Err(_) => TokenKind::Ident(name),
        };
        Token::new(kind, Span::new(start, self.pos()))
    }

    fn number(&mut self, start: Pos) -> DiagResult<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        // A `.` is part of the number only when followed by a digit, so
        // `xs.head` and `1.. ` style inputs don't eat the dot.
        if self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                text.push(self.bump().expect("peeked sign"));
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(Diagnostic::lex(
                    ErrorCode::LexBadNumber,
                    "exponent has no digits",
                    Span::new(start, self.pos()),
                ));
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let span = Span::new(start, self.pos());
        let kind = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| Diagnostic::lex(ErrorCode::LexBadNumber, format!("invalid float literal `{text}`"), span))?;
            TokenKind::Float(value)
        } else {
            let value: i64 = text.parse().map_err(|_| {
                Diagnostic::lex(
                    ErrorCode::LexBadNumber,
                    format!("integer literal `{text}` out of range"),
                    span,
                )
            })?;
            TokenKind::Int(value)
        };
        Ok(Token::new(kind, span))
    }

    fn string(&mut self, start: Pos, raw: bool) -> DiagResult<Token> {
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(Diagnostic::lex(
                        ErrorCode::LexUnterminatedString,
                        "unterminated string literal",
                        Span::new(start, self.pos()),
                    ));
                }
                Some('"') => {
                    self.bump();
                    return Ok(Token::new(TokenKind::Str(value), Span::new(start, self.pos())));
                }
                Some('\\') if !raw => {
                    self.bump();
                    value.push(self.escape(start)?);
                }
                Some('\n') if !raw => {
                    return Err(Diagnostic::lex(
                        ErrorCode::LexUnterminatedString,
                        "unterminated string literal",
                        Span::new(start, self.pos()),
                    ));
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    fn char_literal(&mut self, start: Pos) -> DiagResult<Token> {
        self.bump(); // opening quote
        let c = match self.peek() {
            Some('\\') => {
                self.bump();
                self.escape(start)?
            }
            Some(c) => {
                self.bump();
                c
            }
            None => {
                return Err(Diagnostic::lex(
                    ErrorCode::LexUnterminatedString,
                    "unterminated char literal",
                    Span::new(start, self.pos()),
                ));
            }
        };
        if self.peek() != Some('\'') {
            return Err(Diagnostic::lex(
                ErrorCode::LexUnterminatedString,
                "unterminated char literal",
                Span::new(start, self.pos()),
            ));
        }
        self.bump();
        Ok(Token::new(TokenKind::Char(c), Span::new(start, self.pos())))
    }

    /// Decodes one escape sequence; the leading backslash is already consumed.
    fn escape(&mut self, start: Pos) -> DiagResult<char> {
        let err = |lexer: &Self, what: String| {
            Diagnostic::lex(ErrorCode::LexInvalidEscape, what, Span::new(start, lexer.pos()))
        };
        let Some(c) = self.bump() else {
            return Err(err(self, "unterminated escape sequence".to_owned()));
        };
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{0008}',
            'f' => '\u{000C}',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            'x' => {
                let hi = self.hex_digit(start)?;
                let lo = self.hex_digit(start)?;
                char::from(hi * 16 + lo)
            }
            'u' => {
                let mut code: u32 = 0;
                for _ in 0..4 {
                    code = code * 16 + u32::from(self.hex_digit(start)?);
                }
                char::from_u32(code).ok_or_else(|| err(self, format!("invalid unicode escape \\u{code:04X}")))?
            }
            other => return Err(err(self, format!("invalid escape sequence `\\{other}`"))),
        })
    }

    fn hex_digit(&mut self, start: Pos) -> DiagResult<u8> {
        match self.bump().and_then(|c| c.to_digit(16)) {
            Some(d) => Ok(u8::try_from(d).expect("hex digit fits in u8")),
            None => Err(Diagnostic::lex(
                ErrorCode::LexInvalidEscape,
                "expected hex digit in escape sequence",
                Span::new(start, self.pos()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn newlines_are_whitespace_not_tokens() {
        let one_line = kinds("let x = 1 in x");
        let multi_line = kinds("let x =\n  1\nin\n  x");
        assert_eq!(one_line, multi_line);
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("letrec f in g"),
            vec![
                TokenKind::Keyword(Keyword::Letrec),
                TokenKind::Ident("f".to_owned()),
                TokenKind::Keyword(Keyword::In),
                TokenKind::Ident("g".to_owned()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn maximal_munch_operators() {
        assert_eq!(
            kinds("** * ++ + -> - == => = != ! :: : || | ..."),
            vec![
                TokenKind::StarStar,
                TokenKind::Star,
                TokenKind::PlusPlus,
                TokenKind::Plus,
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::EqEq,
                TokenKind::FatArrow,
                TokenKind::Eq,
                TokenKind::NotEq,
                TokenKind::Bang,
                TokenKind::ColonColon,
                TokenKind::Colon,
                TokenKind::PipePipe,
                TokenKind::Pipe,
                TokenKind::DotDotDot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("42 3.5 1e3 2.5e-1 1_000"),
            vec![
                TokenKind::Int(42),
                TokenKind::Float(3.5),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.25),
                TokenKind::Int(1000),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn field_access_does_not_eat_dot() {
        assert_eq!(
            kinds("e.id"),
            vec![
                TokenKind::Ident("e".to_owned()),
                TokenKind::Dot,
                TokenKind::Ident("id".to_owned()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\x41B""#),
            vec![TokenKind::Str("a\nbAB".to_owned()), TokenKind::Eof]
        );
    }

    #[test]
    fn raw_strings_keep_backslashes() {
        assert_eq!(
            kinds(r#"r"a\nb""#),
            vec![TokenKind::Str("a\\nb".to_owned()), TokenKind::Eof]
        );
    }

    #[test]
    fn comments_nest() {
        assert_eq!(
            kinds("1 (* outer (* inner *) still out *) 2 -- trailing\n3"),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Int(3), TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_comment_errors() {
        let err = tokenize("(* never closed").unwrap_err();
        assert_eq!(err.code, ErrorCode::LexUnterminatedComment);
    }

    #[test]
    fn unterminated_string_errors() {
        let err = tokenize("\"oops").unwrap_err();
        assert_eq!(err.code, ErrorCode::LexUnterminatedString);
    }

    #[test]
    fn invalid_escape_errors() {
        let err = tokenize(r#""\q""#).unwrap_err();
        assert_eq!(err.code, ErrorCode::LexInvalidEscape);
    }
}

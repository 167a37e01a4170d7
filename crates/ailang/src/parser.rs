//! The Pratt parser: tokens to surface AST.
//!
//! Precedence, low to high: `||`, `&&`, comparisons, `++`, `+ -`, `* / %`,
//! unary `- !`, `**` (right-associative), application, `.` field access,
//! primary. Application is always parenthesized call syntax (`f(x, y)`).
//!
//! The `{` ambiguity is resolved by lookahead: `{ ident :` is a record
//! literal, `{ ident |` is a record update, everything else is a block.
//! An empty `{}` is rejected with `BLOCK_EMPTY`.

use std::str::FromStr;

use strum::IntoEnumIterator;

use crate::{
    ast::{
        Arm, BinOp, CtorDecl, Decl, EffectAnn, Expr, ExprKind, FuncDecl, Import, Lit, Module, Param, Pattern,
        PatternKind, SType, STypeKind, TypeBody, TypeDecl, UnOp,
    },
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    lexer::tokenize,
    span::Span,
    token::{Keyword, Token, TokenKind},
    types::Effect,
};

/// Maximum nesting depth for recursive structures during parsing.
/// Prevents stack overflow on adversarial input like `((((((...))))))`.
#[cfg(not(debug_assertions))]
const MAX_NESTING_DEPTH: u16 = 200;
/// Lower in debug builds, where stack frames are much larger.
#[cfg(debug_assertions)]
const MAX_NESTING_DEPTH: u16 = 60;

/// Parses a module file (one that starts with a `module` header).
pub fn parse_module_source(source: &str, file: &str) -> DiagResult<Module> {
    let tokens = tokenize(source).map_err(|d| d.with_file(file))?;
    let mut parser = Parser::new(tokens, file);
    parser.module()
}

/// Parses a source file, deciding between module and script form.
///
/// A file is a module file if its first significant token is `module`.
/// Otherwise it is a script: a declaration list optionally ending in a bare
/// expression, which becomes an exported `main` with inferred effects.
pub fn parse_source(source: &str, file: &str, default_path: &str) -> DiagResult<Module> {
    let tokens = tokenize(source).map_err(|d| d.with_file(file))?;
    let mut parser = Parser::new(tokens, file);
    if parser.at_keyword(Keyword::Module) {
        parser.module()
    } else {
        parser.script(default_path)
    }
}

/// One line of REPL input.
#[derive(Debug)]
pub enum ReplItem {
    Decl(Decl),
    /// `let name = expr` without `in`: a session binding.
    Binding(String, Expr),
    Expr(Expr),
}

/// Parses one REPL line: a declaration, a session binding, or an expression.
pub fn parse_repl_line(source: &str) -> DiagResult<ReplItem> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, "<repl>");
    let item = parser.repl_item()?;
    parser.expect_eof()?;
    Ok(item)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: String,
    depth_remaining: u16,
}

impl Parser {
    fn new(tokens: Vec<Token>, file: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            file: file.to_owned(),
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    // --- token plumbing ---

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn at_keyword(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.at_keyword(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let found = self.peek_kind().describe();
        Diagnostic::parse(
            ErrorCode::ParUnexpectedToken,
            format!("expected {expected}, found {found}"),
            self.span(),
        )
        .with_file(self.file.clone())
        .with_data("expected", expected)
        .with_data("found", found)
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> DiagResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword, expected: &str) -> DiagResult<Token> {
        if self.at_keyword(kw) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> DiagResult<(String, Span)> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let span = self.span();
                self.bump();
                Ok((name, span))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_eof(&mut self) -> DiagResult<()> {
        if self.at(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn descend<T>(&mut self, f: impl FnOnce(&mut Self) -> DiagResult<T>) -> DiagResult<T> {
        if self.depth_remaining == 0 {
            return Err(self.unexpected("shallower nesting (expression too deeply nested)"));
        }
        self.depth_remaining -= 1;
        let result = f(self);
        self.depth_remaining += 1;
        result
    }

    // --- modules and declarations ---

    fn module(&mut self) -> DiagResult<Module> {
        self.expect_keyword(Keyword::Module, "`module` header")?;
        let path = self.module_path()?;
        self.eat(&TokenKind::Semicolon);

        let mut imports = Vec::new();
        while self.at_keyword(Keyword::Import) {
            imports.push(self.import()?);
            self.eat(&TokenKind::Semicolon);
        }

        let mut decls = Vec::new();
        while !self.at(&TokenKind::Eof) {
            decls.push(self.decl()?);
            self.eat(&TokenKind::Semicolon);
        }
        Ok(Module { path, imports, decls })
    }

    fn script(&mut self, default_path: &str) -> DiagResult<Module> {
        let mut imports = Vec::new();
        while self.at_keyword(Keyword::Import) {
            imports.push(self.import()?);
            self.eat(&TokenKind::Semicolon);
        }
        let mut decls = Vec::new();
        loop {
            if self.at(&TokenKind::Eof) {
                break;
            }
            if self.at_decl_start() {
                decls.push(self.decl()?);
                self.eat(&TokenKind::Semicolon);
                continue;
            }
            // Trailing expression: becomes the script's `main`.
            let span = self.span();
            let body = self.expr()?;
            self.eat(&TokenKind::Semicolon);
            self.expect_eof()?;
            decls.push(Decl::Func(FuncDecl {
                name: "main".to_owned(),
                type_params: Vec::new(),
                params: Vec::new(),
                return_type: None,
                effects: EffectAnn::Infer,
                body,
                exported: true,
                span,
            }));
            break;
        }
        Ok(Module {
            path: default_path.to_owned(),
            imports,
            decls,
        })
    }

    fn at_decl_start(&self) -> bool {
        match self.peek_kind() {
            TokenKind::Keyword(Keyword::Func | Keyword::Type) => true,
            TokenKind::Keyword(Keyword::Export) => {
                matches!(self.peek_at(1), TokenKind::Keyword(Keyword::Func | Keyword::Type))
            }
            _ => false,
        }
    }

    fn module_path(&mut self) -> DiagResult<String> {
        let (first, _) = self.expect_ident("module path")?;
        let mut path = first;
        while self.eat(&TokenKind::Slash) {
            let (part, _) = self.expect_ident("module path segment")?;
            path.push('/');
            path.push_str(&part);
        }
        Ok(path)
    }

    fn import(&mut self) -> DiagResult<Import> {
        let start = self.span();
        self.expect_keyword(Keyword::Import, "`import`")?;
        let path = self.module_path()?;
        let mut symbols = Vec::new();
        if self.eat(&TokenKind::LParen) {
            loop {
                let (name, _) = self.expect_ident("imported symbol")?;
                symbols.push(name);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "`)` after import list")?;
        }
        Ok(Import {
            path,
            symbols,
            span: start,
        })
    }

    fn decl(&mut self) -> DiagResult<Decl> {
        let exported = self.eat_keyword(Keyword::Export);
        if self.at_keyword(Keyword::Type) {
            self.type_decl(exported).map(Decl::Type)
        } else if self.at_keyword(Keyword::Func) {
            self.func_decl(exported).map(Decl::Func)
        } else {
            Err(self.unexpected("`func` or `type` declaration"))
        }
    }

    fn type_decl(&mut self, exported: bool) -> DiagResult<TypeDecl> {
        let start = self.span();
        self.expect_keyword(Keyword::Type, "`type`")?;
        let (name, _) = self.expect_ident("type name")?;
        let mut params = Vec::new();
        if self.eat(&TokenKind::LBracket) {
            loop {
                let (param, _) = self.expect_ident("type parameter")?;
                params.push(param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket, "`]` after type parameters")?;
        }
        self.expect(&TokenKind::Eq, "`=` in type declaration")?;

        // `type T = B` is an alias unless B contains a top-level `|`
        // (sum type) or starts with `{` (record type).
        let body = if self.at(&TokenKind::LBrace) {
            self.bump();
            let fields = self.record_type_fields()?;
            TypeBody::Record(fields)
        } else if self.body_has_top_level_pipe() {
            let mut ctors = vec![self.ctor_decl()?];
            while self.eat(&TokenKind::Pipe) {
                ctors.push(self.ctor_decl()?);
            }
            TypeBody::Algebraic(ctors)
        } else {
            TypeBody::Alias(self.stype()?)
        };
        Ok(TypeDecl {
            name,
            params,
            body,
            exported,
            span: start,
        })
    }

    /// Scans ahead for a `|` at bracket depth zero before the declaration ends.
    fn body_has_top_level_pipe(&self) -> bool {
        let mut depth = 0i32;
        let mut offset = 0usize;
        loop {
            match self.peek_at(offset) {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                TokenKind::Pipe if depth == 0 => return true,
                TokenKind::Semicolon if depth == 0 => return false,
                TokenKind::Keyword(Keyword::Export | Keyword::Type | Keyword::Func) if depth == 0 => return false,
                TokenKind::Eof => return false,
                _ => {}
            }
            offset += 1;
        }
    }

    fn ctor_decl(&mut self) -> DiagResult<CtorDecl> {
        let span = self.span();
        let (name, _) = self.expect_ident("constructor name")?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::LParen) {
            if !self.at(&TokenKind::RParen) {
                loop {
                    args.push(self.stype()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "`)` after constructor arguments")?;
        }
        Ok(CtorDecl { name, args, span })
    }

    fn record_type_fields(&mut self) -> DiagResult<Vec<(String, SType)>> {
        let mut fields = Vec::new();
        if !self.at(&TokenKind::RBrace) {
            loop {
                let (label, _) = self.expect_ident("record field label")?;
                self.expect(&TokenKind::Colon, "`:` after field label")?;
                fields.push((label, self.stype()?));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace, "`}` after record fields")?;
        Ok(fields)
    }

    fn func_decl(&mut self, exported: bool) -> DiagResult<FuncDecl> {
        let start = self.span();
        self.expect_keyword(Keyword::Func, "`func`")?;
        let (name, _) = self.expect_ident("function name")?;

        // Generic header `func name[T, U](...)`: after the type parameter
        // list the parser sits on the opening `(` and must not skip it.
        let mut type_params = Vec::new();
        if self.eat(&TokenKind::LBracket) {
            loop {
                let (param, _) = self.expect_ident("type parameter")?;
                type_params.push(param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket, "`]` after type parameters")?;
        }

        let params = self.param_list()?;
        let return_type = if self.eat(&TokenKind::Arrow) {
            Some(self.stype()?)
        } else {
            None
        };
        let effects = self.effect_annotation()?;
        let body = if self.at(&TokenKind::LBrace) {
            self.block_body()?
        } else if self.eat(&TokenKind::FatArrow) {
            self.expr()?
        } else {
            return Err(self.unexpected("function body (`{` or `=>`)"));
        };
        Ok(FuncDecl {
            name,
            type_params,
            params,
            return_type,
            effects,
            body,
            exported,
            span: start,
        })
    }

    fn param_list(&mut self) -> DiagResult<Vec<Param>> {
        self.expect(&TokenKind::LParen, "`(` before parameters")?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let (name, span) = self.expect_ident("parameter name")?;
                let ty = if self.eat(&TokenKind::Colon) {
                    Some(self.stype()?)
                } else {
                    None
                };
                params.push(Param { name, ty, span });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)` after parameters")?;
        Ok(params)
    }

    /// Parses `! { IO, FS }` if present.
    ///
    /// Effect names are validated against the canonical set right here:
    /// unknown names are `PAR_EFF002` (with a suggestion when one is close),
    /// duplicates are `PAR_EFF001`. Absence means *pure*, not an empty row.
    fn effect_annotation(&mut self) -> DiagResult<EffectAnn> {
        if !self.eat(&TokenKind::Bang) {
            return Ok(EffectAnn::Pure);
        }
        self.expect(&TokenKind::LBrace, "`{` after `!`")?;
        let mut effects: Vec<(String, Span)> = Vec::new();
        if !self.at(&TokenKind::RBrace) {
            loop {
                let (name, span) = self.expect_ident("effect name")?;
                if Effect::from_str(&name).is_err() {
                    let mut diag = Diagnostic::parse(
                        ErrorCode::ParUnknownEffect,
                        format!("unknown effect `{name}`"),
                        span,
                    )
                    .with_file(self.file.clone())
                    .with_data("effect", name.clone());
                    if let Some(suggestion) = suggest_effect(&name) {
                        diag = diag.with_fix(format!("did you mean `{suggestion}`?"), 0.8);
                    }
                    return Err(diag);
                }
                if effects.iter().any(|(existing, _)| existing == &name) {
                    return Err(Diagnostic::parse(
                        ErrorCode::ParDuplicateEffect,
                        format!("duplicate effect `{name}` in annotation"),
                        span,
                    )
                    .with_file(self.file.clone())
                    .with_data("effect", name));
                }
                effects.push((name, span));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace, "`}` after effect list")?;
        Ok(EffectAnn::Declared(effects))
    }

    // --- types ---

    fn stype(&mut self) -> DiagResult<SType> {
        self.descend(Self::stype_inner)
    }

    fn stype_inner(&mut self) -> DiagResult<SType> {
        let start = self.span();
        match self.peek_kind().clone() {
            TokenKind::LParen => {
                self.bump();
                let mut items = Vec::new();
                if !self.at(&TokenKind::RParen) {
                    loop {
                        items.push(self.stype()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "`)` in type")?;
                if self.eat(&TokenKind::Arrow) {
                    let ret = self.stype()?;
                    let effects = self.effect_annotation()?;
                    return Ok(SType {
                        kind: STypeKind::Func {
                            params: items,
                            ret: Box::new(ret),
                            effects,
                        },
                        span: start,
                    });
                }
                let kind = match items.len() {
                    0 => STypeKind::Unit,
                    1 => return Ok(items.into_iter().next().expect("one item")),
                    _ => STypeKind::Tuple(items),
                };
                Ok(SType { kind, span: start })
            }
            TokenKind::LBracket => {
                self.bump();
                let inner = self.stype()?;
                self.expect(&TokenKind::RBracket, "`]` after list element type")?;
                Ok(SType {
                    kind: STypeKind::List(Box::new(inner)),
                    span: start,
                })
            }
            TokenKind::LBrace => {
                self.bump();
                let fields = self.record_type_fields()?;
                Ok(SType {
                    kind: STypeKind::Record(fields),
                    span: start,
                })
            }
            TokenKind::Ident(name) => {
                self.bump();
                let kind = match name.as_str() {
                    "int" => STypeKind::Int,
                    "float" => STypeKind::Float,
                    "string" => STypeKind::Str,
                    "bool" => STypeKind::Bool,
                    "char" => STypeKind::Char,
                    _ => {
                        if self.eat(&TokenKind::LBracket) {
                            let mut args = Vec::new();
                            loop {
                                args.push(self.stype()?);
                                if !self.eat(&TokenKind::Comma) {
                                    break;
                                }
                            }
                            self.expect(&TokenKind::RBracket, "`]` after type arguments")?;
                            let head = SType {
                                kind: STypeKind::Con(name),
                                span: start,
                            };
                            return Ok(SType {
                                kind: STypeKind::App(Box::new(head), args),
                                span: start,
                            });
                        }
                        STypeKind::Con(name)
                    }
                };
                Ok(SType { kind, span: start })
            }
            _ => Err(self.unexpected("a type")),
        }
    }

    // --- expressions ---

    fn expr(&mut self) -> DiagResult<Expr> {
        self.descend(|p| p.binary(0))
    }

    fn binary(&mut self, min_prec: u8) -> DiagResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let Some((op, prec)) = binop_of(self.peek_kind()) else {
                return Ok(lhs);
            };
            if prec < min_prec {
                return Ok(lhs);
            }
            self.bump();
            let rhs = self.binary(prec + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn unary(&mut self) -> DiagResult<Expr> {
        let start = self.span();
        if self.eat(&TokenKind::Minus) {
            let operand = self.descend(Self::unary)?;
            let span = start.merge(operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnOp::Neg,
                    expr: Box::new(operand),
                },
                span,
            ));
        }
        if self.eat(&TokenKind::Bang) {
            let operand = self.descend(Self::unary)?;
            let span = start.merge(operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnOp::Not,
                    expr: Box::new(operand),
                },
                span,
            ));
        }
        self.power()
    }

    /// `**` is right-associative and binds tighter than unary minus.
    fn power(&mut self) -> DiagResult<Expr> {
        let base = self.postfix()?;
        if self.eat(&TokenKind::StarStar) {
            let exponent = self.descend(Self::power)?;
            let span = base.span.merge(exponent.span);
            return Ok(Expr::new(
                ExprKind::Binary {
                    op: BinOp::Pow,
                    lhs: Box::new(base),
                    rhs: Box::new(exponent),
                },
                span,
            ));
        }
        Ok(base)
    }

    /// Application `f(args)` and field access `e.field`, both left-associative.
    fn postfix(&mut self) -> DiagResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.at(&TokenKind::LParen) {
                self.bump();
                let mut args = Vec::new();
                if !self.at(&TokenKind::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(&TokenKind::RParen, "`)` after arguments")?.span;
                let span = expr.span.merge(end);
                expr = Expr::new(
                    ExprKind::App {
                        func: Box::new(expr),
                        args,
                    },
                    span,
                );
            } else if self.at(&TokenKind::Dot) {
                self.bump();
                let (field, field_span) = self.expect_ident("field name after `.`")?;
                let span = expr.span.merge(field_span);
                expr = Expr::new(
                    ExprKind::RecordAccess {
                        expr: Box::new(expr),
                        field,
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> DiagResult<Expr> {
        let start = self.span();
        match self.peek_kind().clone() {
            TokenKind::Int(n) => {
                self.bump();
                Ok(Expr::new(ExprKind::Lit(Lit::Int(n)), start))
            }
            TokenKind::Float(x) => {
                self.bump();
                Ok(Expr::new(ExprKind::Lit(Lit::Float(x)), start))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::new(ExprKind::Lit(Lit::Str(s)), start))
            }
            TokenKind::Char(c) => {
                self.bump();
                Ok(Expr::new(ExprKind::Lit(Lit::Char(c)), start))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Ok(Expr::new(ExprKind::Lit(Lit::Bool(true)), start))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Ok(Expr::new(ExprKind::Lit(Lit::Bool(false)), start))
            }
            TokenKind::Ident(name) => {
                self.bump();
                if is_ctor_name(&name) {
                    let mut args = Vec::new();
                    if self.at(&TokenKind::LParen) {
                        self.bump();
                        if !self.at(&TokenKind::RParen) {
                            loop {
                                args.push(self.expr()?);
                                if !self.eat(&TokenKind::Comma) {
                                    break;
                                }
                            }
                        }
                        self.expect(&TokenKind::RParen, "`)` after constructor arguments")?;
                    }
                    Ok(Expr::new(ExprKind::Ctor { name, args }, start))
                } else {
                    Ok(Expr::new(ExprKind::Var(name), start))
                }
            }
            TokenKind::LParen => {
                self.bump();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::new(ExprKind::Lit(Lit::Unit), start));
                }
                let mut items = vec![self.expr()?];
                while self.eat(&TokenKind::Comma) {
                    items.push(self.expr()?);
                }
                self.expect(&TokenKind::RParen, "`)`")?;
                if items.len() == 1 {
                    Ok(items.into_iter().next().expect("one item"))
                } else {
                    Ok(Expr::new(ExprKind::Tuple(items), start))
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                if !self.at(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "`]` after list elements")?;
                Ok(Expr::new(ExprKind::List(items), start))
            }
            TokenKind::LBrace => self.brace_expr(),
            TokenKind::Keyword(Keyword::If) => {
                self.bump();
                let cond = self.expr()?;
                self.expect_keyword(Keyword::Then, "`then`")?;
                let then = self.expr()?;
                self.expect_keyword(Keyword::Else, "`else`")?;
                let els = self.expr()?;
                let span = start.merge(els.span);
                Ok(Expr::new(
                    ExprKind::If {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els: Box::new(els),
                    },
                    span,
                ))
            }
            TokenKind::Keyword(Keyword::Let) => {
                self.bump();
                let (name, _) = self.expect_ident("binding name after `let`")?;
                let ty = if self.eat(&TokenKind::Colon) {
                    Some(self.stype()?)
                } else {
                    None
                };
                self.expect(&TokenKind::Eq, "`=` in let binding")?;
                let value = self.expr()?;
                self.expect_keyword(Keyword::In, "`in` after let binding")?;
                let body = self.expr()?;
                let span = start.merge(body.span);
                Ok(Expr::new(
                    ExprKind::Let {
                        name,
                        ty,
                        value: Box::new(value),
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            TokenKind::Keyword(Keyword::Letrec) => {
                self.bump();
                let mut bindings = Vec::new();
                loop {
                    let (name, _) = self.expect_ident("binding name in letrec")?;
                    self.expect(&TokenKind::Eq, "`=` in letrec binding")?;
                    bindings.push((name, self.expr()?));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_keyword(Keyword::In, "`in` after letrec bindings")?;
                let body = self.expr()?;
                let span = start.merge(body.span);
                Ok(Expr::new(
                    ExprKind::LetRec {
                        bindings,
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            TokenKind::Keyword(Keyword::Match) => {
                self.bump();
                let scrutinee = self.expr()?;
                self.expect(&TokenKind::LBrace, "`{` before match arms")?;
                let mut arms = Vec::new();
                loop {
                    let pattern = self.pattern()?;
                    let guard = if self.eat_keyword(Keyword::If) {
                        Some(self.expr()?)
                    } else {
                        None
                    };
                    self.expect(&TokenKind::FatArrow, "`=>` after pattern")?;
                    let body = self.expr()?;
                    arms.push(Arm { pattern, guard, body });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    if self.at(&TokenKind::RBrace) {
                        break;
                    }
                }
                let end = self.expect(&TokenKind::RBrace, "`}` after match arms")?.span;
                Ok(Expr::new(
                    ExprKind::Match {
                        scrutinee: Box::new(scrutinee),
                        arms,
                    },
                    start.merge(end),
                ))
            }
            TokenKind::Backslash => {
                self.bump();
                let mut params = Vec::new();
                loop {
                    let (name, span) = self.expect_ident("lambda parameter")?;
                    params.push(Param { name, ty: None, span });
                    if self.eat(&TokenKind::Comma) {
                        continue;
                    }
                    if matches!(self.peek_kind(), TokenKind::Ident(_)) {
                        continue;
                    }
                    break;
                }
                self.expect(&TokenKind::Dot, "`.` after lambda parameters")?;
                let body = self.expr()?;
                let span = start.merge(body.span);
                Ok(Expr::new(
                    ExprKind::Lambda {
                        params,
                        return_type: None,
                        effects: EffectAnn::Infer,
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            TokenKind::Keyword(Keyword::Func) => {
                // Anonymous function literal: `func(x: T) -> R { ... }` or
                // `func(x) => expr`.
                self.bump();
                let params = self.param_list()?;
                let return_type = if self.eat(&TokenKind::Arrow) {
                    Some(self.stype()?)
                } else {
                    None
                };
                let effects = self.effect_annotation()?;
                let body = if self.at(&TokenKind::LBrace) {
                    self.block_body()?
                } else if self.eat(&TokenKind::FatArrow) {
                    self.expr()?
                } else {
                    return Err(self.unexpected("function literal body (`{` or `=>`)"));
                };
                let span = start.merge(body.span);
                // A bare `func(x) => e` has no header to promise purity.
                let effects = if effects == EffectAnn::Pure && return_type.is_none() {
                    EffectAnn::Infer
                } else {
                    effects
                };
                Ok(Expr::new(
                    ExprKind::Lambda {
                        params,
                        return_type,
                        effects,
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Disambiguates `{`: record literal (`ident :`), record update
    /// (`ident |`), otherwise block.
    fn brace_expr(&mut self) -> DiagResult<Expr> {
        let start = self.span();
        self.expect(&TokenKind::LBrace, "`{`")?;
        if self.at(&TokenKind::RBrace) {
            return Err(Diagnostic::parse(ErrorCode::ParEmptyBlock, "empty block", start).with_file(self.file.clone()));
        }

        if let TokenKind::Ident(_) = self.peek_kind() {
            if self.peek_at(1) == &TokenKind::Colon {
                return self.record_lit(start);
            }
            if self.peek_at(1) == &TokenKind::Pipe {
                return self.record_update(start);
            }
        }

        let mut exprs = vec![self.expr()?];
        while self.eat(&TokenKind::Semicolon) {
            if self.at(&TokenKind::RBrace) {
                break; // trailing semicolon
            }
            exprs.push(self.expr()?);
        }
        let end = self.expect(&TokenKind::RBrace, "`;` or `}` in block")?.span;
        Ok(Expr::new(ExprKind::Block(exprs), start.merge(end)))
    }

    /// Parses a function body block; a single-expression block stays a block
    /// so effect sequencing is uniform.
    fn block_body(&mut self) -> DiagResult<Expr> {
        self.descend(Self::brace_expr)
    }

    fn record_lit(&mut self, start: Span) -> DiagResult<Expr> {
        let mut fields = Vec::new();
        loop {
            let (label, _) = self.expect_ident("record field label")?;
            self.expect(&TokenKind::Colon, "`:` after field label")?;
            fields.push((label, self.expr()?));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(&TokenKind::RBrace, "`}` after record fields")?.span;
        Ok(Expr::new(ExprKind::RecordLit(fields), start.merge(end)))
    }

    fn record_update(&mut self, start: Span) -> DiagResult<Expr> {
        let (base_name, base_span) = self.expect_ident("record to update")?;
        self.expect(&TokenKind::Pipe, "`|` in record update")?;
        let base = Expr::new(ExprKind::Var(base_name), base_span);
        let mut fields = Vec::new();
        loop {
            let (label, _) = self.expect_ident("record field label")?;
            self.expect(&TokenKind::Colon, "`:` after field label")?;
            fields.push((label, self.expr()?));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(&TokenKind::RBrace, "`}` after record update")?.span;
        Ok(Expr::new(
            ExprKind::RecordUpdate {
                base: Box::new(base),
                fields,
            },
            start.merge(end),
        ))
    }

    // --- patterns ---

    fn pattern(&mut self) -> DiagResult<Pattern> {
        self.descend(Self::pattern_inner)
    }

    fn pattern_inner(&mut self) -> DiagResult<Pattern> {
        let start = self.span();
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                if name == "_" {
                    return Ok(Pattern {
                        kind: PatternKind::Wildcard,
                        span: start,
                    });
                }
                if is_ctor_name(&name) {
                    let mut args = Vec::new();
                    if self.eat(&TokenKind::LParen) {
                        if !self.at(&TokenKind::RParen) {
                            loop {
                                args.push(self.pattern()?);
                                if !self.eat(&TokenKind::Comma) {
                                    break;
                                }
                            }
                        }
                        self.expect(&TokenKind::RParen, "`)` after constructor pattern")?;
                    }
                    return Ok(Pattern {
                        kind: PatternKind::Ctor { name, args },
                        span: start,
                    });
                }
                Ok(Pattern {
                    kind: PatternKind::Var(name),
                    span: start,
                })
            }
            TokenKind::Int(n) => {
                self.bump();
                Ok(Pattern {
                    kind: PatternKind::Lit(Lit::Int(n)),
                    span: start,
                })
            }
            TokenKind::Minus => {
                self.bump();
                match self.peek_kind().clone() {
                    TokenKind::Int(n) => {
                        self.bump();
                        Ok(Pattern {
                            kind: PatternKind::Lit(Lit::Int(-n)),
                            span: start,
                        })
                    }
                    TokenKind::Float(x) => {
                        self.bump();
                        Ok(Pattern {
                            kind: PatternKind::Lit(Lit::Float(-x)),
                            span: start,
                        })
                    }
                    _ => Err(self.unexpected("numeric literal after `-` in pattern")),
                }
            }
            TokenKind::Float(x) => {
                self.bump();
                Ok(Pattern {
                    kind: PatternKind::Lit(Lit::Float(x)),
                    span: start,
                })
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Pattern {
                    kind: PatternKind::Lit(Lit::Str(s)),
                    span: start,
                })
            }
            TokenKind::Char(c) => {
                self.bump();
                Ok(Pattern {
                    kind: PatternKind::Lit(Lit::Char(c)),
                    span: start,
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Ok(Pattern {
                    kind: PatternKind::Lit(Lit::Bool(true)),
                    span: start,
                })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Ok(Pattern {
                    kind: PatternKind::Lit(Lit::Bool(false)),
                    span: start,
                })
            }
            TokenKind::LParen => {
                self.bump();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Pattern {
                        kind: PatternKind::Lit(Lit::Unit),
                        span: start,
                    });
                }
                let mut items = vec![self.pattern()?];
                while self.eat(&TokenKind::Comma) {
                    items.push(self.pattern()?);
                }
                self.expect(&TokenKind::RParen, "`)` in pattern")?;
                if items.len() == 1 {
                    Ok(items.into_iter().next().expect("one item"))
                } else {
                    Ok(Pattern {
                        kind: PatternKind::Tuple(items),
                        span: start,
                    })
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                let mut rest = None;
                if !self.at(&TokenKind::RBracket) {
                    loop {
                        if self.eat(&TokenKind::DotDotDot) {
                            rest = Some(Box::new(self.pattern()?));
                            break;
                        }
                        items.push(self.pattern()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "`]` after list pattern")?;
                Ok(Pattern {
                    kind: PatternKind::List { items, rest },
                    span: start,
                })
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                loop {
                    let (label, label_span) = self.expect_ident("record field in pattern")?;
                    if self.eat(&TokenKind::Colon) {
                        fields.push((label, self.pattern()?));
                    } else {
                        // Shorthand `{x}` binds the field to a same-named var.
                        fields.push((
                            label.clone(),
                            Pattern {
                                kind: PatternKind::Var(label),
                                span: label_span,
                            },
                        ));
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "`}` after record pattern")?;
                Ok(Pattern {
                    kind: PatternKind::Record(fields),
                    span: start,
                })
            }
            _ => Err(self.unexpected("a pattern")),
        }
    }

    // --- REPL ---

    fn repl_item(&mut self) -> DiagResult<ReplItem> {
        if self.at_decl_start() {
            return self.decl().map(ReplItem::Decl);
        }
        // `let x = e` with no `in` is a session binding.
        if self.at_keyword(Keyword::Let) {
            let checkpoint = self.pos;
            self.bump();
            if let TokenKind::Ident(name) = self.peek_kind().clone()
                && self.peek_at(1) == &TokenKind::Eq
            {
                self.bump();
                self.bump();
                let value = self.expr()?;
                if self.at(&TokenKind::Eof) {
                    return Ok(ReplItem::Binding(name, value));
                }
            }
            self.pos = checkpoint;
        }
        self.expr().map(ReplItem::Expr)
    }
}

/// `true` for names that start with an uppercase letter (constructors).
fn is_ctor_name(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

/// Operator table: `(operator, precedence)`; higher binds tighter.
/// `**`, unary, application, and `.` are handled structurally above this.
fn binop_of(kind: &TokenKind) -> Option<(BinOp, u8)> {
    Some(match kind {
        TokenKind::PipePipe => (BinOp::Or, 1),
        TokenKind::AmpAmp => (BinOp::And, 2),
        TokenKind::EqEq => (BinOp::Eq, 3),
        TokenKind::NotEq => (BinOp::Ne, 3),
        TokenKind::Lt => (BinOp::Lt, 3),
        TokenKind::LtEq => (BinOp::Le, 3),
        TokenKind::Gt => (BinOp::Gt, 3),
        TokenKind::GtEq => (BinOp::Ge, 3),
        TokenKind::PlusPlus => (BinOp::Concat, 4),
        TokenKind::Plus => (BinOp::Add, 5),
        TokenKind::Minus => (BinOp::Sub, 5),
        TokenKind::Star => (BinOp::Mul, 6),
        TokenKind::Slash => (BinOp::Div, 6),
        TokenKind::Percent => (BinOp::Mod, 6),
        _ => return None,
    })
}

/// Suggests the closest canonical effect name for a typo, if any is close.
fn suggest_effect(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    for effect in Effect::iter() {
        let canonical: &'static str = effect.into();
        if canonical.to_lowercase() == lower || canonical.to_lowercase().starts_with(&lower) {
            return Some(canonical);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_expr(source: &str) -> Expr {
        let tokens = tokenize(source).unwrap();
        let mut parser = Parser::new(tokens, "<test>");
        let expr = parser.expr().unwrap();
        parser.expect_eof().unwrap();
        expr
    }

    fn expr_debug(source: &str) -> String {
        strip(parse_expr(source))
    }

    /// Collapses an expression to a span-free shape string for comparison.
    fn strip(expr: Expr) -> String {
        match expr.kind {
            ExprKind::Lit(lit) => format!("{lit:?}"),
            ExprKind::Var(name) => name,
            ExprKind::Binary { op, lhs, rhs } => format!("({op} {} {})", strip(*lhs), strip(*rhs)),
            ExprKind::Unary { op, expr } => format!("({op} {})", strip(*expr)),
            ExprKind::App { func, args } => {
                let args: Vec<String> = args.into_iter().map(strip).collect();
                format!("{}({})", strip(*func), args.join(", "))
            }
            ExprKind::RecordAccess { expr, field } => format!("{}.{field}", strip(*expr)),
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn precedence_ladder() {
        assert_eq!(expr_debug("1 + 2 * 3"), "(+ Int(1) (* Int(2) Int(3)))");
        assert_eq!(expr_debug("1 * 2 + 3"), "(+ (* Int(1) Int(2)) Int(3))");
        assert_eq!(expr_debug("a || b && c"), "(|| a (&& b c))");
        assert_eq!(expr_debug("1 + 2 == 3"), "(== (+ Int(1) Int(2)) Int(3))");
        assert_eq!(expr_debug("xs ++ ys ++ zs"), "(++ (++ xs ys) zs)");
    }

    #[test]
    fn power_is_right_associative_and_tighter_than_unary() {
        assert_eq!(expr_debug("2 ** 3 ** 2"), "(** Int(2) (** Int(3) Int(2)))");
        assert_eq!(expr_debug("-2 ** 2"), "(- (** Int(2) Int(2)))");
    }

    #[test]
    fn application_and_field_access() {
        assert_eq!(expr_debug("f(1)(2)"), "f(Int(1))(Int(2))");
        assert_eq!(expr_debug("e.id + 1"), "(+ e.id Int(1))");
        assert_eq!(expr_debug("f(x).y"), "f(x).y");
    }

    #[test]
    fn multi_line_expression_parses_like_single_line() {
        let single = expr_debug("f(1, 2) + g(3)");
        let multi = expr_debug("f(1,\n   2)\n + g(\n3)");
        assert_eq!(single, multi);
    }

    #[test]
    fn brace_is_a_record_when_ident_colon() {
        let expr = parse_expr("{id: 42, name: \"alice\"}");
        assert!(matches!(expr.kind, ExprKind::RecordLit(fields) if fields.len() == 2));
    }

    #[test]
    fn brace_is_an_update_when_ident_pipe() {
        let expr = parse_expr("{r | x: 1}");
        assert!(matches!(expr.kind, ExprKind::RecordUpdate { .. }));
    }

    #[test]
    fn brace_is_a_block_otherwise() {
        let expr = parse_expr("{ f(1); g(2) }");
        assert!(matches!(expr.kind, ExprKind::Block(exprs) if exprs.len() == 2));
    }

    #[test]
    fn block_allows_trailing_semicolon() {
        let expr = parse_expr("{ f(1); g(2); }");
        assert!(matches!(expr.kind, ExprKind::Block(exprs) if exprs.len() == 2));
    }

    #[test]
    fn empty_block_is_rejected() {
        let tokens = tokenize("{}").unwrap();
        let mut parser = Parser::new(tokens, "<test>");
        let err = parser.expr().unwrap_err();
        assert_eq!(err.code, ErrorCode::ParEmptyBlock);
    }

    #[test]
    fn nullary_constructor_is_a_ctor_expr() {
        let expr = parse_expr("None");
        assert!(matches!(expr.kind, ExprKind::Ctor { name, args } if name == "None" && args.is_empty()));
    }

    #[test]
    fn lambda_forms() {
        assert!(matches!(parse_expr("\\x. x").kind, ExprKind::Lambda { .. }));
        assert!(matches!(parse_expr("func(x) => x").kind, ExprKind::Lambda { .. }));
        assert!(matches!(
            parse_expr("func(x: int) -> int { x }").kind,
            ExprKind::Lambda { .. }
        ));
    }

    #[test]
    fn unknown_effect_is_par_eff002_with_suggestion() {
        let err = parse_module_source("module m\nexport func f() -> () ! {io} { () }", "m.ail").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParUnknownEffect);
        assert!(err.fix.unwrap().suggestion.contains("IO"));
    }

    #[test]
    fn duplicate_effect_is_par_eff001() {
        let err = parse_module_source("module m\nexport func f() -> () ! {IO, IO} { () }", "m.ail").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParDuplicateEffect);
    }

    #[test]
    fn generic_header_sits_on_the_paren() {
        let module = parse_module_source("module m\nexport func id[T](x: T) -> T { x }", "m.ail").unwrap();
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected func decl");
        };
        assert_eq!(func.type_params, ["T"]);
        assert_eq!(func.params.len(), 1);
    }

    #[test]
    fn type_alias_vs_sum_vs_record() {
        let source = "module m\ntype A = int\ntype B = None | Some(int)\ntype C = { x: int }";
        let module = parse_module_source(source, "m.ail").unwrap();
        let bodies: Vec<&TypeBody> = module
            .decls
            .iter()
            .map(|d| match d {
                Decl::Type(t) => &t.body,
                Decl::Func(_) => panic!("expected type decl"),
            })
            .collect();
        assert!(matches!(bodies[0], TypeBody::Alias(_)));
        assert!(matches!(bodies[1], TypeBody::Algebraic(ctors) if ctors.len() == 2));
        assert!(matches!(bodies[2], TypeBody::Record(fields) if fields.len() == 1));
    }

    #[test]
    fn match_with_guard_and_list_rest() {
        let expr = parse_expr("match xs { [] => 0, [x, ...rest] if x > 0 => x, _ => 1 }");
        let ExprKind::Match { arms, .. } = expr.kind else {
            panic!("expected match");
        };
        assert_eq!(arms.len(), 3);
        assert!(arms[1].guard.is_some());
        assert!(matches!(
            &arms[1].pattern.kind,
            PatternKind::List { items, rest } if items.len() == 1 && rest.is_some()
        ));
    }

    #[test]
    fn script_trailing_expression_becomes_main() {
        let module = parse_source("1 + 2", "script.ail", "script").unwrap();
        let Decl::Func(func) = &module.decls[0] else {
            panic!("expected synthesized main");
        };
        assert_eq!(func.name, "main");
        assert_eq!(func.effects, EffectAnn::Infer);
        assert!(func.exported);
    }

    #[test]
    fn repl_binding_vs_expression() {
        assert!(matches!(parse_repl_line("let x = 1").unwrap(), ReplItem::Binding(name, _) if name == "x"));
        assert!(matches!(parse_repl_line("let x = 1 in x").unwrap(), ReplItem::Expr(_)));
        assert!(matches!(parse_repl_line("1 + 2").unwrap(), ReplItem::Expr(_)));
    }
}

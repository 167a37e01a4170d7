//! The surface AST: what the parser produces, before elaboration.
//!
//! Every node carries a [`Span`]. Nothing here is desugared — blocks,
//! record updates, constructor applications, and operator trees survive to
//! the elaborator, which turns them into Core IR.

use serde::{Deserialize, Serialize};

use crate::span::Span;

/// A parsed module: header path, imports, and declarations in source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Slash-separated module path, e.g. `examples/foo`.
    pub path: String,
    pub imports: Vec<Import>,
    pub decls: Vec<Decl>,
}

/// `import path (sym1, sym2)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub path: String,
    pub symbols: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decl {
    Type(TypeDecl),
    Func(FuncDecl),
}

/// `type T[params] = body`, optionally `export`ed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: TypeBody,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeBody {
    /// A sum of constructors: `C1(T, U) | C2 | ...`.
    Algebraic(Vec<CtorDecl>),
    /// A named record type: `{ x: int, y: int }`.
    Record(Vec<(String, SType)>),
    /// A transparent alias.
    Alias(SType),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtorDecl {
    pub name: String,
    pub args: Vec<SType>,
    pub span: Span,
}

/// How a function header speaks about effects.
///
/// `Pure` is a strict sentinel, not an empty row: a header without `!`
/// promises a pure body. Synthesized bindings (scripts, lambdas without
/// annotations) use `Infer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EffectAnn {
    Pure,
    Declared(Vec<(String, Span)>),
    Infer,
}

/// `[export] func name[T, U](x: T, ...) -> R ! {Effects} { body }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub return_type: Option<SType>,
    pub effects: EffectAnn,
    pub body: Expr,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Option<SType>,
    pub span: Span,
}

/// Literal values shared by expressions and patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Unit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    Lit(Lit),
    Var(String),
    /// `\x. body` or `func(x: T) => body` or block-bodied `func(x) -> T { ... }`.
    Lambda {
        params: Vec<Param>,
        return_type: Option<SType>,
        effects: EffectAnn,
        body: Box<Expr>,
    },
    App {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Let {
        name: String,
        ty: Option<SType>,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    /// `letrec f = e1, g = e2 in body` — single or mutual.
    LetRec {
        bindings: Vec<(String, Expr)>,
        body: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<Arm>,
    },
    /// `{ e1; e2; ...; en }` — value is the last expression.
    Block(Vec<Expr>),
    RecordLit(Vec<(String, Expr)>),
    /// `{ base | f1: v1, ... }`.
    RecordUpdate {
        base: Box<Expr>,
        fields: Vec<(String, Expr)>,
    },
    RecordAccess {
        expr: Box<Expr>,
        field: String,
    },
    /// Capitalized application, resolved to an ADT factory at elaboration.
    Ctor {
        name: String,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "++")]
    Concat,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
pub enum UnOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "!")]
    Not,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PatternKind {
    Wildcard,
    Var(String),
    Lit(Lit),
    Ctor {
        name: String,
        args: Vec<Pattern>,
    },
    Tuple(Vec<Pattern>),
    /// `[]`, `[a, b]`, or `[head, ...rest]` (`rest` may be `_`).
    List {
        items: Vec<Pattern>,
        rest: Option<Box<Pattern>>,
    },
    /// Partial record patterns are permitted: `{id: x}` matches any record
    /// carrying at least an `id` field.
    Record(Vec<(String, Pattern)>),
}

/// A type expression as written in source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SType {
    pub kind: STypeKind,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum STypeKind {
    Int,
    Float,
    Str,
    Bool,
    Char,
    Unit,
    List(Box<SType>),
    Tuple(Vec<SType>),
    /// A named constructor or an in-scope type parameter.
    Con(String),
    App(Box<SType>, Vec<SType>),
    Func {
        params: Vec<SType>,
        ret: Box<SType>,
        effects: EffectAnn,
    },
    Record(Vec<(String, SType)>),
}

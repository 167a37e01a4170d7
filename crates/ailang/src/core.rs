//! The Core IR: what elaboration produces and every later phase consumes.
//!
//! Core is a small expression language. Surface blocks, record sugar, and
//! constructor applications are gone by the time code gets here; operators
//! survive as [`CoreKind::Binary`]/[`CoreKind::Unary`] nodes until the
//! linker rewrites them to `$builtin` calls using the resolved-method table.
//!
//! Every node carries a stable node id ([`Sid`]) used for type attachment,
//! resolved-method lookup, and diagnostics. A module elaborates to one
//! nested `let`/`letrec` chain terminated by a reference to its last
//! binding; the runtime extracts top-level bindings by walking that chain.

use serde::{Deserialize, Serialize};

use crate::{
    ast::{BinOp, EffectAnn, Lit, SType, UnOp},
    span::Span,
};

/// Stable node id, unique within one elaborated module.
pub type Sid = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreExpr {
    pub sid: Sid,
    pub span: Span,
    pub kind: CoreKind,
}

/// A lambda parameter with its optional surface annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreParam {
    pub name: String,
    pub ann: Option<SType>,
}

/// One binding of a `letrec` group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreBinding {
    pub name: String,
    pub expr: CoreExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreKind {
    Lit(Lit),
    Var(String),
    /// A cross-module or synthetic-module reference, resolved by the
    /// runtime's resolver (never by environment lookup).
    VarGlobal {
        module: String,
        name: String,
    },
    Lambda {
        /// Generic type parameters from the surface header (`func f[T, U]`).
        /// Annotation conversion scopes named type variables to these.
        type_params: Vec<String>,
        params: Vec<CoreParam>,
        ret_ann: Option<SType>,
        effects_ann: EffectAnn,
        body: Box<CoreExpr>,
    },
    App {
        func: Box<CoreExpr>,
        args: Vec<CoreExpr>,
    },
    Let {
        name: String,
        ann: Option<SType>,
        value: Box<CoreExpr>,
        body: Box<CoreExpr>,
    },
    LetRec {
        bindings: Vec<CoreBinding>,
        body: Box<CoreExpr>,
    },
    If {
        cond: Box<CoreExpr>,
        then: Box<CoreExpr>,
        els: Box<CoreExpr>,
    },
    Match {
        scrutinee: Box<CoreExpr>,
        arms: Vec<CoreArm>,
    },
    /// An operator node awaiting lowering. `&&`/`||` never appear here —
    /// they desugar to `If` during elaboration to keep short-circuiting.
    Binary {
        op: BinOp,
        lhs: Box<CoreExpr>,
        rhs: Box<CoreExpr>,
    },
    Unary {
        op: UnOp,
        expr: Box<CoreExpr>,
    },
    RecordLit(Vec<(String, CoreExpr)>),
    /// Preserved as its own form so field lists don't blow up during
    /// type inference.
    RecordUpdate {
        base: Box<CoreExpr>,
        fields: Vec<(String, CoreExpr)>,
    },
    RecordAccess {
        expr: Box<CoreExpr>,
        field: String,
    },
    List(Vec<CoreExpr>),
    Tuple(Vec<CoreExpr>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreArm {
    pub pattern: CorePattern,
    pub guard: Option<CoreExpr>,
    pub body: CoreExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorePattern {
    pub span: Span,
    pub kind: CorePatternKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CorePatternKind {
    Wildcard,
    Var(String),
    Lit(Lit),
    /// Constructor patterns are fully resolved: matching discriminates on
    /// the `(type_name, ctor)` tag of a tagged value.
    Ctor {
        type_name: String,
        ctor: String,
        args: Vec<CorePattern>,
    },
    Tuple(Vec<CorePattern>),
    List {
        items: Vec<CorePattern>,
        rest: Option<Box<CorePattern>>,
    },
    Record(Vec<(String, CorePattern)>),
}

impl CorePattern {
    /// Variables bound by this pattern, in left-to-right order.
    pub fn bound_vars(&self, out: &mut Vec<String>) {
        match &self.kind {
            CorePatternKind::Var(name) => out.push(name.clone()),
            CorePatternKind::Ctor { args, .. } | CorePatternKind::Tuple(args) => {
                for arg in args {
                    arg.bound_vars(out);
                }
            }
            CorePatternKind::List { items, rest } => {
                for item in items {
                    item.bound_vars(out);
                }
                if let Some(rest) = rest {
                    rest.bound_vars(out);
                }
            }
            CorePatternKind::Record(fields) => {
                for (_, pattern) in fields {
                    pattern.bound_vars(out);
                }
            }
            CorePatternKind::Wildcard | CorePatternKind::Lit(_) => {}
        }
    }
}

/// Allocates stable node ids during elaboration.
#[derive(Debug, Default)]
pub struct SidGen {
    next: Sid,
}

impl SidGen {
    #[must_use]
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn fresh(&mut self) -> Sid {
        let sid = self.next;
        self.next += 1;
        sid
    }
}

//! The elaborator: surface AST to Core IR, one pass.
//!
//! Desugarings:
//! - blocks become nested `let _ = e1 in ...` chains;
//! - `&&`/`||` become `if` (they must short-circuit, so they cannot
//!   survive to the strict operator lowering);
//! - constructor applications become `$adt.make_Type_Ctor` global refs
//!   (nullary constructors become the bare ref);
//! - a module becomes one nested `let`/`letrec` chain over its function
//!   declarations, terminated by a reference to the last binding.
//!
//! Recursion groups are discovered by collecting references from every
//! right-hand side and running Tarjan's SCC over the resulting graph.
//! `collect_refs` must cover *every* Core form — a missed case leaves a
//! recursive use undetected and downstream evaluation breaks in
//! hard-to-diagnose ways.
//!
//! The elaborator also runs the match exhaustiveness checker (warnings,
//! never errors) and builds the module's interface skeleton; value schemes
//! are attached by the type checker, and the digest by the linker.

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use petgraph::{algo::tarjan_scc, graph::DiGraph};

use crate::{
    ast::{Arm, Decl, EffectAnn, Expr, ExprKind, FuncDecl, Lit, Module, Pattern, PatternKind, TypeBody},
    core::{CoreArm, CoreBinding, CoreExpr, CoreKind, CoreParam, CorePattern, CorePatternKind, SidGen},
    diagnostics::{DiagResult, Diagnostic, ErrorCode, Warning, WarningCode},
    iface::{CtorExport, Iface, TypeExport, TypeExportKind},
    span::Span,
    types::{Effect, EffectRow},
};

/// Everything a module needs to know about the outside world while
/// elaborating: which symbols come from which imports, which constructors
/// are in scope, and which names resolve to `$builtin`.
#[derive(Debug, Default)]
pub struct ElabContext {
    /// Imported value symbol -> defining module path.
    pub imported_values: AHashMap<String, String>,
    /// Constructor name -> its export record (imports + prelude).
    pub ctors: AHashMap<String, CtorExport>,
    /// Type name -> its full constructor list, for exhaustiveness.
    pub type_ctors: AHashMap<String, Vec<String>>,
    /// Names that resolve to the synthetic `$builtin` module.
    pub builtin_names: AHashSet<String>,
}

/// Result of elaborating one module.
#[derive(Debug)]
pub struct ElabOutput {
    /// The module as a nested `let`/`letrec` chain ending in a `Var` of the
    /// last declared binding.
    pub core: CoreExpr,
    /// Interface skeleton: types and constructors are final, export schemes
    /// are filled in by the type checker, the digest by the linker.
    pub iface: Iface,
    pub warnings: Vec<Warning>,
    /// Declared top-level bindings in source order.
    pub bindings: Vec<String>,
    /// The subset of `bindings` marked `export`.
    pub exports: Vec<String>,
    /// Every constructor declared in this module (exported or not), in
    /// `(type, ctor)` order — the runtime registers one `$adt` factory each.
    pub local_ctors: Vec<CtorExport>,
    /// Every type declared in this module (exported or not), for
    /// annotation conversion during type checking.
    pub local_types: Vec<TypeExport>,
    /// Constructor-name scope as seen by this module (local + imported +
    /// prelude). The type checker resolves `$adt` references against this.
    pub ctor_scope: AHashMap<String, CtorExport>,
}

/// Converts a validated effect annotation into a closed row.
///
/// `Pure` maps to `None` — a strict sentinel, distinct from an empty row.
/// Names were validated by the parser, so conversion cannot fail.
#[must_use]
pub fn effect_row_of(ann: &EffectAnn) -> Option<EffectRow> {
    match ann {
        EffectAnn::Pure => None,
        EffectAnn::Infer => None,
        EffectAnn::Declared(names) => Some(EffectRow::from_effects(
            names
                .iter()
                .map(|(name, _)| name.parse::<Effect>().expect("parser validated effect names")),
        )),
    }
}

pub fn elaborate(module: &Module, file: &str, mut ctx: ElabContext) -> DiagResult<ElabOutput> {
    let mut iface = Iface::new(module.path.clone());
    let mut local_ctors: Vec<CtorExport> = Vec::new();
    let mut local_types: Vec<TypeExport> = Vec::new();

    // Register this module's own types and constructors first so bodies and
    // patterns can refer to them regardless of declaration order.
    for decl in &module.decls {
        let Decl::Type(type_decl) = decl else { continue };
        let kind = match &type_decl.body {
            TypeBody::Algebraic(ctors) => {
                let mut names = Vec::with_capacity(ctors.len());
                for ctor in ctors {
                    names.push(ctor.name.clone());
                    let export = CtorExport {
                        type_name: type_decl.name.clone(),
                        ctor: ctor.name.clone(),
                        type_params: type_decl.params.clone(),
                        arg_types: ctor.args.clone(),
                    };
                    local_ctors.push(export.clone());
                    ctx.ctors.insert(ctor.name.clone(), export);
                }
                ctx.type_ctors.insert(type_decl.name.clone(), names.clone());
                TypeExportKind::Adt { ctors: names }
            }
            TypeBody::Record(fields) => TypeExportKind::Record { fields: fields.clone() },
            TypeBody::Alias(target) => TypeExportKind::Alias { target: target.clone() },
        };
        // Only exported types are part of the frozen interface; private
        // types stay visible inside the module via the elaboration context.
        let export = TypeExport {
            name: type_decl.name.clone(),
            params: type_decl.params.clone(),
            kind,
        };
        if type_decl.exported {
            iface.types.insert(type_decl.name.clone(), export.clone());
        }
        local_types.push(export);
    }
    // Factories are registered deterministically by (type, ctor).
    local_ctors.sort_by(|a, b| (&a.type_name, &a.ctor).cmp(&(&b.type_name, &b.ctor)));
    // Constructors of exported ADTs are part of the interface.
    for decl in &module.decls {
        if let Decl::Type(type_decl) = decl
            && type_decl.exported
            && let TypeBody::Algebraic(ctors) = &type_decl.body
        {
            for ctor in ctors {
                let export = ctx.ctors.get(&ctor.name).expect("registered above").clone();
                iface.constructors.insert(ctor.name.clone(), export);
            }
        }
    }

    let funcs: Vec<&FuncDecl> = module
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Func(f) => Some(f),
            Decl::Type(_) => None,
        })
        .collect();

    let bindings: Vec<String> = funcs.iter().map(|f| f.name.clone()).collect();
    let exports: Vec<String> = funcs.iter().filter(|f| f.exported).map(|f| f.name.clone()).collect();

    let mut elab = Elaborator {
        sids: SidGen::new(),
        ctx: &ctx,
        module_bindings: bindings.iter().cloned().collect(),
        scopes: Vec::new(),
        warnings: Vec::new(),
        file: file.to_owned(),
    };

    // Desugar every function body to Core.
    let mut rhs: Vec<(String, CoreExpr, Span)> = Vec::with_capacity(funcs.len());
    for func in &funcs {
        let lambda = elab.func_to_lambda(func)?;
        rhs.push((func.name.clone(), lambda, func.span));
    }

    // Recursion groups: reference graph over the module bindings, SCCs via
    // Tarjan. Components come back dependencies-first, which is exactly the
    // order the let chain needs.
    let module_names: AHashSet<String> = bindings.iter().cloned().collect();
    let index_of: AHashMap<&str, usize> = bindings.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let mut refs: Vec<AHashSet<String>> = Vec::with_capacity(rhs.len());
    for (_, expr, _) in &rhs {
        let mut set = AHashSet::new();
        collect_refs(expr, &module_names, &mut set);
        refs.push(set);
    }

    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..rhs.len()).map(|i| graph.add_node(i)).collect();
    for (i, set) in refs.iter().enumerate() {
        for name in set {
            if let Some(&j) = index_of.get(name.as_str()) {
                graph.add_edge(nodes[i], nodes[j], ());
            }
        }
    }
    let sccs = tarjan_scc(&graph);

    // The chain terminates at the final binding (or unit for type-only
    // modules); the runtime stops extracting there.
    let terminal = match bindings.last() {
        Some(last) => {
            let sid = elab.sids.fresh();
            CoreExpr {
                sid,
                span: Span::point(1, 1),
                kind: CoreKind::Var(last.clone()),
            }
        }
        None => {
            let sid = elab.sids.fresh();
            CoreExpr {
                sid,
                span: Span::point(1, 1),
                kind: CoreKind::Lit(Lit::Unit),
            }
        }
    };

    let mut rhs_slots: Vec<Option<(String, CoreExpr, Span)>> = rhs.into_iter().map(Some).collect();
    let mut chain = terminal;
    for scc in sccs.iter().rev() {
        let indices: Vec<usize> = scc.iter().map(|n| graph[*n]).collect();
        let self_recursive = indices.len() > 1
            || indices
                .first()
                .is_some_and(|&i| refs[i].contains(&bindings[i]));
        if self_recursive {
            // Mutual (or self-) recursion: one letrec group, members in
            // source order for determinism.
            let mut members = indices;
            members.sort_unstable();
            let mut group = Vec::with_capacity(members.len());
            let mut span = chain.span;
            for i in members {
                let (name, expr, binding_span) = rhs_slots[i].take().expect("binding used once");
                span = binding_span;
                group.push(CoreBinding { name, expr });
            }
            let sid = elab.sids.fresh();
            chain = CoreExpr {
                sid,
                span,
                kind: CoreKind::LetRec {
                    bindings: group,
                    body: Box::new(chain),
                },
            };
        } else {
            let i = indices[0];
            let (name, expr, binding_span) = rhs_slots[i].take().expect("binding used once");
            let sid = elab.sids.fresh();
            chain = CoreExpr {
                sid,
                span: binding_span,
                kind: CoreKind::Let {
                    name,
                    ann: None,
                    value: Box::new(expr),
                    body: Box::new(chain),
                },
            };
        }
    }

    let warnings = elab.warnings;
    Ok(ElabOutput {
        core: chain,
        iface,
        warnings,
        bindings,
        exports,
        local_ctors,
        local_types,
        ctor_scope: ctx.ctors,
    })
}

/// Elaborates a bare expression (REPL input) against a context.
pub fn elaborate_expr(
    expr: &Expr,
    file: &str,
    ctx: &ElabContext,
    session_names: &AHashSet<String>,
) -> DiagResult<CoreExpr> {
    let mut elab = Elaborator {
        sids: SidGen::new(),
        ctx,
        module_bindings: session_names.clone(),
        scopes: Vec::new(),
        warnings: Vec::new(),
        file: file.to_owned(),
    };
    elab.expr(expr)
}

struct Elaborator<'a> {
    sids: SidGen,
    ctx: &'a ElabContext,
    /// Top-level binding names of the module being elaborated.
    module_bindings: AHashSet<String>,
    /// Lexical scopes introduced by lambdas, lets, and match arms.
    scopes: Vec<AHashSet<String>>,
    warnings: Vec<Warning>,
    file: String,
}

impl Elaborator<'_> {
    fn mk(&mut self, span: Span, kind: CoreKind) -> CoreExpr {
        CoreExpr {
            sid: self.sids.fresh(),
            span,
            kind,
        }
    }

    fn in_scope(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|s| s.contains(name))
    }

    fn push_scope(&mut self, names: impl IntoIterator<Item = String>) {
        self.scopes.push(names.into_iter().collect());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn func_to_lambda(&mut self, func: &FuncDecl) -> DiagResult<CoreExpr> {
        let params: Vec<CoreParam> = func
            .params
            .iter()
            .map(|p| CoreParam {
                name: p.name.clone(),
                ann: p.ty.clone(),
            })
            .collect();
        self.push_scope(params.iter().map(|p| p.name.clone()));
        let body = self.expr(&func.body)?;
        self.pop_scope();
        Ok(self.mk(
            func.span,
            CoreKind::Lambda {
                type_params: func.type_params.clone(),
                params,
                ret_ann: func.return_type.clone(),
                effects_ann: func.effects.clone(),
                body: Box::new(body),
            },
        ))
    }

    fn expr(&mut self, expr: &Expr) -> DiagResult<CoreExpr> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Lit(lit) => Ok(self.mk(span, CoreKind::Lit(lit.clone()))),
            ExprKind::Var(name) => self.var(name, span),
            ExprKind::Lambda {
                params,
                return_type,
                effects,
                body,
            } => {
                let core_params: Vec<CoreParam> = params
                    .iter()
                    .map(|p| CoreParam {
                        name: p.name.clone(),
                        ann: p.ty.clone(),
                    })
                    .collect();
                self.push_scope(core_params.iter().map(|p| p.name.clone()));
                let core_body = self.expr(body)?;
                self.pop_scope();
                Ok(self.mk(
                    span,
                    CoreKind::Lambda {
                        type_params: Vec::new(),
                        params: core_params,
                        ret_ann: return_type.clone(),
                        effects_ann: effects.clone(),
                        body: Box::new(core_body),
                    },
                ))
            }
            ExprKind::App { func, args } => {
                let core_func = self.expr(func)?;
                let core_args = args.iter().map(|a| self.expr(a)).collect::<DiagResult<Vec<_>>>()?;
                Ok(self.mk(
                    span,
                    CoreKind::App {
                        func: Box::new(core_func),
                        args: core_args,
                    },
                ))
            }
            ExprKind::Let { name, ty, value, body } => {
                let core_value = self.expr(value)?;
                self.push_scope([name.clone()]);
                let core_body = self.expr(body)?;
                self.pop_scope();
                Ok(self.mk(
                    span,
                    CoreKind::Let {
                        name: name.clone(),
                        ann: ty.clone(),
                        value: Box::new(core_value),
                        body: Box::new(core_body),
                    },
                ))
            }
            ExprKind::LetRec { bindings, body } => {
                self.push_scope(bindings.iter().map(|(name, _)| name.clone()));
                let core_bindings = bindings
                    .iter()
                    .map(|(name, value)| {
                        Ok(CoreBinding {
                            name: name.clone(),
                            expr: self.expr(value)?,
                        })
                    })
                    .collect::<DiagResult<Vec<_>>>()?;
                let core_body = self.expr(body)?;
                self.pop_scope();
                Ok(self.mk(
                    span,
                    CoreKind::LetRec {
                        bindings: core_bindings,
                        body: Box::new(core_body),
                    },
                ))
            }
            ExprKind::If { cond, then, els } => {
                let cond = self.expr(cond)?;
                let then = self.expr(then)?;
                let els = self.expr(els)?;
                Ok(self.mk(
                    span,
                    CoreKind::If {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els: Box::new(els),
                    },
                ))
            }
            ExprKind::Match { scrutinee, arms } => {
                let core_scrutinee = self.expr(scrutinee)?;
                let core_arms = arms.iter().map(|arm| self.arm(arm)).collect::<DiagResult<Vec<_>>>()?;
                self.check_exhaustiveness(&core_arms, span);
                Ok(self.mk(
                    span,
                    CoreKind::Match {
                        scrutinee: Box::new(core_scrutinee),
                        arms: core_arms,
                    },
                ))
            }
            ExprKind::Block(exprs) => {
                // { e1; e2; ...; en }  =>  let _ = e1 in ... en
                let mut iter = exprs.iter().rev();
                let last = iter.next().expect("parser rejects empty blocks");
                let mut chain = self.expr(last)?;
                for e in iter {
                    let value = self.expr(e)?;
                    chain = self.mk(
                        e.span,
                        CoreKind::Let {
                            name: "_".to_owned(),
                            ann: None,
                            value: Box::new(value),
                            body: Box::new(chain),
                        },
                    );
                }
                Ok(chain)
            }
            ExprKind::RecordLit(fields) => {
                let core_fields = fields
                    .iter()
                    .map(|(label, value)| Ok((label.clone(), self.expr(value)?)))
                    .collect::<DiagResult<Vec<_>>>()?;
                Ok(self.mk(span, CoreKind::RecordLit(core_fields)))
            }
            ExprKind::RecordUpdate { base, fields } => {
                let core_base = self.expr(base)?;
                let core_fields = fields
                    .iter()
                    .map(|(label, value)| Ok((label.clone(), self.expr(value)?)))
                    .collect::<DiagResult<Vec<_>>>()?;
                Ok(self.mk(
                    span,
                    CoreKind::RecordUpdate {
                        base: Box::new(core_base),
                        fields: core_fields,
                    },
                ))
            }
            ExprKind::RecordAccess { expr: inner, field } => {
                let core_inner = self.expr(inner)?;
                Ok(self.mk(
                    span,
                    CoreKind::RecordAccess {
                        expr: Box::new(core_inner),
                        field: field.clone(),
                    },
                ))
            }
            ExprKind::Ctor { name, args } => self.ctor(name, args, span),
            ExprKind::List(items) => {
                let core_items = items.iter().map(|i| self.expr(i)).collect::<DiagResult<Vec<_>>>()?;
                Ok(self.mk(span, CoreKind::List(core_items)))
            }
            ExprKind::Tuple(items) => {
                let core_items = items.iter().map(|i| self.expr(i)).collect::<DiagResult<Vec<_>>>()?;
                Ok(self.mk(span, CoreKind::Tuple(core_items)))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                use crate::ast::BinOp;
                let core_lhs = self.expr(lhs)?;
                let core_rhs = self.expr(rhs)?;
                // Short-circuit operators become `if`; strict lowering to a
                // builtin call would evaluate both sides.
                match op {
                    BinOp::And => {
                        let false_lit = self.mk(span, CoreKind::Lit(Lit::Bool(false)));
                        Ok(self.mk(
                            span,
                            CoreKind::If {
                                cond: Box::new(core_lhs),
                                then: Box::new(core_rhs),
                                els: Box::new(false_lit),
                            },
                        ))
                    }
                    BinOp::Or => {
                        let true_lit = self.mk(span, CoreKind::Lit(Lit::Bool(true)));
                        Ok(self.mk(
                            span,
                            CoreKind::If {
                                cond: Box::new(core_lhs),
                                then: Box::new(true_lit),
                                els: Box::new(core_rhs),
                            },
                        ))
                    }
                    _ => Ok(self.mk(
                        span,
                        CoreKind::Binary {
                            op: *op,
                            lhs: Box::new(core_lhs),
                            rhs: Box::new(core_rhs),
                        },
                    )),
                }
            }
            ExprKind::Unary { op, expr: inner } => {
                let core_inner = self.expr(inner)?;
                Ok(self.mk(
                    span,
                    CoreKind::Unary {
                        op: *op,
                        expr: Box::new(core_inner),
                    },
                ))
            }
        }
    }

    /// Resolves a variable reference: lexical scope, then module bindings,
    /// then imports, then `$builtin`. Anything else is an error — there is
    /// no silent fallback for name resolution.
    fn var(&mut self, name: &str, span: Span) -> DiagResult<CoreExpr> {
        if self.in_scope(name) || self.module_bindings.contains(name) {
            return Ok(self.mk(span, CoreKind::Var(name.to_owned())));
        }
        if let Some(module) = self.ctx.imported_values.get(name) {
            let module = module.clone();
            return Ok(self.mk(
                span,
                CoreKind::VarGlobal {
                    module,
                    name: name.to_owned(),
                },
            ));
        }
        if self.ctx.builtin_names.contains(name) {
            return Ok(self.mk(
                span,
                CoreKind::VarGlobal {
                    module: "$builtin".to_owned(),
                    name: name.to_owned(),
                },
            ));
        }
        Err(Diagnostic::elaborate(
            ErrorCode::ModUnboundVariable,
            format!("unbound variable `{name}`"),
            span,
        )
        .with_file(self.file.clone())
        .with_data("name", name))
    }

    /// `Some(x)` => `$adt.make_Option_Some(x)`; nullary `None` => the bare
    /// global ref.
    fn ctor(&mut self, name: &str, args: &[Expr], span: Span) -> DiagResult<CoreExpr> {
        let Some(export) = self.ctx.ctors.get(name) else {
            return Err(Diagnostic::elaborate(
                ErrorCode::ModUnknownConstructor,
                format!("unknown constructor `{name}`"),
                span,
            )
            .with_file(self.file.clone())
            .with_data("constructor", name));
        };
        let factory = export.factory_name();
        let global = self.mk(
            span,
            CoreKind::VarGlobal {
                module: "$adt".to_owned(),
                name: factory,
            },
        );
        if args.is_empty() {
            return Ok(global);
        }
        let core_args = args.iter().map(|a| self.expr(a)).collect::<DiagResult<Vec<_>>>()?;
        Ok(self.mk(
            span,
            CoreKind::App {
                func: Box::new(global),
                args: core_args,
            },
        ))
    }

    fn arm(&mut self, arm: &Arm) -> DiagResult<CoreArm> {
        let pattern = self.pattern(&arm.pattern)?;
        let mut bound = Vec::new();
        pattern.bound_vars(&mut bound);
        self.push_scope(bound);
        let guard = arm.guard.as_ref().map(|g| self.expr(g)).transpose()?;
        let body = self.expr(&arm.body)?;
        self.pop_scope();
        Ok(CoreArm { pattern, guard, body })
    }

    fn pattern(&mut self, pattern: &Pattern) -> DiagResult<CorePattern> {
        let span = pattern.span;
        let kind = match &pattern.kind {
            PatternKind::Wildcard => CorePatternKind::Wildcard,
            PatternKind::Var(name) => CorePatternKind::Var(name.clone()),
            PatternKind::Lit(lit) => CorePatternKind::Lit(lit.clone()),
            PatternKind::Ctor { name, args } => {
                let Some(export) = self.ctx.ctors.get(name) else {
                    return Err(Diagnostic::elaborate(
                        ErrorCode::ModUnknownConstructor,
                        format!("unknown constructor `{name}` in pattern"),
                        span,
                    )
                    .with_file(self.file.clone())
                    .with_data("constructor", name.as_str()));
                };
                let type_name = export.type_name.clone();
                let ctor = export.ctor.clone();
                let core_args = args.iter().map(|a| self.pattern(a)).collect::<DiagResult<Vec<_>>>()?;
                CorePatternKind::Ctor {
                    type_name,
                    ctor,
                    args: core_args,
                }
            }
            PatternKind::Tuple(items) => {
                CorePatternKind::Tuple(items.iter().map(|i| self.pattern(i)).collect::<DiagResult<Vec<_>>>()?)
            }
            PatternKind::List { items, rest } => {
                let core_items = items.iter().map(|i| self.pattern(i)).collect::<DiagResult<Vec<_>>>()?;
                let core_rest = rest.as_ref().map(|r| self.pattern(r)).transpose()?.map(Box::new);
                CorePatternKind::List {
                    items: core_items,
                    rest: core_rest,
                }
            }
            PatternKind::Record(fields) => CorePatternKind::Record(
                fields
                    .iter()
                    .map(|(label, p)| Ok((label.clone(), self.pattern(p)?)))
                    .collect::<DiagResult<Vec<_>>>()?,
            ),
        };
        Ok(CorePattern { span, kind })
    }

    // --- exhaustiveness ---

    /// Computes non-exhaustiveness and redundancy warnings for one match.
    ///
    /// The universe comes from the arm heads: bool literals have a finite
    /// universe, ADT constructors have exactly their type's constructor
    /// list, int/float/string are infinite and need an irrefutable arm.
    /// Guarded arms conservatively do not count toward coverage.
    fn check_exhaustiveness(&mut self, arms: &[CoreArm], span: Span) {
        let mut irrefutable_seen = false;
        let mut bools_seen: AHashSet<bool> = AHashSet::new();
        let mut ctors_seen: AHashSet<String> = AHashSet::new();
        let mut adt_type: Option<String> = None;
        let mut saw_infinite_lit = false;
        let mut saw_empty_list = false;
        let mut saw_rest_list = false;

        for (index, arm) in arms.iter().enumerate() {
            if irrefutable_seen {
                self.warnings.push(Warning {
                    code: WarningCode::RedundantPattern,
                    message: format!("pattern in arm {} is unreachable", index + 1),
                    span: arm.pattern.span,
                });
                continue;
            }
            let guarded = arm.guard.is_some();
            match &arm.pattern.kind {
                CorePatternKind::Wildcard | CorePatternKind::Var(_) => {
                    if !guarded {
                        irrefutable_seen = true;
                    }
                }
                CorePatternKind::Lit(Lit::Bool(b)) => {
                    if !guarded && !bools_seen.insert(*b) {
                        self.warnings.push(Warning {
                            code: WarningCode::RedundantPattern,
                            message: format!("duplicate pattern `{b}`"),
                            span: arm.pattern.span,
                        });
                    }
                }
                CorePatternKind::Lit(_) => saw_infinite_lit = true,
                CorePatternKind::Ctor { type_name, ctor, args } => {
                    adt_type.get_or_insert_with(|| type_name.clone());
                    let covers = args.iter().all(pattern_is_irrefutable);
                    if !guarded && covers && !ctors_seen.insert(ctor.clone()) {
                        self.warnings.push(Warning {
                            code: WarningCode::RedundantPattern,
                            message: format!("duplicate pattern for constructor `{ctor}`"),
                            span: arm.pattern.span,
                        });
                    }
                }
                CorePatternKind::List { items, rest } => {
                    if !guarded {
                        if items.is_empty() && rest.is_none() {
                            saw_empty_list = true;
                        }
                        if rest.as_deref().is_some_and(pattern_is_irrefutable)
                            && items.iter().all(pattern_is_irrefutable)
                        {
                            saw_rest_list = true;
                        }
                    }
                }
                CorePatternKind::Tuple(items) => {
                    if !guarded && items.iter().all(pattern_is_irrefutable) {
                        irrefutable_seen = true;
                    }
                }
                CorePatternKind::Record(fields) => {
                    if !guarded && fields.iter().all(|(_, p)| pattern_is_irrefutable(p)) {
                        irrefutable_seen = true;
                    }
                }
            }
        }

        if irrefutable_seen {
            return;
        }
        if let Some(type_name) = adt_type {
            if let Some(universe) = self.ctx.type_ctors.get(&type_name) {
                let missing: Vec<&String> = universe.iter().filter(|c| !ctors_seen.contains(*c)).collect();
                if !missing.is_empty() {
                    let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
                    self.warnings.push(Warning {
                        code: WarningCode::NonExhaustiveMatch,
                        message: format!("non-exhaustive match: missing {}", names.join(", ")),
                        span,
                    });
                }
            }
            return;
        }
        if !bools_seen.is_empty() {
            if bools_seen.len() < 2 {
                let missing = !bools_seen.contains(&true);
                self.warnings.push(Warning {
                    code: WarningCode::NonExhaustiveMatch,
                    message: format!("non-exhaustive match: missing `{missing}`"),
                    span,
                });
            }
            return;
        }
        if saw_empty_list || saw_rest_list {
            if !(saw_empty_list && saw_rest_list) {
                self.warnings.push(Warning {
                    code: WarningCode::NonExhaustiveMatch,
                    message: "non-exhaustive match over list patterns".to_owned(),
                    span,
                });
            }
            return;
        }
        if saw_infinite_lit {
            self.warnings.push(Warning {
                code: WarningCode::NonExhaustiveMatch,
                message: "non-exhaustive match: literal patterns need a wildcard or variable arm".to_owned(),
                span,
            });
        }
    }
}

fn pattern_is_irrefutable(pattern: &CorePattern) -> bool {
    matches!(pattern.kind, CorePatternKind::Wildcard | CorePatternKind::Var(_))
}

/// Collects names referenced by an expression that belong to `universe`.
///
/// This is the reference walk behind recursion-group discovery. It
/// deliberately over-approximates (local shadowing is ignored): an extra
/// edge only widens a recursion group, while a missed edge breaks
/// recursive evaluation. Every Core form must be covered here.
pub fn collect_refs(expr: &CoreExpr, universe: &AHashSet<String>, out: &mut AHashSet<String>) {
    match &expr.kind {
        CoreKind::Var(name) => {
            if universe.contains(name) {
                out.insert(name.clone());
            }
        }
        CoreKind::Lit(_) | CoreKind::VarGlobal { .. } => {}
        CoreKind::Lambda { body, .. } => collect_refs(body, universe, out),
        CoreKind::App { func, args } => {
            collect_refs(func, universe, out);
            for arg in args {
                collect_refs(arg, universe, out);
            }
        }
        CoreKind::Let { value, body, .. } => {
            collect_refs(value, universe, out);
            collect_refs(body, universe, out);
        }
        CoreKind::LetRec { bindings, body } => {
            for binding in bindings {
                collect_refs(&binding.expr, universe, out);
            }
            collect_refs(body, universe, out);
        }
        CoreKind::If { cond, then, els } => {
            collect_refs(cond, universe, out);
            collect_refs(then, universe, out);
            collect_refs(els, universe, out);
        }
        CoreKind::Match { scrutinee, arms } => {
            collect_refs(scrutinee, universe, out);
            for arm in arms {
                if let Some(guard) = &arm.guard {
                    collect_refs(guard, universe, out);
                }
                collect_refs(&arm.body, universe, out);
            }
        }
        CoreKind::Binary { lhs, rhs, .. } => {
            collect_refs(lhs, universe, out);
            collect_refs(rhs, universe, out);
        }
        CoreKind::Unary { expr: inner, .. } => collect_refs(inner, universe, out),
        CoreKind::RecordLit(fields) => {
            for (_, value) in fields {
                collect_refs(value, universe, out);
            }
        }
        CoreKind::RecordUpdate { base, fields } => {
            collect_refs(base, universe, out);
            for (_, value) in fields {
                collect_refs(value, universe, out);
            }
        }
        CoreKind::RecordAccess { expr: inner, .. } => collect_refs(inner, universe, out),
        CoreKind::List(items) | CoreKind::Tuple(items) => {
            for item in items {
                collect_refs(item, universe, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse_module_source;

    fn elaborate_source(source: &str) -> ElabOutput {
        let module = parse_module_source(source, "test.ail").unwrap();
        elaborate(&module, "test.ail", ElabContext::default()).unwrap()
    }

    /// Walks the outer chain and reports each level as `let` / `letrec`.
    fn chain_shape(core: &CoreExpr) -> Vec<(String, Vec<String>)> {
        let mut shape = Vec::new();
        let mut current = core;
        loop {
            match &current.kind {
                CoreKind::Let { name, body, .. } => {
                    shape.push(("let".to_owned(), vec![name.clone()]));
                    current = body;
                }
                CoreKind::LetRec { bindings, body } => {
                    shape.push(("letrec".to_owned(), bindings.iter().map(|b| b.name.clone()).collect()));
                    current = body;
                }
                _ => return shape,
            }
        }
    }

    #[test]
    fn non_recursive_bindings_become_let_in_dependency_order() {
        let out = elaborate_source("module m\nfunc helper(x: int) -> int { x }\nfunc user(x: int) -> int { helper(x) }");
        let shape = chain_shape(&out.core);
        assert_eq!(
            shape,
            vec![
                ("let".to_owned(), vec!["helper".to_owned()]),
                ("let".to_owned(), vec!["user".to_owned()]),
            ]
        );
    }

    #[test]
    fn self_recursion_becomes_letrec() {
        let out = elaborate_source(
            "module m\nexport func factorial(n: int) -> int { if n <= 1 then 1 else n * factorial(n - 1) }",
        );
        let shape = chain_shape(&out.core);
        assert_eq!(shape, vec![("letrec".to_owned(), vec!["factorial".to_owned()])]);
    }

    #[test]
    fn mutual_recursion_groups_into_one_letrec() {
        let out = elaborate_source(
            "module m\n\
             func isEven(n: int) -> bool { if n == 0 then true else isOdd(n - 1) }\n\
             func isOdd(n: int) -> bool { if n == 0 then false else isEven(n - 1) }\n\
             export func check(n: int) -> bool { isEven(n) }",
        );
        let shape = chain_shape(&out.core);
        assert_eq!(
            shape,
            vec![
                ("letrec".to_owned(), vec!["isEven".to_owned(), "isOdd".to_owned()]),
                ("let".to_owned(), vec!["check".to_owned()]),
            ]
        );
    }

    #[test]
    fn block_references_are_union_of_part_references() {
        // Regression guard: recursion hiding inside a block must be found.
        let mut ctx = ElabContext::default();
        ctx.builtin_names.insert("_io_println".to_owned());
        let module = parse_module_source(
            "module m\nexport func tick(n: int) -> int ! {IO} { { _io_println(\"x\"); tick(n - 1) } }",
            "t.ail",
        )
        .unwrap();
        let out = elaborate(&module, "t.ail", ctx).unwrap();
        // `tick` references itself through a block, so it must be a letrec.
        let shape = chain_shape(&out.core);
        assert_eq!(shape[0].0, "letrec");
    }

    #[test]
    fn nullary_ctor_is_bare_global_ref() {
        let module = parse_module_source("module m\ntype Opt = None | Some(int)\nexport func f() -> Opt { None }", "t.ail")
            .unwrap();
        let out = elaborate(&module, "t.ail", ElabContext::default()).unwrap();
        let CoreKind::Let { value, .. } = &out.core.kind else {
            panic!("expected let chain");
        };
        let CoreKind::Lambda { body, .. } = &value.kind else {
            panic!("expected lambda");
        };
        // The body is a block with a single expression.
        let CoreKind::VarGlobal { module, name } = &body.kind else {
            panic!("expected $adt global ref, got {:?}", body.kind);
        };
        assert_eq!(module, "$adt");
        assert_eq!(name, "make_Opt_None");
    }

    #[test]
    fn unknown_constructor_is_an_error() {
        let module = parse_module_source("module m\nexport func f() -> int { Nope(1) }", "t.ail").unwrap();
        let err = elaborate(&module, "t.ail", ElabContext::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModUnknownConstructor);
    }

    #[test]
    fn unbound_variable_is_an_error() {
        let module = parse_module_source("module m\nexport func f() -> int { missing }", "t.ail").unwrap();
        let err = elaborate(&module, "t.ail", ElabContext::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModUnboundVariable);
    }

    #[test]
    fn bool_match_missing_arm_warns() {
        let out = elaborate_source("module m\nexport func f(b: bool) -> int { match b { true => 1 } }");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].code, WarningCode::NonExhaustiveMatch);
        assert!(out.warnings[0].message.contains("false"));
    }

    #[test]
    fn adt_match_missing_ctor_warns() {
        let out = elaborate_source(
            "module m\ntype Opt = None | Some(int)\n\
             export func f(o: Opt) -> int { match o { Some(x) => x } }",
        );
        assert!(out.warnings.iter().any(|w| w.message.contains("None")));
    }

    #[test]
    fn guards_do_not_count_toward_coverage() {
        let out = elaborate_source(
            "module m\nexport func f(b: bool) -> int { match b { true => 1, false if b == false => 2 } }",
        );
        assert!(out.warnings.iter().any(|w| w.code == WarningCode::NonExhaustiveMatch));
    }

    #[test]
    fn arm_after_wildcard_is_redundant() {
        let out = elaborate_source("module m\nexport func f(n: int) -> int { match n { _ => 0, 1 => 1 } }");
        assert!(out.warnings.iter().any(|w| w.code == WarningCode::RedundantPattern));
    }

    #[test]
    fn int_match_without_wildcard_warns() {
        let out = elaborate_source("module m\nexport func f(n: int) -> int { match n { 1 => 1, 2 => 2 } }");
        assert!(out.warnings.iter().any(|w| w.code == WarningCode::NonExhaustiveMatch));
    }

    #[test]
    fn type_only_module_elaborates_to_unit() {
        let out = elaborate_source("module m\ntype Opt = None | Some(int)");
        assert!(matches!(out.core.kind, CoreKind::Lit(Lit::Unit)));
        assert!(out.bindings.is_empty());
    }
}

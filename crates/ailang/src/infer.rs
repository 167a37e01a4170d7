//! Type inference: Algorithm W over Core, with rows, effects, and class
//! constraints.
//!
//! Generalization happens at `let`/`letrec` boundaries only. Class
//! constraints accumulate from operator nodes and are settled at each
//! generalization point: constraints over ground types resolve directly
//! against the instance table, constraints still sitting on a unification
//! variable are defaulted (`Num -> int`, `Fractional -> float`,
//! `Integral -> int`, `Eq`/`Ord`/`Show -> int`). A variable is never
//! treated as ground — resolving an instance off an unapplied variable is
//! exactly the regression that picks `eq_Int` for a float.
//!
//! Every resolved constraint records a dictionary method (`eq_Float`,
//! `add_Int`, ...) keyed by the operator node's SID; the linker rewrites
//! operator nodes from that table and nothing else.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{BinOp, EffectAnn, Lit, SType, STypeKind, UnOp},
    core::{CoreExpr, CoreKind, CorePattern, CorePatternKind, Sid},
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    elaborate::effect_row_of,
    iface::CtorExport,
    span::Span,
    types::{ClassName, EffectRow, RowType, Scheme, TvId, Type},
};

/// What a type name means when it appears in an annotation.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Adt { params: Vec<String> },
    Record { fields: Vec<(String, SType)> },
    Alias { target: SType },
}

/// Everything inference needs to resolve names that are not plain
/// variables: builtin schemes, `$adt` factories, named types, and the
/// exports of imported modules.
#[derive(Debug, Default)]
pub struct InferContext {
    pub builtins: AHashMap<String, Scheme>,
    /// `$adt` factory name (`make_Option_Some`) -> constructor export.
    pub factories: AHashMap<String, CtorExport>,
    pub types: AHashMap<String, TypeDef>,
    /// `(module path, export name)` -> scheme, for `CVarGlobal` resolution.
    pub imports: AHashMap<(String, String), Scheme>,
}

/// Result of type checking one module.
#[derive(Debug, Default)]
pub struct InferOutput {
    /// Generalized schemes of the module's top-level bindings, in chain order.
    pub schemes: IndexMap<String, Scheme>,
    /// Operator node SID -> resolved dictionary method name.
    pub methods: AHashMap<Sid, String>,
}

/// Type-checks a module's elaborated chain.
pub fn infer_module(core: &CoreExpr, ctx: &InferContext, file: &str) -> DiagResult<InferOutput> {
    let mut infer = Infer::new(ctx, file);
    let mut schemes = IndexMap::new();

    let mut current = core;
    loop {
        match &current.kind {
            CoreKind::Let {
                name,
                ann,
                value,
                body,
            } => {
                let (scheme, _effects) = infer.binding(name, ann.as_ref(), value)?;
                if name != "_" {
                    schemes.insert(name.clone(), scheme.clone());
                }
                infer.bind(name.clone(), scheme);
                current = body;
            }
            CoreKind::LetRec { bindings, body } => {
                let (group, _effects) = infer.letrec_group(bindings)?;
                for (name, scheme) in group {
                    schemes.insert(name.clone(), scheme.clone());
                    infer.bind(name, scheme);
                }
                current = body;
            }
            _ => {
                // Terminal `Var` (or unit for type-only modules).
                let _ = infer.expr(current)?;
                break;
            }
        }
    }

    infer.flush_constraints()?;
    // Defaulting may have bound variables mentioned by recorded schemes.
    for scheme in schemes.values_mut() {
        *scheme = infer.reapply_scheme(scheme);
    }
    Ok(InferOutput {
        schemes,
        methods: infer.methods,
    })
}

/// Type-checks a standalone expression (REPL input) against session bindings.
///
/// Returns the generalized scheme and the resolved-method table.
pub fn infer_expr_standalone(
    core: &CoreExpr,
    ctx: &InferContext,
    session: &[(String, Scheme)],
    file: &str,
) -> DiagResult<(Scheme, AHashMap<Sid, String>)> {
    let mut infer = Infer::new(ctx, file);
    for (name, scheme) in session {
        infer.bind(name.clone(), scheme.clone());
    }
    let (ty, _effects) = infer.expr(core)?;
    let scheme = infer.generalize(ty)?;
    infer.flush_constraints()?;
    let scheme = infer.reapply_scheme(&scheme);
    Ok((scheme, infer.methods))
}

/// A pending class constraint from an operator node.
#[derive(Debug, Clone)]
struct Constraint {
    class: ClassName,
    ty: Type,
    sid: Sid,
    /// Method family, e.g. `eq` for `==` so resolution yields `eq_Float`.
    prefix: &'static str,
    span: Span,
}

struct Infer<'a> {
    ctx: &'a InferContext,
    file: String,
    next_var: TvId,
    subst: AHashMap<TvId, Type>,
    row_subst: AHashMap<TvId, RowType>,
    constraints: Vec<Constraint>,
    methods: AHashMap<Sid, String>,
    /// Scoped typing environment; monomorphic entries are schemes with no
    /// quantified variables.
    env: Vec<AHashMap<String, Scheme>>,
}

impl<'a> Infer<'a> {
    fn new(ctx: &'a InferContext, file: &str) -> Self {
        Self {
            ctx,
            file: file.to_owned(),
            next_var: 0,
            subst: AHashMap::new(),
            row_subst: AHashMap::new(),
            constraints: Vec::new(),
            methods: AHashMap::new(),
            env: vec![AHashMap::new()],
        }
    }

    fn fresh(&mut self) -> TvId {
        let v = self.next_var;
        self.next_var += 1;
        v
    }

    fn fresh_ty(&mut self) -> Type {
        Type::Var(self.fresh())
    }

    fn bind(&mut self, name: String, scheme: Scheme) {
        self.env
            .last_mut()
            .expect("env always has a frame")
            .insert(name, scheme);
    }

    fn push_frame(&mut self) {
        self.env.push(AHashMap::new());
    }

    fn pop_frame(&mut self) {
        self.env.pop();
    }

    fn lookup(&self, name: &str) -> Option<&Scheme> {
        self.env.iter().rev().find_map(|frame| frame.get(name))
    }

    // --- substitution ---

    fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.subst.get(v) {
                Some(bound) => self.apply(bound),
                None => Type::Var(*v),
            },
            Type::List(inner) => Type::List(Box::new(self.apply(inner))),
            Type::Tuple(items) => Type::Tuple(items.iter().map(|t| self.apply(t)).collect()),
            Type::App(head, args) => Type::App(
                Box::new(self.apply(head)),
                args.iter().map(|t| self.apply(t)).collect(),
            ),
            Type::Func { params, ret, effects } => Type::Func {
                params: params.iter().map(|t| self.apply(t)).collect(),
                ret: Box::new(self.apply(ret)),
                effects: effects.clone(),
            },
            Type::Record(row) => Type::Record(self.apply_row(row)),
            other => other.clone(),
        }
    }

    fn apply_row(&self, row: &RowType) -> RowType {
        let mut fields: std::collections::BTreeMap<String, Type> = row
            .fields
            .iter()
            .map(|(label, ty)| (label.clone(), self.apply(ty)))
            .collect();
        let mut tail = row.tail;
        while let Some(t) = tail {
            match self.row_subst.get(&t) {
                Some(bound) => {
                    for (label, ty) in &bound.fields {
                        fields.entry(label.clone()).or_insert_with(|| self.apply(ty));
                    }
                    tail = bound.tail;
                }
                None => break,
            }
        }
        RowType { fields, tail }
    }

    fn occurs(&self, v: TvId, ty: &Type) -> bool {
        match ty {
            Type::Var(w) => *w == v,
            Type::List(inner) => self.occurs(v, inner),
            Type::Tuple(items) => items.iter().any(|t| self.occurs(v, t)),
            Type::App(head, args) => self.occurs(v, head) || args.iter().any(|t| self.occurs(v, t)),
            Type::Func { params, ret, .. } => params.iter().any(|t| self.occurs(v, t)) || self.occurs(v, ret),
            Type::Record(row) => row.tail == Some(v) || row.fields.values().any(|t| self.occurs(v, t)),
            _ => false,
        }
    }

    // --- unification ---

    fn mismatch(&self, expected: &Type, got: &Type, span: Span) -> Diagnostic {
        Diagnostic::typecheck(
            ErrorCode::TcMismatch,
            format!("type mismatch: expected `{expected}`, got `{got}`"),
            span,
        )
        .with_file(self.file.clone())
        .with_data("expected", expected.to_string())
        .with_data("got", got.to_string())
    }

    fn unify(&mut self, a: &Type, b: &Type, span: Span) -> DiagResult<()> {
        let a = self.apply(a);
        let b = self.apply(b);
        match (&a, &b) {
            (Type::Var(x), Type::Var(y)) if x == y => Ok(()),
            (Type::Var(x), other) | (other, Type::Var(x)) => {
                if self.occurs(*x, other) {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcOccurs,
                        format!("cannot construct the infinite type `{}` ~ `{other}`", Type::Var(*x)),
                        span,
                    )
                    .with_file(self.file.clone()));
                }
                self.subst.insert(*x, other.clone());
                Ok(())
            }
            (Type::Int, Type::Int)
            | (Type::Float, Type::Float)
            | (Type::Str, Type::Str)
            | (Type::Bool, Type::Bool)
            | (Type::Char, Type::Char)
            | (Type::Unit, Type::Unit) => Ok(()),
            (Type::Con(x), Type::Con(y)) if x == y => Ok(()),
            (Type::List(x), Type::List(y)) => self.unify(x, y, span),
            (Type::Tuple(xs), Type::Tuple(ys)) if xs.len() == ys.len() => {
                for (x, y) in xs.iter().zip(ys.iter()) {
                    self.unify(x, y, span)?;
                }
                Ok(())
            }
            (Type::App(head_a, args_a), Type::App(head_b, args_b)) if args_a.len() == args_b.len() => {
                self.unify(head_a, head_b, span)?;
                for (x, y) in args_a.iter().zip(args_b.iter()) {
                    self.unify(x, y, span)?;
                }
                Ok(())
            }
            (
                Type::Func {
                    params: pa,
                    ret: ra,
                    effects: ea,
                },
                Type::Func {
                    params: pb,
                    ret: rb,
                    effects: eb,
                },
            ) => {
                if pa.len() != pb.len() {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcArity,
                        format!("function arity mismatch: expected {} parameters, got {}", pa.len(), pb.len()),
                        span,
                    )
                    .with_file(self.file.clone()));
                }
                for (x, y) in pa.iter().zip(pb.iter()) {
                    self.unify(x, y, span)?;
                }
                self.unify(ra, rb, span)?;
                // Effect rows are always closed: unification is equality.
                if ea != eb {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcEffectMismatch,
                        format!("effect rows differ: `{ea}` vs `{eb}`"),
                        span,
                    )
                    .with_file(self.file.clone()));
                }
                Ok(())
            }
            (Type::Record(ra), Type::Record(rb)) => {
                let ra = ra.clone();
                let rb = rb.clone();
                self.unify_rows(&ra, &rb, span)
            }
            _ => Err(self.mismatch(&a, &b, span)),
        }
    }

    /// Row unification with subsumption.
    ///
    /// Closed/closed requires equal label sets. Closed/open lets the open
    /// side's tail absorb the closed side's leftover labels — and never the
    /// open side's own leftovers, which must all appear in the closed row.
    /// Open/open factors into common/only-left/only-right with a shared
    /// fresh tail.
    fn unify_rows(&mut self, r1: &RowType, r2: &RowType, span: Span) -> DiagResult<()> {
        let r1 = self.apply_row(r1);
        let r2 = self.apply_row(r2);

        for (label, ty1) in &r1.fields {
            if let Some(ty2) = r2.fields.get(label) {
                self.unify(ty1, ty2, span)?;
            }
        }
        let only1: std::collections::BTreeMap<String, Type> = r1
            .fields
            .iter()
            .filter(|(label, _)| !r2.fields.contains_key(*label))
            .map(|(label, ty)| (label.clone(), ty.clone()))
            .collect();
        let only2: std::collections::BTreeMap<String, Type> = r2
            .fields
            .iter()
            .filter(|(label, _)| !r1.fields.contains_key(*label))
            .map(|(label, ty)| (label.clone(), ty.clone()))
            .collect();

        match (r1.tail, r2.tail) {
            (None, None) => {
                if let Some(label) = only1.keys().chain(only2.keys()).next() {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcFieldMissing,
                        format!("record field `{label}` missing"),
                        span,
                    )
                    .with_file(self.file.clone())
                    .with_data("field", label.as_str()));
                }
                Ok(())
            }
            (Some(t1), None) => {
                // r1 is open, r2 closed: every r1 label must exist in r2,
                // and t1 absorbs r2's extra labels.
                if let Some(label) = only1.keys().next() {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcFieldMissing,
                        format!("record field `{label}` missing"),
                        span,
                    )
                    .with_file(self.file.clone())
                    .with_data("field", label.as_str()));
                }
                self.bind_row(t1, RowType::closed(only2), span)
            }
            (None, Some(t2)) => {
                if let Some(label) = only2.keys().next() {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcFieldMissing,
                        format!("record field `{label}` missing"),
                        span,
                    )
                    .with_file(self.file.clone())
                    .with_data("field", label.as_str()));
                }
                self.bind_row(t2, RowType::closed(only1), span)
            }
            (Some(t1), Some(t2)) => {
                if t1 == t2 {
                    if only1.is_empty() && only2.is_empty() {
                        return Ok(());
                    }
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcRowMismatch,
                        "conflicting uses of the same open record row".to_owned(),
                        span,
                    )
                    .with_file(self.file.clone()));
                }
                let shared = self.fresh();
                self.bind_row(t1, RowType::open(only2, shared), span)?;
                self.bind_row(t2, RowType::open(only1, shared), span)
            }
        }
    }

    /// Binds a row variable, with the row occurs check that prevents
    /// `rho ~ {l: t | rho}` infinite rows.
    fn bind_row(&mut self, tail: TvId, row: RowType, span: Span) -> DiagResult<()> {
        let row = self.apply_row(&row);
        if row.tail == Some(tail) || row.fields.values().any(|ty| self.occurs(tail, ty)) {
            return Err(Diagnostic::typecheck(
                ErrorCode::TcOccurs,
                "cannot construct an infinite record row".to_owned(),
                span,
            )
            .with_file(self.file.clone()));
        }
        if row.fields.is_empty() && row.tail.is_none() {
            // Binding to the empty closed row still matters: it closes the
            // variable. Represent it explicitly.
            self.row_subst.insert(tail, row);
            return Ok(());
        }
        self.row_subst.insert(tail, row);
        Ok(())
    }

    // --- schemes ---

    fn instantiate(&mut self, scheme: &Scheme) -> Type {
        if scheme.vars.is_empty() {
            return self.apply(&scheme.ty);
        }
        let mapping: AHashMap<TvId, TvId> = scheme.vars.iter().map(|v| (*v, self.fresh())).collect();
        let renamed = rename_vars(&scheme.ty, &mapping);
        self.apply(&renamed)
    }

    fn free_env_vars(&self) -> Vec<TvId> {
        let mut out = Vec::new();
        for frame in &self.env {
            for scheme in frame.values() {
                let applied = self.apply(&scheme.ty);
                let mut vars = Vec::new();
                applied.collect_vars(&mut vars);
                for v in vars {
                    if !scheme.vars.contains(&v) && !out.contains(&v) {
                        out.push(v);
                    }
                }
            }
        }
        out
    }

    /// Generalizes a type at a `let` boundary.
    ///
    /// Constraints whose type has settled to something ground resolve
    /// immediately; constraints still on a variable that is about to be
    /// quantified are defaulted first (so no constrained variable is ever
    /// quantified). Constraints mentioning variables still free in the
    /// environment stay pending.
    fn generalize(&mut self, ty: Type) -> DiagResult<Scheme> {
        let applied = self.apply(&ty);
        let env_free = self.free_env_vars();
        let mut candidate_vars = Vec::new();
        applied.collect_vars(&mut candidate_vars);
        candidate_vars.retain(|v| !env_free.contains(v));

        self.settle_constraints(Some(&candidate_vars))?;

        let applied = self.apply(&ty);
        let mut vars = Vec::new();
        applied.collect_vars(&mut vars);
        vars.retain(|v| !env_free.contains(v));
        Ok(Scheme { vars, ty: applied })
    }

    fn reapply_scheme(&self, scheme: &Scheme) -> Scheme {
        let ty = self.apply(&scheme.ty);
        let mut vars = Vec::new();
        ty.collect_vars(&mut vars);
        vars.retain(|v| scheme.vars.contains(v));
        Scheme { vars, ty }
    }

    /// Settles pending constraints. With `scope = Some(vars)`, variable
    /// constraints are only defaulted when their variable is in `vars`;
    /// with `scope = None` (end of inference) everything is settled.
    fn settle_constraints(&mut self, scope: Option<&[TvId]>) -> DiagResult<()> {
        let pending = std::mem::take(&mut self.constraints);
        for constraint in pending {
            let ty = self.apply(&constraint.ty);
            match &ty {
                Type::Var(v) => {
                    let in_scope = scope.is_none_or(|vars| vars.contains(v));
                    if in_scope {
                        self.default_constraint(&constraint, *v)?;
                    } else {
                        self.constraints.push(constraint);
                    }
                }
                _ => self.resolve_constraint(&constraint, &ty)?,
            }
        }
        Ok(())
    }

    fn flush_constraints(&mut self) -> DiagResult<()> {
        self.settle_constraints(None)
    }

    /// Defaults an ambiguous constraint and binds its variable.
    fn default_constraint(&mut self, constraint: &Constraint, var: TvId) -> DiagResult<()> {
        let default = match constraint.class {
            ClassName::Num | ClassName::Integral | ClassName::Eq | ClassName::Ord | ClassName::Show => Type::Int,
            ClassName::Fractional => Type::Float,
            // `++` with both operands unresolved defaults to list concat
            // (the more polymorphic reading).
            ClassName::Concat => Type::List(Box::new(self.fresh_ty())),
        };
        self.subst.insert(var, default.clone());
        self.resolve_constraint(constraint, &default)
    }

    /// Resolves a constraint against the instance table. The type is ground
    /// at its head by the time this runs.
    fn resolve_constraint(&mut self, constraint: &Constraint, ty: &Type) -> DiagResult<()> {
        let ok = match constraint.class {
            ClassName::Num => matches!(ty, Type::Int | Type::Float),
            ClassName::Fractional => matches!(ty, Type::Float),
            ClassName::Integral => matches!(ty, Type::Int),
            ClassName::Eq => matches!(
                ty,
                Type::Int
                    | Type::Float
                    | Type::Bool
                    | Type::Str
                    | Type::Char
                    | Type::Unit
                    | Type::List(_)
                    | Type::Tuple(_)
                    | Type::Record(_)
            ),
            ClassName::Ord => matches!(ty, Type::Int | Type::Float | Type::Str | Type::Char),
            ClassName::Show => ty.method_suffix().is_some(),
            ClassName::Concat => matches!(ty, Type::List(_) | Type::Str),
        };
        if !ok {
            let code = if constraint.class == ClassName::Integral {
                ErrorCode::TcNoInstance
            } else {
                ErrorCode::TcMismatch
            };
            let mut diag = Diagnostic::typecheck(
                code,
                format!("no instance `{} {ty}`", constraint.class),
                constraint.span,
            )
            .with_file(self.file.clone())
            .with_data("class", constraint.class.to_string())
            .with_data("type", ty.to_string());
            if constraint.class == ClassName::Integral {
                diag = diag.with_fix("`%` requires integer operands; use floats with `/` instead", 0.7);
            }
            return Err(diag);
        }
        let suffix = ty.method_suffix().expect("instance types have a method suffix");
        self.methods
            .insert(constraint.sid, format!("{}_{suffix}", constraint.prefix));
        Ok(())
    }

    fn constrain(&mut self, class: ClassName, ty: Type, sid: Sid, prefix: &'static str, span: Span) {
        self.constraints.push(Constraint {
            class,
            ty,
            sid,
            prefix,
            span,
        });
    }

    // --- annotation conversion ---

    /// Converts a surface type to a semantic one.
    ///
    /// `params` maps in-scope generic names (`T`) to their variables.
    /// Surface record types convert to *open* rows — the subsumption shim
    /// that lets `{id: int}` accept wider records at call sites.
    fn convert(&mut self, st: &SType, params: &mut AHashMap<String, TvId>) -> DiagResult<Type> {
        match &st.kind {
            STypeKind::Int => Ok(Type::Int),
            STypeKind::Float => Ok(Type::Float),
            STypeKind::Str => Ok(Type::Str),
            STypeKind::Bool => Ok(Type::Bool),
            STypeKind::Char => Ok(Type::Char),
            STypeKind::Unit => Ok(Type::Unit),
            STypeKind::List(inner) => Ok(Type::List(Box::new(self.convert(inner, params)?))),
            STypeKind::Tuple(items) => Ok(Type::Tuple(
                items
                    .iter()
                    .map(|t| self.convert(t, params))
                    .collect::<DiagResult<Vec<_>>>()?,
            )),
            STypeKind::Con(name) => {
                if let Some(prim) = Type::normalize_con(name) {
                    return Ok(prim);
                }
                if let Some(v) = params.get(name) {
                    return Ok(Type::Var(*v));
                }
                match self.ctx.types.get(name) {
                    Some(TypeDef::Adt { .. }) => Ok(Type::Con(name.clone())),
                    Some(TypeDef::Record { fields }) => {
                        let fields = fields.clone();
                        let mut row = std::collections::BTreeMap::new();
                        for (label, field_ty) in &fields {
                            row.insert(label.clone(), self.convert(field_ty, params)?);
                        }
                        let tail = self.fresh();
                        Ok(Type::Record(RowType::open(row, tail)))
                    }
                    Some(TypeDef::Alias { target }) => {
                        let target = target.clone();
                        self.convert(&target, params)
                    }
                    None => Err(Diagnostic::typecheck(
                        ErrorCode::TcMismatch,
                        format!("unknown type `{name}`"),
                        st.span,
                    )
                    .with_file(self.file.clone())
                    .with_data("type", name.as_str())),
                }
            }
            STypeKind::App(head, args) => {
                let head_ty = self.convert(head, params)?;
                let args = args
                    .iter()
                    .map(|t| self.convert(t, params))
                    .collect::<DiagResult<Vec<_>>>()?;
                Ok(Type::App(Box::new(head_ty), args))
            }
            STypeKind::Func {
                params: param_tys,
                ret,
                effects,
            } => {
                let converted_params = param_tys
                    .iter()
                    .map(|t| self.convert(t, params))
                    .collect::<DiagResult<Vec<_>>>()?;
                let ret = self.convert(ret, params)?;
                let effects = effect_row_of(effects).unwrap_or_else(EffectRow::pure);
                Ok(Type::Func {
                    params: converted_params,
                    ret: Box::new(ret),
                    effects,
                })
            }
            STypeKind::Record(fields) => {
                let mut row = std::collections::BTreeMap::new();
                for (label, field_ty) in fields {
                    row.insert(label.clone(), self.convert(field_ty, params)?);
                }
                let tail = self.fresh();
                Ok(Type::Record(RowType::open(row, tail)))
            }
        }
    }

    /// Instantiates a constructor export: fresh variables for the declaring
    /// type's parameters, converted argument types, and the result type.
    fn instantiate_ctor(&mut self, export: &CtorExport, span: Span) -> DiagResult<(Vec<Type>, Type)> {
        let mut params: AHashMap<String, TvId> = AHashMap::new();
        let mut param_vars = Vec::with_capacity(export.type_params.len());
        for name in &export.type_params {
            let v = self.fresh();
            params.insert(name.clone(), v);
            param_vars.push(Type::Var(v));
        }
        let args = export
            .arg_types
            .iter()
            .map(|t| self.convert(t, &mut params))
            .collect::<DiagResult<Vec<_>>>()
            .map_err(|d| d.with_span(span))?;
        let result = if param_vars.is_empty() {
            Type::Con(export.type_name.clone())
        } else {
            Type::App(Box::new(Type::Con(export.type_name.clone())), param_vars)
        };
        Ok((args, result))
    }

    // --- bindings ---

    /// Infers a `let` right-hand side: annotation check, generalization,
    /// and the value's own effect row (lambdas are pure to construct; the
    /// row matters for effectful initializers in block chains).
    fn binding(&mut self, _name: &str, ann: Option<&SType>, value: &CoreExpr) -> DiagResult<(Scheme, EffectRow)> {
        let (ty, effects) = self.expr(value)?;
        if let Some(ann) = ann {
            let mut scope = AHashMap::new();
            let ann_ty = self.convert(ann, &mut scope)?;
            self.unify(&ty, &ann_ty, value.span)?;
        }
        let scheme = self.generalize(ty)?;
        Ok((scheme, effects))
    }

    fn letrec_group(
        &mut self,
        bindings: &[crate::core::CoreBinding],
    ) -> DiagResult<(Vec<(String, Scheme)>, EffectRow)> {
        // Phase 1: one monomorphic skeleton per binding. Lambda skeletons
        // carry their annotation's latent row so recursive calls inside
        // the group contribute the right effects; rows are closed, so
        // there is no effect variable to defer to.
        let skeletons: Vec<Type> = bindings
            .iter()
            .map(|binding| match &binding.expr.kind {
                CoreKind::Lambda { params, effects_ann, .. } => {
                    let param_vars: Vec<Type> = params.iter().map(|_| self.fresh_ty()).collect();
                    let latent = effect_row_of(effects_ann).unwrap_or_else(EffectRow::pure);
                    Type::Func {
                        params: param_vars,
                        ret: Box::new(self.fresh_ty()),
                        effects: latent,
                    }
                }
                _ => self.fresh_ty(),
            })
            .collect();
        self.push_frame();
        for (binding, skeleton) in bindings.iter().zip(skeletons.iter()) {
            self.bind(binding.name.clone(), Scheme::mono(skeleton.clone()));
        }
        // Phase 2: infer each right-hand side against its skeleton.
        let mut effects = EffectRow::pure();
        let mut actuals = Vec::with_capacity(bindings.len());
        for (binding, skeleton) in bindings.iter().zip(skeletons.iter()) {
            let (ty, rhs_effects) = self.expr(&binding.expr)?;
            effects = effects.union(&rhs_effects);
            self.unify_recursive(&ty, skeleton, binding.expr.span)?;
            actuals.push(ty);
        }
        self.pop_frame();
        // Phase 3: generalize each member from its actual inferred type
        // (the skeleton's latent row may under-approximate for
        // inferred-effect lambdas; the actual type is authoritative).
        let mut out = Vec::with_capacity(bindings.len());
        for (binding, actual) in bindings.iter().zip(actuals.iter()) {
            let scheme = self.generalize(actual.clone())?;
            out.push((binding.name.clone(), scheme));
        }
        Ok((out, effects))
    }

    /// Unifies a letrec right-hand side with its group skeleton.
    ///
    /// Parameters and results unify normally; the latent effect row is
    /// taken from the inferred side. An inferred-effect lambda discovers
    /// its row from its own body, which necessarily includes whatever the
    /// recursive call performs — demanding row equality against the
    /// skeleton here would reject every effectful recursive function.
    fn unify_recursive(&mut self, actual: &Type, skeleton: &Type, span: Span) -> DiagResult<()> {
        let actual = self.apply(actual);
        let skeleton = self.apply(skeleton);
        if let (
            Type::Func {
                params: actual_params,
                ret: actual_ret,
                ..
            },
            Type::Func {
                params: skeleton_params,
                ret: skeleton_ret,
                ..
            },
        ) = (&actual, &skeleton)
            && actual_params.len() == skeleton_params.len()
        {
            for (a, s) in actual_params.iter().zip(skeleton_params.iter()) {
                self.unify(a, s, span)?;
            }
            return self.unify(actual_ret, skeleton_ret, span);
        }
        self.unify(&actual, &skeleton, span)
    }

    // --- expressions ---

    fn expr(&mut self, expr: &CoreExpr) -> DiagResult<(Type, EffectRow)> {
        let span = expr.span;
        match &expr.kind {
            CoreKind::Lit(lit) => Ok((lit_type(lit), EffectRow::pure())),
            CoreKind::Var(name) => {
                let Some(scheme) = self.lookup(name).cloned() else {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcMismatch,
                        format!("unbound variable `{name}` reached type checking"),
                        span,
                    )
                    .with_file(self.file.clone()));
                };
                Ok((self.instantiate(&scheme), EffectRow::pure()))
            }
            CoreKind::VarGlobal { module, name } => self.global(module, name, expr.sid, span),
            CoreKind::Lambda {
                type_params,
                params,
                ret_ann,
                effects_ann,
                body,
            } => {
                let mut scope: AHashMap<String, TvId> = AHashMap::new();
                for tp in type_params {
                    let v = self.fresh();
                    scope.insert(tp.clone(), v);
                }
                let mut param_types = Vec::with_capacity(params.len());
                self.push_frame();
                for param in params {
                    let ty = match &param.ann {
                        Some(ann) => self.convert(ann, &mut scope)?,
                        None => self.fresh_ty(),
                    };
                    self.bind(param.name.clone(), Scheme::mono(ty.clone()));
                    param_types.push(ty);
                }
                let (body_ty, body_effects) = self.expr(body)?;
                self.pop_frame();
                if let Some(ret) = ret_ann {
                    let ret_ty = self.convert(ret, &mut scope)?;
                    self.unify(&body_ty, &ret_ty, body.span)?;
                }
                let latent = self.check_effects(effects_ann, &body_effects, span)?;
                Ok((
                    Type::Func {
                        params: param_types,
                        ret: Box::new(body_ty),
                        effects: latent,
                    },
                    EffectRow::pure(),
                ))
            }
            CoreKind::App { func, args } => {
                let (func_ty, func_effects) = self.expr(func)?;
                let mut effects = func_effects;
                let mut arg_types = Vec::with_capacity(args.len());
                for arg in args {
                    let (ty, eff) = self.expr(arg)?;
                    effects = effects.union(&eff);
                    arg_types.push(ty);
                }
                let func_ty = self.apply(&func_ty);
                match func_ty {
                    Type::Func { params, ret, effects: latent } => {
                        if params.len() != arg_types.len() {
                            return Err(Diagnostic::typecheck(
                                ErrorCode::TcArity,
                                format!("expected {} arguments, got {}", params.len(), arg_types.len()),
                                span,
                            )
                            .with_file(self.file.clone()));
                        }
                        for (param, arg) in params.iter().zip(arg_types.iter()) {
                            self.unify(arg, param, span)?;
                        }
                        // Application's effect is the union of the argument
                        // effects and the function's declared row.
                        Ok((self.apply(&ret), effects.union(&latent)))
                    }
                    Type::Var(v) => {
                        let ret = self.fresh_ty();
                        let wanted = Type::Func {
                            params: arg_types,
                            ret: Box::new(ret.clone()),
                            effects: EffectRow::pure(),
                        };
                        if self.occurs(v, &wanted) {
                            return Err(Diagnostic::typecheck(
                                ErrorCode::TcOccurs,
                                "cannot construct an infinite function type".to_owned(),
                                span,
                            )
                            .with_file(self.file.clone()));
                        }
                        self.subst.insert(v, wanted);
                        Ok((ret, effects))
                    }
                    other => Err(Diagnostic::typecheck(
                        ErrorCode::TcMismatch,
                        format!("cannot call a value of type `{other}`"),
                        span,
                    )
                    .with_file(self.file.clone())),
                }
            }
            CoreKind::Let { name, ann, value, body } => {
                // `let` sequences effects: the value's row unions with the
                // body's. Block chains desugar to nested lets, so this is
                // where statement effects accumulate.
                let (scheme, value_effects) = self.binding(name, ann.as_ref(), value)?;
                self.push_frame();
                self.bind(name.clone(), scheme);
                let (body_ty, body_effects) = self.expr(body)?;
                self.pop_frame();
                Ok((body_ty, value_effects.union(&body_effects)))
            }
            CoreKind::LetRec { bindings, body } => {
                let (group, rhs_effects) = self.letrec_group(bindings)?;
                self.push_frame();
                for (name, scheme) in group {
                    self.bind(name, scheme);
                }
                let result = self.expr(body);
                self.pop_frame();
                let (body_ty, body_effects) = result?;
                Ok((body_ty, rhs_effects.union(&body_effects)))
            }
            CoreKind::If { cond, then, els } => {
                let (cond_ty, cond_eff) = self.expr(cond)?;
                self.unify(&cond_ty, &Type::Bool, cond.span)?;
                let (then_ty, then_eff) = self.expr(then)?;
                let (else_ty, else_eff) = self.expr(els)?;
                self.unify(&then_ty, &else_ty, span)?;
                Ok((self.apply(&then_ty), cond_eff.union(&then_eff).union(&else_eff)))
            }
            CoreKind::Match { scrutinee, arms } => {
                let (scrutinee_ty, mut effects) = self.expr(scrutinee)?;
                let result_ty = self.fresh_ty();
                for arm in arms {
                    let (pattern_ty, bindings) = self.pattern(&arm.pattern)?;
                    self.unify(&pattern_ty, &scrutinee_ty, arm.pattern.span)?;
                    self.push_frame();
                    for (name, ty) in bindings {
                        self.bind(name, Scheme::mono(ty));
                    }
                    if let Some(guard) = &arm.guard {
                        let (guard_ty, guard_eff) = self.expr(guard)?;
                        self.unify(&guard_ty, &Type::Bool, guard.span)?;
                        effects = effects.union(&guard_eff);
                    }
                    let (body_ty, body_eff) = self.expr(&arm.body)?;
                    self.unify(&body_ty, &result_ty, arm.body.span)?;
                    effects = effects.union(&body_eff);
                    self.pop_frame();
                }
                Ok((self.apply(&result_ty), effects))
            }
            CoreKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, expr.sid, span),
            CoreKind::Unary { op, expr: operand } => {
                let (operand_ty, effects) = self.expr(operand)?;
                match op {
                    UnOp::Neg => {
                        self.constrain(ClassName::Num, operand_ty.clone(), expr.sid, "neg", span);
                        Ok((operand_ty, effects))
                    }
                    UnOp::Not => {
                        self.unify(&operand_ty, &Type::Bool, span)?;
                        self.methods.insert(expr.sid, "not_Bool".to_owned());
                        Ok((Type::Bool, effects))
                    }
                }
            }
            CoreKind::RecordLit(fields) => {
                let mut row = std::collections::BTreeMap::new();
                let mut effects = EffectRow::pure();
                for (label, value) in fields {
                    let (ty, eff) = self.expr(value)?;
                    effects = effects.union(&eff);
                    row.insert(label.clone(), ty);
                }
                Ok((Type::Record(RowType::closed(row)), effects))
            }
            CoreKind::RecordUpdate { base, fields } => {
                let (base_ty, mut effects) = self.expr(base)?;
                for (label, value) in fields {
                    let (value_ty, eff) = self.expr(value)?;
                    effects = effects.union(&eff);
                    let tail = self.fresh();
                    let mut wanted = std::collections::BTreeMap::new();
                    wanted.insert(label.clone(), value_ty);
                    self.unify(&base_ty, &Type::Record(RowType::open(wanted, tail)), span)?;
                }
                Ok((self.apply(&base_ty), effects))
            }
            CoreKind::RecordAccess { expr: inner, field } => {
                let (record_ty, effects) = self.expr(inner)?;
                let field_ty = self.fresh_ty();
                let tail = self.fresh();
                let mut wanted = std::collections::BTreeMap::new();
                wanted.insert(field.clone(), field_ty.clone());
                self.unify(&record_ty, &Type::Record(RowType::open(wanted, tail)), span)
                    .map_err(|d| {
                        if d.code == ErrorCode::TcFieldMissing {
                            d
                        } else {
                            d.with_data("field", field.as_str())
                        }
                    })?;
                Ok((self.apply(&field_ty), effects))
            }
            CoreKind::List(items) => {
                let elem = self.fresh_ty();
                let mut effects = EffectRow::pure();
                for item in items {
                    let (ty, eff) = self.expr(item)?;
                    effects = effects.union(&eff);
                    self.unify(&ty, &elem, item.span)?;
                }
                Ok((Type::List(Box::new(self.apply(&elem))), effects))
            }
            CoreKind::Tuple(items) => {
                let mut types = Vec::with_capacity(items.len());
                let mut effects = EffectRow::pure();
                for item in items {
                    let (ty, eff) = self.expr(item)?;
                    effects = effects.union(&eff);
                    types.push(ty);
                }
                Ok((Type::Tuple(types), effects))
            }
        }
    }

    fn global(&mut self, module: &str, name: &str, sid: Sid, span: Span) -> DiagResult<(Type, EffectRow)> {
        // `show` is the one class-method reference: it types as
        // `Show a => (a) -> string` and registers a constraint keyed by
        // this reference node's SID. The linker rewrites the node to the
        // resolved dictionary method (`show_Int`, `show_Float`, ...);
        // ambiguous uses default to `int` like every other class.
        if module == "$builtin" && name == "show" {
            let operand = self.fresh_ty();
            self.constrain(ClassName::Show, operand.clone(), sid, "show", span);
            return Ok((
                Type::Func {
                    params: vec![operand],
                    ret: Box::new(Type::Str),
                    effects: EffectRow::pure(),
                },
                EffectRow::pure(),
            ));
        }
        match module {
            "$builtin" => match self.ctx.builtins.get(name) {
                Some(scheme) => {
                    let scheme = scheme.clone();
                    Ok((self.instantiate(&scheme), EffectRow::pure()))
                }
                None => Err(Diagnostic::typecheck(
                    ErrorCode::TcMismatch,
                    format!("unknown builtin `{name}`"),
                    span,
                )
                .with_file(self.file.clone())),
            },
            "$adt" => match self.ctx.factories.get(name) {
                Some(export) => {
                    let export = export.clone();
                    let (args, result) = self.instantiate_ctor(&export, span)?;
                    if args.is_empty() {
                        Ok((result, EffectRow::pure()))
                    } else {
                        Ok((
                            Type::Func {
                                params: args,
                                ret: Box::new(result),
                                effects: EffectRow::pure(),
                            },
                            EffectRow::pure(),
                        ))
                    }
                }
                None => Err(Diagnostic::typecheck(
                    ErrorCode::TcMismatch,
                    format!("unknown constructor factory `{name}`"),
                    span,
                )
                .with_file(self.file.clone())),
            },
            _ => match self.ctx.imports.get(&(module.to_owned(), name.to_owned())) {
                Some(scheme) => {
                    let scheme = scheme.clone();
                    Ok((self.instantiate(&scheme), EffectRow::pure()))
                }
                None => Err(Diagnostic::typecheck(
                    ErrorCode::TcMismatch,
                    format!("module `{module}` has no export `{name}`"),
                    span,
                )
                .with_file(self.file.clone())),
            },
        }
    }

    /// Checks a lambda's inferred body effects against its annotation and
    /// returns the latent row.
    fn check_effects(&self, ann: &EffectAnn, body_effects: &EffectRow, span: Span) -> DiagResult<EffectRow> {
        match ann {
            EffectAnn::Infer => Ok(body_effects.clone()),
            EffectAnn::Pure => {
                if body_effects.is_pure() {
                    Ok(EffectRow::pure())
                } else {
                    let undeclared: Vec<String> = body_effects.iter().map(|e| e.to_string()).collect();
                    Err(Diagnostic::typecheck(
                        ErrorCode::TcUndeclaredEffect,
                        format!("pure function performs undeclared effects: {}", undeclared.join(", ")),
                        span,
                    )
                    .with_file(self.file.clone())
                    .with_fix(format!("add `! {{{}}}` to the function header", undeclared.join(", ")), 0.8))
                }
            }
            EffectAnn::Declared(_) => {
                let declared = effect_row_of(ann).expect("declared annotation has a row");
                if body_effects.is_subset(&declared) {
                    Ok(declared)
                } else {
                    let undeclared: Vec<String> = body_effects
                        .difference(&declared)
                        .into_iter()
                        .map(|e| e.to_string())
                        .collect();
                    Err(Diagnostic::typecheck(
                        ErrorCode::TcUndeclaredEffect,
                        format!("function performs effects not in its annotation: {}", undeclared.join(", ")),
                        span,
                    )
                    .with_file(self.file.clone()))
                }
            }
        }
    }

    fn binary(&mut self, op: BinOp, lhs: &CoreExpr, rhs: &CoreExpr, sid: Sid, span: Span) -> DiagResult<(Type, EffectRow)> {
        let (lhs_ty, lhs_eff) = self.expr(lhs)?;
        let (rhs_ty, rhs_eff) = self.expr(rhs)?;
        let effects = lhs_eff.union(&rhs_eff);
        self.unify(&lhs_ty, &rhs_ty, span)?;
        let operand = self.apply(&lhs_ty);
        let (class, prefix, result) = match op {
            BinOp::Add => (ClassName::Num, "add", operand.clone()),
            BinOp::Sub => (ClassName::Num, "sub", operand.clone()),
            BinOp::Mul => (ClassName::Num, "mul", operand.clone()),
            BinOp::Div => (ClassName::Num, "div", operand.clone()),
            BinOp::Pow => (ClassName::Num, "pow", operand.clone()),
            BinOp::Mod => (ClassName::Integral, "mod", operand.clone()),
            BinOp::Concat => (ClassName::Concat, "concat", operand.clone()),
            BinOp::Eq => (ClassName::Eq, "eq", Type::Bool),
            BinOp::Ne => (ClassName::Eq, "ne", Type::Bool),
            BinOp::Lt => (ClassName::Ord, "lt", Type::Bool),
            BinOp::Le => (ClassName::Ord, "le", Type::Bool),
            BinOp::Gt => (ClassName::Ord, "gt", Type::Bool),
            BinOp::Ge => (ClassName::Ord, "ge", Type::Bool),
            BinOp::And | BinOp::Or => {
                unreachable!("short-circuit operators are desugared to `if` during elaboration")
            }
        };
        self.constrain(class, operand, sid, prefix, span);
        Ok((result, effects))
    }

    // --- patterns ---

    fn pattern(&mut self, pattern: &CorePattern) -> DiagResult<(Type, Vec<(String, Type)>)> {
        let span = pattern.span;
        match &pattern.kind {
            CorePatternKind::Wildcard => Ok((self.fresh_ty(), Vec::new())),
            CorePatternKind::Var(name) => {
                let ty = self.fresh_ty();
                Ok((ty.clone(), vec![(name.clone(), ty)]))
            }
            CorePatternKind::Lit(lit) => Ok((lit_type(lit), Vec::new())),
            CorePatternKind::Ctor { type_name, ctor, args } => {
                let factory = format!("make_{type_name}_{ctor}");
                let Some(export) = self.ctx.factories.get(&factory).cloned() else {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcMismatch,
                        format!("unknown constructor `{ctor}` of type `{type_name}`"),
                        span,
                    )
                    .with_file(self.file.clone()));
                };
                let (arg_types, result) = self.instantiate_ctor(&export, span)?;
                if arg_types.len() != args.len() {
                    return Err(Diagnostic::typecheck(
                        ErrorCode::TcArity,
                        format!(
                            "constructor `{ctor}` has {} fields, pattern names {}",
                            arg_types.len(),
                            args.len()
                        ),
                        span,
                    )
                    .with_file(self.file.clone()));
                }
                let mut bindings = Vec::new();
                for (sub, expected) in args.iter().zip(arg_types.iter()) {
                    let (sub_ty, mut sub_bindings) = self.pattern(sub)?;
                    self.unify(&sub_ty, expected, sub.span)?;
                    bindings.append(&mut sub_bindings);
                }
                Ok((result, bindings))
            }
            CorePatternKind::Tuple(items) => {
                let mut types = Vec::with_capacity(items.len());
                let mut bindings = Vec::new();
                for item in items {
                    let (ty, mut item_bindings) = self.pattern(item)?;
                    types.push(ty);
                    bindings.append(&mut item_bindings);
                }
                Ok((Type::Tuple(types), bindings))
            }
            CorePatternKind::List { items, rest } => {
                let elem = self.fresh_ty();
                let mut bindings = Vec::new();
                for item in items {
                    let (ty, mut item_bindings) = self.pattern(item)?;
                    self.unify(&ty, &elem, item.span)?;
                    bindings.append(&mut item_bindings);
                }
                let list_ty = Type::List(Box::new(elem));
                if let Some(rest) = rest {
                    let (rest_ty, mut rest_bindings) = self.pattern(rest)?;
                    self.unify(&rest_ty, &list_ty, rest.span)?;
                    bindings.append(&mut rest_bindings);
                }
                Ok((list_ty, bindings))
            }
            CorePatternKind::Record(fields) => {
                let mut row = std::collections::BTreeMap::new();
                let mut bindings = Vec::new();
                for (label, sub) in fields {
                    let (ty, mut sub_bindings) = self.pattern(sub)?;
                    row.insert(label.clone(), ty);
                    bindings.append(&mut sub_bindings);
                }
                // Partial record patterns match wider records: open row.
                let tail = self.fresh();
                Ok((Type::Record(RowType::open(row, tail)), bindings))
            }
        }
    }
}

fn lit_type(lit: &Lit) -> Type {
    match lit {
        Lit::Int(_) => Type::Int,
        Lit::Float(_) => Type::Float,
        Lit::Str(_) => Type::Str,
        Lit::Char(_) => Type::Char,
        Lit::Bool(_) => Type::Bool,
        Lit::Unit => Type::Unit,
    }
}

/// Renames quantified variables to fresh ones during instantiation.
fn rename_vars(ty: &Type, mapping: &AHashMap<TvId, TvId>) -> Type {
    match ty {
        Type::Var(v) => match mapping.get(v) {
            Some(fresh) => Type::Var(*fresh),
            None => Type::Var(*v),
        },
        Type::List(inner) => Type::List(Box::new(rename_vars(inner, mapping))),
        Type::Tuple(items) => Type::Tuple(items.iter().map(|t| rename_vars(t, mapping)).collect()),
        Type::App(head, args) => Type::App(
            Box::new(rename_vars(head, mapping)),
            args.iter().map(|t| rename_vars(t, mapping)).collect(),
        ),
        Type::Func { params, ret, effects } => Type::Func {
            params: params.iter().map(|t| rename_vars(t, mapping)).collect(),
            ret: Box::new(rename_vars(ret, mapping)),
            effects: effects.clone(),
        },
        Type::Record(row) => Type::Record(RowType {
            fields: row
                .fields
                .iter()
                .map(|(label, t)| (label.clone(), rename_vars(t, mapping)))
                .collect(),
            tail: row.tail.map(|t| mapping.get(&t).copied().unwrap_or(t)),
        }),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        elaborate::{ElabContext, elaborate},
        parser::parse_module_source,
        types::Effect,
    };

    fn check(source: &str) -> DiagResult<InferOutput> {
        check_with(source, InferContext::default())
    }

    fn check_with(source: &str, mut ictx: InferContext) -> DiagResult<InferOutput> {
        let module = parse_module_source(source, "t.ail").unwrap();
        let table = crate::builtins::BuiltinTable::standard();
        let mut ectx = ElabContext::default();
        for name in table.names() {
            ectx.builtin_names.insert(name.to_owned());
        }
        if ictx.builtins.is_empty() {
            ictx.builtins = table.schemes();
        }
        let out = elaborate(&module, "t.ail", ectx).unwrap();
        for export in &out.local_ctors {
            ictx.factories.insert(export.factory_name(), export.clone());
        }
        for (name, def) in out
            .iface
            .types
            .iter()
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect::<Vec<_>>()
        {
            let converted = match def.kind {
                crate::iface::TypeExportKind::Adt { .. } => TypeDef::Adt { params: def.params },
                crate::iface::TypeExportKind::Record { fields } => TypeDef::Record { fields },
                crate::iface::TypeExportKind::Alias { target } => TypeDef::Alias { target },
            };
            ictx.types.insert(name, converted);
        }
        // Private types also need defs for annotation conversion.
        for export in &out.local_ctors {
            ictx.types
                .entry(export.type_name.clone())
                .or_insert_with(|| TypeDef::Adt {
                    params: export.type_params.clone(),
                });
        }
        infer_module(&out.core, &ictx, "t.ail")
    }

    #[test]
    fn factorial_infers_int_to_int() {
        let out =
            check("module m\nexport func factorial(n: int) -> int { if n <= 1 then 1 else n * factorial(n - 1) }")
                .unwrap();
        let scheme = &out.schemes["factorial"];
        assert_eq!(scheme.to_string(), "(int) -> int");
    }

    #[test]
    fn identity_generalizes() {
        let out = check("module m\nexport func id[T](x: T) -> T { x }").unwrap();
        let scheme = &out.schemes["id"];
        assert_eq!(scheme.to_string(), "forall a. (a) -> a");
    }

    #[test]
    fn float_equality_routes_through_eq_float() {
        // Regression guard: `let b: float = 0.0 in b == 0.0` must resolve
        // `==` to eq_Float, never eq_Int.
        let out = check("module m\nexport func f() -> bool { let b: float = 0.0 in b == 0.0 }").unwrap();
        assert!(
            out.methods.values().any(|m| m == "eq_Float"),
            "expected eq_Float in {:?}",
            out.methods
        );
        assert!(!out.methods.values().any(|m| m == "eq_Int"));
    }

    #[test]
    fn ambiguous_eq_defaults_to_int() {
        let out = check("module m\nexport func f[T](x: T) -> bool { 1 == 1 }").unwrap();
        assert!(out.methods.values().any(|m| m == "eq_Int"));
    }

    #[test]
    fn modulo_on_floats_is_rejected() {
        let err = check("module m\nexport func f(x: float) -> float { x % 2.0 }").unwrap_err();
        assert_eq!(err.code, ErrorCode::TcNoInstance);
    }

    #[test]
    fn show_resolves_by_instance_type() {
        let out = check("module m\nexport func f() -> string { show(1.5) }").unwrap();
        assert!(out.methods.values().any(|m| m == "show_Float"), "{:?}", out.methods);
        let out = check("module m\nexport func g() -> string { show(\"hi\") }").unwrap();
        assert!(out.methods.values().any(|m| m == "show_String"), "{:?}", out.methods);
    }

    #[test]
    fn ambiguous_show_defaults_to_int() {
        // `Show t` with `t` still a variable at generalization defaults to
        // int, like Eq and Ord.
        let out = check("module m\nexport func render(x) => show(x)").unwrap();
        assert_eq!(out.schemes["render"].to_string(), "(int) -> string");
        assert!(out.methods.values().any(|m| m == "show_Int"), "{:?}", out.methods);
    }

    #[test]
    fn concat_resolution_is_operand_driven() {
        let lists = check("module m\nexport func f(xs: [int]) -> [int] { xs ++ xs }").unwrap();
        assert!(lists.methods.values().any(|m| m == "concat_List"));
        let strings = check("module m\nexport func f(s: string) -> string { s ++ s }").unwrap();
        assert!(strings.methods.values().any(|m| m == "concat_String"));
    }

    #[test]
    fn record_subsumption_accepts_wider_records() {
        let out = check(
            "module m\nfunc printId(e: {id: int}) -> int { e.id }\n\
             export func f() -> int { printId({id: 42, name: \"alice\"}) }",
        );
        assert!(out.is_ok(), "{out:?}");
    }

    #[test]
    fn record_field_order_is_irrelevant() {
        let out = check(
            "module m\nfunc g(p: {x: int, y: bool}) -> int { p.x }\n\
             export func f() -> int { g({y: true, x: 1}) }",
        );
        assert!(out.is_ok(), "{out:?}");
    }

    #[test]
    fn missing_field_is_tc_rec_001() {
        let err = check(
            "module m\nfunc g(p: {x: int, y: bool}) -> int { p.x }\n\
             export func f() -> int { g({x: 1}) }",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::TcFieldMissing);
    }

    #[test]
    fn nested_record_openness_propagates() {
        let out = check(
            "module m\nfunc g(p: {user: {id: int}}) -> int { p.user.id }\n\
             export func f() -> int { g({user: {id: 7, name: \"x\"}}) }",
        );
        assert!(out.is_ok(), "{out:?}");
    }

    #[test]
    fn pure_function_with_effectful_body_is_rejected() {
        let mut ictx = InferContext::default();
        ictx.builtins.insert(
            "_io_println".to_owned(),
            Scheme::mono(Type::Func {
                params: vec![Type::Str],
                ret: Box::new(Type::Unit),
                effects: EffectRow::single(Effect::IO),
            }),
        );
        let module = parse_module_source("module m\nexport func f() -> () { _io_println(\"hi\") }", "t.ail").unwrap();
        let mut ectx = ElabContext::default();
        ectx.builtin_names.insert("_io_println".to_owned());
        let out = elaborate(&module, "t.ail", ectx).unwrap();
        let err = infer_module(&out.core, &ictx, "t.ail").unwrap_err();
        assert_eq!(err.code, ErrorCode::TcUndeclaredEffect);
    }

    #[test]
    fn declared_effects_accept_effectful_body() {
        let mut ictx = InferContext::default();
        ictx.builtins.insert(
            "_io_println".to_owned(),
            Scheme::mono(Type::Func {
                params: vec![Type::Str],
                ret: Box::new(Type::Unit),
                effects: EffectRow::single(Effect::IO),
            }),
        );
        let module =
            parse_module_source("module m\nexport func f() -> () ! {IO} { _io_println(\"hi\") }", "t.ail").unwrap();
        let mut ectx = ElabContext::default();
        ectx.builtin_names.insert("_io_println".to_owned());
        let out = elaborate(&module, "t.ail", ectx).unwrap();
        let result = infer_module(&out.core, &ictx, "t.ail").unwrap();
        let scheme = &result.schemes["f"];
        assert_eq!(scheme.to_string(), "() -> () ! {IO}");
    }

    #[test]
    fn ctor_patterns_type_check_against_the_adt() {
        let out = check(
            "module m\ntype Opt = None | Some(int)\n\
             export func get(o: Opt) -> int { match o { Some(x) => x, None => 0 } }",
        )
        .unwrap();
        assert_eq!(out.schemes["get"].to_string(), "(Opt) -> int");
    }

    #[test]
    fn occurs_check_fires() {
        let err = check("module m\nexport func f(x) => x(x)").unwrap_err();
        assert_eq!(err.code, ErrorCode::TcOccurs);
    }

    #[test]
    fn mutual_recursion_types_flow_across_the_group() {
        let out = check(
            "module m\n\
             func isEven(n: int) -> bool { if n == 0 then true else isOdd(n - 1) }\n\
             func isOdd(n: int) -> bool { if n == 0 then false else isEven(n - 1) }\n\
             export func check(n: int) -> bool { isEven(n) }",
        )
        .unwrap();
        assert_eq!(out.schemes["isEven"].to_string(), "(int) -> bool");
        assert_eq!(out.schemes["isOdd"].to_string(), "(int) -> bool");
    }
}

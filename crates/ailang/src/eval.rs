//! The tree-walking evaluator over Core.
//!
//! Strict, single-threaded, environment-passing. Recursion is implemented
//! with indirection cells pre-bound in the environment (three-phase
//! `letrec`), never with late binding. Every function application bumps
//! the recursion budget in the effect context and restores it on all exit
//! paths.
//!
//! Effect builtins are *never* called directly from here: the evaluator
//! resolves them to an `(effect, op)` key and goes through
//! [`EffectRegistry::dispatch`], which performs the capability check.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use ahash::AHashMap;

use crate::{
    ast::Lit,
    builtins::{BuiltinImpl, BuiltinTable},
    core::{CoreArm, CoreExpr, CoreKind, CorePattern, CorePatternKind},
    decision,
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    effects::{EffContext, EffectRegistry, OpEnv},
    iface::CtorExport,
    io::PrintWriter,
    span::Span,
    tracer::EvalTracer,
    value::{BuiltinRef, Env, ForceError, FunctionValue, RecCell, Value},
};

/// How `match` dispatches arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Try arms top to bottom. This is the semantic reference.
    #[default]
    Linear,
    /// Pre-select candidate arms by scrutinee head tag. Must be
    /// observationally equivalent to `Linear`.
    DecisionTree,
}

/// Resolves cross-module references for the evaluator.
///
/// Implementations gate on the target module's interface: unexported
/// names return `None`.
pub trait GlobalResolver {
    fn resolve_export(&self, module: &str, name: &str) -> Option<Value>;
}

/// A resolver with no modules, for standalone evaluation.
#[derive(Debug, Default)]
pub struct NoGlobals;

impl GlobalResolver for NoGlobals {
    fn resolve_export(&self, _module: &str, _name: &str) -> Option<Value> {
        None
    }
}

/// Everything one evaluation needs, threaded by mutable reference.
pub struct EvalCtx<'a> {
    pub eff: &'a EffContext,
    pub builtins: &'a BuiltinTable,
    pub effects: &'a EffectRegistry,
    /// `$adt` factory registry: factory name -> constructor.
    pub adt: &'a AHashMap<String, CtorExport>,
    pub globals: &'a dyn GlobalResolver,
    pub writer: &'a mut dyn PrintWriter,
    pub tracer: &'a mut dyn EvalTracer,
    pub match_mode: MatchMode,
}

fn lit_value(lit: &Lit) -> Value {
    match lit {
        Lit::Int(n) => Value::Int(*n),
        Lit::Float(x) => Value::Float(*x),
        Lit::Str(s) => Value::str(s.clone()),
        Lit::Char(c) => Value::Char(*c),
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Unit => Value::Unit,
    }
}

/// Reads through a recursion indirection.
fn force(value: Value, span: Span) -> DiagResult<Value> {
    match &value {
        Value::Indirect(cell) => match cell.borrow().force() {
            Ok(inner) => Ok(inner),
            Err(ForceError::Visiting) => Err(Diagnostic::runtime(
                ErrorCode::RtRecursiveValue,
                "recursive value used before initialization",
            )
            .with_span(span)),
            Err(ForceError::Uninitialized) => Err(Diagnostic::runtime(
                ErrorCode::RtUninitialized,
                "binding read before initialization",
            )
            .with_span(span)),
        },
        _ => Ok(value),
    }
}

pub fn eval(expr: &CoreExpr, env: &Env, ctx: &mut EvalCtx<'_>) -> DiagResult<Value> {
    let span = expr.span;
    match &expr.kind {
        CoreKind::Lit(lit) => Ok(lit_value(lit)),
        CoreKind::Var(name) => {
            let Some(value) = env.lookup(name) else {
                return Err(Diagnostic::runtime(
                    ErrorCode::RtTypeError,
                    format!("undefined variable `{name}` at runtime"),
                )
                .with_span(span));
            };
            force(value, span)
        }
        CoreKind::VarGlobal { module, name } => global_ref(module, name, ctx, span),
        CoreKind::Lambda { params, body, .. } => Ok(Value::Function(Rc::new(FunctionValue {
            name: None,
            params: params.clone(),
            body: (**body).clone(),
            env: env.clone(),
        }))),
        CoreKind::App { func, args } => {
            let func_value = eval(func, env, ctx)?;
            let mut arg_values = Vec::with_capacity(args.len());
            for arg in args {
                arg_values.push(eval(arg, env, ctx)?);
            }
            call_value(func_value, arg_values, ctx, span)
        }
        CoreKind::Let { name, value, body, .. } => {
            let bound = eval(value, env, ctx)?;
            let child = env.child();
            child.bind(name.clone(), bound);
            eval(body, &child, ctx)
        }
        CoreKind::LetRec { bindings, body } => {
            // Phase 1: pre-allocate one cell per binding and install the
            // indirections, so every name is visible before any RHS runs.
            let rec_env = env.child();
            let cells: Vec<Rc<RefCell<RecCell>>> = bindings
                .iter()
                .map(|_| Rc::new(RefCell::new(RecCell::default())))
                .collect();
            for (binding, cell) in bindings.iter().zip(cells.iter()) {
                rec_env.bind(binding.name.clone(), Value::Indirect(cell.clone()));
            }
            // Phase 2: evaluate each right-hand side in order. Lambdas are
            // always safe — their body does not run now — so the closure is
            // built immediately. Anything else evaluates strictly under a
            // `visiting` marker so a self-read fails cleanly.
            for (binding, cell) in bindings.iter().zip(cells.iter()) {
                if let CoreKind::Lambda { params, body: lambda_body, .. } = &binding.expr.kind {
                    let closure = Value::Function(Rc::new(FunctionValue {
                        name: Some(binding.name.clone()),
                        params: params.clone(),
                        body: (**lambda_body).clone(),
                        env: rec_env.clone(),
                    }));
                    let mut cell = cell.borrow_mut();
                    cell.value = Some(closure);
                    cell.initialized = true;
                } else {
                    cell.borrow_mut().visiting = true;
                    let value = eval(&binding.expr, &rec_env, ctx)?;
                    let mut cell = cell.borrow_mut();
                    cell.value = Some(value);
                    cell.visiting = false;
                    cell.initialized = true;
                }
            }
            // Phase 3: the body sees the fully tied environment.
            eval(body, &rec_env, ctx)
        }
        CoreKind::If { cond, then, els } => {
            let cond_value = eval(cond, env, ctx)?;
            match cond_value {
                Value::Bool(true) => eval(then, env, ctx),
                Value::Bool(false) => eval(els, env, ctx),
                other => Err(Diagnostic::runtime(
                    ErrorCode::RtTypeError,
                    format!("if condition must be a bool, got {}", other.kind_name()),
                )
                .with_span(cond.span)),
            }
        }
        CoreKind::Match { scrutinee, arms } => {
            let scrutinee_value = eval(scrutinee, env, ctx)?;
            eval_match(&scrutinee_value, arms, env, ctx, span)
        }
        CoreKind::Binary { .. } | CoreKind::Unary { .. } => Err(Diagnostic::runtime(
            ErrorCode::RtTypeError,
            "operator node survived to evaluation; linking was skipped",
        )
        .with_span(span)),
        CoreKind::RecordLit(fields) => {
            let mut record = BTreeMap::new();
            for (label, value) in fields {
                record.insert(label.clone(), eval(value, env, ctx)?);
            }
            Ok(Value::Record(Rc::new(record)))
        }
        CoreKind::RecordUpdate { base, fields } => {
            let base_value = force(eval(base, env, ctx)?, span)?;
            let Value::Record(existing) = base_value else {
                return Err(Diagnostic::runtime(
                    ErrorCode::RtTypeError,
                    format!("record update on {}", base_value.kind_name()),
                )
                .with_span(span));
            };
            // Update copies the record; unspecified fields carry over.
            let mut updated = (*existing).clone();
            for (label, value) in fields {
                updated.insert(label.clone(), eval(value, env, ctx)?);
            }
            Ok(Value::Record(Rc::new(updated)))
        }
        CoreKind::RecordAccess { expr: inner, field } => {
            let record_value = force(eval(inner, env, ctx)?, span)?;
            let Value::Record(record) = &record_value else {
                return Err(Diagnostic::runtime(
                    ErrorCode::RtTypeError,
                    format!("field access `.{field}` on {}", record_value.kind_name()),
                )
                .with_span(span));
            };
            record.get(field).cloned().ok_or_else(|| {
                Diagnostic::runtime(ErrorCode::RtTypeError, format!("record has no field `{field}`")).with_span(span)
            })
        }
        CoreKind::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, env, ctx)?);
            }
            Ok(Value::List(Rc::new(values)))
        }
        CoreKind::Tuple(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, env, ctx)?);
            }
            Ok(Value::Tuple(Rc::new(values)))
        }
    }
}

fn global_ref(module: &str, name: &str, ctx: &mut EvalCtx<'_>, span: Span) -> DiagResult<Value> {
    match module {
        "$builtin" => {
            if ctx.builtins.contains(name) {
                Ok(Value::Builtin(Rc::new(BuiltinRef {
                    module: "$builtin".to_owned(),
                    name: name.to_owned(),
                })))
            } else {
                Err(Diagnostic::runtime(ErrorCode::RtTypeError, format!("unknown builtin `{name}`")).with_span(span))
            }
        }
        "$adt" => {
            let Some(export) = ctx.adt.get(name) else {
                return Err(
                    Diagnostic::runtime(ErrorCode::RtTypeError, format!("unknown constructor factory `{name}`"))
                        .with_span(span),
                );
            };
            if export.arity() == 0 {
                Ok(Value::tagged(export.type_name.clone(), export.ctor.clone(), Vec::new()))
            } else {
                Ok(Value::Builtin(Rc::new(BuiltinRef {
                    module: "$adt".to_owned(),
                    name: name.to_owned(),
                })))
            }
        }
        _ => ctx.globals.resolve_export(module, name).ok_or_else(|| {
            Diagnostic::runtime(
                ErrorCode::RtTypeError,
                format!("module `{module}` exports no binding `{name}`"),
            )
            .with_span(span)
        }),
    }
}

/// Applies a callable value to already-evaluated arguments.
pub fn call_value(func: Value, args: Vec<Value>, ctx: &mut EvalCtx<'_>, span: Span) -> DiagResult<Value> {
    let func = force(func, span)?;
    match &func {
        Value::Function(function) => {
            if function.params.len() != args.len() {
                return Err(Diagnostic::runtime(
                    ErrorCode::RtArity,
                    format!(
                        "function expects {} arguments, got {}",
                        function.params.len(),
                        args.len()
                    ),
                )
                .with_span(span));
            }
            ctx.eff.enter_call().map_err(|d| d.with_span(span))?;
            ctx.tracer.on_apply(function.name.as_deref(), ctx.eff.recursion_depth());
            let call_env = function.env.child();
            for (param, arg) in function.params.iter().zip(args) {
                call_env.bind(param.name.clone(), arg);
            }
            let result = eval(&function.body, &call_env, ctx);
            ctx.eff.exit_call();
            ctx.tracer.on_return(ctx.eff.recursion_depth());
            result
        }
        Value::Builtin(builtin) => {
            if builtin.module == "$adt" {
                let Some(export) = ctx.adt.get(&builtin.name) else {
                    return Err(Diagnostic::runtime(
                        ErrorCode::RtTypeError,
                        format!("unknown constructor factory `{}`", builtin.name),
                    )
                    .with_span(span));
                };
                if export.arity() != args.len() {
                    return Err(Diagnostic::runtime(
                        ErrorCode::RtArity,
                        format!(
                            "constructor `{}` takes {} arguments, got {}",
                            export.ctor,
                            export.arity(),
                            args.len()
                        ),
                    )
                    .with_span(span));
                }
                return Ok(Value::tagged(export.type_name.clone(), export.ctor.clone(), args));
            }
            let Some(entry) = ctx.builtins.get(&builtin.name) else {
                return Err(
                    Diagnostic::runtime(ErrorCode::RtTypeError, format!("unknown builtin `{}`", builtin.name))
                        .with_span(span),
                );
            };
            if entry.arity != args.len() {
                return Err(Diagnostic::runtime(
                    ErrorCode::RtArity,
                    format!("`{}` takes {} arguments, got {}", builtin.name, entry.arity, args.len()),
                )
                .with_span(span));
            }
            match &entry.imp {
                BuiltinImpl::Pure(imp) => imp(&args, span),
                BuiltinImpl::Effect(effect, op) => {
                    let mut env = OpEnv {
                        ctx: ctx.eff,
                        writer: &mut *ctx.writer,
                        tracer: &mut *ctx.tracer,
                    };
                    ctx.effects.dispatch(*effect, op, &mut env, &args).map_err(|d| {
                        if d.span.is_none() { d.with_span(span) } else { d }
                    })
                }
            }
        }
        other => Err(Diagnostic::runtime(
            ErrorCode::RtTypeError,
            format!("cannot call a value of kind {}", other.kind_name()),
        )
        .with_span(span)),
    }
}

fn eval_match(
    scrutinee: &Value,
    arms: &[CoreArm],
    env: &Env,
    ctx: &mut EvalCtx<'_>,
    span: Span,
) -> DiagResult<Value> {
    let candidates: Vec<usize> = match ctx.match_mode {
        MatchMode::Linear => (0..arms.len()).collect(),
        MatchMode::DecisionTree => decision::DecisionTree::compile(arms).candidates(scrutinee),
    };
    for index in candidates {
        let arm = &arms[index];
        let Some(bindings) = try_match(&arm.pattern, scrutinee) else {
            continue;
        };
        let arm_env = env.child();
        for (name, value) in bindings {
            arm_env.bind(name, value);
        }
        if let Some(guard) = &arm.guard {
            match eval(guard, &arm_env, ctx)? {
                Value::Bool(true) => {}
                Value::Bool(false) => continue,
                other => {
                    return Err(Diagnostic::runtime(
                        ErrorCode::RtTypeError,
                        format!("match guard must be a bool, got {}", other.kind_name()),
                    )
                    .with_span(guard.span));
                }
            }
        }
        ctx.tracer.on_match_arm(span, index);
        return eval(&arm.body, &arm_env, ctx);
    }
    Err(Diagnostic::runtime(ErrorCode::RtNonExhaustiveMatch, "non-exhaustive match").with_span(span))
}

/// Attempts to match one pattern against a value, returning the bindings
/// on success. Indirections are read through; literal matching is exact.
pub(crate) fn try_match(pattern: &CorePattern, value: &Value) -> Option<Vec<(String, Value)>> {
    let mut bindings = Vec::new();
    if match_into(pattern, value, &mut bindings) {
        Some(bindings)
    } else {
        None
    }
}

fn match_into(pattern: &CorePattern, value: &Value, out: &mut Vec<(String, Value)>) -> bool {
    let forced;
    let value = match value {
        Value::Indirect(cell) => match cell.borrow().force() {
            Ok(inner) => {
                forced = inner;
                &forced
            }
            Err(_) => return false,
        },
        other => other,
    };
    match &pattern.kind {
        CorePatternKind::Wildcard => true,
        CorePatternKind::Var(name) => {
            out.push((name.clone(), value.clone()));
            true
        }
        CorePatternKind::Lit(lit) => lit_value(lit).structural_eq(value),
        CorePatternKind::Ctor { type_name, ctor, args } => {
            let Value::Tagged(tagged) = value else { return false };
            if tagged.type_name != *type_name || tagged.ctor != *ctor || tagged.fields.len() != args.len() {
                return false;
            }
            args.iter()
                .zip(tagged.fields.iter())
                .all(|(p, v)| match_into(p, v, out))
        }
        CorePatternKind::Tuple(items) => {
            let Value::Tuple(values) = value else { return false };
            values.len() == items.len() && items.iter().zip(values.iter()).all(|(p, v)| match_into(p, v, out))
        }
        CorePatternKind::List { items, rest } => {
            let Value::List(values) = value else { return false };
            match rest {
                None => {
                    values.len() == items.len()
                        && items.iter().zip(values.iter()).all(|(p, v)| match_into(p, v, out))
                }
                Some(rest) => {
                    if values.len() < items.len() {
                        return false;
                    }
                    if !items.iter().zip(values.iter()).all(|(p, v)| match_into(p, v, out)) {
                        return false;
                    }
                    let remainder = Value::List(Rc::new(values[items.len()..].to_vec()));
                    match_into(rest, &remainder, out)
                }
            }
        }
        CorePatternKind::Record(fields) => {
            let Value::Record(record) = value else { return false };
            // Partial record patterns: extra fields are fine.
            fields.iter().all(|(label, p)| match record.get(label) {
                Some(v) => match_into(p, v, out),
                None => false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{io::CollectStringPrint, tracer::NoopTracer};

    fn mk(kind: CoreKind) -> CoreExpr {
        CoreExpr {
            sid: 0,
            span: Span::point(1, 1),
            kind,
        }
    }

    fn run(expr: &CoreExpr) -> DiagResult<Value> {
        let eff = EffContext::default();
        let builtins = BuiltinTable::standard();
        let effects = EffectRegistry::standard();
        let adt = AHashMap::new();
        let globals = NoGlobals;
        let mut writer = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut ctx = EvalCtx {
            eff: &eff,
            builtins: &builtins,
            effects: &effects,
            adt: &adt,
            globals: &globals,
            writer: &mut writer,
            tracer: &mut tracer,
            match_mode: MatchMode::Linear,
        };
        eval(expr, &Env::new(), &mut ctx)
    }

    #[test]
    fn letrec_non_lambda_self_reference_is_rt_rec_001() {
        // letrec x = x in x
        let expr = mk(CoreKind::LetRec {
            bindings: vec![crate::core::CoreBinding {
                name: "x".to_owned(),
                expr: mk(CoreKind::Var("x".to_owned())),
            }],
            body: Box::new(mk(CoreKind::Var("x".to_owned()))),
        });
        let err = run(&expr).unwrap_err();
        assert_eq!(err.code, ErrorCode::RtRecursiveValue);
    }

    #[test]
    fn letrec_non_lambda_value_initializes() {
        // letrec x = 41 in x  (non-lambda RHS with no self reference)
        let expr = mk(CoreKind::LetRec {
            bindings: vec![crate::core::CoreBinding {
                name: "x".to_owned(),
                expr: mk(CoreKind::Lit(Lit::Int(41))),
            }],
            body: Box::new(mk(CoreKind::Var("x".to_owned()))),
        });
        assert_eq!(run(&expr).unwrap(), Value::Int(41));
    }

    #[test]
    fn partial_record_patterns_match_wider_records() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_owned(), Value::Int(42));
        fields.insert("name".to_owned(), Value::str("alice"));
        let record = Value::Record(Rc::new(fields));
        let pattern = CorePattern {
            span: Span::point(1, 1),
            kind: CorePatternKind::Record(vec![(
                "id".to_owned(),
                CorePattern {
                    span: Span::point(1, 1),
                    kind: CorePatternKind::Var("x".to_owned()),
                },
            )]),
        };
        let bindings = try_match(&pattern, &record).unwrap();
        assert_eq!(bindings, vec![("x".to_owned(), Value::Int(42))]);
    }

    #[test]
    fn list_rest_pattern_binds_the_remainder() {
        let list = Value::List(Rc::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        let pattern = CorePattern {
            span: Span::point(1, 1),
            kind: CorePatternKind::List {
                items: vec![CorePattern {
                    span: Span::point(1, 1),
                    kind: CorePatternKind::Var("head".to_owned()),
                }],
                rest: Some(Box::new(CorePattern {
                    span: Span::point(1, 1),
                    kind: CorePatternKind::Var("tail".to_owned()),
                })),
            },
        };
        let bindings = try_match(&pattern, &list).unwrap();
        assert_eq!(bindings[0], ("head".to_owned(), Value::Int(1)));
        assert_eq!(bindings[1].1.to_string(), "[2, 3]");
    }

    #[test]
    fn operator_nodes_must_not_reach_evaluation() {
        let expr = mk(CoreKind::Binary {
            op: crate::ast::BinOp::Add,
            lhs: Box::new(mk(CoreKind::Lit(Lit::Int(1)))),
            rhs: Box::new(mk(CoreKind::Lit(Lit::Int(2)))),
        });
        let err = run(&expr).unwrap_err();
        assert_eq!(err.code, ErrorCode::RtTypeError);
    }
}

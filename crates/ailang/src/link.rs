//! Linking: operator lowering, reference validation, interface freeze.
//!
//! Lowering rewrites every operator node to an explicit
//! `$builtin` call using the resolved-method table from type checking —
//! and only that table. There is no literal-inspection fallback: an
//! operator whose SID is missing from the table is a linker error, not a
//! guess. (The table is what makes `let b: float = 0.0 in b == 0.0` call
//! `eq_Float`; re-deriving the method from operand syntax here is the
//! regression this module exists to prevent.)

use ahash::AHashMap;
use sha2::{Digest as _, Sha256};

use crate::{
    ast::{EffectAnn, SType, STypeKind},
    builtins::BuiltinTable,
    core::{CoreArm, CoreBinding, CoreExpr, CoreKind, Sid},
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    iface::{CtorExport, Iface, TypeExportKind},
};

/// Rewrites operator nodes to `$builtin` calls per the resolved-method
/// table.
pub fn lower(expr: CoreExpr, methods: &AHashMap<Sid, String>) -> DiagResult<CoreExpr> {
    let CoreExpr { sid, span, kind } = expr;
    let kind = match kind {
        CoreKind::Binary { op, lhs, rhs } => {
            let Some(method) = methods.get(&sid) else {
                return Err(Diagnostic::link(
                    ErrorCode::LnkUnresolvedOperator,
                    format!("operator `{op}` has no resolved method"),
                )
                .with_span(span));
            };
            let callee = CoreExpr {
                sid,
                span,
                kind: CoreKind::VarGlobal {
                    module: "$builtin".to_owned(),
                    name: method.clone(),
                },
            };
            CoreKind::App {
                func: Box::new(callee),
                args: vec![lower(*lhs, methods)?, lower(*rhs, methods)?],
            }
        }
        CoreKind::Unary { op, expr: operand } => {
            let Some(method) = methods.get(&sid) else {
                return Err(Diagnostic::link(
                    ErrorCode::LnkUnresolvedOperator,
                    format!("operator `{op}` has no resolved method"),
                )
                .with_span(span));
            };
            let callee = CoreExpr {
                sid,
                span,
                kind: CoreKind::VarGlobal {
                    module: "$builtin".to_owned(),
                    name: method.clone(),
                },
            };
            CoreKind::App {
                func: Box::new(callee),
                args: vec![lower(*operand, methods)?],
            }
        }
        CoreKind::Lambda {
            type_params,
            params,
            ret_ann,
            effects_ann,
            body,
        } => CoreKind::Lambda {
            type_params,
            params,
            ret_ann,
            effects_ann,
            body: Box::new(lower(*body, methods)?),
        },
        CoreKind::App { func, args } => CoreKind::App {
            func: Box::new(lower(*func, methods)?),
            args: args.into_iter().map(|a| lower(a, methods)).collect::<DiagResult<_>>()?,
        },
        CoreKind::Let { name, ann, value, body } => CoreKind::Let {
            name,
            ann,
            value: Box::new(lower(*value, methods)?),
            body: Box::new(lower(*body, methods)?),
        },
        CoreKind::LetRec { bindings, body } => CoreKind::LetRec {
            bindings: bindings
                .into_iter()
                .map(|b| {
                    Ok(CoreBinding {
                        name: b.name,
                        expr: lower(b.expr, methods)?,
                    })
                })
                .collect::<DiagResult<_>>()?,
            body: Box::new(lower(*body, methods)?),
        },
        CoreKind::If { cond, then, els } => CoreKind::If {
            cond: Box::new(lower(*cond, methods)?),
            then: Box::new(lower(*then, methods)?),
            els: Box::new(lower(*els, methods)?),
        },
        CoreKind::Match { scrutinee, arms } => CoreKind::Match {
            scrutinee: Box::new(lower(*scrutinee, methods)?),
            arms: arms
                .into_iter()
                .map(|arm| {
                    Ok(CoreArm {
                        pattern: arm.pattern,
                        guard: arm.guard.map(|g| lower(g, methods)).transpose()?,
                        body: lower(arm.body, methods)?,
                    })
                })
                .collect::<DiagResult<_>>()?,
        },
        CoreKind::RecordLit(fields) => CoreKind::RecordLit(
            fields
                .into_iter()
                .map(|(label, value)| Ok((label, lower(value, methods)?)))
                .collect::<DiagResult<_>>()?,
        ),
        CoreKind::RecordUpdate { base, fields } => CoreKind::RecordUpdate {
            base: Box::new(lower(*base, methods)?),
            fields: fields
                .into_iter()
                .map(|(label, value)| Ok((label, lower(value, methods)?)))
                .collect::<DiagResult<_>>()?,
        },
        CoreKind::RecordAccess { expr: inner, field } => CoreKind::RecordAccess {
            expr: Box::new(lower(*inner, methods)?),
            field,
        },
        CoreKind::List(items) => {
            CoreKind::List(items.into_iter().map(|i| lower(i, methods)).collect::<DiagResult<_>>()?)
        }
        CoreKind::Tuple(items) => {
            CoreKind::Tuple(items.into_iter().map(|i| lower(i, methods)).collect::<DiagResult<_>>()?)
        }
        // `show` is a class-method reference: the type checker resolved an
        // instance for this node, and the rewrite comes from that table
        // only — same rule as operators.
        CoreKind::VarGlobal { module, name } if module == "$builtin" && name == "show" => {
            let Some(method) = methods.get(&sid) else {
                return Err(Diagnostic::link(
                    ErrorCode::LnkUnresolvedOperator,
                    "`show` has no resolved instance".to_owned(),
                )
                .with_span(span));
            };
            CoreKind::VarGlobal {
                module,
                name: method.clone(),
            }
        }
        leaf @ (CoreKind::Lit(_) | CoreKind::Var(_) | CoreKind::VarGlobal { .. }) => leaf,
    };
    Ok(CoreExpr { sid, span, kind })
}

/// Validates every synthetic-module reference in lowered Core.
pub fn validate(expr: &CoreExpr, builtins: &BuiltinTable, adt: &AHashMap<String, CtorExport>) -> DiagResult<()> {
    let mut stack = vec![expr];
    while let Some(current) = stack.pop() {
        if let CoreKind::VarGlobal { module, name } = &current.kind {
            match module.as_str() {
                "$builtin" => {
                    if !builtins.contains(name) {
                        return Err(Diagnostic::link(
                            ErrorCode::LnkUnknownBuiltin,
                            format!("reference to unknown builtin `{name}`"),
                        )
                        .with_span(current.span));
                    }
                }
                "$adt" => {
                    if !adt.contains_key(name) {
                        return Err(Diagnostic::link(
                            ErrorCode::LnkUnknownAdt,
                            format!("reference to unknown constructor factory `{name}`"),
                        )
                        .with_span(current.span));
                    }
                }
                _ => {}
            }
        }
        push_children(current, &mut stack);
    }
    Ok(())
}

fn push_children<'a>(expr: &'a CoreExpr, stack: &mut Vec<&'a CoreExpr>) {
    match &expr.kind {
        CoreKind::Lit(_) | CoreKind::Var(_) | CoreKind::VarGlobal { .. } => {}
        CoreKind::Lambda { body, .. } | CoreKind::Unary { expr: body, .. } | CoreKind::RecordAccess { expr: body, .. } => {
            stack.push(body);
        }
        CoreKind::App { func, args } => {
            stack.push(func);
            stack.extend(args.iter());
        }
        CoreKind::Let { value, body, .. } => {
            stack.push(value);
            stack.push(body);
        }
        CoreKind::LetRec { bindings, body } => {
            stack.extend(bindings.iter().map(|b| &b.expr));
            stack.push(body);
        }
        CoreKind::If { cond, then, els } => {
            stack.push(cond);
            stack.push(then);
            stack.push(els);
        }
        CoreKind::Match { scrutinee, arms } => {
            stack.push(scrutinee);
            for arm in arms {
                if let Some(guard) = &arm.guard {
                    stack.push(guard);
                }
                stack.push(&arm.body);
            }
        }
        CoreKind::Binary { lhs, rhs, .. } => {
            stack.push(lhs);
            stack.push(rhs);
        }
        CoreKind::RecordLit(fields) => stack.extend(fields.iter().map(|(_, v)| v)),
        CoreKind::RecordUpdate { base, fields } => {
            stack.push(base);
            stack.extend(fields.iter().map(|(_, v)| v));
        }
        CoreKind::List(items) | CoreKind::Tuple(items) => stack.extend(items.iter()),
    }
}

/// Freezes a module interface: computes the SHA-256 digest over the
/// canonical serialization of `(module_path, exports, types, ctors)`.
///
/// All tables are sorted maps and schemes serialize alpha-renamed, so the
/// digest is stable across re-loads of an unchanged source.
pub fn freeze_iface(iface: &mut Iface) {
    let mut canon = String::new();
    canon.push_str("module ");
    canon.push_str(&iface.module_path);
    canon.push('\n');
    for (name, scheme) in &iface.exports {
        canon.push_str("export ");
        canon.push_str(name);
        canon.push_str(" : ");
        canon.push_str(&scheme.canonical());
        canon.push('\n');
    }
    for (name, type_export) in &iface.types {
        canon.push_str("type ");
        canon.push_str(name);
        for param in &type_export.params {
            canon.push(' ');
            canon.push_str(param);
        }
        canon.push_str(" = ");
        match &type_export.kind {
            TypeExportKind::Adt { ctors } => canon.push_str(&ctors.join(" | ")),
            TypeExportKind::Record { fields } => {
                let mut sorted: Vec<&(String, SType)> = fields.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                for (label, ty) in sorted {
                    canon.push_str(label);
                    canon.push(':');
                    canon.push_str(&stype_text(ty));
                    canon.push(' ');
                }
            }
            TypeExportKind::Alias { target } => canon.push_str(&stype_text(target)),
        }
        canon.push('\n');
    }
    for (name, ctor) in &iface.constructors {
        canon.push_str("ctor ");
        canon.push_str(name);
        canon.push_str(" of ");
        canon.push_str(&ctor.type_name);
        canon.push('/');
        canon.push_str(&ctor.arity().to_string());
        canon.push('\n');
    }
    let digest = Sha256::digest(canon.as_bytes());
    iface.digest = digest.iter().map(|b| format!("{b:02x}")).collect();
}

/// Canonical text for a surface type, used only for digests.
fn stype_text(st: &SType) -> String {
    match &st.kind {
        STypeKind::Int => "int".to_owned(),
        STypeKind::Float => "float".to_owned(),
        STypeKind::Str => "string".to_owned(),
        STypeKind::Bool => "bool".to_owned(),
        STypeKind::Char => "char".to_owned(),
        STypeKind::Unit => "()".to_owned(),
        STypeKind::List(inner) => format!("[{}]", stype_text(inner)),
        STypeKind::Tuple(items) => {
            let parts: Vec<String> = items.iter().map(stype_text).collect();
            format!("({})", parts.join(","))
        }
        STypeKind::Con(name) => name.clone(),
        STypeKind::App(head, args) => {
            let parts: Vec<String> = args.iter().map(stype_text).collect();
            format!("{}[{}]", stype_text(head), parts.join(","))
        }
        STypeKind::Func { params, ret, effects } => {
            let parts: Vec<String> = params.iter().map(stype_text).collect();
            let effects = match effects {
                EffectAnn::Declared(names) => {
                    let mut names: Vec<&str> = names.iter().map(|(n, _)| n.as_str()).collect();
                    names.sort_unstable();
                    format!("!{{{}}}", names.join(","))
                }
                EffectAnn::Pure | EffectAnn::Infer => String::new(),
            };
            format!("({})->{}{effects}", parts.join(","), stype_text(ret))
        }
        STypeKind::Record(fields) => {
            let mut sorted: Vec<&(String, SType)> = fields.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let parts: Vec<String> = sorted
                .iter()
                .map(|(label, ty)| format!("{label}:{}", stype_text(ty)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{Scheme, Type};

    #[test]
    fn digest_is_stable_across_freezes() {
        let mut a = Iface::new("examples/demo");
        a.exports.insert("main".to_owned(), Scheme::mono(Type::Int));
        let mut b = a.clone();
        freeze_iface(&mut a);
        freeze_iface(&mut b);
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn digest_changes_when_exports_change() {
        let mut a = Iface::new("examples/demo");
        a.exports.insert("main".to_owned(), Scheme::mono(Type::Int));
        let mut b = a.clone();
        b.exports.insert("extra".to_owned(), Scheme::mono(Type::Bool));
        freeze_iface(&mut a);
        freeze_iface(&mut b);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn digest_is_alpha_invariant_for_schemes() {
        let mut a = Iface::new("m");
        a.exports.insert(
            "id".to_owned(),
            Scheme {
                vars: vec![3],
                ty: Type::Func {
                    params: vec![Type::Var(3)],
                    ret: Box::new(Type::Var(3)),
                    effects: crate::types::EffectRow::pure(),
                },
            },
        );
        let mut b = Iface::new("m");
        b.exports.insert(
            "id".to_owned(),
            Scheme {
                vars: vec![99],
                ty: Type::Func {
                    params: vec![Type::Var(99)],
                    ret: Box::new(Type::Var(99)),
                    effects: crate::types::EffectRow::pure(),
                },
            },
        );
        freeze_iface(&mut a);
        freeze_iface(&mut b);
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn unresolved_show_is_a_linker_error() {
        use crate::span::Span;
        let expr = CoreExpr {
            sid: 3,
            span: Span::point(1, 1),
            kind: CoreKind::VarGlobal {
                module: "$builtin".to_owned(),
                name: "show".to_owned(),
            },
        };
        let err = lower(expr, &AHashMap::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::LnkUnresolvedOperator);
    }

    #[test]
    fn resolved_show_rewrites_to_its_dictionary_method() {
        use crate::span::Span;
        let expr = CoreExpr {
            sid: 3,
            span: Span::point(1, 1),
            kind: CoreKind::VarGlobal {
                module: "$builtin".to_owned(),
                name: "show".to_owned(),
            },
        };
        let mut methods = AHashMap::new();
        methods.insert(3, "show_Float".to_owned());
        let lowered = lower(expr, &methods).unwrap();
        let CoreKind::VarGlobal { name, .. } = lowered.kind else {
            panic!("expected a global ref");
        };
        assert_eq!(name, "show_Float");
    }

    #[test]
    fn unresolved_operator_is_a_linker_error() {
        use crate::ast::{BinOp, Lit};
        use crate::span::Span;
        let expr = CoreExpr {
            sid: 7,
            span: Span::point(1, 1),
            kind: CoreKind::Binary {
                op: BinOp::Add,
                lhs: Box::new(CoreExpr {
                    sid: 8,
                    span: Span::point(1, 1),
                    kind: CoreKind::Lit(Lit::Int(1)),
                }),
                rhs: Box::new(CoreExpr {
                    sid: 9,
                    span: Span::point(1, 1),
                    kind: CoreKind::Lit(Lit::Int(2)),
                }),
            },
        };
        let err = lower(expr, &AHashMap::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::LnkUnresolvedOperator);
    }
}

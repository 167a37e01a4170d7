//! The interactive session.
//!
//! The REPL shares every phase with `run`: the same lexer, parser,
//! elaborator, type checker, linker, and evaluator, driven one line at a
//! time. The session keeps accumulated `let` bindings (values plus their
//! generalized schemes), locally declared functions (tied with `letrec`
//! so they can recurse), and locally declared types.

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{Decl, Expr, ExprKind, FuncDecl, TypeBody, TypeDecl},
    core::CoreExpr,
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    effects::EffContext,
    elaborate::{ElabContext, elaborate_expr},
    eval::{EvalCtx, MatchMode, eval},
    iface::CtorExport,
    infer::{InferContext, TypeDef, infer_expr_standalone},
    io::PrintWriter,
    link::{lower, validate},
    loader::{LoaderConfig, type_def_of},
    parser::{ReplItem, parse_repl_line},
    runtime::Runtime,
    tracer::NoopTracer,
    types::Scheme,
    value::{Env, Value},
};

/// What one line of input produced.
#[derive(Debug)]
pub enum ReplOutcome {
    /// An expression evaluated to a value.
    Value { value: Value, scheme: Scheme },
    /// A `let` or `func` added a session binding.
    Bound { name: String, scheme: Scheme },
    /// A `type` declaration registered constructors.
    DefinedType { name: String },
    /// `:type` query result — nothing was evaluated.
    TypeOf { scheme: Scheme },
    Quit,
    Empty,
}

/// A persistent interactive session.
pub struct ReplSession {
    runtime: Runtime,
    eff: EffContext,
    match_mode: MatchMode,
    session_schemes: Vec<(String, Scheme)>,
    session_values: AHashMap<String, Value>,
    session_ctors: AHashMap<String, CtorExport>,
    session_types: AHashMap<String, TypeDef>,
    session_type_ctors: AHashMap<String, Vec<String>>,
    /// Runtime factories plus session-declared ones.
    adt_all: AHashMap<String, CtorExport>,
}

impl ReplSession {
    /// Boots a session with the prelude loaded.
    pub fn new(eff: EffContext) -> DiagResult<Self> {
        let runtime = Runtime::from_source(
            "module repl/session\nexport func ready() -> bool { true }",
            "repl/session",
            LoaderConfig::default(),
        )?;
        let adt_all = runtime.adt().clone();
        Ok(Self {
            runtime,
            eff,
            match_mode: MatchMode::Linear,
            session_schemes: Vec::new(),
            session_values: AHashMap::new(),
            session_ctors: AHashMap::new(),
            session_types: AHashMap::new(),
            session_type_ctors: AHashMap::new(),
            adt_all,
        })
    }

    /// Runs one line of input.
    pub fn execute(&mut self, line: &str, writer: &mut dyn PrintWriter) -> DiagResult<ReplOutcome> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(ReplOutcome::Empty);
        }
        if trimmed == ":quit" || trimmed == ":q" {
            return Ok(ReplOutcome::Quit);
        }
        if let Some(rest) = trimmed.strip_prefix(":type ") {
            let item = parse_repl_line(rest)?;
            let ReplItem::Expr(expr) = item else {
                return Err(Diagnostic::parse(
                    ErrorCode::ParUnexpectedToken,
                    ":type expects an expression",
                    crate::span::Span::point(1, 1),
                ));
            };
            let (_core, scheme) = self.compile_expr(&expr)?;
            return Ok(ReplOutcome::TypeOf { scheme });
        }

        match parse_repl_line(trimmed)? {
            ReplItem::Expr(expr) => {
                let (core, scheme) = self.compile_expr(&expr)?;
                let value = self.eval_core(&core, writer)?;
                Ok(ReplOutcome::Value { value, scheme })
            }
            ReplItem::Binding(name, expr) => {
                let (core, scheme) = self.compile_expr(&expr)?;
                let value = self.eval_core(&core, writer)?;
                self.bind(name.clone(), scheme.clone(), value);
                Ok(ReplOutcome::Bound { name, scheme })
            }
            ReplItem::Decl(Decl::Func(func)) => {
                let name = func.name.clone();
                let expr = func_as_letrec(func);
                let (core, scheme) = self.compile_expr(&expr)?;
                let value = self.eval_core(&core, writer)?;
                self.bind(name.clone(), scheme.clone(), value);
                Ok(ReplOutcome::Bound { name, scheme })
            }
            ReplItem::Decl(Decl::Type(type_decl)) => {
                let name = type_decl.name.clone();
                self.define_type(type_decl);
                Ok(ReplOutcome::DefinedType { name })
            }
        }
    }

    fn bind(&mut self, name: String, scheme: Scheme, value: Value) {
        // Latest binding wins for both value and scheme.
        self.session_schemes.retain(|(existing, _)| *existing != name);
        self.session_schemes.push((name.clone(), scheme));
        self.session_values.insert(name, value);
    }

    fn define_type(&mut self, decl: TypeDecl) {
        match &decl.body {
            TypeBody::Algebraic(ctors) => {
                let names: Vec<String> = ctors.iter().map(|c| c.name.clone()).collect();
                for ctor in ctors {
                    let export = CtorExport {
                        type_name: decl.name.clone(),
                        ctor: ctor.name.clone(),
                        type_params: decl.params.clone(),
                        arg_types: ctor.args.clone(),
                    };
                    self.adt_all.insert(export.factory_name(), export.clone());
                    self.session_ctors.insert(ctor.name.clone(), export);
                }
                self.session_type_ctors.insert(decl.name.clone(), names);
                self.session_types.insert(
                    decl.name.clone(),
                    TypeDef::Adt {
                        params: decl.params.clone(),
                    },
                );
            }
            TypeBody::Record(fields) => {
                self.session_types
                    .insert(decl.name.clone(), TypeDef::Record { fields: fields.clone() });
            }
            TypeBody::Alias(target) => {
                self.session_types
                    .insert(decl.name.clone(), TypeDef::Alias { target: target.clone() });
            }
        }
    }

    fn elab_context(&self) -> ElabContext {
        let mut ectx = ElabContext::default();
        for name in self.runtime.builtins().names() {
            ectx.builtin_names.insert(name.to_owned());
        }
        if let Some(prelude) = self.runtime.modules().get("std/prelude") {
            for name in prelude.iface.exports.keys() {
                ectx.imported_values.insert(name.clone(), "std/prelude".to_owned());
            }
            for (ctor, export) in &prelude.iface.constructors {
                ectx.ctors.insert(ctor.clone(), export.clone());
            }
            for (type_name, type_export) in &prelude.iface.types {
                if let crate::iface::TypeExportKind::Adt { ctors } = &type_export.kind {
                    ectx.type_ctors.insert(type_name.clone(), ctors.clone());
                }
            }
        }
        for (name, export) in &self.session_ctors {
            ectx.ctors.insert(name.clone(), export.clone());
        }
        for (name, ctors) in &self.session_type_ctors {
            ectx.type_ctors.insert(name.clone(), ctors.clone());
        }
        ectx
    }

    fn infer_context(&self) -> InferContext {
        let mut ictx = InferContext {
            builtins: self.runtime.builtins().schemes(),
            ..InferContext::default()
        };
        for export in self.adt_all.values() {
            ictx.factories.insert(export.factory_name(), export.clone());
            ictx.types
                .entry(export.type_name.clone())
                .or_insert_with(|| TypeDef::Adt {
                    params: export.type_params.clone(),
                });
        }
        for (module_path, module) in self.runtime.modules() {
            for (name, type_export) in &module.iface.types {
                ictx.types.entry(name.clone()).or_insert_with(|| type_def_of(type_export));
            }
            for (name, scheme) in &module.iface.exports {
                ictx.imports.insert((module_path.clone(), name.clone()), scheme.clone());
            }
        }
        for (name, def) in &self.session_types {
            ictx.types.insert(name.clone(), def.clone());
        }
        ictx
    }

    fn compile_expr(&self, expr: &Expr) -> DiagResult<(CoreExpr, Scheme)> {
        let ectx = self.elab_context();
        let session_names: AHashSet<String> = self.session_schemes.iter().map(|(n, _)| n.clone()).collect();
        let core = elaborate_expr(expr, "<repl>", &ectx, &session_names)?;
        let ictx = self.infer_context();
        let (scheme, methods) = infer_expr_standalone(&core, &ictx, &self.session_schemes, "<repl>")?;
        let core = lower(core, &methods)?;
        validate(&core, self.runtime.builtins(), &self.adt_all)?;
        Ok((core, scheme))
    }

    fn eval_core(&self, core: &CoreExpr, writer: &mut dyn PrintWriter) -> DiagResult<Value> {
        let mut tracer = NoopTracer;
        self.runtime
            .evaluate_all(&self.eff, &mut *writer, &mut tracer, self.match_mode)?;
        let env = Env::new();
        for (name, value) in &self.session_values {
            env.bind(name.clone(), value.clone());
        }
        let mut ctx = EvalCtx {
            eff: &self.eff,
            builtins: self.runtime.builtins(),
            effects: self.runtime.effects(),
            adt: &self.adt_all,
            globals: &self.runtime,
            writer,
            tracer: &mut tracer,
            match_mode: self.match_mode,
        };
        eval(core, &env, &mut ctx)
    }
}

/// Rewrites a REPL `func` declaration to `letrec name = \... in name`, so
/// the function can call itself.
fn func_as_letrec(func: FuncDecl) -> Expr {
    let span = func.span;
    let lambda = Expr::new(
        ExprKind::Lambda {
            params: func.params,
            return_type: func.return_type,
            effects: func.effects,
            body: Box::new(func.body),
        },
        span,
    );
    Expr::new(
        ExprKind::LetRec {
            bindings: vec![(func.name.clone(), lambda)],
            body: Box::new(Expr::new(ExprKind::Var(func.name), span)),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::CollectStringPrint;

    fn session() -> ReplSession {
        ReplSession::new(EffContext::default()).unwrap()
    }

    fn eval_line(session: &mut ReplSession, line: &str) -> ReplOutcome {
        let mut writer = CollectStringPrint::new();
        session.execute(line, &mut writer).unwrap()
    }

    #[test]
    fn expressions_evaluate_with_types() {
        let mut repl = session();
        let ReplOutcome::Value { value, scheme } = eval_line(&mut repl, "1 + 2") else {
            panic!("expected a value");
        };
        assert_eq!(value, Value::Int(3));
        assert_eq!(scheme.to_string(), "int");
    }

    #[test]
    fn bindings_persist_across_lines() {
        let mut repl = session();
        eval_line(&mut repl, "let x = 40");
        let ReplOutcome::Value { value, .. } = eval_line(&mut repl, "x + 2") else {
            panic!("expected a value");
        };
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn functions_can_recurse() {
        let mut repl = session();
        eval_line(
            &mut repl,
            "func fact(n: int) -> int { if n <= 1 then 1 else n * fact(n - 1) }",
        );
        let ReplOutcome::Value { value, .. } = eval_line(&mut repl, "fact(5)") else {
            panic!("expected a value");
        };
        assert_eq!(value, Value::Int(120));
    }

    #[test]
    fn type_query_does_not_evaluate() {
        let mut repl = session();
        let ReplOutcome::TypeOf { scheme } = eval_line(&mut repl, ":type \\x. x") else {
            panic!("expected a type");
        };
        assert_eq!(scheme.to_string(), "forall a. (a) -> a");
    }

    #[test]
    fn prelude_constructors_are_in_scope() {
        let mut repl = session();
        let ReplOutcome::Value { value, .. } = eval_line(&mut repl, "withDefault(Some(7), 0)") else {
            panic!("expected a value");
        };
        assert_eq!(value, Value::Int(7));
    }

    #[test]
    fn session_types_can_be_matched() {
        let mut repl = session();
        eval_line(&mut repl, "type Color = Red | Green | Blue");
        let ReplOutcome::Value { value, .. } = eval_line(&mut repl, "match Green { Red => 0, Green => 1, Blue => 2 }")
        else {
            panic!("expected a value");
        };
        assert_eq!(value, Value::Int(1));
    }
}

//! The module runtime: topological one-shot evaluation, the synthetic
//! `$adt` registry, export access, and entrypoint invocation.
//!
//! Modules evaluate exactly once, in the deterministic order the loader
//! computed, all before the entry function runs. Cross-module references
//! resolve through [`GlobalResolver`], which gates on the target module's
//! frozen interface: unexported bindings are invisible, full stop.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    rc::Rc,
};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    builtins::BuiltinTable,
    core::CoreKind,
    diagnostics::{DiagResult, Diagnostic, ErrorCode, Warning},
    effects::{EffContext, EffectRegistry},
    eval::{EvalCtx, GlobalResolver, MatchMode, call_value, eval},
    iface::CtorExport,
    io::PrintWriter,
    loader::{Loader, LoaderConfig, LoadedModule},
    span::Span,
    tracer::EvalTracer,
    types::{Scheme, Type},
    value::{Env, RecCell, Value},
};

/// A loaded program, ready to evaluate.
#[derive(Debug)]
pub struct Runtime {
    modules: IndexMap<String, LoadedModule>,
    /// Deterministic evaluation order (dependencies first).
    order: Vec<String>,
    entry_module: String,
    builtins: BuiltinTable,
    effects: EffectRegistry,
    /// Global `$adt` registry: one factory per declared constructor across
    /// all loaded modules, keyed by factory name.
    adt: AHashMap<String, CtorExport>,
    /// Evaluated module bindings (all of them; export gating happens at
    /// resolution time).
    bindings: RefCell<AHashMap<String, AHashMap<String, Value>>>,
    evaluated: RefCell<AHashSet<String>>,
}

impl Runtime {
    /// Loads a program from a file (module or script form) plus all of its
    /// transitive imports.
    pub fn load_file(file: &std::path::Path, config: LoaderConfig) -> DiagResult<Self> {
        let mut loader = Loader::new(config);
        let entry = loader.load_file(file)?;
        Self::from_loader(loader, entry)
    }

    /// Loads a program from in-memory source (tests, embedding).
    pub fn from_source(source: &str, name: &str, config: LoaderConfig) -> DiagResult<Self> {
        let mut loader = Loader::new(config);
        let entry = loader.load_source(source, &format!("<memory:{name}>"), name)?;
        Self::from_loader(loader, entry)
    }

    pub fn from_loader(loader: Loader, entry_module: String) -> DiagResult<Self> {
        let order = loader.topo_order()?;
        let (modules, builtins) = loader.into_parts();

        // Register ADT factories across all modules, deterministically by
        // (type, ctor).
        let mut all_ctors: Vec<CtorExport> = modules
            .values()
            .flat_map(|m| m.local_ctors.iter().cloned())
            .collect();
        all_ctors.sort_by(|a, b| (&a.type_name, &a.ctor).cmp(&(&b.type_name, &b.ctor)));
        let mut adt = AHashMap::new();
        for ctor in all_ctors {
            adt.insert(ctor.factory_name(), ctor);
        }

        Ok(Self {
            modules,
            order,
            entry_module,
            builtins,
            effects: EffectRegistry::standard(),
            adt,
            bindings: RefCell::new(AHashMap::new()),
            evaluated: RefCell::new(AHashSet::new()),
        })
    }

    #[must_use]
    pub fn entry_module(&self) -> &str {
        &self.entry_module
    }

    #[must_use]
    pub fn modules(&self) -> &IndexMap<String, LoadedModule> {
        &self.modules
    }

    #[must_use]
    pub fn builtins(&self) -> &BuiltinTable {
        &self.builtins
    }

    #[must_use]
    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    #[must_use]
    pub fn adt(&self) -> &AHashMap<String, CtorExport> {
        &self.adt
    }

    /// All warnings collected during loading, in module load order.
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        self.modules.values().flat_map(|m| m.warnings.iter().cloned()).collect()
    }

    /// The scheme of an exported binding, if the module exports it.
    #[must_use]
    pub fn export_scheme(&self, module: &str, name: &str) -> Option<&Scheme> {
        self.modules.get(module)?.iface.export(name)
    }

    /// Evaluates every module once, in topological order.
    pub fn evaluate_all(
        &self,
        eff: &EffContext,
        writer: &mut dyn PrintWriter,
        tracer: &mut dyn EvalTracer,
        match_mode: MatchMode,
    ) -> DiagResult<()> {
        for path in &self.order {
            self.evaluate_module(path, eff, writer, tracer, match_mode)?;
        }
        Ok(())
    }

    /// One-shot init for one module: extracts top-level bindings from the
    /// elaborated `let`/`letrec` chain, stopping at the terminal `Var`.
    fn evaluate_module(
        &self,
        path: &str,
        eff: &EffContext,
        writer: &mut dyn PrintWriter,
        tracer: &mut dyn EvalTracer,
        match_mode: MatchMode,
    ) -> DiagResult<()> {
        if self.evaluated.borrow().contains(path) {
            return Ok(());
        }
        // Mark first: the chain cannot observe this module's own exports,
        // and marking early keeps re-entry (via resolver misuse) finite.
        self.evaluated.borrow_mut().insert(path.to_owned());
        tracer.on_module_init(path);

        let module = self.modules.get(path).expect("evaluated module is loaded");
        let env = Env::new();
        let mut extracted: AHashMap<String, Value> = AHashMap::new();
        let mut ctx = EvalCtx {
            eff,
            builtins: &self.builtins,
            effects: &self.effects,
            adt: &self.adt,
            globals: self,
            writer,
            tracer,
            match_mode,
        };

        let mut current = &module.core;
        loop {
            match &current.kind {
                CoreKind::Let { name, value, body, .. } => {
                    let bound = eval(value, &env, &mut ctx)?;
                    env.bind(name.clone(), bound.clone());
                    if name != "_" {
                        extracted.insert(name.clone(), bound);
                    }
                    current = body;
                }
                CoreKind::LetRec { bindings, body } => {
                    // Same three phases as the evaluator, but binding into
                    // the module environment and recording each value.
                    let cells: Vec<Rc<RefCell<RecCell>>> = bindings
                        .iter()
                        .map(|_| Rc::new(RefCell::new(RecCell::default())))
                        .collect();
                    for (binding, cell) in bindings.iter().zip(cells.iter()) {
                        env.bind(binding.name.clone(), Value::Indirect(cell.clone()));
                    }
                    for (binding, cell) in bindings.iter().zip(cells.iter()) {
                        if let CoreKind::Lambda { params, body: lambda_body, .. } = &binding.expr.kind {
                            let closure = Value::Function(Rc::new(crate::value::FunctionValue {
                                name: Some(binding.name.clone()),
                                params: params.clone(),
                                body: (**lambda_body).clone(),
                                env: env.clone(),
                            }));
                            let mut cell_ref = cell.borrow_mut();
                            cell_ref.value = Some(closure.clone());
                            cell_ref.initialized = true;
                            extracted.insert(binding.name.clone(), closure);
                        } else {
                            cell.borrow_mut().visiting = true;
                            let value = eval(&binding.expr, &env, &mut ctx)?;
                            let mut cell_ref = cell.borrow_mut();
                            cell_ref.value = Some(value.clone());
                            cell_ref.visiting = false;
                            cell_ref.initialized = true;
                            extracted.insert(binding.name.clone(), value);
                        }
                    }
                    current = body;
                }
                // Terminal `Var` (or unit for type-only modules): every
                // top-level binding has been extracted.
                _ => break,
            }
        }

        self.bindings.borrow_mut().insert(path.to_owned(), extracted);
        Ok(())
    }

    /// Reads an exported binding's value. `None` for unexported or unknown
    /// names — private bindings are not observable from outside.
    #[must_use]
    pub fn get_export(&self, module: &str, name: &str) -> Option<Value> {
        let loaded = self.modules.get(module)?;
        if !loaded.iface.exports.contains_key(name) {
            return None;
        }
        self.bindings.borrow().get(module)?.get(name).cloned()
    }

    /// Looks up the entry function, decodes the JSON argument against its
    /// parameter type, and calls it.
    ///
    /// Entry functions take at most one parameter; the argument defaults
    /// to JSON `null`.
    pub fn call_entrypoint(
        &self,
        entry: &str,
        args_json: &serde_json::Value,
        eff: &EffContext,
        writer: &mut dyn PrintWriter,
        tracer: &mut dyn EvalTracer,
        match_mode: MatchMode,
    ) -> DiagResult<Value> {
        self.evaluate_all(eff, writer, tracer, match_mode)?;

        let module_path = self.entry_module.clone();
        let Some(scheme) = self.export_scheme(&module_path, entry).cloned() else {
            return Err(Diagnostic::runtime(
                ErrorCode::RtBadEntry,
                format!("module `{module_path}` exports no function `{entry}`"),
            )
            .with_data("entry", entry)
            .with_data("module", module_path.as_str()));
        };
        let Type::Func { params, .. } = &scheme.ty else {
            return Err(Diagnostic::runtime(
                ErrorCode::RtBadEntry,
                format!("export `{entry}` is not a function"),
            )
            .with_data("entry", entry));
        };
        if params.len() > 1 {
            return Err(Diagnostic::runtime(
                ErrorCode::RtBadEntry,
                format!("entry function `{entry}` takes {} parameters; at most 1 is supported", params.len()),
            )
            .with_data("entry", entry));
        }

        let args = if params.is_empty() {
            Vec::new()
        } else {
            vec![decode_json(&params[0], args_json)?]
        };

        let func = self
            .get_export(&module_path, entry)
            .expect("exported entry was evaluated");
        let mut ctx = EvalCtx {
            eff,
            builtins: &self.builtins,
            effects: &self.effects,
            adt: &self.adt,
            globals: self,
            writer,
            tracer,
            match_mode,
        };
        call_value(func, args, &mut ctx, Span::point(0, 0))
    }
}

impl GlobalResolver for Runtime {
    fn resolve_export(&self, module: &str, name: &str) -> Option<Value> {
        self.get_export(module, name)
    }
}

fn decode_error(expected: &Type, got: &serde_json::Value, reason: &str) -> Diagnostic {
    Diagnostic::runtime(
        ErrorCode::RtBadArgument,
        format!("cannot decode argument: expected {expected}, got {got}"),
    )
    .with_data("expected", expected.to_string())
    .with_data("got", got.to_string())
    .with_data("reason", reason)
}

/// Decodes a JSON argument type-directionally against a parameter type.
pub fn decode_json(ty: &Type, json: &serde_json::Value) -> DiagResult<Value> {
    use serde_json::Value as Json;
    match ty {
        Type::Unit => match json {
            Json::Null => Ok(Value::Unit),
            other => Err(decode_error(ty, other, "expected null")),
        },
        Type::Int => match json.as_i64() {
            Some(n) => Ok(Value::Int(n)),
            None => Err(decode_error(ty, json, "expected an integer")),
        },
        Type::Float => match json.as_f64() {
            Some(x) => Ok(Value::Float(x)),
            None => Err(decode_error(ty, json, "expected a number")),
        },
        Type::Str => match json.as_str() {
            Some(s) => Ok(Value::str(s.to_owned())),
            None => Err(decode_error(ty, json, "expected a string")),
        },
        Type::Bool => match json.as_bool() {
            Some(b) => Ok(Value::Bool(b)),
            None => Err(decode_error(ty, json, "expected a bool")),
        },
        Type::Char => match json.as_str() {
            Some(s) if s.chars().count() == 1 => Ok(Value::Char(s.chars().next().expect("one char"))),
            _ => Err(decode_error(ty, json, "expected a one-character string")),
        },
        Type::List(elem) => match json.as_array() {
            Some(items) => {
                let values = items.iter().map(|item| decode_json(elem, item)).collect::<DiagResult<Vec<_>>>()?;
                Ok(Value::List(Rc::new(values)))
            }
            None => Err(decode_error(ty, json, "expected an array")),
        },
        Type::Tuple(elems) => match json.as_array() {
            Some(items) if items.len() == elems.len() => {
                let values = elems
                    .iter()
                    .zip(items.iter())
                    .map(|(elem_ty, item)| decode_json(elem_ty, item))
                    .collect::<DiagResult<Vec<_>>>()?;
                Ok(Value::Tuple(Rc::new(values)))
            }
            Some(items) => Err(decode_error(
                ty,
                json,
                &format!("expected {} elements, got {}", elems.len(), items.len()),
            )),
            None => Err(decode_error(ty, json, "expected an array")),
        },
        Type::Record(row) => match json.as_object() {
            Some(object) => {
                let mut fields = BTreeMap::new();
                for (label, field_ty) in &row.fields {
                    let Some(field_json) = object.get(label) else {
                        return Err(decode_error(ty, json, &format!("missing field `{label}`")));
                    };
                    fields.insert(label.clone(), decode_json(field_ty, field_json)?);
                }
                if row.tail.is_none() {
                    for key in object.keys() {
                        if !row.fields.contains_key(key) {
                            return Err(decode_error(ty, json, &format!("unknown field `{key}`")));
                        }
                    }
                }
                Ok(Value::Record(Rc::new(fields)))
            }
            None => Err(decode_error(ty, json, "expected an object")),
        },
        Type::Var(_) => decode_by_shape(json),
        other => Err(decode_error(other, json, "type cannot be decoded from JSON")),
    }
}

/// Shape-directed decoding for polymorphic entry parameters.
fn decode_by_shape(json: &serde_json::Value) -> DiagResult<Value> {
    use serde_json::Value as Json;
    Ok(match json {
        Json::Null => Value::Unit,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s.clone()),
        Json::Array(items) => Value::List(Rc::new(
            items.iter().map(decode_by_shape).collect::<DiagResult<Vec<_>>>()?,
        )),
        Json::Object(object) => {
            let mut fields = BTreeMap::new();
            for (key, value) in object {
                fields.insert(key.clone(), decode_by_shape(value)?);
            }
            Value::Record(Rc::new(fields))
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decode_json_basics() {
        assert_eq!(decode_json(&Type::Int, &serde_json::json!(5)).unwrap(), Value::Int(5));
        assert_eq!(
            decode_json(&Type::Float, &serde_json::json!(2.5)).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(decode_json(&Type::Unit, &serde_json::json!(null)).unwrap(), Value::Unit);
        assert_eq!(
            decode_json(&Type::Str, &serde_json::json!("hi")).unwrap(),
            Value::str("hi")
        );
    }

    #[test]
    fn decode_mismatch_carries_expected_got_reason() {
        let err = decode_json(&Type::Int, &serde_json::json!("nope")).unwrap_err();
        assert_eq!(err.code, ErrorCode::RtBadArgument);
        assert!(err.data.contains_key("expected"));
        assert!(err.data.contains_key("got"));
        assert!(err.data.contains_key("reason"));
    }

    #[test]
    fn decode_record_rejects_unknown_fields_on_closed_rows() {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("id".to_owned(), Type::Int);
        let ty = Type::Record(crate::types::RowType::closed(fields));
        let ok = decode_json(&ty, &serde_json::json!({"id": 1})).unwrap();
        assert_eq!(ok.to_string(), "{id: 1}");
        let err = decode_json(&ty, &serde_json::json!({"id": 1, "extra": 2})).unwrap_err();
        assert_eq!(err.code, ErrorCode::RtBadArgument);
    }

    #[test]
    fn float_param_accepts_integral_json_number() {
        assert_eq!(
            decode_json(&Type::Float, &serde_json::json!(5)).unwrap(),
            Value::Float(5.0)
        );
    }
}

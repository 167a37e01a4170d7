//! The module loader: path resolution, per-module compilation, cycle
//! detection, and deterministic load order.
//!
//! `load` drives the whole front half of the pipeline for one module:
//! parse, elaborate, type-check, lower, freeze. Imports are loaded
//! depth-first before the importing module is processed, so a module's
//! dependencies always carry finished interfaces (and schemes) by the time
//! it needs them. Modules are cached by canonical module path and
//! processed exactly once.
//!
//! Cycles are detected with a visiting stack; the diagnostic carries the
//! full cycle (`a → b → a`). Unless `AILANG_NO_PRELUDE` is set, every
//! module except `std/prelude` itself implicitly imports the prelude.

use std::path::PathBuf;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::Module,
    builtins::BuiltinTable,
    core::{CoreExpr, Sid},
    diagnostics::{DiagResult, Diagnostic, ErrorCode, Warning},
    elaborate::{ElabContext, elaborate},
    iface::{CtorExport, Iface, TypeExport, TypeExportKind},
    infer::{InferContext, TypeDef, infer_module},
    link::{freeze_iface, lower, validate},
    parser::parse_source,
    stdlib,
    types::Scheme,
};

/// Loader configuration, frozen at construction from CLI flags and
/// environment variables.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Project root; non-`std` module paths resolve relative to this.
    pub root: PathBuf,
    /// `AILANG_STDLIB_PATH`: read `std/*` from disk instead of the
    /// embedded sources.
    pub stdlib_path: Option<PathBuf>,
    /// `AILANG_NO_PRELUDE`: disable the implicit prelude import.
    pub no_prelude: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            stdlib_path: None,
            no_prelude: false,
        }
    }
}

/// One fully compiled module.
#[derive(Debug)]
pub struct LoadedModule {
    pub path: String,
    pub file: String,
    pub ast: Module,
    /// Lowered Core chain.
    pub core: CoreExpr,
    pub iface: Iface,
    /// Import edges, including the implicit prelude when injected.
    pub imports: Vec<String>,
    pub bindings: Vec<String>,
    pub exports: Vec<String>,
    pub local_ctors: Vec<CtorExport>,
    pub local_types: Vec<TypeExport>,
    /// Factory name -> constructor, for everything visible in this module.
    pub factories: AHashMap<String, CtorExport>,
    pub schemes: IndexMap<String, Scheme>,
    pub methods: AHashMap<Sid, String>,
    pub warnings: Vec<Warning>,
}

/// Loads and compiles modules, caching by canonical module path.
#[derive(Debug)]
pub struct Loader {
    config: LoaderConfig,
    builtins: BuiltinTable,
    modules: IndexMap<String, LoadedModule>,
    visiting: Vec<String>,
}

impl Loader {
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            builtins: BuiltinTable::standard(),
            modules: IndexMap::new(),
            visiting: Vec::new(),
        }
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
    pub fn into_parts(self) -> (IndexMap<String, LoadedModule>, BuiltinTable) {
        (self.modules, self.builtins)
    }

    /// Loads a module by canonical path (`examples/foo`, `std/io`).
    pub fn load(&mut self, path: &str) -> DiagResult<()> {
        if self.modules.contains_key(path) {
            return Ok(());
        }
        self.check_cycle(path)?;
        let (source, file) = self.resolve_source(path)?;
        let module = parse_source(&source, &file, path)?;
        if module.path != path {
            return Err(Diagnostic::new(
                ErrorCode::ModBadHeader,
                crate::diagnostics::Phase::Loader,
                format!("file declares module `{}`, expected `{path}`", module.path),
            )
            .with_file(file));
        }
        self.process(module, file)
    }

    /// Loads the entry file for `run`: a module file or a script.
    /// Returns the module path the program is known by.
    pub fn load_file(&mut self, file: &std::path::Path) -> DiagResult<String> {
        let source = std::fs::read_to_string(file).map_err(|e| {
            Diagnostic::load(ErrorCode::LdrNotFound, format!("cannot read `{}`: {e}", file.display()))
                .with_data("path", file.display().to_string())
        })?;
        let default_path = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main")
            .to_owned();
        self.load_source(&source, &file.display().to_string(), &default_path)
    }

    /// Loads a program from an in-memory source (tests, REPL bootstrap).
    pub fn load_source(&mut self, source: &str, file: &str, default_path: &str) -> DiagResult<String> {
        let module = parse_source(source, file, default_path)?;
        let path = module.path.clone();
        if self.modules.contains_key(&path) {
            return Ok(path);
        }
        self.check_cycle(&path)?;
        self.process(module, file.to_owned())?;
        Ok(path)
    }

    fn check_cycle(&self, path: &str) -> DiagResult<()> {
        if let Some(start) = self.visiting.iter().position(|p| p == path) {
            let mut cycle: Vec<&str> = self.visiting[start..].iter().map(String::as_str).collect();
            cycle.push(path);
            return Err(Diagnostic::load(
                ErrorCode::LdrCycle,
                format!("import cycle: {}", cycle.join(" → ")),
            )
            .with_data("cycle", serde_json::Value::from(cycle.join(" → "))));
        }
        Ok(())
    }

    /// Resolves a module path to source text. `std/*` maps to the stdlib
    /// directory (or the embedded tree); everything else resolves against
    /// the project root.
    fn resolve_source(&self, path: &str) -> DiagResult<(String, String)> {
        let mut tried = Vec::new();
        if let Some(rest) = path.strip_prefix("std/") {
            if let Some(dir) = &self.config.stdlib_path {
                let candidate = dir.join(rest).with_extension("ail");
                tried.push(candidate.display().to_string());
                if let Ok(source) = std::fs::read_to_string(&candidate) {
                    return Ok((source, candidate.display().to_string()));
                }
            } else if let Some(source) = stdlib::embedded_source(path) {
                return Ok((source.to_owned(), format!("<builtin:{path}>")));
            } else {
                tried.push(format!("<builtin:{path}>"));
            }
        } else {
            let candidate = self.config.root.join(path).with_extension("ail");
            tried.push(candidate.display().to_string());
            if let Ok(source) = std::fs::read_to_string(&candidate) {
                return Ok((source, candidate.display().to_string()));
            }
        }

        let mut diag = Diagnostic::load(ErrorCode::LdrNotFound, format!("module `{path}` not found"))
            .with_data("module", path)
            .with_data("searched", serde_json::Value::from(tried));
        if let Some(suggestion) = self.suggest_module(path) {
            diag = diag.with_fix(format!("did you mean `{suggestion}`?"), 0.6);
        }
        Err(diag)
    }

    /// Suggests a similarly named module for LDR001 diagnostics.
    fn suggest_module(&self, path: &str) -> Option<String> {
        let wanted = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        let mut candidates: Vec<String> = stdlib::embedded_names().iter().map(|s| (*s).to_owned()).collect();
        candidates.extend(self.modules.keys().cloned());
        candidates.into_iter().find(|candidate| {
            let last = candidate.rsplit('/').next().unwrap_or(candidate).to_lowercase();
            last == wanted || last.starts_with(&wanted) || wanted.starts_with(&last)
        })
    }

    fn inject_prelude(&self, ectx: &mut ElabContext, imports: &mut Vec<String>) {
        let Some(prelude) = self.modules.get("std/prelude") else {
            return;
        };
        for name in prelude.iface.exports.keys() {
            ectx.imported_values
                .entry(name.clone())
                .or_insert_with(|| "std/prelude".to_owned());
        }
        for (ctor_name, export) in &prelude.iface.constructors {
            ectx.ctors.entry(ctor_name.clone()).or_insert_with(|| export.clone());
        }
        for (type_name, type_export) in &prelude.iface.types {
            if let TypeExportKind::Adt { ctors } = &type_export.kind {
                ectx.type_ctors.entry(type_name.clone()).or_insert_with(|| ctors.clone());
            }
        }
        if !imports.iter().any(|i| i == "std/prelude") {
            imports.push("std/prelude".to_owned());
        }
    }

    /// Wires one explicit import into the elaboration context, gating on
    /// the dependency's frozen interface.
    fn wire_import(&self, ectx: &mut ElabContext, dep_path: &str, symbols: &[String], file: &str) -> DiagResult<()> {
        let dep = self.modules.get(dep_path).expect("dependency loaded before wiring");
        let expose_type = |ectx: &mut ElabContext, name: &str, export: &TypeExport| {
            if let TypeExportKind::Adt { ctors } = &export.kind {
                ectx.type_ctors.insert(name.to_owned(), ctors.clone());
                for ctor in ctors {
                    if let Some(ctor_export) = dep.iface.constructors.get(ctor) {
                        ectx.ctors.insert(ctor.clone(), ctor_export.clone());
                    }
                }
            }
        };

        if symbols.is_empty() {
            // Bare `import m` brings every export into scope.
            for name in dep.iface.exports.keys() {
                ectx.imported_values.insert(name.clone(), dep_path.to_owned());
            }
            for (name, export) in &dep.iface.types {
                expose_type(ectx, name, export);
            }
            return Ok(());
        }

        for symbol in symbols {
            if dep.iface.exports.contains_key(symbol) {
                ectx.imported_values.insert(symbol.clone(), dep_path.to_owned());
            } else if let Some(type_export) = dep.iface.types.get(symbol) {
                expose_type(ectx, symbol, type_export);
            } else if let Some(ctor_export) = dep.iface.constructors.get(symbol) {
                ectx.ctors.insert(symbol.clone(), ctor_export.clone());
            } else if dep.bindings.iter().any(|b| b == symbol)
                || dep.local_types.iter().any(|t| t.name == *symbol)
            {
                return Err(Diagnostic::new(
                    ErrorCode::ModExportOfPrivate,
                    crate::diagnostics::Phase::Loader,
                    format!("`{symbol}` exists in `{dep_path}` but is not exported"),
                )
                .with_file(file.to_owned())
                .with_data("module", dep_path)
                .with_data("symbol", symbol.as_str()));
            } else {
                return Err(Diagnostic::new(
                    ErrorCode::ModExportOfPrivate,
                    crate::diagnostics::Phase::Loader,
                    format!("`{dep_path}` has no symbol `{symbol}`"),
                )
                .with_file(file.to_owned())
                .with_data("module", dep_path)
                .with_data("symbol", symbol.as_str()));
            }
        }
        Ok(())
    }

    /// Compiles one parsed module: imports first, then elaborate,
    /// type-check, lower, validate, freeze.
    fn process(&mut self, module: Module, file: String) -> DiagResult<()> {
        let path = module.path.clone();
        self.visiting.push(path.clone());

        let result = self.process_inner(&module, &file);
        self.visiting.pop();
        let loaded = result?;
        self.modules.insert(path, loaded);
        Ok(())
    }

    fn process_inner(&mut self, module: &Module, file: &str) -> DiagResult<LoadedModule> {
        let path = module.path.clone();
        let inject_prelude = !self.config.no_prelude && path != "std/prelude";

        // Dependencies first, so their interfaces and schemes exist.
        if inject_prelude {
            self.load("std/prelude")?;
        }
        for import in &module.imports {
            self.load(&import.path)?;
        }

        // Elaboration context: builtins, prelude, explicit imports.
        let mut ectx = ElabContext::default();
        for name in self.builtins.names() {
            ectx.builtin_names.insert(name.to_owned());
        }
        let mut import_edges: Vec<String> = module.imports.iter().map(|i| i.path.clone()).collect();
        if inject_prelude {
            self.inject_prelude(&mut ectx, &mut import_edges);
        }
        for import in &module.imports {
            self.wire_import(&mut ectx, &import.path, &import.symbols, file)?;
        }

        let elab = elaborate(module, file, ectx)?;

        // Inference context: builtin schemes, visible factories, type
        // definitions, and the export schemes of every loaded module.
        let mut ictx = InferContext {
            builtins: self.builtins.schemes(),
            ..InferContext::default()
        };
        for export in elab.ctor_scope.values() {
            ictx.factories.insert(export.factory_name(), export.clone());
            ictx.types
                .entry(export.type_name.clone())
                .or_insert_with(|| TypeDef::Adt {
                    params: export.type_params.clone(),
                });
        }
        for type_export in &elab.local_types {
            ictx.types.insert(type_export.name.clone(), type_def_of(type_export));
        }
        if inject_prelude
            && let Some(prelude) = self.modules.get("std/prelude")
        {
            for (name, type_export) in &prelude.iface.types {
                ictx.types.entry(name.clone()).or_insert_with(|| type_def_of(type_export));
            }
        }
        for import in &module.imports {
            let dep = self.modules.get(&import.path).expect("dependency loaded");
            for (name, type_export) in &dep.iface.types {
                if import.symbols.is_empty() || import.symbols.contains(name) {
                    ictx.types.entry(name.clone()).or_insert_with(|| type_def_of(type_export));
                }
            }
        }
        for (dep_path, dep) in &self.modules {
            for (name, scheme) in &dep.iface.exports {
                ictx.imports.insert((dep_path.clone(), name.clone()), scheme.clone());
            }
        }

        let inferred = infer_module(&elab.core, &ictx, file)?;

        // Finish the interface: export schemes, then the digest.
        let mut iface = elab.iface;
        for name in &elab.exports {
            let Some(scheme) = inferred.schemes.get(name) else {
                return Err(Diagnostic::new(
                    ErrorCode::ModExportOfPrivate,
                    crate::diagnostics::Phase::Loader,
                    format!("exported name `{name}` has no top-level binding"),
                )
                .with_file(file.to_owned()));
            };
            iface.exports.insert(name.clone(), scheme.clone());
        }

        let core = lower(elab.core, &inferred.methods)?;
        let factories: AHashMap<String, CtorExport> = elab
            .ctor_scope
            .values()
            .map(|export| (export.factory_name(), export.clone()))
            .collect();
        validate(&core, &self.builtins, &factories)?;
        freeze_iface(&mut iface);

        Ok(LoadedModule {
            path,
            file: file.to_owned(),
            ast: module.clone(),
            core,
            iface,
            imports: import_edges,
            bindings: elab.bindings,
            exports: elab.exports,
            local_ctors: elab.local_ctors,
            local_types: elab.local_types,
            factories,
            schemes: inferred.schemes,
            methods: inferred.methods,
            warnings: elab.warnings,
        })
    }

    /// Deterministic evaluation order: Kahn's algorithm over the import
    /// DAG, ties broken by lexicographic module path.
    pub fn topo_order(&self) -> DiagResult<Vec<String>> {
        use std::collections::{BTreeMap, BTreeSet};
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (path, module) in &self.modules {
            in_degree.entry(path.as_str()).or_insert(0);
            for import in &module.imports {
                if self.modules.contains_key(import) {
                    *in_degree.entry(path.as_str()).or_insert(0) += 1;
                    dependents.entry(import.as_str()).or_default().push(path.as_str());
                }
            }
        }
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(path, _)| *path)
            .collect();
        let mut order = Vec::with_capacity(self.modules.len());
        while let Some(&next) = ready.iter().next() {
            ready.remove(next);
            order.push(next.to_owned());
            for dependent in dependents.get(next).into_iter().flatten() {
                let degree = in_degree.get_mut(dependent).expect("dependent tracked");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
        if order.len() != self.modules.len() {
            return Err(Diagnostic::load(
                ErrorCode::LdrCycle,
                "import graph contains a cycle",
            ));
        }
        Ok(order)
    }
}

pub(crate) fn type_def_of(export: &TypeExport) -> TypeDef {
    match &export.kind {
        TypeExportKind::Adt { .. } => TypeDef::Adt {
            params: export.params.clone(),
        },
        TypeExportKind::Record { fields } => TypeDef::Record { fields: fields.clone() },
        TypeExportKind::Alias { target } => TypeDef::Alias {
            target: target.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn loader() -> Loader {
        Loader::new(LoaderConfig::default())
    }

    #[test]
    fn stdlib_modules_compile() {
        let mut loader = loader();
        for path in stdlib::embedded_names() {
            loader.load(path).unwrap_or_else(|e| panic!("{path} failed: {e}"));
        }
        assert!(loader.modules().contains_key("std/net"));
    }

    #[test]
    fn prelude_is_injected_and_tracked_as_an_edge() {
        let mut loader = loader();
        let path = loader
            .load_source("module demo\nexport func f() -> bool { isSome(Some(1)) }", "demo.ail", "demo")
            .unwrap();
        let module = &loader.modules()[&path];
        assert!(module.imports.contains(&"std/prelude".to_owned()));
    }

    #[test]
    fn topo_order_puts_dependencies_first() {
        let mut loader = loader();
        loader
            .load_source("module demo\nexport func f() -> int { 1 }", "demo.ail", "demo")
            .unwrap();
        let order = loader.topo_order().unwrap();
        let prelude_at = order.iter().position(|p| p == "std/prelude").unwrap();
        let demo_at = order.iter().position(|p| p == "demo").unwrap();
        assert!(prelude_at < demo_at);
    }

    #[test]
    fn missing_module_is_ldr001_with_trace() {
        let mut loader = loader();
        let err = loader.load("examples/nowhere").unwrap_err();
        assert_eq!(err.code, ErrorCode::LdrNotFound);
        assert!(err.data.contains_key("searched"));
    }

    #[test]
    fn missing_std_module_suggests_a_neighbor() {
        let mut loader = loader();
        let err = loader.load("std/i").unwrap_err();
        assert_eq!(err.code, ErrorCode::LdrNotFound);
        assert!(err.fix.is_some());
    }

    #[test]
    fn digest_is_stable_across_fresh_loads() {
        let source = "module demo\nexport func f(n: int) -> int { n + 1 }";
        let mut first = loader();
        first.load_source(source, "demo.ail", "demo").unwrap();
        let mut second = loader();
        second.load_source(source, "demo.ail", "demo").unwrap();
        assert_eq!(
            first.modules()["demo"].iface.digest,
            second.modules()["demo"].iface.digest
        );
        assert!(!first.modules()["demo"].iface.digest.is_empty());
    }

    #[test]
    fn importing_a_private_symbol_is_mod006() {
        let dir = std::env::temp_dir().join("ailang-loader-test-mod006");
        std::fs::create_dir_all(dir.join("lib")).unwrap();
        std::fs::write(dir.join("lib/hidden.ail"), "module lib/hidden\nfunc secret() -> int { 1 }").unwrap();
        let mut loader = Loader::new(LoaderConfig {
            root: dir.clone(),
            ..LoaderConfig::default()
        });
        let err = loader
            .load_source(
                "module app\nimport lib/hidden (secret)\nexport func main() -> int { secret() }",
                "app.ail",
                "app",
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ModExportOfPrivate);
    }

    #[test]
    fn import_cycle_reports_the_full_cycle() {
        let dir = std::env::temp_dir().join("ailang-loader-test-cycle");
        std::fs::create_dir_all(dir.join("c")).unwrap();
        std::fs::write(
            dir.join("c/a.ail"),
            "module c/a\nimport c/b (g)\nexport func f() -> int { g() }",
        )
        .unwrap();
        std::fs::write(
            dir.join("c/b.ail"),
            "module c/b\nimport c/a (f)\nexport func g() -> int { f() }",
        )
        .unwrap();
        let mut loader = Loader::new(LoaderConfig {
            root: dir.clone(),
            ..LoaderConfig::default()
        });
        let err = loader.load("c/a").unwrap_err();
        assert_eq!(err.code, ErrorCode::LdrCycle);
        assert!(err.message.contains("c/a → c/b → c/a"), "{}", err.message);
    }
}

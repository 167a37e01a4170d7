//! Frozen module interfaces.
//!
//! Modules communicate only through their [`Iface`]: the exported value
//! schemes, exported types, and constructors, plus a digest over a
//! canonical serialization of all of them. Cross-module references resolve
//! against the interface, never against another module's environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ast::SType, types::Scheme};

/// A module's frozen interface. Tables are `BTreeMap`s so serialization
/// order (and therefore the digest) is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Iface {
    pub module_path: String,
    /// Exported value bindings with their generalized schemes.
    /// Schemes are attached by the type checker; the elaborator registers
    /// the names.
    pub exports: BTreeMap<String, Scheme>,
    pub types: BTreeMap<String, TypeExport>,
    pub constructors: BTreeMap<String, CtorExport>,
    /// SHA-256 over the canonical serialization, hex-encoded.
    /// Empty until the linker freezes the interface.
    pub digest: String,
}

impl Iface {
    #[must_use]
    pub fn new(module_path: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            ..Self::default()
        }
    }

    /// Looks up an exported binding's scheme.
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&Scheme> {
        self.exports.get(name)
    }
}

/// An exported type declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeExport {
    pub name: String,
    pub params: Vec<String>,
    pub kind: TypeExportKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeExportKind {
    /// Sum type with its constructor names in declaration order.
    Adt { ctors: Vec<String> },
    Record { fields: Vec<(String, SType)> },
    Alias { target: SType },
}

/// An exported (or locally declared) constructor.
///
/// Argument types stay in surface form: the type checker instantiates them
/// per use site with the declaring type's parameters mapped to fresh
/// unification variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtorExport {
    pub type_name: String,
    pub ctor: String,
    pub type_params: Vec<String>,
    pub arg_types: Vec<SType>,
}

impl CtorExport {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }

    /// The factory name registered in the synthetic `$adt` module.
    #[must_use]
    pub fn factory_name(&self) -> String {
        format!("make_{}_{}", self.type_name, self.ctor)
    }
}

//! The semantic type model: types, schemes, and rows.
//!
//! Records and effects share one row algebra. Record rows may be open
//! (`tail = Some(var)`); effect rows are always closed in this version —
//! effect polymorphism is deliberately deferred. Row labels are kept in
//! sorted order by construction (`BTreeMap`/`BTreeSet`), which is what makes
//! serialized rows and interface digests deterministic.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Identifier of a unification variable (type or row).
pub type TvId = u32;

/// The canonical effect label set.
///
/// Effect annotations are validated against this set at parse time
/// (`PAR_EFF002` for anything else), so rows never carry unknown labels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum Effect {
    IO,
    FS,
    Clock,
    Net,
    Rand,
    DB,
    Trace,
    Async,
}

/// A closed set of effect labels carried by a function type.
///
/// Union is associative and commutative; the canonical form has sorted
/// labels and no duplicates, both guaranteed by the `BTreeSet`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectRow(BTreeSet<Effect>);

impl EffectRow {
    #[must_use]
    pub fn pure() -> Self {
        Self(BTreeSet::new())
    }

    #[must_use]
    pub fn single(effect: Effect) -> Self {
        Self(BTreeSet::from([effect]))
    }

    #[must_use]
    pub fn from_effects(effects: impl IntoIterator<Item = Effect>) -> Self {
        Self(effects.into_iter().collect())
    }

    #[must_use]
    pub fn is_pure(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, effect: Effect) -> bool {
        self.0.contains(&effect)
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Labels in `self` that `other` does not carry.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Vec<Effect> {
        self.0.difference(&other.0).copied().collect()
    }

    /// `true` when every label of `self` also appears in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Effect> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for EffectRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, effect) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{effect}")?;
        }
        f.write_str("}")
    }
}

/// A record row: sorted labels plus an optional open tail.
///
/// `tail = None` is a closed row; `tail = Some(v)` is open, meaning "these
/// labels and whatever `v` turns out to hold".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowType {
    pub fields: BTreeMap<String, Type>,
    pub tail: Option<TvId>,
}

impl RowType {
    #[must_use]
    pub fn closed(fields: BTreeMap<String, Type>) -> Self {
        Self { fields, tail: None }
    }

    #[must_use]
    pub fn open(fields: BTreeMap<String, Type>, tail: TvId) -> Self {
        Self {
            fields,
            tail: Some(tail),
        }
    }
}

/// A semantic type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Int,
    Float,
    Str,
    Bool,
    Char,
    Unit,
    Var(TvId),
    List(Box<Type>),
    Tuple(Vec<Type>),
    /// A named type constructor (ADT or alias target), e.g. `Option`.
    Con(String),
    /// Constructor application, e.g. `Result[a, b]`.
    App(Box<Type>, Vec<Type>),
    Func {
        params: Vec<Type>,
        ret: Box<Type>,
        effects: EffectRow,
    },
    Record(RowType),
}

impl Type {
    /// Normalizes legacy constructor spellings to primitive types.
    ///
    /// `String`/`string`, `Int`/`int` etc. appear as bare constructor names
    /// in older interface files; they must compare equal to the primitives.
    #[must_use]
    pub fn normalize_con(name: &str) -> Option<Self> {
        match name {
            "int" | "Int" => Some(Self::Int),
            "float" | "Float" => Some(Self::Float),
            "string" | "String" => Some(Self::Str),
            "bool" | "Bool" => Some(Self::Bool),
            "char" | "Char" => Some(Self::Char),
            _ => None,
        }
    }

    /// The suffix used to pick a dictionary method for this type,
    /// e.g. `Float` in `eq_Float`. `None` for types with no instances.
    #[must_use]
    pub fn method_suffix(&self) -> Option<&'static str> {
        match self {
            Self::Int => Some("Int"),
            Self::Float => Some("Float"),
            Self::Str => Some("String"),
            Self::Bool => Some("Bool"),
            Self::Char => Some("Char"),
            Self::Unit => Some("Unit"),
            Self::List(_) => Some("List"),
            Self::Tuple(_) => Some("Tuple"),
            Self::Record(_) => Some("Record"),
            _ => None,
        }
    }

    /// Collects every unification variable appearing in the type, in
    /// first-occurrence order (row tails included).
    pub fn collect_vars(&self, out: &mut Vec<TvId>) {
        match self {
            Self::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Self::List(inner) => inner.collect_vars(out),
            Self::Tuple(items) => {
                for item in items {
                    item.collect_vars(out);
                }
            }
            Self::App(head, args) => {
                head.collect_vars(out);
                for arg in args {
                    arg.collect_vars(out);
                }
            }
            Self::Func { params, ret, .. } => {
                for p in params {
                    p.collect_vars(out);
                }
                ret.collect_vars(out);
            }
            Self::Record(row) => {
                for ty in row.fields.values() {
                    ty.collect_vars(out);
                }
                if let Some(tail) = row.tail
                    && !out.contains(&tail)
                {
                    out.push(tail);
                }
            }
            _ => {}
        }
    }
}

/// A polymorphic type scheme: `forall vars. ty`.
///
/// Class constraints never survive into schemes — they are defaulted or
/// resolved to dictionary methods at the generalization point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheme {
    pub vars: Vec<TvId>,
    pub ty: Type,
}

impl Scheme {
    /// Wraps a monomorphic type.
    #[must_use]
    pub fn mono(ty: Type) -> Self {
        Self { vars: Vec::new(), ty }
    }

    /// Canonical serialization used for interface digests: quantified vars
    /// are renamed to `a`, `b`, ... so alpha-equivalent schemes serialize
    /// identically across loads.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut names = PrettyNames::default();
        for v in &self.vars {
            names.name_of(*v);
        }
        names.fmt_type(&self.ty)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = PrettyNames::default();
        if !self.vars.is_empty() {
            f.write_str("forall")?;
            for v in &self.vars {
                write!(f, " {}", names.name_of(*v))?;
            }
            f.write_str(". ")?;
        }
        f.write_str(&names.fmt_type(&self.ty))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&PrettyNames::default().fmt_type(self))
    }
}

/// Type classes used by operator resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum ClassName {
    Num,
    Fractional,
    Integral,
    Eq,
    Ord,
    Show,
    /// The `++` pseudo-class: resolution is operand-driven, not instance-table driven.
    Concat,
}

/// Maps unification variables to display names `a`, `b`, ... `a1`, ...
#[derive(Default)]
struct PrettyNames {
    seen: Vec<TvId>,
}

impl PrettyNames {
    fn name_of(&mut self, v: TvId) -> String {
        let index = match self.seen.iter().position(|&s| s == v) {
            Some(i) => i,
            None => {
                self.seen.push(v);
                self.seen.len() - 1
            }
        };
        let letter = char::from(b'a' + u8::try_from(index % 26).expect("index mod 26 fits"));
        let round = index / 26;
        if round == 0 {
            letter.to_string()
        } else {
            format!("{letter}{round}")
        }
    }

    fn fmt_type(&mut self, ty: &Type) -> String {
        match ty {
            Type::Int => "int".to_owned(),
            Type::Float => "float".to_owned(),
            Type::Str => "string".to_owned(),
            Type::Bool => "bool".to_owned(),
            Type::Char => "char".to_owned(),
            Type::Unit => "()".to_owned(),
            Type::Var(v) => self.name_of(*v),
            Type::List(inner) => format!("[{}]", self.fmt_type(inner)),
            Type::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|t| self.fmt_type(t)).collect();
                format!("({})", parts.join(", "))
            }
            Type::Con(name) => name.clone(),
            Type::App(head, args) => {
                let parts: Vec<String> = args.iter().map(|t| self.fmt_type(t)).collect();
                format!("{}[{}]", self.fmt_type(head), parts.join(", "))
            }
            Type::Func { params, ret, effects } => {
                let parts: Vec<String> = params.iter().map(|t| self.fmt_type(t)).collect();
                let effect_part = if effects.is_pure() {
                    String::new()
                } else {
                    format!(" ! {effects}")
                };
                format!("({}) -> {}{}", parts.join(", "), self.fmt_type(ret), effect_part)
            }
            Type::Record(row) => {
                let mut parts: Vec<String> = row
                    .fields
                    .iter()
                    .map(|(label, field)| format!("{label}: {}", self.fmt_type(field)))
                    .collect();
                if let Some(tail) = row.tail {
                    parts.push(format!("| {}", self.name_of(tail)));
                }
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn effect_union_is_commutative_and_sorted() {
        let a = EffectRow::from_effects([Effect::Net, Effect::IO]);
        let b = EffectRow::from_effects([Effect::FS, Effect::IO]);
        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.union(&b).to_string(), "{IO, FS, Net}");
    }

    #[test]
    fn effect_labels_parse_exactly() {
        use std::str::FromStr as _;
        assert_eq!(Effect::from_str("Clock").unwrap(), Effect::Clock);
        assert!(Effect::from_str("clock").is_err());
        assert!(Effect::from_str("Network").is_err());
    }

    #[test]
    fn row_labels_are_sorted_by_construction() {
        let mut fields = BTreeMap::new();
        fields.insert("y".to_owned(), Type::Bool);
        fields.insert("x".to_owned(), Type::Int);
        let row = RowType::closed(fields);
        let labels: Vec<&String> = row.fields.keys().collect();
        assert_eq!(labels, ["x", "y"]);
    }

    #[test]
    fn scheme_display_renames_vars() {
        let scheme = Scheme {
            vars: vec![7],
            ty: Type::Func {
                params: vec![Type::Var(7)],
                ret: Box::new(Type::List(Box::new(Type::Var(7)))),
                effects: EffectRow::pure(),
            },
        };
        assert_eq!(scheme.to_string(), "forall a. (a) -> [a]");
    }

    #[test]
    fn canonical_form_is_alpha_invariant() {
        let s1 = Scheme {
            vars: vec![3],
            ty: Type::Func {
                params: vec![Type::Var(3)],
                ret: Box::new(Type::Var(3)),
                effects: EffectRow::pure(),
            },
        };
        let s2 = Scheme {
            vars: vec![41],
            ty: Type::Func {
                params: vec![Type::Var(41)],
                ret: Box::new(Type::Var(41)),
                effects: EffectRow::pure(),
            },
        };
        assert_eq!(s1.canonical(), s2.canonical());
    }

    #[test]
    fn legacy_constructor_names_normalize() {
        assert_eq!(Type::normalize_con("String"), Some(Type::Str));
        assert_eq!(Type::normalize_con("string"), Some(Type::Str));
        assert_eq!(Type::normalize_con("Option"), None);
    }
}

//! Runtime values and environments.
//!
//! Values are cheap to clone: every aggregate is behind an `Rc`. Closures
//! capture their defining [`Env`]; recursion is tied with [`RecCell`]
//! indirection cells shared between the environment and the closures of a
//! `letrec` group — never with late binding.

use std::{cell::RefCell, cmp::Ordering, collections::BTreeMap, fmt, rc::Rc};

use ahash::AHashMap;

use crate::core::{CoreExpr, CoreParam};

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
    Char(char),
    Unit,
    List(Rc<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    /// Field order is sorted (BTreeMap), matching row serialization order.
    Record(Rc<BTreeMap<String, Value>>),
    /// An ADT instance, discriminated by `(type_name, ctor)`.
    Tagged(Rc<TaggedValue>),
    /// A closure.
    Function(Rc<FunctionValue>),
    /// A reference to a registered builtin or ADT factory, applied like a
    /// function. The implementation is looked up by name at call time.
    Builtin(Rc<BuiltinRef>),
    /// Recursion indirection; reads force the underlying cell.
    Indirect(Rc<RefCell<RecCell>>),
}

#[derive(Debug)]
pub struct TaggedValue {
    pub type_name: String,
    pub ctor: String,
    pub fields: Vec<Value>,
}

#[derive(Debug)]
pub struct FunctionValue {
    /// Binding name when known, for display and stack hints.
    pub name: Option<String>,
    pub params: Vec<CoreParam>,
    pub body: CoreExpr,
    pub env: Env,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinRef {
    /// Which synthetic module owns the name: `$builtin` or `$adt`.
    pub module: String,
    pub name: String,
}

/// The mutable cell behind a recursive binding.
///
/// One cell per name per `letrec` group, shared by reference between the
/// environment and any closure that captured it.
#[derive(Debug, Default)]
pub struct RecCell {
    pub value: Option<Value>,
    pub initialized: bool,
    pub visiting: bool,
}

/// Why a [`RecCell`] read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceError {
    /// The cell's own initializer is currently running.
    Visiting,
    /// The cell was never initialized (an evaluator bug if it happens).
    Uninitialized,
}

impl RecCell {
    /// Reads the cell: the value if initialized, otherwise an error
    /// distinguishing self-referential initialization from a missing write.
    pub fn force(&self) -> Result<Value, ForceError> {
        if self.initialized {
            Ok(self.value.clone().expect("initialized cell holds a value"))
        } else if self.visiting {
            Err(ForceError::Visiting)
        } else {
            Err(ForceError::Uninitialized)
        }
    }
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn tagged(type_name: impl Into<String>, ctor: impl Into<String>, fields: Vec<Self>) -> Self {
        Self::Tagged(Rc::new(TaggedValue {
            type_name: type_name.into(),
            ctor: ctor.into(),
            fields,
        }))
    }

    /// A short description of the value's shape, for runtime type errors.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::Char(_) => "char",
            Self::Unit => "()",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Record(_) => "record",
            Self::Tagged(_) => "constructor",
            Self::Function(_) | Self::Builtin(_) => "function",
            Self::Indirect(_) => "recursive binding",
        }
    }

    /// Structural equality for data values.
    ///
    /// Functions compare by identity; indirections compare through their
    /// cells when initialized.
    #[must_use]
    pub fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Unit, Self::Unit) => true,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Self::Record(a), Self::Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.structural_eq(vb))
            }
            (Self::Tagged(a), Self::Tagged(b)) => {
                a.type_name == b.type_name
                    && a.ctor == b.ctor
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(b.fields.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Indirect(a), _) => match a.borrow().force() {
                Ok(inner) => inner.structural_eq(other),
                Err(_) => false,
            },
            (_, Self::Indirect(b)) => match b.borrow().force() {
                Ok(inner) => self.structural_eq(&inner),
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Ordering for `Ord`-class values (int, float, string, char).
    #[must_use]
    pub fn partial_compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Char(a), Self::Char(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

/// Formats a float the way the language prints it (shortest round-trip).
#[must_use]
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_owned();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".to_owned() } else { "-inf".to_owned() };
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(x).to_owned()
}

fn write_escaped_str(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => f.write_str(&format_float(*x)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write_escaped_str(f, s),
            Self::Char(c) => write!(f, "'{c}'"),
            Self::Unit => f.write_str("()"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::Record(fields) => {
                f.write_str("{")?;
                for (i, (label, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{label}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Tagged(tagged) => {
                f.write_str(&tagged.ctor)?;
                if tagged.fields.is_empty() {
                    return Ok(());
                }
                f.write_str("(")?;
                for (i, field) in tagged.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
            Self::Function(func) => match &func.name {
                Some(name) => write!(f, "<function {name}>"),
                None => f.write_str("<function>"),
            },
            Self::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            Self::Indirect(cell) => match cell.borrow().force() {
                Ok(value) => write!(f, "{value}"),
                Err(_) => f.write_str("<uninitialized>"),
            },
        }
    }
}

/// A persistent chain of scope frames.
///
/// Cloning an `Env` is cheap (one `Rc` bump); closures clone the
/// environment at their creation site.
#[derive(Debug, Clone)]
pub struct Env {
    frame: Rc<Frame>,
}

#[derive(Debug)]
struct Frame {
    vars: RefCell<AHashMap<String, Value>>,
    parent: Option<Env>,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame: Rc::new(Frame {
                vars: RefCell::new(AHashMap::new()),
                parent: None,
            }),
        }
    }

    /// A child scope whose lookups fall through to `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            frame: Rc::new(Frame {
                vars: RefCell::new(AHashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn bind(&self, name: impl Into<String>, value: Value) {
        self.frame.vars.borrow_mut().insert(name.into(), value);
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(env) = current {
            if let Some(value) = env.frame.vars.borrow().get(name) {
                return Some(value.clone());
            }
            current = env.frame.parent.as_ref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn tagged_display_matches_constructor_syntax() {
        let none = Value::tagged("Option", "None", vec![]);
        let some = Value::tagged("Option", "Some", vec![Value::Int(42)]);
        assert_eq!(none.to_string(), "None");
        assert_eq!(some.to_string(), "Some(42)");
    }

    #[test]
    fn float_display_round_trips() {
        assert_eq!(Value::Float(0.0).to_string(), "0.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(120.0).to_string(), "120.0");
    }

    #[test]
    fn env_lookup_walks_parent_chain() {
        let root = Env::new();
        root.bind("x", Value::Int(1));
        let child = root.child();
        child.bind("y", Value::Int(2));
        assert_eq!(child.lookup("x"), Some(Value::Int(1)));
        assert_eq!(child.lookup("y"), Some(Value::Int(2)));
        assert_eq!(root.lookup("y"), None);
    }

    #[test]
    fn shadowing_resolves_to_innermost_frame() {
        let root = Env::new();
        root.bind("x", Value::Int(1));
        let child = root.child();
        child.bind("x", Value::Int(2));
        assert_eq!(child.lookup("x"), Some(Value::Int(2)));
        assert_eq!(root.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn rec_cell_force_states() {
        let mut cell = RecCell::default();
        assert_eq!(cell.force().unwrap_err(), ForceError::Uninitialized);
        cell.visiting = true;
        assert_eq!(cell.force().unwrap_err(), ForceError::Visiting);
        cell.visiting = false;
        cell.value = Some(Value::Int(7));
        cell.initialized = true;
        assert_eq!(cell.force().unwrap(), Value::Int(7));
    }

    #[test]
    fn record_fields_display_sorted() {
        let mut fields = BTreeMap::new();
        fields.insert("y".to_owned(), Value::Int(2));
        fields.insert("x".to_owned(), Value::Int(1));
        let record = Value::Record(Rc::new(fields));
        assert_eq!(record.to_string(), "{x: 1, y: 2}");
    }
}

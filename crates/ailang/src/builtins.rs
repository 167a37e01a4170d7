//! The `$builtin` synthetic module: pure dictionary methods plus the
//! typed surface of every effect operation.
//!
//! Pure builtins (`eq_Float`, `add_Int`, `concat_List`, ...) are what
//! operator nodes lower to; their names are `family_Suffix` where the
//! suffix comes from the resolved instance type. Effect builtins
//! (`_io_println`, `_net_httpGet`, ...) carry an `(effect, op)` pair and
//! are dispatched through the effect registry — the evaluator never calls
//! an effect implementation directly.
//!
//! The table is built once at startup and frozen.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    span::Span,
    types::{Effect, EffectRow, RowType, Scheme, Type},
    value::{Value, format_float},
};

/// Implementation of one builtin.
#[derive(Clone)]
pub enum BuiltinImpl {
    /// Pure function over values; called directly by the evaluator.
    Pure(fn(&[Value], Span) -> DiagResult<Value>),
    /// Effect operation; the evaluator routes through the effect registry
    /// (capability check included) using this key.
    Effect(Effect, &'static str),
}

impl std::fmt::Debug for BuiltinImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pure(_) => f.write_str("Pure(..)"),
            Self::Effect(effect, op) => write!(f, "Effect({effect}, {op})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Builtin {
    pub scheme: Scheme,
    pub arity: usize,
    pub imp: BuiltinImpl,
}

/// The frozen builtin table.
#[derive(Debug, Default)]
pub struct BuiltinTable {
    map: AHashMap<String, Builtin>,
}

impl BuiltinTable {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.map.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Scheme table view for the type checker.
    #[must_use]
    pub fn schemes(&self) -> AHashMap<String, Scheme> {
        self.map
            .iter()
            .map(|(name, builtin)| (name.clone(), builtin.scheme.clone()))
            .collect()
    }

    fn pure(
        &mut self,
        name: &str,
        params: Vec<Type>,
        ret: Type,
        func: fn(&[Value], Span) -> DiagResult<Value>,
    ) {
        self.pure_poly(name, Vec::new(), params, ret, func);
    }

    fn pure_poly(
        &mut self,
        name: &str,
        vars: Vec<u32>,
        params: Vec<Type>,
        ret: Type,
        func: fn(&[Value], Span) -> DiagResult<Value>,
    ) {
        let arity = params.len();
        let scheme = Scheme {
            vars,
            ty: Type::Func {
                params,
                ret: Box::new(ret),
                effects: EffectRow::pure(),
            },
        };
        self.map.insert(
            name.to_owned(),
            Builtin {
                scheme,
                arity,
                imp: BuiltinImpl::Pure(func),
            },
        );
    }

    fn effect_op(&mut self, name: &str, effect: Effect, op: &'static str, params: Vec<Type>, ret: Type) {
        let arity = params.len();
        let scheme = Scheme {
            vars: Vec::new(),
            ty: Type::Func {
                params,
                ret: Box::new(ret),
                effects: EffectRow::single(effect),
            },
        };
        self.map.insert(
            name.to_owned(),
            Builtin {
                scheme,
                arity,
                imp: BuiltinImpl::Effect(effect, op),
            },
        );
    }

    /// Builds the standard table.
    #[must_use]
    pub fn standard() -> Self {
        let mut table = Self::default();

        // --- comparison dictionaries ---
        for (suffix, ty) in [
            ("Int", Type::Int),
            ("Float", Type::Float),
            ("Bool", Type::Bool),
            ("String", Type::Str),
            ("Char", Type::Char),
            ("Unit", Type::Unit),
        ] {
            table.pure(&format!("eq_{suffix}"), vec![ty.clone(), ty.clone()], Type::Bool, eq_impl);
            table.pure(&format!("ne_{suffix}"), vec![ty.clone(), ty.clone()], Type::Bool, ne_impl);
        }
        for suffix in ["List", "Tuple", "Record"] {
            table.pure_poly(
                &format!("eq_{suffix}"),
                vec![0],
                vec![Type::Var(0), Type::Var(0)],
                Type::Bool,
                eq_impl,
            );
            table.pure_poly(
                &format!("ne_{suffix}"),
                vec![0],
                vec![Type::Var(0), Type::Var(0)],
                Type::Bool,
                ne_impl,
            );
        }
        for (suffix, ty) in [
            ("Int", Type::Int),
            ("Float", Type::Float),
            ("String", Type::Str),
            ("Char", Type::Char),
        ] {
            table.pure(&format!("lt_{suffix}"), vec![ty.clone(), ty.clone()], Type::Bool, lt_impl);
            table.pure(&format!("le_{suffix}"), vec![ty.clone(), ty.clone()], Type::Bool, le_impl);
            table.pure(&format!("gt_{suffix}"), vec![ty.clone(), ty.clone()], Type::Bool, gt_impl);
            table.pure(&format!("ge_{suffix}"), vec![ty.clone(), ty.clone()], Type::Bool, ge_impl);
        }

        // --- arithmetic dictionaries ---
        table.pure("add_Int", vec![Type::Int, Type::Int], Type::Int, add_int);
        table.pure("sub_Int", vec![Type::Int, Type::Int], Type::Int, sub_int);
        table.pure("mul_Int", vec![Type::Int, Type::Int], Type::Int, mul_int);
        table.pure("div_Int", vec![Type::Int, Type::Int], Type::Int, div_int);
        table.pure("mod_Int", vec![Type::Int, Type::Int], Type::Int, mod_int);
        table.pure("pow_Int", vec![Type::Int, Type::Int], Type::Int, pow_int);
        table.pure("neg_Int", vec![Type::Int], Type::Int, neg_int);
        table.pure("add_Float", vec![Type::Float, Type::Float], Type::Float, add_float);
        table.pure("sub_Float", vec![Type::Float, Type::Float], Type::Float, sub_float);
        table.pure("mul_Float", vec![Type::Float, Type::Float], Type::Float, mul_float);
        table.pure("div_Float", vec![Type::Float, Type::Float], Type::Float, div_float);
        table.pure("pow_Float", vec![Type::Float, Type::Float], Type::Float, pow_float);
        table.pure("neg_Float", vec![Type::Float], Type::Float, neg_float);

        table.pure("not_Bool", vec![Type::Bool], Type::Bool, not_bool);
        table.pure("concat_String", vec![Type::Str, Type::Str], Type::Str, concat_string);
        table.pure_poly(
            "concat_List",
            vec![0],
            vec![Type::List(Box::new(Type::Var(0))), Type::List(Box::new(Type::Var(0)))],
            Type::List(Box::new(Type::Var(0))),
            concat_list,
        );

        // --- show dictionaries ---
        // `show` itself is a class method: the type checker records a Show
        // constraint per reference and the linker rewrites it to one of
        // the suffixed dictionaries. The entry here provides the name for
        // resolution (and a structural fallback impl). One dictionary per
        // Show instance type.
        table.pure_poly("show", vec![0], vec![Type::Var(0)], Type::Str, show_impl);
        table.pure("show_Int", vec![Type::Int], Type::Str, show_impl);
        table.pure("show_Float", vec![Type::Float], Type::Str, show_impl);
        table.pure("show_Bool", vec![Type::Bool], Type::Str, show_impl);
        table.pure("show_String", vec![Type::Str], Type::Str, show_impl);
        table.pure("show_Char", vec![Type::Char], Type::Str, show_impl);
        table.pure("show_Unit", vec![Type::Unit], Type::Str, show_impl);
        for suffix in ["List", "Tuple", "Record"] {
            table.pure_poly(&format!("show_{suffix}"), vec![0], vec![Type::Var(0)], Type::Str, show_impl);
        }

        // --- list helpers used by the prelude ---
        table.pure_poly(
            "_list_length",
            vec![0],
            vec![Type::List(Box::new(Type::Var(0)))],
            Type::Int,
            list_length,
        );

        // --- effect operations ---
        table.effect_op("_io_print", Effect::IO, "print", vec![Type::Str], Type::Unit);
        table.effect_op("_io_println", Effect::IO, "println", vec![Type::Str], Type::Unit);
        table.effect_op("_io_readLine", Effect::IO, "readLine", vec![], Type::Str);

        table.effect_op("_fs_readFile", Effect::FS, "readFile", vec![Type::Str], Type::Str);
        table.effect_op(
            "_fs_writeFile",
            Effect::FS,
            "writeFile",
            vec![Type::Str, Type::Str],
            Type::Unit,
        );
        table.effect_op("_fs_exists", Effect::FS, "exists", vec![Type::Str], Type::Bool);

        table.effect_op("_clock_now", Effect::Clock, "now", vec![], Type::Int);
        table.effect_op("_clock_sleep", Effect::Clock, "sleep", vec![Type::Int], Type::Unit);

        table.effect_op("_rand_int", Effect::Rand, "int", vec![Type::Int, Type::Int], Type::Int);
        table.effect_op("_rand_float", Effect::Rand, "float", vec![], Type::Float);

        table.effect_op("_net_httpGet", Effect::Net, "httpGet", vec![Type::Str], http_result_type());
        table.effect_op(
            "_net_httpPost",
            Effect::Net,
            "httpPost",
            vec![Type::Str, Type::Str],
            http_result_type(),
        );
        table.effect_op(
            "_net_httpRequest",
            Effect::Net,
            "httpRequest",
            vec![Type::Str, Type::Str, header_list_type(), Type::Str],
            http_result_type(),
        );

        table
    }
}

/// `[(string, string)]`, the header list type of `httpRequest`.
fn header_list_type() -> Type {
    Type::List(Box::new(Type::Tuple(vec![Type::Str, Type::Str])))
}

/// `Result[HttpResponse, NetError]`, the return type of every Net op.
fn http_result_type() -> Type {
    let mut fields = BTreeMap::new();
    fields.insert("status".to_owned(), Type::Int);
    fields.insert("body".to_owned(), Type::Str);
    fields.insert("headers".to_owned(), header_list_type());
    let response = Type::Record(RowType::closed(fields));
    Type::App(
        Box::new(Type::Con("Result".to_owned())),
        vec![response, Type::Con("NetError".to_owned())],
    )
}

// --- argument extraction ---

fn type_error(span: Span, wanted: &str, got: &Value) -> Diagnostic {
    Diagnostic::runtime(
        ErrorCode::RtTypeError,
        format!("builtin expected {wanted}, got {}", got.kind_name()),
    )
    .with_span(span)
}

fn int_arg(args: &[Value], index: usize, span: Span) -> DiagResult<i64> {
    match &args[index] {
        Value::Int(n) => Ok(*n),
        other => Err(type_error(span, "an int", other)),
    }
}

fn float_arg(args: &[Value], index: usize, span: Span) -> DiagResult<f64> {
    match &args[index] {
        Value::Float(x) => Ok(*x),
        other => Err(type_error(span, "a float", other)),
    }
}

fn bool_arg(args: &[Value], index: usize, span: Span) -> DiagResult<bool> {
    match &args[index] {
        Value::Bool(b) => Ok(*b),
        other => Err(type_error(span, "a bool", other)),
    }
}

fn str_arg<'a>(args: &'a [Value], index: usize, span: Span) -> DiagResult<&'a str> {
    match &args[index] {
        Value::Str(s) => Ok(s),
        other => Err(type_error(span, "a string", other)),
    }
}

fn list_arg<'a>(args: &'a [Value], index: usize, span: Span) -> DiagResult<&'a [Value]> {
    match &args[index] {
        Value::List(items) => Ok(items),
        other => Err(type_error(span, "a list", other)),
    }
}

// --- comparison impls (shared across suffixes; the type checker already
// picked the instance, so structural semantics are correct here) ---

fn eq_impl(args: &[Value], _span: Span) -> DiagResult<Value> {
    Ok(Value::Bool(args[0].structural_eq(&args[1])))
}

fn ne_impl(args: &[Value], _span: Span) -> DiagResult<Value> {
    Ok(Value::Bool(!args[0].structural_eq(&args[1])))
}

fn ordering(args: &[Value], span: Span) -> DiagResult<std::cmp::Ordering> {
    args[0].partial_compare(&args[1]).ok_or_else(|| {
        Diagnostic::runtime(
            ErrorCode::RtTypeError,
            format!("values of kind {} are not ordered", args[0].kind_name()),
        )
        .with_span(span)
    })
}

fn lt_impl(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Bool(ordering(args, span)?.is_lt()))
}

fn le_impl(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Bool(ordering(args, span)?.is_le()))
}

fn gt_impl(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Bool(ordering(args, span)?.is_gt()))
}

fn ge_impl(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Bool(ordering(args, span)?.is_ge()))
}

// --- arithmetic impls ---

fn overflow(span: Span) -> Diagnostic {
    Diagnostic::runtime(ErrorCode::RtTypeError, "integer overflow").with_span(span)
}

fn add_int(args: &[Value], span: Span) -> DiagResult<Value> {
    let (a, b) = (int_arg(args, 0, span)?, int_arg(args, 1, span)?);
    a.checked_add(b).map(Value::Int).ok_or_else(|| overflow(span))
}

fn sub_int(args: &[Value], span: Span) -> DiagResult<Value> {
    let (a, b) = (int_arg(args, 0, span)?, int_arg(args, 1, span)?);
    a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow(span))
}

fn mul_int(args: &[Value], span: Span) -> DiagResult<Value> {
    let (a, b) = (int_arg(args, 0, span)?, int_arg(args, 1, span)?);
    a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow(span))
}

fn div_int(args: &[Value], span: Span) -> DiagResult<Value> {
    let (a, b) = (int_arg(args, 0, span)?, int_arg(args, 1, span)?);
    if b == 0 {
        return Err(Diagnostic::runtime(ErrorCode::RtDivisionByZero, "division by zero").with_span(span));
    }
    a.checked_div(b).map(Value::Int).ok_or_else(|| overflow(span))
}

fn mod_int(args: &[Value], span: Span) -> DiagResult<Value> {
    let (a, b) = (int_arg(args, 0, span)?, int_arg(args, 1, span)?);
    if b == 0 {
        return Err(Diagnostic::runtime(ErrorCode::RtDivisionByZero, "modulo by zero").with_span(span));
    }
    a.checked_rem(b).map(Value::Int).ok_or_else(|| overflow(span))
}

fn pow_int(args: &[Value], span: Span) -> DiagResult<Value> {
    let (base, exp) = (int_arg(args, 0, span)?, int_arg(args, 1, span)?);
    let exp = u32::try_from(exp)
        .map_err(|_| Diagnostic::runtime(ErrorCode::RtTypeError, "negative integer exponent").with_span(span))?;
    base.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow(span))
}

fn neg_int(args: &[Value], span: Span) -> DiagResult<Value> {
    int_arg(args, 0, span)?
        .checked_neg()
        .map(Value::Int)
        .ok_or_else(|| overflow(span))
}

fn add_float(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Float(float_arg(args, 0, span)? + float_arg(args, 1, span)?))
}

fn sub_float(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Float(float_arg(args, 0, span)? - float_arg(args, 1, span)?))
}

fn mul_float(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Float(float_arg(args, 0, span)? * float_arg(args, 1, span)?))
}

fn div_float(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Float(float_arg(args, 0, span)? / float_arg(args, 1, span)?))
}

fn pow_float(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Float(float_arg(args, 0, span)?.powf(float_arg(args, 1, span)?)))
}

fn neg_float(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Float(-float_arg(args, 0, span)?))
}

fn not_bool(args: &[Value], span: Span) -> DiagResult<Value> {
    Ok(Value::Bool(!bool_arg(args, 0, span)?))
}

fn concat_string(args: &[Value], span: Span) -> DiagResult<Value> {
    let mut out = str_arg(args, 0, span)?.to_owned();
    out.push_str(str_arg(args, 1, span)?);
    Ok(Value::str(out))
}

fn concat_list(args: &[Value], span: Span) -> DiagResult<Value> {
    let mut out = list_arg(args, 0, span)?.to_vec();
    out.extend_from_slice(list_arg(args, 1, span)?);
    Ok(Value::List(std::rc::Rc::new(out)))
}

fn show_impl(args: &[Value], _span: Span) -> DiagResult<Value> {
    // `show` renders the value's display form; floats keep shortest
    // round-trip formatting, strings keep quotes.
    let text = match &args[0] {
        Value::Float(x) => format_float(*x),
        other => other.to_string(),
    };
    Ok(Value::str(text))
}

fn list_length(args: &[Value], span: Span) -> DiagResult<Value> {
    let items = list_arg(args, 0, span)?;
    Ok(Value::Int(i64::try_from(items.len()).expect("list length fits in i64")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn call(name: &str, args: &[Value]) -> DiagResult<Value> {
        let table = BuiltinTable::standard();
        let builtin = table.get(name).unwrap_or_else(|| panic!("missing builtin {name}"));
        match &builtin.imp {
            BuiltinImpl::Pure(func) => func(args, Span::point(1, 1)),
            BuiltinImpl::Effect(..) => panic!("{name} is not pure"),
        }
    }

    #[test]
    fn dictionary_methods_exist_for_operator_lowering() {
        let table = BuiltinTable::standard();
        for name in [
            "eq_Int", "eq_Float", "ne_Float", "lt_String", "add_Int", "mul_Float", "mod_Int", "pow_Int",
            "concat_String", "concat_List", "neg_Int", "not_Bool",
        ] {
            assert!(table.contains(name), "missing {name}");
        }
    }

    #[test]
    fn every_show_instance_has_a_dictionary_method() {
        // The Show instance table in the type checker admits exactly the
        // types with a method suffix; each needs a builtin to lower to.
        let table = BuiltinTable::standard();
        assert!(table.contains("show"));
        for suffix in ["Int", "Float", "Bool", "String", "Char", "Unit", "List", "Tuple", "Record"] {
            assert!(table.contains(&format!("show_{suffix}")), "missing show_{suffix}");
        }
    }

    #[test]
    fn show_string_quotes_its_argument() {
        let result = call("show_String", &[Value::str("hi")]).unwrap();
        assert_eq!(result, Value::str("\"hi\""));
    }

    #[test]
    fn float_equality_at_zero() {
        let result = call("eq_Float", &[Value::Float(0.0), Value::Float(0.0)]).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn division_by_zero_is_rt_div_001() {
        let err = call("div_Int", &[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::RtDivisionByZero);
    }

    #[test]
    fn modulo_by_zero_is_rt_div_001() {
        let err = call("mod_Int", &[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::RtDivisionByZero);
    }

    #[test]
    fn integer_overflow_is_explicit() {
        let err = call("add_Int", &[Value::Int(i64::MAX), Value::Int(1)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::RtTypeError);
    }

    #[test]
    fn concat_list_preserves_order() {
        let a = Value::List(std::rc::Rc::new(vec![Value::Int(1), Value::Int(2)]));
        let b = Value::List(std::rc::Rc::new(vec![Value::Int(3)]));
        let result = call("concat_List", &[a, b]).unwrap();
        assert_eq!(result.to_string(), "[1, 2, 3]");
    }

    #[test]
    fn net_ops_are_effectful_and_typed() {
        let table = BuiltinTable::standard();
        let builtin = table.get("_net_httpGet").unwrap();
        assert!(matches!(builtin.imp, BuiltinImpl::Effect(Effect::Net, "httpGet")));
        let Type::Func { effects, .. } = &builtin.scheme.ty else {
            panic!("expected function scheme");
        };
        assert!(effects.contains(Effect::Net));
    }
}

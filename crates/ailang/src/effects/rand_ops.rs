//! Rand effect operations, backed by ChaCha8.
//!
//! Seeded from `AILANG_SEED` in deterministic mode, from OS entropy
//! otherwise. Gated by the `Rand` capability like every other effect.

use rand::Rng as _;

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    value::Value,
};

use super::OpEnv;

pub(super) fn rand_int(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let (lo, hi) = match (args.first(), args.get(1)) {
        (Some(Value::Int(lo)), Some(Value::Int(hi))) => (*lo, *hi),
        _ => {
            return Err(Diagnostic::runtime(
                ErrorCode::RtTypeError,
                "rand int expects two int bounds",
            ));
        }
    };
    if lo > hi {
        return Err(Diagnostic::runtime(
            ErrorCode::RtTypeError,
            format!("rand int bounds are inverted: {lo} > {hi}"),
        ));
    }
    let value = env.ctx.rng.borrow_mut().gen_range(lo..=hi);
    Ok(Value::Int(value))
}

pub(super) fn rand_float(env: &mut OpEnv<'_>, _args: &[Value]) -> DiagResult<Value> {
    let value: f64 = env.ctx.rng.borrow_mut().r#gen();
    Ok(Value::Float(value))
}

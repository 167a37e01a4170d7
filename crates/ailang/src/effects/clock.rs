//! Clock effect operations: `now` and `sleep`.
//!
//! With `AILANG_SEED` set the context carries a virtual clock: `now`
//! reads a counter that starts at 0 and `sleep(ms)` advances it without
//! blocking. Real mode uses monotonic time offset by the epoch captured
//! at startup, so wall-clock jumps never show up in timings.

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    value::Value,
};

use super::OpEnv;

pub(super) fn now(env: &mut OpEnv<'_>, _args: &[Value]) -> DiagResult<Value> {
    Ok(Value::Int(env.ctx.now_millis()))
}

pub(super) fn sleep(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let ms = match args.first() {
        Some(Value::Int(ms)) => *ms,
        Some(other) => {
            return Err(Diagnostic::runtime(
                ErrorCode::RtTypeError,
                format!("sleep expected an int, got {}", other.kind_name()),
            ));
        }
        None => return Err(Diagnostic::runtime(ErrorCode::RtArity, "sleep missing an argument")),
    };
    env.ctx.sleep_millis(ms);
    Ok(Value::Unit)
}

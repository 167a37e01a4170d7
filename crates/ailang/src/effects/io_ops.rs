//! IO effect operations: `print`, `println`, `readLine`.
//!
//! Output goes through the run's [`crate::io::PrintWriter`], so hosts and
//! tests can capture it; stdout is buffered by the default writer.

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    value::Value,
};

use super::OpEnv;

fn str_arg(args: &[Value], index: usize) -> DiagResult<&str> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(Diagnostic::runtime(
            ErrorCode::RtTypeError,
            format!("IO operation expected a string, got {}", other.kind_name()),
        )),
        None => Err(Diagnostic::runtime(ErrorCode::RtArity, "IO operation missing an argument")),
    }
}

pub(super) fn print(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let text = str_arg(args, 0)?;
    env.writer.stdout_write(text.into())?;
    Ok(Value::Unit)
}

pub(super) fn println(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let text = str_arg(args, 0)?;
    env.writer.stdout_write(text.into())?;
    env.writer.stdout_push('\n')?;
    Ok(Value::Unit)
}

pub(super) fn read_line(_env: &mut OpEnv<'_>, _args: &[Value]) -> DiagResult<Value> {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| Diagnostic::runtime(ErrorCode::RtIoError, format!("readLine failed: {e}")))?;
    // The trailing newline is not part of the line.
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Value::str(line))
}

//! FS effect operations: `readFile`, `writeFile`, `exists`.
//!
//! When `AILANG_FS_SANDBOX` is set, every path is interpreted relative to
//! the sandbox root. Escapes are rejected twice: lexically (a normalized
//! path may never pop above the root) and, for paths that exist, by
//! canonicalizing and checking the prefix — so `..` chains and symlinks
//! both stay inside the jail.

use std::path::{Component, Path, PathBuf};

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    value::Value,
};

use super::{EffContext, OpEnv};

fn str_arg(args: &[Value], index: usize, what: &str) -> DiagResult<String> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(Diagnostic::runtime(
            ErrorCode::RtTypeError,
            format!("{what} expected a string, got {}", other.kind_name()),
        )),
        None => Err(Diagnostic::runtime(
            ErrorCode::RtArity,
            format!("{what} missing an argument"),
        )),
    }
}

fn escape_error(path: &str) -> Diagnostic {
    Diagnostic::runtime(
        ErrorCode::RtFsError,
        format!("path `{path}` escapes the sandbox root"),
    )
    .with_data("path", path)
}

/// Joins a user path against the sandbox root (when set) and rejects
/// anything that resolves outside it.
pub(super) fn resolve_path(ctx: &EffContext, raw: &str) -> DiagResult<PathBuf> {
    let Some(root) = &ctx.fs_sandbox else {
        return Ok(PathBuf::from(raw));
    };

    let user = Path::new(raw);
    // Absolute paths are re-rooted; `..` may never pop above the root.
    let mut depth: i64 = 0;
    let mut rel = PathBuf::new();
    for component in user.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(escape_error(raw));
                }
                rel.pop();
            }
            Component::Normal(part) => {
                depth += 1;
                rel.push(part);
            }
        }
    }
    let joined = root.join(rel);

    // Symlink defense: for paths that already exist, the canonical form
    // must still sit under the canonical root.
    if joined.exists() {
        let canonical_root = root
            .canonicalize()
            .map_err(|e| Diagnostic::runtime(ErrorCode::RtFsError, format!("invalid sandbox root: {e}")))?;
        let canonical = joined
            .canonicalize()
            .map_err(|e| Diagnostic::runtime(ErrorCode::RtFsError, format!("cannot resolve `{raw}`: {e}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(escape_error(raw));
        }
    }
    Ok(joined)
}

pub(super) fn read_file(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let raw = str_arg(args, 0, "readFile")?;
    let path = resolve_path(env.ctx, &raw)?;
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Diagnostic::runtime(ErrorCode::RtFsError, format!("cannot read `{raw}`: {e}")).with_data("path", raw.as_str()))?;
    Ok(Value::str(content))
}

pub(super) fn write_file(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let raw = str_arg(args, 0, "writeFile")?;
    let content = str_arg(args, 1, "writeFile")?;
    let path = resolve_path(env.ctx, &raw)?;
    std::fs::write(&path, content)
        .map_err(|e| Diagnostic::runtime(ErrorCode::RtFsError, format!("cannot write `{raw}`: {e}")).with_data("path", raw.as_str()))?;
    Ok(Value::Unit)
}

pub(super) fn exists(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let raw = str_arg(args, 0, "exists")?;
    let path = resolve_path(env.ctx, &raw)?;
    Ok(Value::Bool(path.exists()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sandboxed(root: &str) -> EffContext {
        EffContext::default().with_sandbox(Some(PathBuf::from(root)))
    }

    #[test]
    fn relative_paths_join_the_root() {
        let ctx = sandboxed("/sandbox");
        assert_eq!(resolve_path(&ctx, "data/x.txt").unwrap(), PathBuf::from("/sandbox/data/x.txt"));
    }

    #[test]
    fn absolute_paths_are_rerooted() {
        let ctx = sandboxed("/sandbox");
        assert_eq!(resolve_path(&ctx, "/etc/passwd").unwrap(), PathBuf::from("/sandbox/etc/passwd"));
    }

    #[test]
    fn parent_escapes_are_rejected() {
        let ctx = sandboxed("/sandbox");
        let err = resolve_path(&ctx, "../secret").unwrap_err();
        assert_eq!(err.code, ErrorCode::RtFsError);
        let err = resolve_path(&ctx, "a/../../secret").unwrap_err();
        assert_eq!(err.code, ErrorCode::RtFsError);
    }

    #[test]
    fn internal_parent_components_are_fine() {
        let ctx = sandboxed("/sandbox");
        assert_eq!(resolve_path(&ctx, "a/b/../c").unwrap(), PathBuf::from("/sandbox/a/c"));
    }

    #[test]
    fn no_sandbox_means_paths_pass_through() {
        let ctx = EffContext::default();
        assert_eq!(resolve_path(&ctx, "/etc/hosts").unwrap(), PathBuf::from("/etc/hosts"));
    }
}

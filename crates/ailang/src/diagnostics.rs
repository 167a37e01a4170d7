//! The error currency shared by every phase of the pipeline.
//!
//! All anticipated failures are a [`Diagnostic`]: a stable code, the phase
//! that produced it, a message, an optional source span, a sorted data map,
//! and an optional fix hint. Panics from the interpreter are bugs.
//!
//! Diagnostics serialize to the `ailang.error/v1` JSON schema with
//! deterministic key order, which the CLI emits under `--json`/`--compact`.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::span::Span;

/// Result alias used by every compilation and evaluation phase.
pub type DiagResult<T> = Result<T, Diagnostic>;

/// Stable error codes.
///
/// The string form is the wire code (e.g. `PAR_EFF002`); families group by
/// phase: `LEX_*`/`PAR_*` syntax, `MOD_*` module structure, `LDR_*` loading,
/// `TC_*` types, `LNK_*` linking, `RT_*` evaluation, `CAP_*` capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorCode {
    // --- Lexer ---
    #[strum(serialize = "LEX001")]
    LexInvalidChar,
    #[strum(serialize = "LEX002")]
    LexUnterminatedString,
    #[strum(serialize = "LEX003")]
    LexInvalidEscape,
    #[strum(serialize = "LEX004")]
    LexUnterminatedComment,
    #[strum(serialize = "LEX005")]
    LexBadNumber,

    // --- Parser ---
    #[strum(serialize = "PAR001")]
    ParUnexpectedToken,
    #[strum(serialize = "PAR002")]
    ParBadTypeDecl,
    #[strum(serialize = "PAR_EFF001")]
    ParDuplicateEffect,
    #[strum(serialize = "PAR_EFF002")]
    ParUnknownEffect,
    #[strum(serialize = "BLOCK_EMPTY")]
    ParEmptyBlock,

    // --- Module structure ---
    #[strum(serialize = "MOD001")]
    ModBadHeader,
    #[strum(serialize = "MOD006")]
    ModExportOfPrivate,
    #[strum(serialize = "MOD_CTOR_001")]
    ModUnknownConstructor,
    #[strum(serialize = "MOD_REF_001")]
    ModUnboundVariable,

    // --- Loader ---
    #[strum(serialize = "LDR001")]
    LdrNotFound,
    #[strum(serialize = "LDR_CYCLE")]
    LdrCycle,

    // --- Type checker ---
    #[strum(serialize = "TC001")]
    TcMismatch,
    #[strum(serialize = "TC002")]
    TcOccurs,
    #[strum(serialize = "TC_REC_001")]
    TcFieldMissing,
    #[strum(serialize = "TC_ROW_001")]
    TcRowMismatch,
    #[strum(serialize = "TC_EFF_001")]
    TcEffectMismatch,
    #[strum(serialize = "TC_EFF_002")]
    TcUndeclaredEffect,
    #[strum(serialize = "TC_INTEGRAL_001")]
    TcNoInstance,
    #[strum(serialize = "TC_AMBIGUOUS_001")]
    TcAmbiguous,
    #[strum(serialize = "TC_ARITY_001")]
    TcArity,

    // --- Linker ---
    #[strum(serialize = "LNK001")]
    LnkUnresolvedOperator,
    #[strum(serialize = "LNK002")]
    LnkUnknownBuiltin,
    #[strum(serialize = "LNK003")]
    LnkUnknownAdt,

    // --- Runtime ---
    #[strum(serialize = "RT001")]
    RtTypeError,
    #[strum(serialize = "RT_ARITY_001")]
    RtArity,
    #[strum(serialize = "RT_DIV_001")]
    RtDivisionByZero,
    #[strum(serialize = "RT_REC_001")]
    RtRecursiveValue,
    #[strum(serialize = "RT_REC_002")]
    RtUninitialized,
    #[strum(serialize = "RT_REC_003")]
    RtRecursionLimit,
    #[strum(serialize = "RT_MATCH")]
    RtNonExhaustiveMatch,
    #[strum(serialize = "RT_IO_001")]
    RtIoError,
    #[strum(serialize = "RT_FS_001")]
    RtFsError,
    #[strum(serialize = "RT_ENTRY_001")]
    RtBadEntry,
    #[strum(serialize = "RT_ARG_001")]
    RtBadArgument,

    // --- Capabilities ---
    #[strum(serialize = "CAP_001")]
    CapMissing,

    // --- CLI boundary ---
    #[strum(serialize = "CLI001")]
    CliMisuse,
}

/// The pipeline phase a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Lexer,
    Parser,
    Elaborator,
    Typechecker,
    Linker,
    Loader,
    Runtime,
    Capability,
    Cli,
}

/// A suggested fix with a confidence level, surfaced alongside the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub suggestion: String,
    /// Confidence in `[0.0, 1.0]`; the CLI only shows fixes at >= 0.5.
    pub confidence: f64,
}

/// A structured error with a stable code, span, and machine-readable data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub phase: Phase,
    pub message: String,
    /// Source file the span refers to, when known.
    pub file: Option<String>,
    pub span: Option<Span>,
    /// Extra key/value context; `BTreeMap` keeps JSON key order stable.
    pub data: BTreeMap<String, serde_json::Value>,
    pub fix: Option<Fix>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(code: ErrorCode, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            code,
            phase,
            message: message.into(),
            file: None,
            span: None,
            data: BTreeMap::new(),
            fix: None,
        }
    }

    #[must_use]
    pub fn lex(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self::new(code, Phase::Lexer, message).with_span(span)
    }

    #[must_use]
    pub fn parse(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self::new(code, Phase::Parser, message).with_span(span)
    }

    #[must_use]
    pub fn elaborate(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self::new(code, Phase::Elaborator, message).with_span(span)
    }

    #[must_use]
    pub fn typecheck(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self::new(code, Phase::Typechecker, message).with_span(span)
    }

    #[must_use]
    pub fn link(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, Phase::Linker, message)
    }

    #[must_use]
    pub fn load(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, Phase::Loader, message)
    }

    #[must_use]
    pub fn runtime(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, Phase::Runtime, message)
    }

    #[must_use]
    pub fn capability(effect: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::CapMissing,
            Phase::Capability,
            format!("effect '{effect}' requires a capability grant"),
        )
        .with_fix(format!("run with --caps {effect}"), 0.9)
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_fix(mut self, suggestion: impl Into<String>, confidence: f64) -> Self {
        self.fix = Some(Fix {
            suggestion: suggestion.into(),
            confidence,
        });
        self
    }

    /// Serializes to the `ailang.error/v1` schema.
    ///
    /// Key order is deterministic: the top-level object is emitted in schema
    /// order and `data` is a sorted map.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("schema".into(), serde_json::Value::from("ailang.error/v1"));
        obj.insert("code".into(), serde_json::Value::from(self.code.to_string()));
        obj.insert("phase".into(), serde_json::Value::from(self.phase.to_string()));
        obj.insert("message".into(), serde_json::Value::from(self.message.clone()));
        if let Some(span) = self.span {
            let mut span_obj = serde_json::Map::new();
            span_obj.insert(
                "file".into(),
                serde_json::Value::from(self.file.clone().unwrap_or_default()),
            );
            span_obj.insert("line".into(), serde_json::Value::from(span.start.line));
            span_obj.insert("col".into(), serde_json::Value::from(span.start.col));
            obj.insert("span".into(), serde_json::Value::Object(span_obj));
        }
        let data: serde_json::Map<String, serde_json::Value> =
            self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        obj.insert("data".into(), serde_json::Value::Object(data));
        if let Some(fix) = &self.fix {
            let mut fix_obj = serde_json::Map::new();
            fix_obj.insert("suggestion".into(), serde_json::Value::from(fix.suggestion.clone()));
            fix_obj.insert("confidence".into(), serde_json::Value::from(fix.confidence));
            obj.insert("fix".into(), serde_json::Value::Object(fix_obj));
        }
        serde_json::Value::Object(obj)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        match (&self.file, self.span) {
            (Some(file), Some(span)) => write!(f, " at {file}:{span}")?,
            (None, Some(span)) => write!(f, " at {span}")?,
            _ => {}
        }
        write!(f, ": {}", self.message)?;
        if let Some(fix) = &self.fix
            && fix.confidence >= 0.5
        {
            write!(f, "\n  hint: {}", fix.suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// A non-fatal finding (exhaustiveness, redundancy) surfaced at the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
    pub span: Span,
}

/// Warning codes; separate from [`ErrorCode`] because warnings never fail a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum WarningCode {
    #[strum(serialize = "WARN_NON_EXHAUSTIVE")]
    NonExhaustiveMatch,
    #[strum(serialize = "WARN_REDUNDANT_PATTERN")]
    RedundantPattern,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.code, self.span, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Pos;

    #[test]
    fn code_strings_are_stable() {
        assert_eq!(ErrorCode::ParUnknownEffect.to_string(), "PAR_EFF002");
        assert_eq!(ErrorCode::LdrCycle.to_string(), "LDR_CYCLE");
        assert_eq!(ErrorCode::TcNoInstance.to_string(), "TC_INTEGRAL_001");
        assert_eq!(ErrorCode::RtRecursionLimit.to_string(), "RT_REC_003");
        assert_eq!(ErrorCode::CapMissing.to_string(), "CAP_001");
    }

    #[test]
    fn json_schema_shape() {
        let diag = Diagnostic::parse(
            ErrorCode::ParUnexpectedToken,
            "unexpected token",
            Span::new(Pos::new(3, 7), Pos::new(3, 9)),
        )
        .with_file("examples/demo.ail")
        .with_data("expected", ")")
        .with_data("found", ";");
        let json = diag.to_json();
        assert_eq!(json["schema"], "ailang.error/v1");
        assert_eq!(json["code"], "PAR001");
        assert_eq!(json["phase"], "parser");
        assert_eq!(json["span"]["line"], 3);
        assert_eq!(json["data"]["expected"], ")");
    }

    #[test]
    fn capability_diag_carries_fix() {
        let diag = Diagnostic::capability("IO");
        assert_eq!(diag.code, ErrorCode::CapMissing);
        assert!(diag.fix.unwrap().suggestion.contains("--caps IO"));
    }
}

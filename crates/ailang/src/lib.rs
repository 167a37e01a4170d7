#![doc = include_str!("../../../README.md")]

mod ast;
mod builtins;
mod core;
mod decision;
mod diagnostics;
mod effects;
mod elaborate;
mod eval;
mod iface;
mod infer;
mod io;
mod lexer;
mod link;
mod loader;
mod parser;
mod repl;
mod runtime;
mod span;
mod stdlib;
mod token;
mod tracer;
mod types;
mod value;

pub use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode, Fix, Phase, Warning, WarningCode},
    effects::{ClockState, DEFAULT_MAX_RECURSION_DEPTH, EffContext, EffectRegistry, NetPolicy},
    eval::MatchMode,
    iface::{CtorExport, Iface, TypeExport, TypeExportKind},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    loader::{LoadedModule, Loader, LoaderConfig},
    repl::{ReplOutcome, ReplSession},
    runtime::{Runtime, decode_json},
    span::{Pos, Span},
    tracer::{EvalTracer, NoopTracer, RecordingTracer, StderrTracer},
    types::{Effect, EffectRow, Scheme, Type},
    value::Value,
};

//! Evaluation tracing.
//!
//! The tracer is the observability seam of the interpreter: the evaluator
//! and the effect registry report structured events through it, and hosts
//! choose what to do with them. [`NoopTracer`] is the default;
//! [`StderrTracer`] prints one line per event and backs the CLI's
//! `--trace` flag.

use crate::{span::Span, types::Effect};

/// Events reported during evaluation.
pub trait EvalTracer {
    /// A function application is about to run. `depth` is the recursion
    /// depth after entering.
    fn on_apply(&mut self, name: Option<&str>, depth: u32) {
        let _ = (name, depth);
    }

    /// A function application returned (on success and error paths alike).
    fn on_return(&mut self, depth: u32) {
        let _ = depth;
    }

    /// An effect operation is about to dispatch through the registry.
    /// Reported after the capability check passes.
    fn on_effect(&mut self, effect: Effect, op: &str) {
        let _ = (effect, op);
    }

    /// A module's top-level bindings are about to be evaluated.
    fn on_module_init(&mut self, module_path: &str) {
        let _ = module_path;
    }

    /// A match arm was selected.
    fn on_match_arm(&mut self, span: Span, arm_index: usize) {
        let _ = (span, arm_index);
    }
}

/// Tracer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// Tracer that prints one line per event to stderr.
///
/// Output is a stable `key=value` format so it can be grepped or diffed.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl EvalTracer for StderrTracer {
    fn on_apply(&mut self, name: Option<&str>, depth: u32) {
        eprintln!("trace event=apply fn={} depth={depth}", name.unwrap_or("<anon>"));
    }

    fn on_effect(&mut self, effect: Effect, op: &str) {
        eprintln!("trace event=effect effect={effect} op={op}");
    }

    fn on_module_init(&mut self, module_path: &str) {
        eprintln!("trace event=module-init module={module_path}");
    }
}

/// Tracer that records events for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<String>,
}

impl EvalTracer for RecordingTracer {
    fn on_apply(&mut self, name: Option<&str>, depth: u32) {
        self.events.push(format!("apply {} @{depth}", name.unwrap_or("<anon>")));
    }

    fn on_effect(&mut self, effect: Effect, op: &str) {
        self.events.push(format!("effect {effect}.{op}"));
    }

    fn on_module_init(&mut self, module_path: &str) {
        self.events.push(format!("init {module_path}"));
    }
}

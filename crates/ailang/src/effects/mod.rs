//! The effect system: capability context and the operation registry.
//!
//! Every effectful builtin dispatches through one flat registry keyed by
//! `(effect, op)`. There is deliberately no parallel path: the evaluator
//! resolves an effect builtin to its registry key and calls [`EffectRegistry::dispatch`],
//! which checks the capability grant *before* running the handler. A
//! handler that performs I/O can therefore never run without its grant.

mod clock;
mod fs;
mod io_ops;
mod net;
mod rand_ops;

use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    path::PathBuf,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use ahash::AHashMap;
use rand::SeedableRng as _;
use rand_chacha::ChaCha8Rng;

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    io::PrintWriter,
    tracer::EvalTracer,
    types::Effect,
    value::Value,
};

pub use net::NetPolicy;

/// Default recursion budget for `run`.
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 10_000;

/// How the Clock effect sources time.
#[derive(Debug)]
pub enum ClockState {
    /// Deterministic mode: a monotonic counter starting at 0. `sleep`
    /// advances it and returns immediately.
    Virtual(Cell<i64>),
    /// Real mode: monotonic time since process start, offset by the epoch
    /// captured at startup — immune to wall-clock jumps.
    Real { epoch_offset_ms: i64, started: Instant },
}

impl ClockState {
    #[must_use]
    pub fn real() -> Self {
        let epoch_offset_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self::Real {
            epoch_offset_ms,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn virtual_clock() -> Self {
        Self::Virtual(Cell::new(0))
    }
}

/// The per-run capability bag.
///
/// Created once per `run` invocation from CLI flags and environment
/// variables, then passed by shared reference to every effect operation.
/// Mutable pieces (recursion depth, virtual clock, RNG) use interior
/// mutability; the evaluator is single-threaded.
#[derive(Debug)]
pub struct EffContext {
    caps: BTreeSet<Effect>,
    pub fs_sandbox: Option<PathBuf>,
    pub net: NetPolicy,
    pub clock: ClockState,
    pub rng: RefCell<ChaCha8Rng>,
    /// Set when `AILANG_SEED` is present: virtual clock, seeded RNG, and
    /// Net disabled.
    pub deterministic: bool,
    recursion_depth: Cell<u32>,
    pub max_recursion_depth: u32,
}

impl Default for EffContext {
    fn default() -> Self {
        Self::new(BTreeSet::new(), None)
    }
}

impl EffContext {
    /// Builds a context. `seed` comes from `AILANG_SEED` and switches the
    /// run into deterministic mode.
    #[must_use]
    pub fn new(caps: BTreeSet<Effect>, seed: Option<u64>) -> Self {
        let deterministic = seed.is_some();
        let clock = if deterministic {
            ClockState::virtual_clock()
        } else {
            ClockState::real()
        };
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            caps,
            fs_sandbox: None,
            net: NetPolicy::default(),
            clock,
            rng: RefCell::new(rng),
            deterministic,
            recursion_depth: Cell::new(0),
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, root: Option<PathBuf>) -> Self {
        self.fs_sandbox = root;
        self
    }

    #[must_use]
    pub fn with_net(mut self, net: NetPolicy) -> Self {
        self.net = net;
        self
    }

    #[must_use]
    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    #[must_use]
    pub fn has_cap(&self, effect: Effect) -> bool {
        self.caps.contains(&effect)
    }

    /// Asserts the capability grant for an effect. `CAP_001` otherwise.
    pub fn check_cap(&self, effect: Effect) -> DiagResult<()> {
        if self.caps.contains(&effect) {
            Ok(())
        } else {
            Err(Diagnostic::capability(effect))
        }
    }

    /// Bumps the recursion depth before a function application.
    pub fn enter_call(&self) -> DiagResult<()> {
        let depth = self.recursion_depth.get() + 1;
        if depth > self.max_recursion_depth {
            return Err(Diagnostic::runtime(
                ErrorCode::RtRecursionLimit,
                format!("recursion depth exceeded {}", self.max_recursion_depth),
            )
            .with_fix("raise the limit with --max-recursion-depth", 0.6));
        }
        self.recursion_depth.set(depth);
        Ok(())
    }

    /// Restores the depth after a call returns — on success and error
    /// paths alike.
    pub fn exit_call(&self) {
        let depth = self.recursion_depth.get();
        self.recursion_depth.set(depth.saturating_sub(1));
    }

    #[must_use]
    pub fn recursion_depth(&self) -> u32 {
        self.recursion_depth.get()
    }

    /// Milliseconds since epoch (real mode) or since start (virtual mode).
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        match &self.clock {
            ClockState::Virtual(cell) => cell.get(),
            ClockState::Real { epoch_offset_ms, started } => {
                epoch_offset_ms + i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
            }
        }
    }

    /// Sleeps (real mode) or advances the virtual clock and returns
    /// immediately (deterministic mode).
    pub fn sleep_millis(&self, ms: i64) {
        match &self.clock {
            ClockState::Virtual(cell) => {
                cell.set(cell.get().saturating_add(ms.max(0)));
            }
            ClockState::Real { .. } => {
                if ms > 0 {
                    std::thread::sleep(Duration::from_millis(u64::try_from(ms).unwrap_or(0)));
                }
            }
        }
    }
}

/// What a handler gets to work with.
pub struct OpEnv<'a> {
    pub ctx: &'a EffContext,
    pub writer: &'a mut dyn PrintWriter,
    pub tracer: &'a mut dyn EvalTracer,
}

/// Handler signature for one effect operation.
pub type EffectOpFn = fn(&mut OpEnv<'_>, &[Value]) -> DiagResult<Value>;

/// The flat `(effect, op) -> handler` registry.
///
/// Populated at startup and frozen; the evaluator reads it only.
pub struct EffectRegistry {
    ops: AHashMap<(Effect, &'static str), EffectOpFn>,
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry").field("ops", &self.ops.len()).finish()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl EffectRegistry {
    /// Builds the standard registry with IO, FS, Clock, Net, and Rand ops.
    #[must_use]
    pub fn standard() -> Self {
        let mut ops: AHashMap<(Effect, &'static str), EffectOpFn> = AHashMap::new();
        ops.insert((Effect::IO, "print"), io_ops::print as EffectOpFn);
        ops.insert((Effect::IO, "println"), io_ops::println);
        ops.insert((Effect::IO, "readLine"), io_ops::read_line);
        ops.insert((Effect::FS, "readFile"), fs::read_file);
        ops.insert((Effect::FS, "writeFile"), fs::write_file);
        ops.insert((Effect::FS, "exists"), fs::exists);
        ops.insert((Effect::Clock, "now"), clock::now);
        ops.insert((Effect::Clock, "sleep"), clock::sleep);
        ops.insert((Effect::Rand, "int"), rand_ops::rand_int);
        ops.insert((Effect::Rand, "float"), rand_ops::rand_float);
        ops.insert((Effect::Net, "httpGet"), net::http_get);
        ops.insert((Effect::Net, "httpPost"), net::http_post);
        ops.insert((Effect::Net, "httpRequest"), net::http_request);
        Self { ops }
    }

    #[must_use]
    pub fn contains(&self, effect: Effect, op: &str) -> bool {
        self.ops.keys().any(|(e, o)| *e == effect && *o == op)
    }

    /// Dispatches one operation: capability check first, then the handler.
    ///
    /// The check runs before any handler code, so a denied operation has
    /// no side effects at all.
    pub fn dispatch(&self, effect: Effect, op: &str, env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
        env.ctx.check_cap(effect)?;
        let Some(handler) = self.ops.iter().find(|((e, o), _)| *e == effect && *o == op).map(|(_, h)| *h) else {
            return Err(Diagnostic::runtime(
                ErrorCode::RtTypeError,
                format!("unknown effect operation {effect}.{op}"),
            ));
        };
        env.tracer.on_effect(effect, op);
        handler(env, args)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{io::CollectStringPrint, tracer::NoopTracer};

    #[test]
    fn capability_denied_before_any_side_effect() {
        let registry = EffectRegistry::standard();
        let ctx = EffContext::default();
        let mut writer = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut env = OpEnv {
            ctx: &ctx,
            writer: &mut writer,
            tracer: &mut tracer,
        };
        let err = registry
            .dispatch(Effect::IO, "println", &mut env, &[Value::str("hi")])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CapMissing);
        assert_eq!(writer.output(), "", "nothing may reach stdout on denial");
    }

    #[test]
    fn granted_io_writes_through_the_writer() {
        let registry = EffectRegistry::standard();
        let ctx = EffContext::new(BTreeSet::from([Effect::IO]), None);
        let mut writer = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut env = OpEnv {
            ctx: &ctx,
            writer: &mut writer,
            tracer: &mut tracer,
        };
        registry
            .dispatch(Effect::IO, "println", &mut env, &[Value::str("hi")])
            .unwrap();
        assert_eq!(writer.output(), "hi\n");
    }

    #[test]
    fn virtual_clock_advances_without_blocking() {
        let ctx = EffContext::new(BTreeSet::from([Effect::Clock]), Some(42));
        assert_eq!(ctx.now_millis(), 0);
        let before = Instant::now();
        ctx.sleep_millis(10_000);
        assert!(before.elapsed() < Duration::from_secs(1), "virtual sleep must not block");
        assert_eq!(ctx.now_millis(), 10_000);
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        use rand::Rng as _;
        let a = EffContext::new(BTreeSet::new(), Some(7));
        let b = EffContext::new(BTreeSet::new(), Some(7));
        let xa: u64 = a.rng.borrow_mut().r#gen();
        let xb: u64 = b.rng.borrow_mut().r#gen();
        assert_eq!(xa, xb);
    }

    #[test]
    fn recursion_budget_trips_at_the_limit() {
        let ctx = EffContext::default().with_max_recursion_depth(2);
        ctx.enter_call().unwrap();
        ctx.enter_call().unwrap();
        let err = ctx.enter_call().unwrap_err();
        assert_eq!(err.code, ErrorCode::RtRecursionLimit);
        ctx.exit_call();
        ctx.exit_call();
        assert_eq!(ctx.recursion_depth(), 0);
    }
}

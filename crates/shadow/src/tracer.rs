//! # Sandboxed Tracer
//!
//! Runs the candidate in the interpreter under a [`TraceHook`] and turns the
//! way the run ended into a phase result:
//!
//! | Run ended by                    | Result                    |
//! |---------------------------------|---------------------------|
//! | reaching the end of the module  | halts                     |
//! | an uncaught exception           | halts (fault in reason)   |
//! | a bound crossed ([`Abort`])     | does not halt             |
//! | an unmodeled construct          | impossible to determine   |
//!
//! A program that calls the analysis entry point directly is answered
//! before execution: running it would recurse into analysis.

use crate::hook::{Abort, Location, StateDigest, StepHook};
use crate::host::SandboxHost;
use crate::interp::{Interpreter, Interrupt};
use anatomist::ast::{Expr, Module};
use anatomist::imports::ImportTable;
use anatomist::visit::all_exprs;
use anatomist::Program;
use common::{AnalyzerConfig, EntryPoint, PhaseResult, TracerLimits};
use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Stack reserved for the interpreter thread. Candidate recursion maps onto
/// native recursion, so the default thread stack is far too small.
const SANDBOX_STACK_BYTES: usize = 256 * 1024 * 1024;

/// Live calls allowed across all functions, as a multiple of the
/// per-function depth. Catches unbounded mutual recursion that spreads its
/// depth over many functions.
const TOTAL_DEPTH_FACTOR: usize = 4;

/// Bounds one run: per-function call depth, trace length, exact state
/// repetition and wall-clock time.
pub struct TraceHook<'l> {
    limits: &'l TracerLimits,
    depths: HashMap<String, usize>,
    live_calls: usize,
    trace: Vec<StateDigest>,
    seen: HashSet<StateDigest>,
    deadline: Instant,
}

impl<'l> TraceHook<'l> {
    pub fn new(limits: &'l TracerLimits) -> Self {
        Self::with_deadline(limits, Instant::now() + budget(limits))
    }

    /// A hook that stops the run at `deadline` rather than after a budget
    /// of its own.
    pub fn with_deadline(limits: &'l TracerLimits, deadline: Instant) -> Self {
        Self {
            limits,
            depths: HashMap::new(),
            live_calls: 0,
            trace: Vec::new(),
            seen: HashSet::new(),
            deadline,
        }
    }

    fn check_clock(&self) -> Result<(), Abort> {
        if Instant::now() >= self.deadline {
            return Err(Abort::Timeout {
                limit_ms: self.limits.max_execution_ms,
            });
        }
        Ok(())
    }

    /// Fingerprints recorded so far.
    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }
}

impl StepHook for TraceHook<'_> {
    fn on_call(&mut self, function: &str) -> Result<(), Abort> {
        self.check_clock()?;
        let limit = self.limits.max_call_depth;
        let depth = self.depths.get(function).copied().unwrap_or(0);
        if depth >= limit || self.live_calls >= limit.saturating_mul(TOTAL_DEPTH_FACTOR) {
            return Err(Abort::DeepRecursion {
                function: function.to_string(),
                limit,
            });
        }
        self.depths.insert(function.to_string(), depth + 1);
        self.live_calls += 1;
        Ok(())
    }

    fn on_return(&mut self, function: &str) {
        if let Some(depth) = self.depths.get_mut(function) {
            *depth = depth.saturating_sub(1);
        }
        self.live_calls = self.live_calls.saturating_sub(1);
    }

    fn on_line(&mut self, location: &Location, digest: StateDigest) -> Result<(), Abort> {
        self.check_clock()?;
        if self.trace.len() >= self.limits.max_trace_len {
            return Err(Abort::TraceExceeded {
                limit: self.limits.max_trace_len,
            });
        }
        if !self.seen.insert(digest) {
            return Err(Abort::CycleDetected {
                location: location.clone(),
            });
        }
        self.trace.push(digest);
        Ok(())
    }

    fn on_resume(&mut self) -> Result<(), Abort> {
        self.check_clock()
    }
}

fn budget(limits: &TracerLimits) -> Duration {
    Duration::from_millis(limits.max_execution_ms)
}

pub struct SandboxedTracer<'c> {
    config: &'c AnalyzerConfig,
}

impl<'c> SandboxedTracer<'c> {
    pub fn new(config: &'c AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Executes `program` as the file `file_path` of the host's filesystem.
    pub fn run(&self, program: &Program, file_path: &str, host: &mut dyn SandboxHost) -> PhaseResult {
        let module = match program.module() {
            Ok(module) => module,
            Err(err) => {
                return PhaseResult::impossible(format!("Sandbox cannot run unparsable program: {err}"))
            }
        };
        let entry = &self.config.entry_point;
        if calls_entry_point(module, entry) {
            debug!(function = %entry.function, "direct entry-point call; not executing");
            return PhaseResult::does_not_halt(format!(
                "The program calls `{}` directly; executing it would recurse into analysis.",
                entry.function
            ));
        }

        let limits = &self.config.tracer;
        let own = Instant::now() + budget(limits);
        let deadline = host.deadline().map_or(own, |shared| shared.min(own));
        let outcome = thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("shadow-sandbox".to_string())
                .stack_size(SANDBOX_STACK_BYTES)
                .spawn_scoped(scope, move || execute(module, file_path, host, limits, entry, deadline));
            match worker {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| PhaseResult::impossible("Sandbox thread panicked.")),
                Err(err) => PhaseResult::impossible(format!("Could not start sandbox thread: {err}")),
            }
        });
        debug!(signal = ?outcome.signal, reason = %outcome.reason, "tracer finished");
        outcome
    }
}

fn execute(
    module: &Module,
    file_path: &str,
    host: &mut dyn SandboxHost,
    limits: &TracerLimits,
    entry: &EntryPoint,
    deadline: Instant,
) -> PhaseResult {
    let mut hook = TraceHook::with_deadline(limits, deadline);
    let (result, steps) = {
        let mut interp = Interpreter::new(host, &mut hook, limits, entry, file_path);
        let result = interp.run(module);
        (result, interp.steps())
    };
    trace!(steps, fingerprints = hook.trace_len(), "sandbox run ended");
    match result {
        Ok(()) => PhaseResult::halts(format!("Execution completed normally after {steps} steps.")),
        Err(Interrupt::Exception(exc)) if exc.kind == "SystemExit" => {
            PhaseResult::halts("Execution ended with SystemExit.")
        }
        Err(Interrupt::Exception(exc)) => {
            let detail = if exc.message.is_empty() {
                exc.kind.clone()
            } else {
                format!("{}: {}", exc.kind, exc.message)
            };
            PhaseResult::halts(format!("Execution stopped on an uncaught {detail}."))
        }
        Err(Interrupt::Abort(abort)) => PhaseResult::does_not_halt(abort.to_string()),
        Err(Interrupt::Unsupported(what)) => {
            warn!(%what, "sandbox cannot model program");
            PhaseResult::impossible(format!("Sandbox cannot model {what}."))
        }
    }
}

/// Whether some call's callee is the entry point by name or by its
/// qualified `module.function` path.
fn calls_entry_point(module: &Module, entry: &EntryPoint) -> bool {
    let imports = ImportTable::build(module);
    let qualified = format!("{}.{}", entry.module, entry.function);
    all_exprs(&module.body).into_iter().any(|expr| match expr {
        Expr::Call { func, .. } => {
            matches!(func.as_ref(), Expr::Name(id) if *id == entry.function)
                || imports.qualify(func).as_deref() == Some(qualified.as_str())
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::IsolatedHost;
    use common::Signal;

    fn trace_with(src: &str, config: &AnalyzerConfig) -> PhaseResult {
        let program = Program::parse(src);
        let mut host = IsolatedHost::default();
        host.fs.write("/sandbox/candidate.py", src).unwrap();
        SandboxedTracer::new(config).run(&program, "/sandbox/candidate.py", &mut host)
    }

    fn trace(src: &str) -> PhaseResult {
        trace_with(src, &AnalyzerConfig::default())
    }

    #[test]
    fn test_terminating_program_halts() {
        let result = trace("total = 0\nfor i in range(10):\n    total += i\nprint(total)\n");
        assert_eq!(result.signal, Signal::Halts);
        assert!(result.reason.contains("completed normally"));
    }

    #[test]
    fn test_uncaught_fault_counts_as_halting() {
        let result = trace("x = [1, 2]\nprint(x[5])\n");
        assert_eq!(result.signal, Signal::Halts);
        assert!(result.reason.contains("IndexError"));
    }

    #[test]
    fn test_exact_state_repetition_is_a_cycle() {
        let result = trace("x = 1\nwhile x > 0:\n    x = 1\n");
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.starts_with("Cycle detected"));
    }

    #[test]
    fn test_toggling_state_is_a_cycle() {
        let result = trace("flag = True\nwhile True:\n    flag = not flag\n");
        assert_eq!(result.signal, Signal::DoesNotHalt);
    }

    #[test]
    fn test_unbounded_recursion_is_deep() {
        let result = trace("def f(n):\n    return f(n + 1)\nf(0)\n");
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.starts_with("Deep recursion"), "{}", result.reason);
    }

    #[test]
    fn test_growing_state_exceeds_trace() {
        let mut config = AnalyzerConfig::default();
        config.tracer.max_trace_len = 500;
        let result = trace_with("n = 0\nwhile True:\n    n += 1\n", &config);
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert_eq!(result.reason, "Trace exceeded 500 steps");
    }

    #[test]
    fn test_direct_entry_point_call_is_not_executed() {
        let src = "from main import analyze_halting\nprint(analyze_halting('x = 1'))\n";
        let result = trace(src);
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.contains("analyze_halting"));

        let aliased = "import main as m\nm.analyze_halting('pass')\n";
        assert_eq!(trace(aliased).signal, Signal::DoesNotHalt);
    }

    #[test]
    fn test_unmodeled_construct_is_impossible() {
        let result = trace("class A:\n    pass\n");
        assert_eq!(result.signal, Signal::ImpossibleToDetermine);
    }

    #[test]
    fn test_parse_failure_is_impossible() {
        let result = trace("def broken(:\n");
        assert_eq!(result.signal, Signal::ImpossibleToDetermine);
    }

    #[test]
    fn test_system_exit_halts() {
        let result = trace("import sys\nwhile True:\n    sys.exit(1)\n");
        assert_eq!(result.signal, Signal::Halts);
    }

    #[test]
    fn test_mutual_recursion_hits_total_depth() {
        let mut config = AnalyzerConfig::default();
        config.tracer.max_call_depth = 10;
        let src = "def a(n):\n    return b(n + 1)\ndef b(n):\n    return a(n + 1)\na(0)\n";
        let result = trace_with(src, &config);
        assert_eq!(result.signal, Signal::DoesNotHalt);
    }

    #[test]
    fn test_depth_limit_allows_bounded_recursion() {
        let src = "def fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\nprint(fib(12))\n";
        assert_eq!(trace(src).signal, Signal::Halts);
    }

    /// Answers every nested request slowly, optionally under a shared deadline.
    struct SlowHost {
        fs: crate::vfs::VirtualFs,
        delay: Duration,
        calls: usize,
        deadline: Option<Instant>,
    }

    impl SandboxHost for SlowHost {
        fn fs(&mut self) -> &mut crate::vfs::VirtualFs {
            &mut self.fs
        }

        fn analyze(&mut self, _source: &str) -> Result<common::Outcome, crate::host::NestedFailure> {
            self.calls += 1;
            thread::sleep(self.delay);
            Ok(common::Outcome::Halts)
        }

        fn deadline(&self) -> Option<Instant> {
            self.deadline
        }
    }

    #[test]
    fn test_nested_analysis_time_counts_against_budget() {
        let mut config = AnalyzerConfig::default();
        config.tracer.max_execution_ms = 200;
        let src = "entry = getattr(__import__('main'), 'analyze_halting')\n\
                   for i in range(20):\n    entry('x = 1')\n";
        let mut host = SlowHost {
            fs: Default::default(),
            delay: Duration::from_millis(300),
            calls: 0,
            deadline: None,
        };
        let started = Instant::now();
        let result = SandboxedTracer::new(&config).run(&Program::parse(src), "/sandbox/c.py", &mut host);
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.starts_with("Execution exceeded"), "{}", result.reason);
        assert_eq!(host.calls, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_shared_deadline_overrides_fresh_budget() {
        let mut host = SlowHost {
            fs: Default::default(),
            delay: Duration::ZERO,
            calls: 0,
            deadline: Some(Instant::now()),
        };
        let config = AnalyzerConfig::default();
        let result = SandboxedTracer::new(&config).run(&Program::parse("x = 1\n"), "/sandbox/c.py", &mut host);
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.starts_with("Execution exceeded"), "{}", result.reason);
    }

    #[test]
    fn test_hook_counts_depth_per_function() {
        let limits = TracerLimits {
            max_call_depth: 2,
            ..TracerLimits::default()
        };
        let mut hook = TraceHook::new(&limits);
        assert!(hook.on_call("f").is_ok());
        assert!(hook.on_call("g").is_ok());
        assert!(hook.on_call("f").is_ok());
        assert!(matches!(hook.on_call("f"), Err(Abort::DeepRecursion { .. })));
        hook.on_return("f");
        assert!(hook.on_call("f").is_ok());
    }
}

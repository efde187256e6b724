//! # The Shadow: Sandboxed Tracer
//!
//! Executes a candidate program inside an instrumented interpreter for the
//! analyzed Python subset. Nothing the candidate does reaches the real
//! machine: files live in a [`VirtualFs`], the clock is virtual, and calls
//! of the analysis entry point are handed to a [`SandboxHost`].
//!
//! - [`tracer`]: the phase itself and the bounding [`tracer::TraceHook`].
//! - [`interp`]: the tree-walking interpreter.
//! - [`hook`]: the per-step instrumentation contract.
//! - [`host`]: what the interpreter needs from the analysis session.
//! - [`value`], [`ops`], [`builtins`]: runtime values and their semantics.
//! - [`vfs`]: the in-memory filesystem.

pub mod builtins;
pub mod hook;
pub mod host;
pub mod interp;
pub mod ops;
pub mod tracer;
pub mod value;
pub mod vfs;

pub use hook::{Abort, Location, StateDigest, StepHook};
pub use host::{IsolatedHost, NestedFailure, SandboxHost};
pub use interp::{Interpreter, Interrupt};
pub use tracer::{SandboxedTracer, TraceHook};
pub use vfs::{ShadowError, VirtualFs, SANDBOX_ROOT};

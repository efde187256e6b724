//! # Instrumentation Hook
//!
//! The interpreter reports every executed step to a [`StepHook`]: function
//! entry and exit, and one line event per statement carrying the location
//! and a [`StateDigest`] of the machine state. A hook stops the run by
//! returning an [`Abort`].

use std::fmt;

/// Where execution currently is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// Innermost function name, `<module>` at top level.
    pub function: String,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} of `{}`", self.line, self.function)
    }
}

/// BLAKE3 digest of location, frames, bindings and globals at one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateDigest(pub [u8; 32]);

/// Why a run was stopped from outside the candidate's own semantics.
///
/// Every variant reads as "the candidate did not finish".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Abort {
    #[error("Deep recursion: `{function}` exceeded call depth {limit}")]
    DeepRecursion { function: String, limit: usize },
    #[error("Trace exceeded {limit} steps")]
    TraceExceeded { limit: usize },
    #[error("Cycle detected: the state at {location} repeated")]
    CycleDetected { location: Location },
    #[error("Execution exceeded the {limit_ms} ms budget")]
    Timeout { limit_ms: u64 },
    #[error("{0}")]
    NestedCycle(String),
    #[error("Nested analysis depth limit of {0} reached")]
    NestedLimit(usize),
}

pub trait StepHook {
    /// Called before a user function's body runs.
    ///
    /// # Errors
    /// An [`Abort`] stops the run before the call happens.
    fn on_call(&mut self, function: &str) -> Result<(), Abort>;

    /// Called after a user function returns or unwinds.
    fn on_return(&mut self, function: &str);

    /// Called before each statement and loop re-test.
    ///
    /// # Errors
    /// An [`Abort`] stops the run at this step.
    fn on_line(&mut self, location: &Location, digest: StateDigest) -> Result<(), Abort>;

    /// Called when control comes back from work done outside the
    /// interpreter, such as a nested analysis.
    ///
    /// # Errors
    /// An [`Abort`] stops the run before the candidate continues.
    fn on_resume(&mut self) -> Result<(), Abort> {
        Ok(())
    }
}

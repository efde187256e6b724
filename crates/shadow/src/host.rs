//! What a sandboxed run needs from whoever launched it: the session's
//! virtual filesystem, and a way to route calls of the analysis entry point
//! back into the analyzer.

use crate::vfs::VirtualFs;
use common::Outcome;
use std::time::Instant;

/// Why a nested analysis requested by a candidate could not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NestedFailure {
    /// The nested analysis would re-enter one already in progress.
    #[error("{0}")]
    Cycle(String),
    #[error("Nested analysis depth limit of {0} reached")]
    DepthLimit(usize),
    /// The session's time budget ran out before the analysis could start.
    #[error("Nested analysis skipped: the time budget is spent")]
    DeadlineExceeded,
    /// The host cannot run analyses at all.
    #[error("Nested analysis is not available in this sandbox")]
    Unavailable,
}

pub trait SandboxHost: Send {
    fn fs(&mut self) -> &mut VirtualFs;

    /// Analyzes `source` on behalf of the running candidate.
    ///
    /// # Errors
    /// [`NestedFailure`] when the analysis cannot run to a verdict.
    fn analyze(&mut self, source: &str) -> Result<Outcome, NestedFailure>;

    /// Instant by which every run under this host must finish. Nested runs
    /// share it instead of starting a fresh budget.
    fn deadline(&self) -> Option<Instant> {
        None
    }
}

/// A host with a private filesystem and no analyzer behind it.
#[derive(Debug, Default)]
pub struct IsolatedHost {
    pub fs: VirtualFs,
}

impl IsolatedHost {
    pub fn new(fs: VirtualFs) -> Self {
        Self { fs }
    }
}

impl SandboxHost for IsolatedHost {
    fn fs(&mut self) -> &mut VirtualFs {
        &mut self.fs
    }

    fn analyze(&mut self, _source: &str) -> Result<Outcome, NestedFailure> {
        Err(NestedFailure::Unavailable)
    }
}

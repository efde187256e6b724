//! # Recursion Guard
//!
//! The ordered record of analyses in flight within one session. An analysis
//! whose content hash is already on the chain would never finish, so
//! entering it is refused with the full path of the cycle.

use forge::ContentHash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The hash is already being analyzed further up the chain.
    #[error("Mutual recursion detected in analysis chain: {path}")]
    CycleDetected { path: String },
    /// `exit` did not match the most recent `enter`. Always a bug in the
    /// caller, never a property of the analyzed program.
    #[error("Analysis chain is corrupted: mismatched exit of {hash}")]
    Corrupted { hash: String },
}

#[derive(Debug, Default)]
pub struct AnalysisChain {
    entries: Vec<ContentHash>,
}

impl AnalysisChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `hash`.
    ///
    /// # Errors
    /// [`ChainError::CycleDetected`] when `hash` is already on the chain; the
    /// chain is left unchanged.
    pub fn enter(&mut self, hash: ContentHash) -> Result<(), ChainError> {
        if self.entries.contains(&hash) {
            let path = self
                .entries
                .iter()
                .chain(std::iter::once(&hash))
                .map(ContentHash::short)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ChainError::CycleDetected { path });
        }
        self.entries.push(hash);
        Ok(())
    }

    /// Pops `hash`, which must be the last entry.
    ///
    /// # Errors
    /// [`ChainError::Corrupted`] when the chain is empty or ends elsewhere.
    pub fn exit(&mut self, hash: ContentHash) -> Result<(), ChainError> {
        match self.entries.last() {
            Some(last) if *last == hash => {
                self.entries.pop();
                Ok(())
            }
            _ => Err(ChainError::Corrupted { hash: hash.short() }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.entries.contains(hash)
    }

    /// Hashes in flight, outermost first.
    pub fn entries(&self) -> &[ContentHash] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(text: &str) -> ContentHash {
        ContentHash::of(text.as_bytes())
    }

    #[test]
    fn test_enter_exit_pairs() {
        let mut chain = AnalysisChain::new();
        chain.enter(hash("a")).unwrap();
        chain.enter(hash("b")).unwrap();
        assert_eq!(chain.len(), 2);
        chain.exit(hash("b")).unwrap();
        chain.exit(hash("a")).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_reentry_reports_full_path() {
        let mut chain = AnalysisChain::new();
        chain.enter(hash("a")).unwrap();
        chain.enter(hash("b")).unwrap();
        let err = chain.enter(hash("a")).unwrap_err();
        let expected = format!(
            "{} -> {} -> {}",
            hash("a").short(),
            hash("b").short(),
            hash("a").short()
        );
        assert_eq!(err, ChainError::CycleDetected { path: expected.clone() });
        assert_eq!(
            err.to_string(),
            format!("Mutual recursion detected in analysis chain: {expected}")
        );
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_mismatched_exit_is_corruption() {
        let mut chain = AnalysisChain::new();
        chain.enter(hash("a")).unwrap();
        chain.enter(hash("b")).unwrap();
        assert!(matches!(chain.exit(hash("a")), Err(ChainError::Corrupted { .. })));
        assert!(matches!(
            AnalysisChain::new().exit(hash("a")),
            Err(ChainError::Corrupted { .. })
        ));
    }
}

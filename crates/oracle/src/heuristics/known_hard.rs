//! Fuzzy matching against a small library of known-hard programs
//! (busy-beaver and Turing-machine simulators).
//!
//! The similarity threshold comes from configuration and is a tunable, not
//! a semantic constant.

use super::Heuristic;
use anatomist::Module;
use similar::{Algorithm, TextDiff};
use std::time::Duration;

/// Reference snippets.
pub const KNOWN_HARD: &[(&str, &str)] = &[
    (
        "busy beaver",
        "def busy_beaver():\n    tape = [0] * 100\n    state = 0\n    pos = 0\n    while state != 'halt':\n        # Simulate TM\n        pass\n",
    ),
    (
        "turing machine",
        "class TuringMachine:\n    def run(self):\n        while True:\n            # state transitions\n            pass\n",
    ),
];

/// Per-comparison diff budget.
const DIFF_TIMEOUT: Duration = Duration::from_millis(250);

pub struct KnownHardSnippets {
    threshold: f64,
}

impl KnownHardSnippets {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Character-level similarity ratio in `[0, 1]`.
    pub fn similarity(a: &str, b: &str) -> f64 {
        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .timeout(DIFF_TIMEOUT)
            .diff_chars(a, b);
        f64::from(diff.ratio())
    }

    /// Name of the first reference snippet `source` resembles.
    pub fn closest(&self, source: &str) -> Option<&'static str> {
        let source = source.trim();
        KNOWN_HARD
            .iter()
            .find(|(_, snippet)| Self::similarity(source, snippet.trim()) > self.threshold)
            .map(|(name, _)| *name)
    }
}

impl Heuristic for KnownHardSnippets {
    fn name(&self) -> &'static str {
        "known-hard"
    }

    fn apply(&self, source: &str, _module: &Module) -> Option<String> {
        self.closest(source).map(|name| {
            format!(
                "Detected a structure similar to a known undecidable problem ({name})."
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_snippet_matches() {
        let matcher = KnownHardSnippets::new(0.8);
        assert_eq!(matcher.closest(KNOWN_HARD[0].1), Some("busy beaver"));
    }

    #[test]
    fn test_lightly_edited_snippet_matches() {
        let matcher = KnownHardSnippets::new(0.8);
        let edited = KNOWN_HARD[1].1.replace("# state transitions", "# transitions");
        assert_eq!(matcher.closest(&edited), Some("turing machine"));
    }

    #[test]
    fn test_unrelated_program_does_not_match() {
        let matcher = KnownHardSnippets::new(0.8);
        assert_eq!(matcher.closest("x = 0\nwhile x < 10:\n    x = x + 1\n"), None);
    }

    #[test]
    fn test_threshold_is_tunable() {
        let strict = KnownHardSnippets::new(1.0);
        let edited = KNOWN_HARD[1].1.replace("run", "go");
        assert_eq!(strict.closest(&edited), None);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(KnownHardSnippets::similarity("abc", "abc"), 1.0);
        assert_eq!(KnownHardSnippets::similarity("abc", "xyz"), 0.0);
    }
}

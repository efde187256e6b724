//! # The Forge: Structural Identity Engine
//!
//! Computes a deterministic content hash of a candidate program using
//! **alpha-normalization**, so that two programs that differ only in
//! identifier names or documentation hash identically.
//!
//! ## Canonicalization Rule
//! - Functions, classes, parameters and locally bound variables are renamed
//!   per scope, in order of first appearance (`func_0`, `var_1`, `arg_1_0`).
//! - Bare string-literal statements (docstrings) are deleted; a body left
//!   empty becomes `pass`.
//! - Comments never reach the typed tree.
//!
//! The canonical tree is serialized by [`anatomist::unparse`] and digested
//! with BLAKE3. When the program does not parse, the raw source text is
//! hashed instead; that hash loses the renaming guarantee, so hash equality
//! is only ever a heuristic.

mod rename;

use anatomist::{Module, Program};
use std::fmt;
use tracing::{debug, warn};

/// 256-bit BLAKE3 digest of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Digest of arbitrary bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full 64-character lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 12 hex characters, for log lines and chain paths.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// How a [`CanonicalForm`]'s hash was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    /// Hash of the alpha-normalized tree.
    Canonical,
    /// Hash of the raw source text (the program did not parse).
    RawText,
}

/// A program's normalized tree (when it parsed) and its content hash.
#[derive(Debug, Clone)]
pub struct CanonicalForm {
    pub module: Option<Module>,
    pub hash: ContentHash,
    pub fidelity: Fidelity,
}

/// Renames identifiers and strips docstrings. The input is not modified.
pub fn canonicalize(module: &Module) -> Module {
    rename::Renamer::default().module(module)
}

/// Digest of a canonical tree.
pub fn hash_module(module: &Module) -> ContentHash {
    let text = anatomist::unparse::unparse(module);
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"canonical\0");
    hasher.update(text.as_bytes());
    ContentHash(*hasher.finalize().as_bytes())
}

/// Digest of raw source text, used when no tree is available.
pub fn hash_source(source: &str) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"raw\0");
    hasher.update(source.as_bytes());
    ContentHash(*hasher.finalize().as_bytes())
}

/// Canonicalizes and hashes `program`, degrading to a raw-text hash when the
/// program has no tree.
pub fn canonical_form(program: &Program) -> CanonicalForm {
    match program.module() {
        Ok(module) => {
            let canonical = canonicalize(module);
            let hash = hash_module(&canonical);
            debug!(hash = %hash.short(), "canonical form computed");
            CanonicalForm {
                module: Some(canonical),
                hash,
                fidelity: Fidelity::Canonical,
            }
        }
        Err(err) => {
            let hash = hash_source(program.source());
            warn!(error = %err, hash = %hash.short(), "canonicalization failed, hashing raw source");
            CanonicalForm {
                module: None,
                hash,
                fidelity: Fidelity::RawText,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomist::unparse::unparse;
    use proptest::prelude::*;

    fn form(src: &str) -> CanonicalForm {
        canonical_form(&Program::parse(src))
    }

    fn canonical_text(src: &str) -> String {
        unparse(form(src).module.as_ref().unwrap())
    }

    #[test]
    fn test_same_logic_different_names() {
        let h1 = form("def add(a, b):\n    return a + b\n").hash;
        let h2 = form("def total(x, y):\n    return x + y\n").hash;
        assert_eq!(h1, h2, "Identical logic must produce identical hashes");
    }

    #[test]
    fn test_different_operator_differs() {
        let h1 = form("def add(a, b):\n    return a + b\n").hash;
        let h2 = form("def sub(a, b):\n    return a - b\n").hash;
        assert_ne!(h1, h2, "Different operators must produce different hashes");
    }

    #[test]
    fn test_docstring_ignored() {
        let h1 = form("def add(a, b):\n    return a + b\n").hash;
        let h2 = form("def add(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n").hash;
        assert_eq!(h1, h2, "Docstring should not affect the hash");
    }

    #[test]
    fn test_comment_ignored() {
        let h1 = form("x = 1\n").hash;
        let h2 = form("# counter\nx = 1  # start\n").hash;
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_positional_names() {
        let text = canonical_text("def f(a):\n    b = a\n    return b\nc = f(1)\n");
        assert_eq!(
            text,
            "def func_0(arg_1_0):\n    var_1_1 = arg_1_0\n    return var_1_1\nvar_1 = func_0(1)\n"
        );
    }

    #[test]
    fn test_imports_and_builtins_keep_names() {
        let text = canonical_text("import os\nfrom main import analyze_halting\np = os.getcwd()\nprint(len(p))\n");
        assert!(text.contains("import os"));
        assert!(text.contains("analyze_halting"));
        assert!(text.contains("print(len(var_0))"));
    }

    #[test]
    fn test_inner_scope_cannot_capture_outer() {
        let text = canonical_text("x = 1\ndef g():\n    y = 2\n    return x + y\n");
        assert!(text.contains("return var_0 + var_1_0"), "{text}");
    }

    #[test]
    fn test_global_declaration_resolves_to_module() {
        let text = canonical_text("def bump():\n    global n\n    n = n + 1\nn = 0\n");
        assert!(text.contains("global var_1"), "{text}");
        assert!(text.contains("var_1 = var_1 + 1"), "{text}");
    }

    #[test]
    fn test_keyword_arguments_follow_parameters() {
        let h1 = form("def f(n):\n    return n\nf(n=3)\n").hash;
        let h2 = form("def g(k):\n    return k\ng(k=3)\n").hash;
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_class_members_are_renamed_with_their_accesses() {
        let text = canonical_text("class C:\n    def run(self):\n        return self.run\n");
        assert!(text.contains("class class_0:"), "{text}");
        assert!(text.contains("def attr_0(arg_1_0):"), "{text}");
        assert!(text.contains("return arg_1_0.attr_0"), "{text}");
    }

    #[test]
    fn test_method_names_do_not_change_the_hash() {
        let h1 = form(
            "class Counter:\n    def __init__(self):\n        self.count = 0\n    def step(self):\n        self.count += 1\n        return self.count\nc = Counter()\nCounter.step(c)\n",
        )
        .hash;
        let h2 = form(
            "class Tally:\n    def __init__(self):\n        self.total = 0\n    def bump(self):\n        self.total += 1\n        return self.total\nt = Tally()\nTally.bump(t)\n",
        )
        .hash;
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_members_read_through_other_receivers_keep_names() {
        let text = canonical_text(
            "class Reader:\n    def read(self):\n        return 1\n    def __init__(self):\n        pass\nf = open(__file__)\nsrc = f.read()\n",
        );
        assert!(text.contains("def read(arg_1_0):"), "{text}");
        assert!(text.contains("def __init__(arg_1_0):"), "{text}");
        assert!(text.contains("var_1.read()"), "{text}");
    }

    #[test]
    fn test_docstring_only_body_becomes_pass() {
        let text = canonical_text("def f():\n    \"\"\"Nothing.\"\"\"\n");
        assert_eq!(text, "def func_0():\n    pass\n");
    }

    #[test]
    fn test_unparseable_source_falls_back_to_raw_hash() {
        let cf = form("def broken(:\n");
        assert_eq!(cf.fidelity, Fidelity::RawText);
        assert!(cf.module.is_none());
        assert_eq!(cf.hash, hash_source("def broken(:\n"));
    }

    #[test]
    fn test_hex_rendering() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash.short().len(), 12);
        assert_eq!(hash.to_string(), hash.to_hex());
    }

    #[test]
    fn test_determinism() {
        let h1 = form("def foo(x):\n    return x * 2\n").hash;
        let h2 = form("def foo(x):\n    return x * 2\n").hash;
        assert_eq!(h1, h2);
    }

    const RESERVED: &[&str] = &[
        "and", "as", "assert", "def", "del", "elif", "else", "for", "from", "if", "import", "in",
        "is", "not", "or", "pass", "try", "with", "while", "print", "range", "len", "class",
        "return", "yield", "break", "lambda", "global", "raise", "async", "await", "except",
        "finally", "continue", "nonlocal", "match", "case", "type", "exec",
    ];

    fn program_with(names: &[String]) -> String {
        let (f, a, b, t, x) = (&names[0], &names[1], &names[2], &names[3], &names[4]);
        format!(
            "def {f}({a}, {b}):\n    \"\"\"doc\"\"\"\n    {t} = {a} + {b}\n    while {t} > 0:\n        {t} = {t} - 1\n    return {t}\n\n{x} = {f}(3, {b}=4)\nprint({x})\n"
        )
    }

    proptest! {
        #[test]
        fn prop_renaming_preserves_hash(
            names in proptest::collection::hash_set("[a-z][a-z0-9]{0,5}", 5)
                .prop_filter("reserved word", |set| set.iter().all(|n| !RESERVED.contains(&n.as_str())))
        ) {
            let names: Vec<String> = names.into_iter().collect();
            let baseline: Vec<String> = ["f", "a", "b", "t", "x"].iter().map(|s| s.to_string()).collect();
            let expected = form(&program_with(&baseline)).hash;
            prop_assert_eq!(form(&program_with(&names)).hash, expected);
        }
    }
}

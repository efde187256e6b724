//! # Paradox Detector
//!
//! Matches the classic "liar" program: it imports `sys`/`os`, points
//! `sys.path` at a parent directory, imports the analysis entry point, reads
//! its own source, analyzes it, and then does the opposite of the answer
//! (loops forever on `"halts"`, prints a message otherwise).
//!
//! All six elements must be present. The matcher follows bindings rather
//! than spellings, so it runs unchanged on the canonical tree where every
//! local has been renamed.

use anatomist::ast::{CmpOp, Expr, Module, Stmt, StmtKind};
use anatomist::facts::{fold_truth, local_stmts, loop_body_exits};
use anatomist::visit::all_stmts;
use anatomist::ImportTable;
use common::{EntryPoint, PhaseResult};
use std::collections::BTreeSet;
use tracing::debug;

/// One element of the paradox signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Element {
    /// `import sys` and `import os` (any form).
    CapabilityImports,
    /// `sys.path.append(<parent of __file__>)`.
    ParentPath,
    /// Import of the entry-point module.
    EntryImport,
    /// The program's own source read into a variable.
    SelfRead,
    /// The entry point called on that source.
    SelfAnalysis,
    /// `if <result> == "halts":` looping forever, printing otherwise.
    InvertingBranch,
}

const ALL_ELEMENTS: [Element; 6] = [
    Element::CapabilityImports,
    Element::ParentPath,
    Element::EntryImport,
    Element::SelfRead,
    Element::SelfAnalysis,
    Element::InvertingBranch,
];

pub struct ParadoxDetector<'e> {
    entry: &'e EntryPoint,
}

impl<'e> ParadoxDetector<'e> {
    pub fn new(entry: &'e EntryPoint) -> Self {
        Self { entry }
    }

    /// Runs the detector on the canonical tree. A program without a tree is
    /// left to later phases.
    pub fn run(&self, canonical: Option<&Module>) -> PhaseResult {
        let Some(module) = canonical else {
            return PhaseResult::proceed("No syntax tree available.");
        };
        let missing = self.missing(module);
        if missing.is_empty() {
            return PhaseResult::impossible(
                "Matched the self-referential paradox: the program reads its own source, \
                 analyzes it and inverts the verdict.",
            );
        }
        debug!(?missing, "paradox signature incomplete");
        PhaseResult::proceed("No paradox structure found.")
    }

    /// Signature elements absent from `module`. Empty means a full match.
    pub fn missing(&self, module: &Module) -> Vec<Element> {
        let found = Scan::new(module, self.entry).run(module);
        ALL_ELEMENTS
            .into_iter()
            .filter(|e| !found.contains(e))
            .collect()
    }
}

// ----------------------------------------------------------------------
// Binding-tracking scan
// ----------------------------------------------------------------------

const PATH_WRAPPERS: [&str; 3] = ["os.path.abspath", "os.path.realpath", "os.path.normpath"];

struct Scan<'m> {
    imports: ImportTable,
    entry_path: String,
    entry_module: &'m str,
    /// Names bound by `with open(__file__) as f`.
    handles: BTreeSet<&'m str>,
    /// Names holding the program's own text.
    sources: BTreeSet<&'m str>,
    /// Names holding the analyzer's answer about that text.
    results: BTreeSet<&'m str>,
    found: BTreeSet<Element>,
}

impl<'m> Scan<'m> {
    fn new(module: &Module, entry: &'m EntryPoint) -> Self {
        Self {
            imports: ImportTable::build(module),
            entry_path: format!("{}.{}", entry.module, entry.function),
            entry_module: &entry.module,
            handles: BTreeSet::new(),
            sources: BTreeSet::new(),
            results: BTreeSet::new(),
            found: BTreeSet::new(),
        }
    }

    fn run(mut self, module: &'m Module) -> BTreeSet<Element> {
        if self.imports.imports_module("sys") && self.imports.imports_module("os") {
            self.found.insert(Element::CapabilityImports);
        }
        if self.imports.imports_module(self.entry_module) {
            self.found.insert(Element::EntryImport);
        }
        // Pre-order: a `with` header is seen before its body, an assignment
        // before the `if` that tests it.
        for stmt in all_stmts(&module.body) {
            self.statement(stmt);
        }
        self.found
    }

    fn statement(&mut self, stmt: &'m Stmt) {
        match &stmt.kind {
            StmtKind::With { items, .. } => {
                for item in items {
                    if self.is_self_open(&item.context) {
                        if let Some(Expr::Name(handle)) = &item.target {
                            self.handles.insert(handle);
                        }
                    }
                }
            }
            StmtKind::Assign { targets, value } => {
                let bound = targets.iter().filter_map(Expr::as_name);
                if self.is_self_read(value) {
                    self.found.insert(Element::SelfRead);
                    self.sources.extend(bound);
                } else if self.is_self_analysis(value) {
                    self.results.extend(bound);
                }
            }
            StmtKind::Expr(expr) => {
                if self.is_parent_path_adjustment(expr) {
                    self.found.insert(Element::ParentPath);
                }
            }
            StmtKind::If { test, body, orelse } => {
                if self.is_inverting(test, body, orelse) {
                    self.found.insert(Element::InvertingBranch);
                }
            }
            _ => {}
        }
    }

    /// `__file__`, possibly wrapped in `abspath`/`realpath`/`normpath`.
    fn is_self_path(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Name(id) => id == "__file__",
            Expr::Call { args, .. } if args.len() == 1 => {
                PATH_WRAPPERS.iter().any(|w| self.imports.is_call_to(expr, w))
                    && self.is_self_path(&args[0])
            }
            _ => false,
        }
    }

    /// `open(__file__[, mode])`.
    fn is_self_open(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Call { args, .. } => {
                (self.imports.is_call_to(expr, "open") || self.imports.is_call_to(expr, "io.open"))
                    && args.first().is_some_and(|a| self.is_self_path(a))
            }
            _ => false,
        }
    }

    /// `f.read()` on a self-opened handle, or `open(__file__).read()`.
    fn is_self_read(&self, expr: &Expr) -> bool {
        let Expr::Call { func, args, .. } = expr else {
            return false;
        };
        let Expr::Attribute { value, attr } = func.as_ref() else {
            return false;
        };
        if attr != "read" || !args.is_empty() {
            return false;
        }
        match value.as_ref() {
            Expr::Name(handle) => self.handles.contains(handle.as_str()),
            other => self.is_self_open(other),
        }
    }

    fn is_self_text(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Name(id) => self.sources.contains(id.as_str()),
            other => self.is_self_read(other),
        }
    }

    /// `analyze_halting(<own source>)`.
    fn is_self_analysis(&mut self, expr: &Expr) -> bool {
        let Expr::Call { args, .. } = expr else {
            return false;
        };
        let hit = self.imports.is_call_to(expr, &self.entry_path)
            && args.first().is_some_and(|a| self.is_self_text(a));
        if hit {
            self.found.insert(Element::SelfRead);
            self.found.insert(Element::SelfAnalysis);
        }
        hit
    }

    /// How many directory levels above the program's own file `expr` names.
    fn parent_depth(&self, expr: &Expr) -> Option<usize> {
        if self.is_self_path(expr) {
            return Some(0);
        }
        let Expr::Call { args, .. } = expr else {
            return None;
        };
        if self.imports.is_call_to(expr, "os.path.dirname") && args.len() == 1 {
            return self.parent_depth(&args[0]).map(|d| d + 1);
        }
        if PATH_WRAPPERS.iter().any(|w| self.imports.is_call_to(expr, w)) && args.len() == 1 {
            return self.parent_depth(&args[0]);
        }
        if self.imports.is_call_to(expr, "os.path.join") {
            let base = self.parent_depth(args.first()?)?;
            let ups = args[1..]
                .iter()
                .filter(|a| a.as_str_literal() == Some(".."))
                .count();
            return Some(base + ups);
        }
        None
    }

    /// `sys.path.append(p)` or `sys.path.insert(i, p)` where `p` is above
    /// the program's own directory.
    fn is_parent_path_adjustment(&self, expr: &Expr) -> bool {
        let Expr::Call { args, .. } = expr else {
            return false;
        };
        let target = if self.imports.is_call_to(expr, "sys.path.append") {
            args.first()
        } else if self.imports.is_call_to(expr, "sys.path.insert") {
            args.get(1)
        } else {
            None
        };
        target
            .and_then(|t| self.parent_depth(t))
            .is_some_and(|depth| depth >= 2)
    }

    /// `if R == "halts": <loop forever> else: print("...")`, in either
    /// operand order, or the `!=` form with the branches swapped.
    fn is_inverting(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> bool {
        let Expr::Compare {
            left,
            ops,
            comparators,
        } = test
        else {
            return false;
        };
        let ([op], [right]) = (ops.as_slice(), comparators.as_slice()) else {
            return false;
        };
        let subject = match (left.as_str_literal(), right.as_str_literal()) {
            (Some("halts"), _) => right,
            (_, Some("halts")) => left.as_ref(),
            _ => return false,
        };
        let is_result = match subject {
            Expr::Name(id) => self.results.contains(id.as_str()),
            other => self.is_self_analysis(other),
        };
        if !is_result {
            return false;
        }
        let (on_halts, otherwise) = match op {
            CmpOp::Eq => (body, orelse),
            CmpOp::NotEq => (orelse, body),
            _ => return false,
        };
        loops_forever(on_halts) && prints_literal(otherwise)
    }
}

/// Contains a `while <truthy literal>` with no way out.
fn loops_forever(body: &[Stmt]) -> bool {
    local_stmts(body).into_iter().any(|s| match &s.kind {
        StmtKind::While { test, body, .. } => {
            fold_truth(test) == Some(true) && !loop_body_exits(body)
        }
        _ => false,
    })
}

/// Contains `print("<literal>")`.
fn prints_literal(body: &[Stmt]) -> bool {
    local_stmts(body).into_iter().any(|s| match &s.kind {
        StmtKind::Expr(call @ Expr::Call { args, .. }) => {
            call.is_call_to("print")
                && !args.is_empty()
                && args.iter().all(|a| a.as_str_literal().is_some())
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomist::Program;
    use common::Signal;

    const PARADOX: &str = r#"import sys
import os
sys.path.append(os.path.dirname(os.path.dirname(__file__)))

from main import analyze_halting

with open(__file__, 'r') as f:
    source = f.read()

result = analyze_halting(source)

if result == "halts":
    while True:
        pass
else:
    print("I halt!")
"#;

    fn missing(src: &str) -> Vec<Element> {
        let program = Program::parse(src);
        ParadoxDetector::new(&EntryPoint::default()).missing(program.module().unwrap())
    }

    #[test]
    fn test_detects_classic_paradox() {
        assert!(missing(PARADOX).is_empty());
    }

    #[test]
    fn test_detects_on_canonical_tree() {
        let program = Program::parse(PARADOX);
        let canonical = forge::canonical_form(&program).module.unwrap();
        let result = ParadoxDetector::new(&EntryPoint::default()).run(Some(&canonical));
        assert_eq!(result.signal, Signal::ImpossibleToDetermine);
    }

    #[test]
    fn test_renamed_locals_still_match() {
        let src = PARADOX
            .replace("source", "txt")
            .replace("result", "answer")
            .replace(" f:", " handle:")
            .replace("f.read", "handle.read");
        assert!(missing(&src).is_empty());
    }

    #[test]
    fn test_reversed_comparison_and_inline_read() {
        let src = r#"import os, sys
sys.path.insert(0, os.path.join(os.path.dirname(__file__), '..'))
from main import analyze_halting as judge
verdict = judge(open(__file__).read())
if "halts" == verdict:
    while 1:
        x = 1
else:
    print("done")
"#;
        assert_eq!(missing(src), Vec::<Element>::new());
    }

    #[test]
    fn test_missing_inversion_is_not_paradox() {
        let src = PARADOX.replace("while True:\n        pass", "print(\"loop\")");
        assert_eq!(missing(&src), vec![Element::InvertingBranch]);
    }

    #[test]
    fn test_loop_with_break_does_not_count() {
        let src = PARADOX.replace("        pass", "        break");
        assert!(missing(&src).contains(&Element::InvertingBranch));
    }

    #[test]
    fn test_same_directory_path_is_not_parent() {
        let src = PARADOX.replace(
            "os.path.dirname(os.path.dirname(__file__))",
            "os.path.dirname(__file__)",
        );
        assert_eq!(missing(&src), vec![Element::ParentPath]);
    }

    #[test]
    fn test_analyzing_other_text_is_not_self_analysis() {
        let src = PARADOX.replace("analyze_halting(source)", "analyze_halting('x = 1')");
        let gaps = missing(&src);
        assert!(gaps.contains(&Element::SelfAnalysis));
        assert!(gaps.contains(&Element::InvertingBranch));
    }

    #[test]
    fn test_plain_program_continues() {
        let program = Program::parse("x = 1\nprint(x)\n");
        let result = ParadoxDetector::new(&EntryPoint::default()).run(program.module().ok());
        assert_eq!(result.signal, Signal::Continue);
    }

    #[test]
    fn test_no_tree_continues() {
        let result = ParadoxDetector::new(&EntryPoint::default()).run(None);
        assert_eq!(result.signal, Signal::Continue);
    }
}

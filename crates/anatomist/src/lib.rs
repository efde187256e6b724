//! # The Anatomist: Python Front End
//!
//! **Role**: Turns candidate source text into the typed tree every analysis
//! phase reads.
//!
//! **Core Types**:
//! - [`ParserHost`]: tree-sitter parser with the Python grammar, lowering CSTs to [`ast::Module`].
//! - [`Program`]: immutable source text plus its parse result, built once per analysis call.
//! - [`graph::CallGraph`]: function → direct callees, with cycle queries.
//! - [`visit::Visitor`]: per-node-kind dispatch for structural matchers.
//! - [`ImportTable`]: import bindings, so matchers see through `from os import path`.
//! - [`facts`]: write sets, loop exits and constant folding shared by the static phases.
//!
//! **Design**:
//! - A parse failure is stored inside the `Program` instead of being returned, so each
//!   phase decides locally how to degrade.
//! - [`unparse::unparse`] gives a deterministic serialization for hashing.

pub mod ast;
pub mod facts;
pub mod graph;
pub mod imports;
pub mod parser;
pub mod unparse;
pub mod visit;

pub use ast::{Expr, Module, Stmt, StmtKind};
pub use graph::CallGraph;
pub use imports::ImportTable;
pub use parser::ParserHost;

/// Errors produced while turning source text into a [`Module`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The tree-sitter parser could not be set up or produced no tree.
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// The source is not valid Python.
    #[error("Syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },

    /// The CST lacked a node the grammar guarantees.
    #[error("Malformed syntax tree at line {line}: {detail}")]
    Malformed { line: usize, detail: String },
}

/// Source text plus its (possibly failed) parse. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    module: Result<Module, ParseError>,
}

impl Program {
    /// Parses `source` with a fresh [`ParserHost`].
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let module = ParserHost::new().and_then(|mut host| host.parse(&source));
        Self { source, module }
    }

    /// Parses `source` reusing an existing host.
    pub fn parse_with(host: &mut ParserHost, source: impl Into<String>) -> Self {
        let source = source.into();
        let module = host.parse(&source);
        Self { source, module }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed tree, or the fault that prevented it.
    pub fn module(&self) -> Result<&Module, &ParseError> {
        self.module.as_ref()
    }

    pub fn is_parsed(&self) -> bool {
        self.module.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_keeps_source_and_tree() {
        let program = Program::parse("x = 1\n");
        assert_eq!(program.source(), "x = 1\n");
        assert_eq!(program.module().unwrap().body.len(), 1);
    }

    #[test]
    fn test_program_carries_parse_fault() {
        let program = Program::parse("while True print(1)\n");
        assert!(!program.is_parsed());
        assert!(matches!(program.module(), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::Syntax { line: 3, column: 7 };
        assert_eq!(err.to_string(), "Syntax error at line 3, column 7");
    }

    #[test]
    fn test_empty_source_parses() {
        let program = Program::parse("");
        assert!(program.module().unwrap().body.is_empty());
    }
}

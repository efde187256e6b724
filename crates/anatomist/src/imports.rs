//! # Import Bindings
//!
//! Resolves the names a module binds through `import` statements to the
//! dotted paths they stand for, so matchers can recognise `os.path.dirname`
//! whether the program wrote `os.path.dirname`, `path.dirname` after
//! `from os import path`, or `d` after `from os.path import dirname as d`.
//!
//! Imports are collected from every scope of the module. Names that no
//! import binds resolve to themselves.

use crate::ast::{Expr, Module, StmtKind};
use crate::visit::all_stmts;
use std::collections::HashMap;

/// Import statement metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportInfo {
    /// The imported module (e.g. `"os.path"`).
    pub module: String,
    /// Names pulled from the module with `from ... import`. Empty for bare imports.
    pub names: Vec<String>,
    /// Line number (1-indexed).
    pub line: u32,
}

/// Bound name → dotted path it refers to.
#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    bindings: HashMap<String, String>,
    imports: Vec<ImportInfo>,
}

impl ImportTable {
    pub fn build(module: &Module) -> Self {
        let mut table = ImportTable::default();
        for stmt in all_stmts(&module.body) {
            match &stmt.kind {
                StmtKind::Import(aliases) => {
                    for alias in aliases {
                        // `import os.path` binds `os`; `import os.path as p` binds `p` to `os.path`.
                        let target = match &alias.asname {
                            Some(_) => alias.name.clone(),
                            None => alias.bound_name().to_string(),
                        };
                        table.bindings.insert(alias.bound_name().to_string(), target);
                        table.imports.push(ImportInfo {
                            module: alias.name.clone(),
                            names: Vec::new(),
                            line: stmt.line,
                        });
                    }
                }
                StmtKind::ImportFrom { module, names } => {
                    for alias in names {
                        table
                            .bindings
                            .insert(alias.bound_name().to_string(), format!("{module}.{}", alias.name));
                    }
                    table.imports.push(ImportInfo {
                        module: module.clone(),
                        names: names.iter().map(|a| a.name.clone()).collect(),
                        line: stmt.line,
                    });
                }
                _ => {}
            }
        }
        table
    }

    /// Every import statement seen, in source order.
    pub fn imports(&self) -> &[ImportInfo] {
        &self.imports
    }

    /// `true` when some import brings in `module` or one of its submodules.
    pub fn imports_module(&self, module: &str) -> bool {
        self.imports.iter().any(|i| {
            i.module == module
                || i.module.starts_with(&format!("{module}."))
                || (module.contains('.')
                    && i.names.iter().any(|n| format!("{}.{n}", i.module) == module))
        })
    }

    /// Names bound to exactly `path`.
    pub fn names_for<'s>(&'s self, path: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.bindings
            .iter()
            .filter(move |(_, target)| target.as_str() == path)
            .map(|(name, _)| name.as_str())
    }

    /// Dotted path of a `Name`/`Attribute` chain with its first segment
    /// resolved through the import bindings.
    pub fn qualify(&self, expr: &Expr) -> Option<String> {
        let dotted = expr.dotted_path()?;
        let (head, rest) = match dotted.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (dotted.as_str(), None),
        };
        let base = self.bindings.get(head).map(String::as_str).unwrap_or(head);
        Some(match rest {
            Some(rest) => format!("{base}.{rest}"),
            None => base.to_string(),
        })
    }

    /// `true` when `expr` is a call whose callee resolves to `path`.
    pub fn is_call_to(&self, expr: &Expr, path: &str) -> bool {
        match expr {
            Expr::Call { func, .. } => self.qualify(func).as_deref() == Some(path),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParserHost;

    fn table(src: &str) -> (Module, ImportTable) {
        let module = ParserHost::new().unwrap().parse(src).unwrap();
        let table = ImportTable::build(&module);
        (module, table)
    }

    fn first_call(module: &Module) -> &Expr {
        match &module.body.last().unwrap().kind {
            StmtKind::Expr(e) => e,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_plain_import_resolves_to_itself() {
        let (m, t) = table("import os\nos.path.dirname(x)\n");
        assert!(t.is_call_to(first_call(&m), "os.path.dirname"));
    }

    #[test]
    fn test_from_import_alias() {
        let (m, t) = table("from os.path import dirname as d\nd(x)\n");
        assert!(t.is_call_to(first_call(&m), "os.path.dirname"));
    }

    #[test]
    fn test_module_alias() {
        let (m, t) = table("import os.path as p\np.dirname(x)\n");
        assert!(t.is_call_to(first_call(&m), "os.path.dirname"));
        assert!(t.imports_module("os"));
    }

    #[test]
    fn test_entry_point_names() {
        let (_, t) = table("from main import analyze_halting as judge\n");
        let names: Vec<&str> = t.names_for("main.analyze_halting").collect();
        assert_eq!(names, vec!["judge"]);
        assert!(t.imports_module("main"));
        assert!(t.imports_module("main.analyze_halting"));
    }

    #[test]
    fn test_unbound_names_unchanged() {
        let (m, t) = table("open(__file__)\n");
        assert!(t.is_call_to(first_call(&m), "open"));
        assert_eq!(t.imports().len(), 0);
    }

    #[test]
    fn test_import_lines_recorded() {
        let (_, t) = table("import sys\n\nfrom os import path\n");
        let lines: Vec<u32> = t.imports().iter().map(|i| i.line).collect();
        assert_eq!(lines, vec![1, 3]);
    }
}

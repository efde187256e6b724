//! # Call Graph Builder
//!
//! One node per function name; an edge `f -> g` for every direct call
//! `g(...)` lexically inside `f` (nested function bodies belong to their own
//! node). Method-style calls (`obj.g()`) are not resolved.
//!
//! Built once per Static Preparation run and dropped afterwards.

use crate::ast::{Expr, Module, Stmt, StmtKind};
use crate::visit::{all_stmts, walk_expr, walk_stmt, Visitor};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Statistics about the call graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub function_count: usize,
    pub edge_count: usize,
}

pub struct CallGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    defined: BTreeSet<String>,
}

/// Collects direct callee names without entering nested definitions.
struct DirectCalls<'a> {
    names: Vec<&'a str>,
}

impl<'a> Visitor<'a> for DirectCalls<'a> {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        if let StmtKind::FunctionDef(def) = &stmt.kind {
            // Defaults are evaluated in the enclosing scope.
            for p in &def.params {
                if let Some(d) = &p.default {
                    self.visit_expr(d);
                }
            }
            return;
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        if let Some(callee) = expr.call_target() {
            self.names.push(callee);
        }
        walk_expr(self, expr);
    }
}

impl CallGraph {
    /// Builds the graph for every function defined anywhere in `module`.
    pub fn build(module: &Module) -> Self {
        let mut cg = CallGraph {
            graph: DiGraph::new(),
            index: HashMap::new(),
            defined: BTreeSet::new(),
        };

        for stmt in all_stmts(&module.body) {
            if let StmtKind::FunctionDef(def) = &stmt.kind {
                cg.defined.insert(def.name.clone());
                let caller = cg.node(&def.name);
                let mut calls = DirectCalls { names: Vec::new() };
                for s in &def.body {
                    calls.visit_stmt(s);
                }
                for callee in calls.names {
                    let target = cg.node(callee);
                    cg.graph.update_edge(caller, target, ());
                }
            }
        }
        cg
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Names `name` calls directly.
    pub fn callees(&self, name: &str) -> BTreeSet<&str> {
        match self.index.get(name) {
            Some(idx) => self
                .graph
                .neighbors(*idx)
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Functions defined in the module, sorted.
    pub fn defined_functions(&self) -> impl Iterator<Item = &str> {
        self.defined.iter().map(String::as_str)
    }

    /// `true` when `name` can reach itself through one or more calls.
    ///
    /// Depth-first search with an explicit stack; the visited set bounds the
    /// walk by the number of nodes.
    pub fn reaches_itself(&self, name: &str) -> bool {
        let Some(&start) = self.index.get(name) else {
            return false;
        };
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = self.graph.neighbors(start).collect();
        while let Some(current) = stack.pop() {
            if current == start {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.graph.neighbors(current));
            }
        }
        false
    }

    /// Defined functions that lie on a call cycle, sorted.
    pub fn recursive_functions(&self) -> Vec<String> {
        self.defined
            .iter()
            .filter(|f| self.reaches_itself(f))
            .cloned()
            .collect()
    }

    pub fn has_cycle(&self) -> bool {
        self.defined.iter().any(|f| self.reaches_itself(f))
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            function_count: self.defined.len(),
            edge_count: self.graph.edge_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParserHost;

    fn graph(src: &str) -> CallGraph {
        CallGraph::build(&ParserHost::new().unwrap().parse(src).unwrap())
    }

    #[test]
    fn test_direct_recursion() {
        let cg = graph("def fact(n):\n    return 1 if n == 0 else n * fact(n - 1)\n");
        assert_eq!(cg.recursive_functions(), vec!["fact".to_string()]);
    }

    #[test]
    fn test_mutual_recursion() {
        let src = "def even(n):\n    return True if n == 0 else odd(n - 1)\n\
                   def odd(n):\n    return False if n == 0 else even(n - 1)\n";
        let cg = graph(src);
        assert!(cg.has_cycle());
        assert_eq!(cg.recursive_functions(), vec!["even".to_string(), "odd".to_string()]);
    }

    #[test]
    fn test_no_cycle() {
        let cg = graph("def a():\n    return b()\ndef b():\n    return len([])\n");
        assert!(!cg.has_cycle());
        assert!(cg.callees("a").contains("b"));
        assert_eq!(cg.stats().function_count, 2);
    }

    #[test]
    fn test_method_calls_do_not_create_cycles() {
        let cg = graph("def read(f):\n    return f.read()\n");
        assert!(!cg.has_cycle());
    }

    #[test]
    fn test_nested_definition_owns_its_calls() {
        let src = "def outer():\n    def inner():\n        return inner()\n    return 1\n";
        let cg = graph(src);
        assert_eq!(cg.recursive_functions(), vec!["inner".to_string()]);
    }
}

//! Tree-sitter based Python front end.
//!
//! `ParserHost` owns one tree-sitter parser with the Python grammar loaded and
//! lowers each concrete syntax tree into the typed [`crate::ast`] tree. Any
//! `ERROR`/`MISSING` node in the CST is reported as [`ParseError::Syntax`]
//! with the position of the first offending node.

use tree_sitter::{Node, Parser};

use crate::ast::*;
use crate::ParseError;

/// Extras that appear as named children but carry no syntax.
const TRIVIA: &[&str] = &["comment", "line_continuation"];

pub struct ParserHost {
    parser: Parser,
}

impl ParserHost {
    /// Creates a new parser host with the Python grammar loaded.
    ///
    /// # Errors
    /// Returns `ParseError::ParseFailure` if the tree-sitter parser fails to
    /// initialize with the Python language.
    pub fn new() -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| ParseError::ParseFailure(format!("Failed to load Python grammar: {}", e)))?;
        Ok(Self { parser })
    }

    /// Parses `source` and lowers it into a [`Module`].
    ///
    /// # Errors
    /// - `ParseFailure` if tree-sitter produced no tree.
    /// - `Syntax` if the CST contains an error or missing node.
    /// - `Malformed` if a node lacks a field the grammar guarantees.
    pub fn parse(&mut self, source: &str) -> Result<Module, ParseError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ParseError::ParseFailure("tree-sitter returned no tree".to_string()))?;
        let root = tree.root_node();
        if root.has_error() {
            let (line, column) = first_error(root)
                .map(|n| (n.start_position().row + 1, n.start_position().column + 1))
                .unwrap_or((1, 1));
            return Err(ParseError::Syntax { line, column });
        }
        let lowerer = Lowerer {
            src: source.as_bytes(),
        };
        let body = lowerer.block(root)?;
        Ok(Module { body })
    }
}

/// First `ERROR` or `MISSING` node in document order (explicit-stack DFS).
fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    None
}

fn line_of(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

fn named<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| !TRIVIA.contains(&c.kind()))
        .collect()
}

fn all<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn fields<'t>(node: Node<'t>, name: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(name, &mut cursor).collect()
}

/// Stateless CST → AST lowering over one source buffer.
struct Lowerer<'s> {
    src: &'s [u8],
}

impl<'s> Lowerer<'s> {
    fn text(&self, node: Node<'_>) -> Result<&'s str, ParseError> {
        node.utf8_text(self.src).map_err(|_| ParseError::Malformed {
            line: line_of(node) as usize,
            detail: "invalid UTF-8".to_string(),
        })
    }

    fn field<'t>(&self, node: Node<'t>, name: &str) -> Result<Node<'t>, ParseError> {
        node.child_by_field_name(name)
            .ok_or_else(|| ParseError::Malformed {
                line: line_of(node) as usize,
                detail: format!("`{}` without `{}`", node.kind(), name),
            })
    }

    fn first_named<'t>(&self, node: Node<'t>) -> Result<Node<'t>, ParseError> {
        named(node)
            .into_iter()
            .next()
            .ok_or_else(|| ParseError::Malformed {
                line: line_of(node) as usize,
                detail: format!("empty `{}`", node.kind()),
            })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&self, node: Node<'_>) -> Result<Vec<Stmt>, ParseError> {
        named(node).into_iter().map(|c| self.stmt(c)).collect()
    }

    fn opt_else(&self, node: Option<Node<'_>>) -> Result<Vec<Stmt>, ParseError> {
        match node {
            Some(clause) => self.block(self.field(clause, "body")?),
            None => Ok(Vec::new()),
        }
    }

    fn stmt(&self, node: Node<'_>) -> Result<Stmt, ParseError> {
        let line = line_of(node);
        let kind = match node.kind() {
            "expression_statement" => return self.expression_statement(node),
            "if_statement" => self.if_statement(node)?,
            "while_statement" => StmtKind::While {
                test: self.expr(self.field(node, "condition")?)?,
                body: self.block(self.field(node, "body")?)?,
                orelse: self.opt_else(node.child_by_field_name("alternative"))?,
            },
            "for_statement" => StmtKind::For {
                target: self.expr(self.field(node, "left")?)?,
                iter: self.expr(self.field(node, "right")?)?,
                body: self.block(self.field(node, "body")?)?,
                orelse: self.opt_else(node.child_by_field_name("alternative"))?,
            },
            "function_definition" => StmtKind::FunctionDef(self.function(node)?),
            "class_definition" => StmtKind::ClassDef(ClassDef {
                name: self.text(self.field(node, "name")?)?.to_string(),
                bases: match node.child_by_field_name("superclasses") {
                    Some(args) => named(args)
                        .into_iter()
                        .filter(|a| a.kind() != "keyword_argument")
                        .map(|a| self.expr(a))
                        .collect::<Result<_, _>>()?,
                    None => Vec::new(),
                },
                body: self.block(self.field(node, "body")?)?,
            }),
            "decorated_definition" => return self.stmt(self.field(node, "definition")?),
            "return_statement" => StmtKind::Return(self.opt_first_expr(node)?),
            "raise_statement" => StmtKind::Raise(self.opt_first_expr(node)?),
            "pass_statement" => StmtKind::Pass,
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "import_statement" => StmtKind::Import(
                fields(node, "name")
                    .into_iter()
                    .map(|n| self.alias(n))
                    .collect::<Result<_, _>>()?,
            ),
            "import_from_statement" => {
                let module = self.text(self.field(node, "module_name")?)?.to_string();
                let mut names: Vec<Alias> = fields(node, "name")
                    .into_iter()
                    .map(|n| self.alias(n))
                    .collect::<Result<_, _>>()?;
                if named(node).iter().any(|c| c.kind() == "wildcard_import") {
                    names.push(Alias {
                        name: "*".to_string(),
                        asname: None,
                    });
                }
                StmtKind::ImportFrom { module, names }
            }
            "future_import_statement" => StmtKind::Pass,
            "with_statement" => self.with_statement(node)?,
            "try_statement" => self.try_statement(node)?,
            "global_statement" => StmtKind::Global(self.identifiers(node)?),
            "nonlocal_statement" => StmtKind::Nonlocal(self.identifiers(node)?),
            "assert_statement" => {
                let parts = named(node);
                let test = match parts.first() {
                    Some(t) => self.expr(*t)?,
                    None => return Err(self.malformed(node, "assert without test")),
                };
                let msg = parts.get(1).map(|m| self.expr(*m)).transpose()?;
                StmtKind::Assert { test, msg }
            }
            "delete_statement" => {
                let target = self.expr(self.first_named(node)?)?;
                StmtKind::Delete(match target {
                    Expr::Tuple(items) => items,
                    other => vec![other],
                })
            }
            other => StmtKind::Unsupported(other.to_string()),
        };
        Ok(Stmt::new(line, kind))
    }

    fn malformed(&self, node: Node<'_>, detail: &str) -> ParseError {
        ParseError::Malformed {
            line: line_of(node) as usize,
            detail: detail.to_string(),
        }
    }

    fn opt_first_expr(&self, node: Node<'_>) -> Result<Option<Expr>, ParseError> {
        named(node).into_iter().next().map(|n| self.expr(n)).transpose()
    }

    fn identifiers(&self, node: Node<'_>) -> Result<Vec<String>, ParseError> {
        named(node)
            .into_iter()
            .map(|n| self.text(n).map(str::to_string))
            .collect()
    }

    fn alias(&self, node: Node<'_>) -> Result<Alias, ParseError> {
        if node.kind() == "aliased_import" {
            Ok(Alias {
                name: self.text(self.field(node, "name")?)?.to_string(),
                asname: Some(self.text(self.field(node, "alias")?)?.to_string()),
            })
        } else {
            Ok(Alias {
                name: self.text(node)?.to_string(),
                asname: None,
            })
        }
    }

    fn expression_statement(&self, node: Node<'_>) -> Result<Stmt, ParseError> {
        let line = line_of(node);
        let parts = named(node);
        if let [single] = parts.as_slice() {
            match single.kind() {
                "assignment" => return self.assignment(*single, line),
                "augmented_assignment" => {
                    let token = self.field(*single, "operator")?.kind();
                    let op = BinOp::from_token(token)
                        .ok_or_else(|| self.malformed(*single, "unknown augmented operator"))?;
                    return Ok(Stmt::new(
                        line,
                        StmtKind::AugAssign {
                            target: self.expr(self.field(*single, "left")?)?,
                            op,
                            value: self.expr(self.field(*single, "right")?)?,
                        },
                    ));
                }
                _ => return Ok(Stmt::new(line, StmtKind::Expr(self.expr(*single)?))),
            }
        }
        let items = parts
            .into_iter()
            .map(|p| self.expr(p))
            .collect::<Result<_, _>>()?;
        Ok(Stmt::new(line, StmtKind::Expr(Expr::Tuple(items))))
    }

    fn assignment(&self, node: Node<'_>, line: u32) -> Result<Stmt, ParseError> {
        let mut targets = Vec::new();
        let mut current = node;
        loop {
            targets.push(self.expr(self.field(current, "left")?)?);
            match current.child_by_field_name("right") {
                Some(right) if right.kind() == "assignment" => current = right,
                Some(right) => {
                    let value = self.expr(right)?;
                    return Ok(Stmt::new(line, StmtKind::Assign { targets, value }));
                }
                // Bare annotation (`x: int`) binds nothing.
                None => return Ok(Stmt::new(line, StmtKind::Pass)),
            }
        }
    }

    fn if_statement(&self, node: Node<'_>) -> Result<StmtKind, ParseError> {
        let test = self.expr(self.field(node, "condition")?)?;
        let body = self.block(self.field(node, "consequence")?)?;

        let mut orelse = Vec::new();
        for clause in fields(node, "alternative").into_iter().rev() {
            if clause.kind() == "else_clause" {
                orelse = self.block(self.field(clause, "body")?)?;
            } else {
                let nested = StmtKind::If {
                    test: self.expr(self.field(clause, "condition")?)?,
                    body: self.block(self.field(clause, "consequence")?)?,
                    orelse,
                };
                orelse = vec![Stmt::new(line_of(clause), nested)];
            }
        }
        Ok(StmtKind::If { test, body, orelse })
    }

    fn function(&self, node: Node<'_>) -> Result<FunctionDef, ParseError> {
        Ok(FunctionDef {
            name: self.text(self.field(node, "name")?)?.to_string(),
            params: self.params(node.child_by_field_name("parameters"))?,
            body: self.block(self.field(node, "body")?)?,
            is_async: all(node).iter().any(|c| c.kind() == "async"),
        })
    }

    fn params(&self, node: Option<Node<'_>>) -> Result<Vec<Param>, ParseError> {
        let Some(node) = node else {
            return Ok(Vec::new());
        };
        let mut params = Vec::new();
        for p in named(node) {
            let param = match p.kind() {
                "identifier" => Param::positional(self.text(p)?),
                "default_parameter" | "typed_default_parameter" => Param {
                    name: self.text(self.field(p, "name")?)?.to_string(),
                    default: Some(self.expr(self.field(p, "value")?)?),
                    kind: ParamKind::Positional,
                },
                "typed_parameter" => {
                    let inner = self.first_named(p)?;
                    self.splat_param(inner)?
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => self.splat_param(p)?,
                _ => continue,
            };
            params.push(param);
        }
        Ok(params)
    }

    fn splat_param(&self, node: Node<'_>) -> Result<Param, ParseError> {
        let kind = match node.kind() {
            "list_splat_pattern" => ParamKind::VarArgs,
            "dictionary_splat_pattern" => ParamKind::KwArgs,
            _ => return Ok(Param::positional(self.text(node)?)),
        };
        Ok(Param {
            name: self.text(self.first_named(node)?)?.to_string(),
            default: None,
            kind,
        })
    }

    fn with_statement(&self, node: Node<'_>) -> Result<StmtKind, ParseError> {
        let mut items = Vec::new();
        for clause in named(node).into_iter().filter(|c| c.kind() == "with_clause") {
            for item in named(clause) {
                let value = self.field(item, "value")?;
                if value.kind() == "as_pattern" {
                    let context = self.expr(self.first_named(value)?)?;
                    let target = match value.child_by_field_name("alias") {
                        Some(alias) if alias.kind() == "as_pattern_target" => {
                            Some(self.expr(self.first_named(alias)?)?)
                        }
                        Some(alias) => Some(self.expr(alias)?),
                        None => None,
                    };
                    items.push(WithItem { context, target });
                } else {
                    items.push(WithItem {
                        context: self.expr(value)?,
                        target: None,
                    });
                }
            }
        }
        Ok(StmtKind::With {
            items,
            body: self.block(self.field(node, "body")?)?,
        })
    }

    fn try_statement(&self, node: Node<'_>) -> Result<StmtKind, ParseError> {
        let body = self.block(self.field(node, "body")?)?;
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();
        for clause in named(node) {
            match clause.kind() {
                "except_clause" | "except_group_clause" => handlers.push(self.handler(clause)?),
                "else_clause" => orelse = self.block(self.field(clause, "body")?)?,
                "finally_clause" => {
                    if let Some(block) = named(clause).into_iter().find(|c| c.kind() == "block") {
                        finalbody = self.block(block)?;
                    }
                }
                _ => {}
            }
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn handler(&self, node: Node<'_>) -> Result<ExceptHandler, ParseError> {
        let parts = named(node);
        let (block, head) = match parts.split_last() {
            Some((block, head)) if block.kind() == "block" => (*block, head),
            _ => return Err(self.malformed(node, "except clause without body")),
        };
        let (kind, name) = match head {
            [] => (None, None),
            [pattern] if pattern.kind() == "as_pattern" => {
                let kind = self.expr(self.first_named(*pattern)?)?;
                let name = match pattern.child_by_field_name("alias") {
                    Some(alias) if alias.kind() == "as_pattern_target" => {
                        Some(self.text(self.first_named(alias)?)?.to_string())
                    }
                    Some(alias) => Some(self.text(alias)?.to_string()),
                    None => None,
                };
                (Some(kind), name)
            }
            [kind] => (Some(self.expr(*kind)?), None),
            [kind, name, ..] => (Some(self.expr(*kind)?), Some(self.text(*name)?.to_string())),
        };
        Ok(ExceptHandler {
            line: line_of(node),
            kind,
            name,
            body: self.block(block)?,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn exprs(&self, nodes: Vec<Node<'_>>) -> Result<Vec<Expr>, ParseError> {
        nodes.into_iter().map(|n| self.expr(n)).collect()
    }

    fn boxed(&self, node: Node<'_>) -> Result<Box<Expr>, ParseError> {
        self.expr(node).map(Box::new)
    }

    fn expr(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        Ok(match node.kind() {
            "identifier" => Expr::Name(self.text(node)?.to_string()),
            "integer" => self.integer(node)?,
            "float" => {
                let raw = self.text(node)?.replace('_', "");
                if raw.ends_with(['j', 'J']) {
                    Expr::Unsupported("complex".to_string())
                } else {
                    let value = raw
                        .parse::<f64>()
                        .map_err(|_| self.malformed(node, "invalid float literal"))?;
                    Expr::Constant(Constant::Float(value))
                }
            }
            "true" => Expr::Constant(Constant::Bool(true)),
            "false" => Expr::Constant(Constant::Bool(false)),
            "none" => Expr::Constant(Constant::None),
            "ellipsis" => Expr::Constant(Constant::Ellipsis),
            "string" => self.string(node)?,
            "concatenated_string" => self.concatenated(node)?,
            "parenthesized_expression" => self.expr(self.first_named(node)?)?,
            "binary_operator" => {
                let token = self.field(node, "operator")?.kind();
                Expr::BinOp {
                    left: self.boxed(self.field(node, "left")?)?,
                    op: BinOp::from_token(token)
                        .ok_or_else(|| self.malformed(node, "unknown binary operator"))?,
                    right: self.boxed(self.field(node, "right")?)?,
                }
            }
            "unary_operator" => {
                let op = match self.field(node, "operator")?.kind() {
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Pos,
                    "~" => UnaryOp::Invert,
                    _ => return Err(self.malformed(node, "unknown unary operator")),
                };
                Expr::UnaryOp {
                    op,
                    operand: self.boxed(self.field(node, "argument")?)?,
                }
            }
            "not_operator" => Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: self.boxed(self.field(node, "argument")?)?,
            },
            "boolean_operator" => self.boolean(node)?,
            "comparison_operator" => self.comparison(node)?,
            "call" => self.call(node)?,
            "attribute" => Expr::Attribute {
                value: self.boxed(self.field(node, "object")?)?,
                attr: self.text(self.field(node, "attribute")?)?.to_string(),
            },
            "subscript" => {
                let mut indices = self.exprs(fields(node, "subscript"))?;
                let index = if indices.len() == 1 {
                    indices.remove(0)
                } else {
                    Expr::Tuple(indices)
                };
                Expr::Subscript {
                    value: self.boxed(self.field(node, "value")?)?,
                    index: Box::new(index),
                }
            }
            "slice" => self.slice(node)?,
            "list" | "list_pattern" => Expr::List(self.exprs(named(node))?),
            "tuple" | "tuple_pattern" | "pattern_list" | "expression_list" => {
                Expr::Tuple(self.exprs(named(node))?)
            }
            "set" => Expr::Set(self.exprs(named(node))?),
            "dictionary" => {
                let mut pairs = Vec::new();
                for item in named(node) {
                    if item.kind() != "pair" {
                        return Ok(Expr::Unsupported(item.kind().to_string()));
                    }
                    pairs.push((
                        self.expr(self.field(item, "key")?)?,
                        self.expr(self.field(item, "value")?)?,
                    ));
                }
                Expr::Dict(pairs)
            }
            "conditional_expression" => match named(node).as_slice() {
                [body, test, orelse] => Expr::IfExp {
                    test: self.boxed(*test)?,
                    body: self.boxed(*body)?,
                    orelse: self.boxed(*orelse)?,
                },
                _ => return Err(self.malformed(node, "conditional expression arity")),
            },
            "lambda" => Expr::Lambda {
                params: self.params(node.child_by_field_name("parameters"))?,
                body: self.boxed(self.field(node, "body")?)?,
            },
            "list_comprehension" | "generator_expression" => self.comprehension(node)?,
            "list_splat" | "list_splat_pattern" => Expr::Starred(self.boxed(self.first_named(node)?)?),
            other => Expr::Unsupported(other.to_string()),
        })
    }

    fn integer(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let raw = self.text(node)?.replace('_', "");
        let lower = raw.to_ascii_lowercase();
        let parsed = if let Some(hex) = lower.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else if let Some(oct) = lower.strip_prefix("0o") {
            i64::from_str_radix(oct, 8)
        } else if let Some(bin) = lower.strip_prefix("0b") {
            i64::from_str_radix(bin, 2)
        } else if lower.ends_with('j') {
            return Ok(Expr::Unsupported("complex".to_string()));
        } else {
            lower.trim_end_matches('l').parse::<i64>()
        };
        Ok(match parsed {
            Ok(value) => Expr::Constant(Constant::Int(value)),
            Err(_) => Expr::Unsupported("big_integer".to_string()),
        })
    }

    fn boolean(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let op = match self.field(node, "operator")?.kind() {
            "and" => BoolOp::And,
            _ => BoolOp::Or,
        };
        let mut values = Vec::new();
        for side in [self.field(node, "left")?, self.field(node, "right")?] {
            match self.expr(side)? {
                Expr::BoolOp { op: inner, values: nested } if inner == op => values.extend(nested),
                other => values.push(other),
            }
        }
        Ok(Expr::BoolOp { op, values })
    }

    fn comparison(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let mut left = None;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        let mut pending = String::new();
        for child in all(node) {
            if TRIVIA.contains(&child.kind()) {
                continue;
            }
            if child.is_named() {
                let operand = self.expr(child)?;
                if left.is_none() {
                    left = Some(operand);
                    continue;
                }
                let op = CmpOp::from_token(pending.trim())
                    .ok_or_else(|| self.malformed(node, "unknown comparison operator"))?;
                pending.clear();
                ops.push(op);
                comparators.push(operand);
            } else {
                if !pending.is_empty() {
                    pending.push(' ');
                }
                pending.push_str(child.kind());
            }
        }
        let left = left.ok_or_else(|| self.malformed(node, "comparison without operands"))?;
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
        })
    }

    fn call(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let func = self.boxed(self.field(node, "function")?)?;
        let arguments = self.field(node, "arguments")?;
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        if arguments.kind() == "generator_expression" {
            args.push(self.expr(arguments)?);
        } else {
            for arg in named(arguments) {
                match arg.kind() {
                    "keyword_argument" => keywords.push(Keyword {
                        arg: Some(self.text(self.field(arg, "name")?)?.to_string()),
                        value: self.expr(self.field(arg, "value")?)?,
                    }),
                    "dictionary_splat" => keywords.push(Keyword {
                        arg: None,
                        value: self.expr(self.first_named(arg)?)?,
                    }),
                    _ => args.push(self.expr(arg)?),
                }
            }
        }
        Ok(Expr::Call {
            func,
            args,
            keywords,
        })
    }

    fn slice(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let mut parts: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut segment = 0usize;
        for child in all(node) {
            if child.kind() == ":" {
                segment += 1;
            } else if child.is_named() && segment < 3 && !TRIVIA.contains(&child.kind()) {
                parts[segment] = Some(self.boxed(child)?);
            }
        }
        let [lower, upper, step] = parts;
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comprehension(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let elt = self.boxed(self.field(node, "body")?)?;
        let mut generators: Vec<Comprehension> = Vec::new();
        for clause in named(node) {
            match clause.kind() {
                "for_in_clause" => generators.push(Comprehension {
                    target: self.expr(self.field(clause, "left")?)?,
                    iter: self.expr(self.field(clause, "right")?)?,
                    ifs: Vec::new(),
                }),
                "if_clause" => {
                    let cond = self.expr(self.first_named(clause)?)?;
                    match generators.last_mut() {
                        Some(generator) => generator.ifs.push(cond),
                        None => return Err(self.malformed(clause, "`if` before `for`")),
                    }
                }
                _ => {}
            }
        }
        Ok(Expr::ListComp { elt, generators })
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    fn string_parts(&self, node: Node<'_>) -> Result<(bool, Vec<FStringPart>), ParseError> {
        let mut is_fstring = false;
        let mut is_raw = false;
        let mut parts: Vec<FStringPart> = Vec::new();
        for child in all(node) {
            match child.kind() {
                "string_start" => {
                    let prefix: String = self
                        .text(child)?
                        .chars()
                        .take_while(|c| *c != '"' && *c != '\'')
                        .collect::<String>()
                        .to_ascii_lowercase();
                    is_fstring = prefix.contains('f');
                    is_raw = prefix.contains('r');
                }
                "string_content" => {
                    let raw = self.text(child)?;
                    let mut literal = if is_raw { raw.to_string() } else { unescape(raw) };
                    if is_fstring {
                        literal = literal.replace("{{", "{").replace("}}", "}");
                    }
                    match parts.last_mut() {
                        Some(FStringPart::Literal(prev)) => prev.push_str(&literal),
                        _ => parts.push(FStringPart::Literal(literal)),
                    }
                }
                "interpolation" => {
                    let inner = match child.child_by_field_name("expression") {
                        Some(e) => e,
                        None => self.first_named(child)?,
                    };
                    parts.push(FStringPart::Expr(self.expr(inner)?));
                }
                _ => {}
            }
        }
        Ok((is_fstring, parts))
    }

    fn string(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let (is_fstring, parts) = self.string_parts(node)?;
        Ok(finish_string(is_fstring, parts))
    }

    fn concatenated(&self, node: Node<'_>) -> Result<Expr, ParseError> {
        let mut any_fstring = false;
        let mut parts = Vec::new();
        for piece in named(node) {
            let (is_fstring, mut piece_parts) = self.string_parts(piece)?;
            any_fstring |= is_fstring;
            parts.append(&mut piece_parts);
        }
        Ok(finish_string(any_fstring, parts))
    }
}

fn finish_string(is_fstring: bool, parts: Vec<FStringPart>) -> Expr {
    if is_fstring {
        return Expr::FString(parts);
    }
    let mut text = String::new();
    for part in parts {
        if let FStringPart::Literal(s) = part {
            text.push_str(&s);
        }
    }
    Expr::Constant(Constant::Str(text))
}

/// Decodes Python backslash escapes in a non-raw string body.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(kind @ ('x' | 'u' | 'U')) => {
                let width = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('\\');
                        out.push(kind);
                        out.push_str(&digits);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Module {
        ParserHost::new().unwrap().parse(src).unwrap()
    }

    #[test]
    fn test_parser_host_creation() {
        assert!(ParserHost::new().is_ok());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = ParserHost::new().unwrap().parse("def broken(:\n  pass\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_assignment_and_while() {
        let module = parse("x = 0\nwhile x < 10:\n    x = x + 1\n");
        assert_eq!(module.body.len(), 2);
        match &module.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets, &vec![Expr::name("x")]);
                assert_eq!(value, &Expr::int(0));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &module.body[1].kind {
            StmtKind::While { test, body, .. } => {
                assert_eq!(module.body[1].line, 2);
                assert!(matches!(test, Expr::Compare { ops, .. } if ops == &vec![CmpOp::Lt]));
                assert_eq!(body.len(), 1);
                assert_eq!(body[0].line, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chained_assignment() {
        let module = parse("a = b = 3\n");
        match &module.body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_comparison_with_two_token_operator() {
        let module = parse("r = a not in b\ns = a is not None\n");
        let ops: Vec<CmpOp> = module
            .body
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::Assign {
                    value: Expr::Compare { ops, .. },
                    ..
                } => ops.first().copied(),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec![CmpOp::NotIn, CmpOp::IsNot]);
    }

    #[test]
    fn test_elif_chain_nests() {
        let module = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n");
        match &module.body[0].kind {
            StmtKind::If { orelse, .. } => match &orelse[0].kind {
                StmtKind::If { orelse, .. } => assert_eq!(orelse.len(), 1),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_imports() {
        let module = parse("import os, sys as system\nfrom main import analyze_halting\n");
        match &module.body[0].kind {
            StmtKind::Import(names) => {
                assert_eq!(names[0].name, "os");
                assert_eq!(names[1].asname.as_deref(), Some("system"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &module.body[1].kind {
            StmtKind::ImportFrom { module, names } => {
                assert_eq!(module, "main");
                assert_eq!(names[0].name, "analyze_halting");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_with_as_target() {
        let module = parse("with open(__file__, 'r') as f:\n    s = f.read()\n");
        match &module.body[0].kind {
            StmtKind::With { items, body } => {
                assert!(items[0].context.is_call_to("open"));
                assert_eq!(items[0].target, Some(Expr::name("f")));
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_strings_and_fstrings() {
        let module = parse("a = 'x\\ny'\nb = f\"v={v}!\"\n");
        match &module.body[0].kind {
            StmtKind::Assign { value, .. } => assert_eq!(value.as_str_literal(), Some("x\ny")),
            other => panic!("unexpected {other:?}"),
        }
        match &module.body[1].kind {
            StmtKind::Assign {
                value: Expr::FString(parts),
                ..
            } => {
                assert_eq!(parts[0], FStringPart::Literal("v=".into()));
                assert_eq!(parts[1], FStringPart::Expr(Expr::name("v")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_try_except_as() {
        let src = "try:\n    x = 1\nexcept ValueError as e:\n    pass\nfinally:\n    y = 2\n";
        match &parse(src).body[0].kind {
            StmtKind::Try {
                handlers, finalbody, ..
            } => {
                assert_eq!(handlers[0].kind, Some(Expr::name("ValueError")));
                assert_eq!(handlers[0].name.as_deref(), Some("e"));
                assert_eq!(finalbody.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_function_params() {
        let module = parse("def f(a, b=2, *rest, **kw):\n    return a\n");
        match &module.body[0].kind {
            StmtKind::FunctionDef(def) => {
                let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
                assert_eq!(
                    kinds,
                    vec![
                        ParamKind::Positional,
                        ParamKind::Positional,
                        ParamKind::VarArgs,
                        ParamKind::KwArgs
                    ]
                );
                assert!(def.params[1].default.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\tb\x41\\"), "a\tbA\\");
        assert_eq!(unescape(r"\d"), "\\d");
    }

    #[test]
    fn test_comments_are_skipped() {
        let module = parse("# heading\nx = 1  # trailing\n");
        assert_eq!(module.body.len(), 1);
    }
}

//! Typed syntax tree for the analyzed Python subset.
//!
//! Lowered once from the tree-sitter CST by [`crate::ParserHost`]. Every
//! heuristic matcher downstream is a pure function over these types.
//! Statements carry their 1-indexed source line; expressions do not.
//!
//! Constructs the lowering does not model become `Unsupported` nodes rather
//! than parse errors, so structural phases still see the surrounding shape.

/// A parsed module (one candidate program).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// 1-indexed source line of the statement's first token.
    pub line: u32,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(line: u32, kind: StmtKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value` keeps both targets in source order.
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Return(Option<Expr>),
    Pass,
    Break,
    Continue,
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Raise(Option<Expr>),
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Delete(Vec<Expr>),
    /// Statement kind the lowering does not model (tree-sitter kind name).
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub kind: ParamKind,
}

impl Param {
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            kind: ParamKind::Positional,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
}

/// `name as asname` in an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// The name this import binds in the importing scope.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(a) => a,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub target: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub line: u32,
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Constant(Constant),
    FString(Vec<FStringPart>),
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    /// List comprehensions and (eagerly evaluated) generator expressions.
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Starred(Box<Expr>),
    /// Expression kind the lowering does not model (tree-sitter kind name).
    Unsupported(String),
}

impl Expr {
    pub fn name(id: impl Into<String>) -> Self {
        Expr::Name(id.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Constant(Constant::Int(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Constant(Constant::Str(value.into()))
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Constant(Constant::Int(v)) => Some(*v),
            Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => operand.as_int().and_then(i64::checked_neg),
            _ => None,
        }
    }

    pub fn as_str_literal(&self) -> Option<&str> {
        match self {
            Expr::Constant(Constant::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// `Some(name)` when this is a call whose callee is a bare name.
    pub fn call_target(&self) -> Option<&str> {
        match self {
            Expr::Call { func, .. } => func.as_name(),
            _ => None,
        }
    }

    /// `true` when this is `name(...)`.
    pub fn is_call_to(&self, name: &str) -> bool {
        self.call_target() == Some(name)
    }

    /// Dotted path for `a.b.c`-shaped expressions.
    pub fn dotted_path(&self) -> Option<String> {
        match self {
            Expr::Name(id) => Some(id.clone()),
            Expr::Attribute { value, attr } => {
                value.dotted_path().map(|base| format!("{base}.{attr}"))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ellipsis,
}

impl Constant {
    /// Python truthiness of a literal.
    pub fn is_truthy(&self) -> bool {
        match self {
            Constant::None => false,
            Constant::Bool(b) => *b,
            Constant::Int(v) => *v != 0,
            Constant::Float(v) => *v != 0.0,
            Constant::Str(s) => !s.is_empty(),
            Constant::Ellipsis => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// `None` for `**mapping`.
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::MatMult => "@",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }

    /// Parses a binary operator token; augmented forms (`+=`) are accepted.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.strip_suffix('=').unwrap_or(token);
        Some(match token {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mult,
            "@" => BinOp::MatMult,
            "/" => BinOp::Div,
            "//" => BinOp::FloorDiv,
            "%" => BinOp::Mod,
            "**" => BinOp::Pow,
            "<<" => BinOp::LShift,
            ">>" => BinOp::RShift,
            "|" => BinOp::BitOr,
            "^" => BinOp::BitXor,
            "&" => BinOp::BitAnd,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "==" => CmpOp::Eq,
            "!=" | "<>" => CmpOp::NotEq,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::LtE,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::GtE,
            "is" => CmpOp::Is,
            "is not" => CmpOp::IsNot,
            "in" => CmpOp::In,
            "not in" => CmpOp::NotIn,
            _ => return None,
        })
    }

    /// The operator with its operands swapped (`a < b` ⇔ `b > a`).
    pub fn flipped(&self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtE => CmpOp::GtE,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtE => CmpOp::LtE,
            other => *other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_bound_name() {
        let plain = Alias {
            name: "os.path".into(),
            asname: None,
        };
        assert_eq!(plain.bound_name(), "os");
        let aliased = Alias {
            name: "os.path".into(),
            asname: Some("p".into()),
        };
        assert_eq!(aliased.bound_name(), "p");
    }

    #[test]
    fn test_negative_int_literal() {
        let e = Expr::UnaryOp {
            op: UnaryOp::Neg,
            operand: Box::new(Expr::int(3)),
        };
        assert_eq!(e.as_int(), Some(-3));
    }

    #[test]
    fn test_dotted_path() {
        let e = Expr::Attribute {
            value: Box::new(Expr::Attribute {
                value: Box::new(Expr::name("os")),
                attr: "path".into(),
            }),
            attr: "dirname".into(),
        };
        assert_eq!(e.dotted_path().as_deref(), Some("os.path.dirname"));
    }

    #[test]
    fn test_operator_tokens() {
        assert_eq!(BinOp::from_token("//="), Some(BinOp::FloorDiv));
        assert_eq!(BinOp::from_token("+"), Some(BinOp::Add));
        assert_eq!(CmpOp::from_token("not in"), Some(CmpOp::NotIn));
        assert_eq!(CmpOp::Lt.flipped(), CmpOp::Gt);
    }

    #[test]
    fn test_constant_truthiness() {
        assert!(Constant::Bool(true).is_truthy());
        assert!(Constant::Int(7).is_truthy());
        assert!(!Constant::Str(String::new()).is_truthy());
        assert!(!Constant::None.is_truthy());
    }
}

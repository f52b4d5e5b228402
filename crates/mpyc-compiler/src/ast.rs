//! Annotated syntax tree
//!
//! The tree handed over by the front end. Surface parsing happens elsewhere;
//! this crate only consumes the result, usually deserialized from JSON.
//! Node kinds the compiler does not support are still representable so that
//! they can be rejected with a precise diagnostic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location (1-based line and column, 0 when unknown)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    #[serde(default)]
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A source module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub body: Vec<Stmt>,
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }

    /// Integer-only operators (shifts and bitwise)
    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
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

    /// The six ordering/equality operators
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CmpOp::Eq | CmpOp::NotEq | CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE
        )
    }
}

// ============================================================================
// Constants
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub bases: Vec<String>,
    /// Class keywords such as `metaclass=...` (always rejected)
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// Exception class name, `None` for a bare `except:`
    #[serde(default)]
    pub exc_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Import {
        module: String,
        #[serde(default)]
        alias: Option<String>,
        #[serde(default)]
        span: Span,
    },
    ImportFrom {
        module: String,
        #[serde(default)]
        names: Vec<String>,
        #[serde(default)]
        span: Span,
    },
    Expr {
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    Assign {
        target: Expr,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    AnnAssign {
        target: Expr,
        annotation: String,
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    If {
        test: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
        #[serde(default)]
        span: Span,
    },
    While {
        test: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        span: Span,
    },
    For {
        target: String,
        iter: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        span: Span,
    },
    Break {
        #[serde(default)]
        span: Span,
    },
    Continue {
        #[serde(default)]
        span: Span,
    },
    Pass {
        #[serde(default)]
        span: Span,
    },
    Raise {
        #[serde(default)]
        exc: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    Try {
        #[serde(default)]
        body: Vec<Stmt>,
        #[serde(default)]
        handlers: Vec<ExceptHandler>,
        #[serde(default)]
        orelse: Vec<Stmt>,
        #[serde(default)]
        finalbody: Vec<Stmt>,
        #[serde(default)]
        span: Span,
    },
    With {
        #[serde(default)]
        span: Span,
    },
    Global {
        #[serde(default)]
        span: Span,
    },
    Nonlocal {
        #[serde(default)]
        span: Span,
    },
    Delete {
        #[serde(default)]
        targets: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    AsyncFunctionDef {
        name: String,
        #[serde(default)]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::FunctionDef(def) => def.span,
            Stmt::ClassDef(def) => def.span,
            Stmt::Import { span, .. }
            | Stmt::ImportFrom { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::AnnAssign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Pass { span }
            | Stmt::Raise { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::With { span }
            | Stmt::Global { span }
            | Stmt::Nonlocal { span }
            | Stmt::Delete { span, .. }
            | Stmt::AsyncFunctionDef { span, .. } => *span,
        }
    }

    // ---- convenience constructors (used when building trees in code) ----

    pub fn expr(value: Expr) -> Self {
        Stmt::Expr {
            value,
            span: Span::default(),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign {
            target,
            value,
            span: Span::default(),
        }
    }

    pub fn aug_assign(target: Expr, op: BinOp, value: Expr) -> Self {
        Stmt::AugAssign {
            target,
            op,
            value,
            span: Span::default(),
        }
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Stmt::Return {
            value,
            span: Span::default(),
        }
    }

    pub fn if_(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Self {
        Stmt::If {
            test,
            body,
            orelse,
            span: Span::default(),
        }
    }

    pub fn while_(test: Expr, body: Vec<Stmt>) -> Self {
        Stmt::While {
            test,
            body,
            span: Span::default(),
        }
    }

    pub fn for_(target: &str, iter: Expr, body: Vec<Stmt>) -> Self {
        Stmt::For {
            target: target.to_string(),
            iter,
            body,
            span: Span::default(),
        }
    }

    pub fn raise(exc: Option<Expr>) -> Self {
        Stmt::Raise {
            exc,
            span: Span::default(),
        }
    }

    /// Class-level field declaration `name: annotation [= value]`
    pub fn field(name: &str, annotation: &str, value: Option<Expr>) -> Self {
        Stmt::AnnAssign {
            target: Expr::name(name),
            annotation: annotation.to_string(),
            value,
            span: Span::default(),
        }
    }

    pub fn function(name: &str, params: &[&str], decorators: &[&str], body: Vec<Stmt>) -> Self {
        Stmt::FunctionDef(FunctionDef {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            decorators: decorators.iter().map(|d| d.to_string()).collect(),
            body,
            span: Span::default(),
        })
    }

    pub fn class(name: &str, bases: &[&str], decorators: &[&str], body: Vec<Stmt>) -> Self {
        Stmt::ClassDef(ClassDef {
            name: name.to_string(),
            bases: bases.iter().map(|b| b.to_string()).collect(),
            keywords: Vec::new(),
            decorators: decorators.iter().map(|d| d.to_string()).collect(),
            body,
            span: Span::default(),
        })
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub arg: String,
    pub value: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Constant {
        value: Constant,
        #[serde(default)]
        span: Span,
    },
    Name {
        id: String,
        #[serde(default)]
        span: Span,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Call {
        func: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        keywords: Vec<Keyword>,
        #[serde(default)]
        span: Span,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        #[serde(default)]
        span: Span,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// `lower:upper:step` inside a subscript; every bound may be omitted
    Slice {
        #[serde(default)]
        lower: Option<Box<Expr>>,
        #[serde(default)]
        upper: Option<Box<Expr>>,
        #[serde(default)]
        step: Option<Box<Expr>>,
        #[serde(default)]
        span: Span,
    },
    List {
        #[serde(default)]
        elts: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Tuple {
        #[serde(default)]
        elts: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Set {
        #[serde(default)]
        elts: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Dict {
        #[serde(default)]
        keys: Vec<Expr>,
        #[serde(default)]
        values: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    Lambda {
        #[serde(default)]
        span: Span,
    },
    ListComp {
        #[serde(default)]
        span: Span,
    },
    DictComp {
        #[serde(default)]
        span: Span,
    },
    GeneratorExp {
        #[serde(default)]
        span: Span,
    },
    Yield {
        #[serde(default)]
        span: Span,
    },
    Await {
        #[serde(default)]
        span: Span,
    },
    Starred {
        #[serde(default)]
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Constant { span, .. }
            | Expr::Name { span, .. }
            | Expr::BinOp { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::BoolOp { span, .. }
            | Expr::Compare { span, .. }
            | Expr::Call { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Slice { span, .. }
            | Expr::List { span, .. }
            | Expr::Tuple { span, .. }
            | Expr::Set { span, .. }
            | Expr::Dict { span, .. }
            | Expr::IfExp { span, .. }
            | Expr::Lambda { span }
            | Expr::ListComp { span }
            | Expr::DictComp { span }
            | Expr::GeneratorExp { span }
            | Expr::Yield { span }
            | Expr::Await { span }
            | Expr::Starred { span } => *span,
        }
    }

    // ---- convenience constructors ----

    pub fn int(value: i64) -> Self {
        Expr::Constant {
            value: Constant::Int(value),
            span: Span::default(),
        }
    }

    pub fn float(value: f64) -> Self {
        Expr::Constant {
            value: Constant::Float(value),
            span: Span::default(),
        }
    }

    pub fn bool(value: bool) -> Self {
        Expr::Constant {
            value: Constant::Bool(value),
            span: Span::default(),
        }
    }

    pub fn str(value: &str) -> Self {
        Expr::Constant {
            value: Constant::Str(value.to_string()),
            span: Span::default(),
        }
    }

    pub fn none() -> Self {
        Expr::Constant {
            value: Constant::None,
            span: Span::default(),
        }
    }

    pub fn name(id: &str) -> Self {
        Expr::Name {
            id: id.to_string(),
            span: Span::default(),
        }
    }

    pub fn binop(left: Expr, op: BinOp, right: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
            span: Span::default(),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::UnaryOp {
            op,
            operand: Box::new(operand),
            span: Span::default(),
        }
    }

    pub fn compare(left: Expr, op: CmpOp, right: Expr) -> Self {
        Expr::Compare {
            left: Box::new(left),
            ops: vec![op],
            comparators: vec![right],
            span: Span::default(),
        }
    }

    pub fn boolop(op: BoolOp, values: Vec<Expr>) -> Self {
        Expr::BoolOp {
            op,
            values,
            span: Span::default(),
        }
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: Box::new(func),
            args,
            keywords: Vec::new(),
            span: Span::default(),
        }
    }

    pub fn attr(value: Expr, attr: &str) -> Self {
        Expr::Attribute {
            value: Box::new(value),
            attr: attr.to_string(),
            span: Span::default(),
        }
    }

    /// `receiver.method(args)`
    pub fn method_call(receiver: Expr, method: &str, args: Vec<Expr>) -> Self {
        Expr::call(Expr::attr(receiver, method), args)
    }

    pub fn subscript(value: Expr, index: Expr) -> Self {
        Expr::Subscript {
            value: Box::new(value),
            index: Box::new(index),
            span: Span::default(),
        }
    }

    pub fn slice(lower: Option<Expr>, upper: Option<Expr>, step: Option<Expr>) -> Self {
        Expr::Slice {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            step: step.map(Box::new),
            span: Span::default(),
        }
    }

    pub fn list(elts: Vec<Expr>) -> Self {
        Expr::List {
            elts,
            span: Span::default(),
        }
    }

    pub fn if_exp(test: Expr, body: Expr, orelse: Expr) -> Self {
        Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
            span: Span::default(),
        }
    }

    pub fn with_span(mut self, line: u32, col: u32) -> Self {
        let new_span = Span::new(line, col);
        match &mut self {
            Expr::Constant { span, .. }
            | Expr::Name { span, .. }
            | Expr::BinOp { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::BoolOp { span, .. }
            | Expr::Compare { span, .. }
            | Expr::Call { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Slice { span, .. }
            | Expr::List { span, .. }
            | Expr::Tuple { span, .. }
            | Expr::Set { span, .. }
            | Expr::Dict { span, .. }
            | Expr::IfExp { span, .. }
            | Expr::Lambda { span }
            | Expr::ListComp { span }
            | Expr::DictComp { span }
            | Expr::GeneratorExp { span }
            | Expr::Yield { span }
            | Expr::Await { span }
            | Expr::Starred { span } => *span = new_span,
        }
        self
    }
}

use std::{
    fmt::{Debug, Display},
    rc::Rc,
};

use itertools::Itertools;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{source::SourceSpan, SourceReference};

pub trait AstNode {
    fn source_span(&self) -> SourceSpan;
}

#[derive(Debug, Clone)]
pub struct Program {
    pub root: Node,
    pub source_reference: SourceReference,
}
impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.root, f)
    }
}
impl AstNode for Program {
    fn source_span(&self) -> SourceSpan {
        self.root.span
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
    pub span: SourceSpan,
}
impl AstNode for Identifier {
    fn source_span(&self) -> SourceSpan {
        self.span
    }
}
impl Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Axis {
    X,
    Y,
}
impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }
}
impl Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Axis::X => "X",
            Axis::Y => "Y",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Integer,
    Float,
}

/// Numeric literals keep their source text; both kinds become `f64` when evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub text: String,
    pub kind: NumberKind,
}
impl NumberLiteral {
    pub fn value(&self) -> f64 {
        self.text.parse().unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    Approx,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    And,
    Or,
}
impl Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Approx => "~=",
            BinaryOperator::Less => "<",
            BinaryOperator::Greater => ">",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Power => "^",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}
impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::Not => "!",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: Identifier,
    pub value: Node,
}
impl Display for PropertyDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.name, self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub params: Vec<Identifier>,
    pub body: Node,
    pub span: SourceSpan,
}
impl FunctionLiteral {
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|param| param.name.as_str())
    }
}

/// Left-hand side of an assignment, classified by shape when the rule is reduced.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Variable(Identifier),
    Property { object: Box<Node>, name: Identifier },
    Index { base: Box<Node>, index: Box<Node> },
}
impl Display for AssignTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignTarget::Variable(identifier) => Display::fmt(identifier, f),
            AssignTarget::Property { object, name } => write!(f, "(. {} {})", object, name),
            AssignTarget::Index { base, index } => write!(f, "(index {} {})", base, index),
        }
    }
}

/// Operator nodes. Every variant has a fixed shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Statements(Vec<Node>),
    Assign {
        target: AssignTarget,
        value: Box<Node>,
    },
    If {
        condition: Box<Node>,
        then_branch: Box<Node>,
    },
    IfElse {
        condition: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Box<Node>,
    },
    Conditional {
        condition: Box<Node>,
        then_value: Box<Node>,
        else_value: Box<Node>,
    },
    While {
        condition: Box<Node>,
        body: Box<Node>,
    },
    DoWhile {
        body: Box<Node>,
        condition: Box<Node>,
    },
    For {
        init: Box<Node>,
        condition: Box<Node>,
        step: Box<Node>,
        body: Box<Node>,
    },
    Use(Identifier),
    Delete(Box<Node>),
    Return(Option<Box<Node>>),
    Expression(Box<Node>),
    Function(Rc<FunctionLiteral>),
    Map(Rc<FunctionLiteral>),
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        attributes: Option<Vec<PropertyDef>>,
    },
    Array(Vec<Node>),
    Object(Vec<PropertyDef>),
    Index {
        base: Box<Node>,
        index: Box<Node>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Node>,
        right: Box<Node>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Node>,
    },
}

impl Op {
    pub fn tag(&self) -> &'static str {
        match self {
            Op::Statements(_) => "statements",
            Op::Assign { .. } => "assign",
            Op::If { .. } => "if",
            Op::IfElse { .. } => "if-else",
            Op::Conditional { .. } => "conditional",
            Op::While { .. } => "while",
            Op::DoWhile { .. } => "do",
            Op::For { .. } => "for",
            Op::Use(_) => "use",
            Op::Delete(_) => "delete",
            Op::Return(_) => "return",
            Op::Expression(_) => "expression",
            Op::Function(_) => "function",
            Op::Map(_) => "map",
            Op::Call { .. } => "call",
            Op::Array(_) => "array",
            Op::Object(_) => "object",
            Op::Index { .. } => "index",
            Op::Binary { .. } => "binary",
            Op::Unary { .. } => "unary",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Op(Op),
    Identifier(String),
    Number(NumberLiteral),
    String(String),
    Boolean(bool),
    Coordinate { axis: Axis, target: Box<Node> },
    Property { object: Box<Node>, name: Identifier },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: SourceSpan,
}

impl Node {
    pub fn new(kind: NodeKind, span: SourceSpan) -> Self {
        Self { kind, span }
    }
    pub fn op(op: Op, span: SourceSpan) -> Self {
        Self::new(NodeKind::Op(op), span)
    }
    pub fn as_op(&self) -> Option<&Op> {
        match &self.kind {
            NodeKind::Op(op) => Some(op),
            _ => None,
        }
    }
    pub fn as_identifier(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
    /// Statement lists are flattened one level, so a program is a flat list of statements.
    pub fn statements(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Op(Op::Statements(statements)) => statements,
            _ => std::slice::from_ref(self),
        }
    }
}

impl AstNode for Node {
    fn source_span(&self) -> SourceSpan {
        self.span
    }
}

fn fmt_list<T: Display>(items: &[T]) -> String {
    items.iter().map(|item| format!(" {}", item)).join("")
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Statements(statements) => write!(f, "(do{})", fmt_list(statements)),
            Op::Assign { target, value } => write!(f, "(= {} {})", target, value),
            Op::If {
                condition,
                then_branch,
            } => write!(f, "(if {} {})", condition, then_branch),
            Op::IfElse {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "(if {} {} {})", condition, then_branch, else_branch),
            Op::Conditional {
                condition,
                then_value,
                else_value,
            } => write!(f, "(? {} {} {})", condition, then_value, else_value),
            Op::While { condition, body } => write!(f, "(while {} {})", condition, body),
            Op::DoWhile { body, condition } => write!(f, "(do-while {} {})", body, condition),
            Op::For {
                init,
                condition,
                step,
                body,
            } => write!(f, "(for {} {} {} {})", init, condition, step, body),
            Op::Use(identifier) => write!(f, "(use {})", identifier),
            Op::Delete(target) => write!(f, "(delete {})", target),
            Op::Return(Some(value)) => write!(f, "(return {})", value),
            Op::Return(None) => f.write_str("(return)"),
            Op::Expression(expression) => write!(f, "(expr {})", expression),
            Op::Function(function) => write!(
                f,
                "(function ({}) {})",
                function.param_names().join(" "),
                function.body
            ),
            Op::Map(function) => write!(
                f,
                "(map ({}) {})",
                function.param_names().join(" "),
                function.body
            ),
            Op::Call {
                callee,
                args,
                attributes,
            } => {
                write!(f, "(call {}{}", callee, fmt_list(args))?;
                if let Some(attributes) = attributes {
                    write!(f, " (attributes{})", fmt_list(attributes))?;
                }
                f.write_str(")")
            }
            Op::Array(items) => write!(f, "(array{})", fmt_list(items)),
            Op::Object(properties) => write!(f, "(object{})", fmt_list(properties)),
            Op::Index { base, index } => write!(f, "(index {} {})", base, index),
            Op::Binary {
                operator,
                left,
                right,
            } => write!(f, "({} {} {})", operator, left, right),
            Op::Unary { operator, operand } => write!(f, "({} {})", operator, operand),
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            NodeKind::Op(op) => Display::fmt(op, f),
            NodeKind::Identifier(name) => f.write_str(name),
            NodeKind::Number(number) => f.write_str(&number.text),
            NodeKind::String(string) => write!(f, "{:?}", string),
            NodeKind::Boolean(value) => write!(f, "{}", value),
            NodeKind::Coordinate { axis, target } => write!(f, "({} {})", axis, target),
            NodeKind::Property { object, name } => write!(f, "(. {} {})", object, name),
        }
    }
}

//! The production list with one semantic action per production.
//!
//! Rule 0 is the augmented start rule. Right-hand sides are popped off the parser's
//! value stack in order and handed to the action as a [`Reduction`].

use std::rc::Rc;

use lazy_static::lazy_static;

use crate::{
    ast::{
        AssignTarget, Axis, BinaryOperator, FunctionLiteral, Identifier, Node, NodeKind,
        NumberKind, NumberLiteral, Op, PropertyDef, UnaryOperator,
    },
    scanner::unescape_string_literal,
    source::SourceSpan,
    tokens::{NonTerminal as NT, Symbol, Token, TokenKind as K},
};

use Symbol::{N, T};

/// Semantic values carried alongside parser states.
#[derive(Debug, Clone, PartialEq)]
pub enum StackValue {
    Token(Token),
    Node(Node),
    Nodes(Vec<Node>),
    Names(Vec<Identifier>),
    Props(Vec<PropertyDef>),
    Name(Identifier),
    Lhs(AssignTarget),
}

pub type SemanticAction = fn(&mut Reduction) -> StackValue;

pub struct Rule {
    pub lhs: NT,
    pub rhs: Vec<Symbol>,
    pub action: SemanticAction,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ->", self.lhs)?;
        if self.rhs.is_empty() {
            f.write_str(" ε")?;
        }
        for symbol in &self.rhs {
            write!(f, " {}", symbol)?;
        }
        Ok(())
    }
}

/// The popped right-hand side of a production, consumed front to back.
pub struct Reduction {
    values: std::vec::IntoIter<StackValue>,
    pub span: SourceSpan,
}

impl Reduction {
    pub fn new(values: Vec<StackValue>, span: SourceSpan) -> Self {
        Self {
            values: values.into_iter(),
            span,
        }
    }

    fn next(&mut self) -> StackValue {
        match self.values.next() {
            Some(value) => value,
            None => unreachable!("reduction popped fewer values than its rule declares"),
        }
    }

    fn skip(&mut self) -> &mut Self {
        self.next();
        self
    }

    fn token(&mut self) -> Token {
        match self.next() {
            StackValue::Token(token) => token,
            other => unreachable!("expected a token, found {:?}", other),
        }
    }

    fn node(&mut self) -> Node {
        match self.next() {
            StackValue::Node(node) => node,
            other => unreachable!("expected a node, found {:?}", other),
        }
    }

    fn boxed(&mut self) -> Box<Node> {
        Box::new(self.node())
    }

    fn nodes(&mut self) -> Vec<Node> {
        match self.next() {
            StackValue::Nodes(nodes) => nodes,
            other => unreachable!("expected a node list, found {:?}", other),
        }
    }

    fn names(&mut self) -> Vec<Identifier> {
        match self.next() {
            StackValue::Names(names) => names,
            other => unreachable!("expected a parameter list, found {:?}", other),
        }
    }

    fn props(&mut self) -> Vec<PropertyDef> {
        match self.next() {
            StackValue::Props(props) => props,
            other => unreachable!("expected a property list, found {:?}", other),
        }
    }

    fn name(&mut self) -> Identifier {
        match self.next() {
            StackValue::Name(name) => name,
            StackValue::Token(token) => identifier(token),
            other => unreachable!("expected a name, found {:?}", other),
        }
    }

    fn lhs(&mut self) -> AssignTarget {
        match self.next() {
            StackValue::Lhs(target) => target,
            other => unreachable!("expected an assignment target, found {:?}", other),
        }
    }

    fn op(&self, op: Op) -> StackValue {
        StackValue::Node(Node::op(op, self.span))
    }

    fn leaf(&self, kind: NodeKind) -> StackValue {
        StackValue::Node(Node::new(kind, self.span))
    }
}

fn identifier(token: Token) -> Identifier {
    Identifier {
        name: token.lexeme,
        span: token.span,
    }
}

fn number(token: Token, kind: NumberKind) -> NodeKind {
    NodeKind::Number(NumberLiteral {
        text: token.lexeme,
        kind,
    })
}

fn function_literal(r: &mut Reduction, has_braces: bool) -> Rc<FunctionLiteral> {
    let params = r.skip().skip().names();
    let body = if has_braces {
        let statements = r.skip().skip().nodes();
        let span = r.span;
        Node::op(Op::Statements(statements), span)
    } else {
        r.skip().node()
    };
    Rc::new(FunctionLiteral {
        params,
        body,
        span: r.span,
    })
}

macro_rules! binary {
    ($operator:ident) => {
        |r: &mut Reduction| {
            let left = r.boxed();
            let right = r.skip().boxed();
            r.op(Op::Binary {
                operator: BinaryOperator::$operator,
                left,
                right,
            })
        }
    };
}

macro_rules! pass_through {
    () => {
        |r: &mut Reduction| r.next()
    };
}

macro_rules! rules {
    ($($lhs:ident => [$($symbol:expr),*] => $action:expr;)*) => {
        vec![$(Rule {
            lhs: NT::$lhs,
            rhs: vec![$($symbol),*],
            action: $action,
        }),*]
    };
}

pub struct Grammar {
    pub rules: Vec<Rule>,
}

impl Grammar {
    fn new() -> Self {
        let rules = rules! {
            Accept => [N(NT::Program)] => pass_through!();
            Program => [N(NT::StmtList)] => |r| {
                let statements = r.nodes();
                r.op(Op::Statements(statements))
            };

            StmtList => [N(NT::StmtList), N(NT::Stmt)] => |r| {
                let mut statements = r.nodes();
                statements.push(r.node());
                StackValue::Nodes(statements)
            };
            StmtList => [] => |_| StackValue::Nodes(vec![]);

            Stmt => [T(K::If), T(K::LeftParen), N(NT::Expr), T(K::RightParen), N(NT::Stmt)] => |r| {
                let condition = r.skip().skip().boxed();
                let then_branch = r.skip().boxed();
                r.op(Op::If { condition, then_branch })
            };
            Stmt => [
                T(K::If), T(K::LeftParen), N(NT::Expr), T(K::RightParen), N(NT::Stmt), T(K::Else), N(NT::Stmt)
            ] => |r| {
                let condition = r.skip().skip().boxed();
                let then_branch = r.skip().boxed();
                let else_branch = r.skip().boxed();
                r.op(Op::IfElse { condition, then_branch, else_branch })
            };
            Stmt => [T(K::While), T(K::LeftParen), N(NT::Expr), T(K::RightParen), N(NT::Stmt)] => |r| {
                let condition = r.skip().skip().boxed();
                let body = r.skip().boxed();
                r.op(Op::While { condition, body })
            };
            Stmt => [
                T(K::Do), N(NT::Stmt), T(K::While), T(K::LeftParen), N(NT::Expr), T(K::RightParen), T(K::Semicolon)
            ] => |r| {
                let body = r.skip().boxed();
                let condition = r.skip().skip().boxed();
                r.op(Op::DoWhile { body, condition })
            };
            Stmt => [
                T(K::For), T(K::LeftParen), N(NT::Assignment), T(K::Semicolon), N(NT::Expr),
                T(K::Semicolon), N(NT::Assignment), T(K::RightParen), N(NT::Stmt)
            ] => |r| {
                let init = r.skip().skip().boxed();
                let condition = r.skip().boxed();
                let step = r.skip().boxed();
                let body = r.skip().boxed();
                r.op(Op::For { init, condition, step, body })
            };
            Stmt => [T(K::Use), T(K::Identifier), T(K::Semicolon)] => |r| {
                let name = r.skip().name();
                r.op(Op::Use(name))
            };
            Stmt => [T(K::Delete), N(NT::Expr), T(K::Semicolon)] => |r| {
                let target = r.skip().boxed();
                r.op(Op::Delete(target))
            };
            Stmt => [T(K::Return), T(K::Semicolon)] => |r| r.op(Op::Return(None));
            Stmt => [T(K::Return), N(NT::Expr), T(K::Semicolon)] => |r| {
                let value = r.skip().boxed();
                r.op(Op::Return(Some(value)))
            };
            Stmt => [N(NT::Assignment), T(K::Semicolon)] => pass_through!();
            Stmt => [N(NT::Expr), T(K::Semicolon)] => |r| {
                let expression = r.boxed();
                r.op(Op::Expression(expression))
            };
            Stmt => [T(K::LeftBrace), N(NT::StmtList), T(K::RightBrace)] => |r| {
                let statements = r.skip().nodes();
                r.op(Op::Statements(statements))
            };
            Stmt => [T(K::Semicolon)] => |r| r.op(Op::Statements(vec![]));

            Assignment => [N(NT::Lhs), T(K::Assign), N(NT::Expr)] => |r| {
                let target = r.lhs();
                let value = r.skip().boxed();
                r.op(Op::Assign { target, value })
            };
            Lhs => [T(K::Identifier)] => |r| StackValue::Lhs(AssignTarget::Variable(r.name()));
            Lhs => [N(NT::ExtValue), T(K::Dot), N(NT::PropName)] => |r| {
                let object = r.boxed();
                let name = r.skip().name();
                StackValue::Lhs(AssignTarget::Property { object, name })
            };
            Lhs => [N(NT::ExtValue), T(K::LeftBracket), N(NT::Expr), T(K::RightBracket)] => |r| {
                let base = r.boxed();
                let index = r.skip().boxed();
                StackValue::Lhs(AssignTarget::Index { base, index })
            };

            Expr => [N(NT::LogicalOr)] => pass_through!();
            Expr => [N(NT::LogicalOr), T(K::Question), N(NT::Expr), T(K::Colon), N(NT::Expr)] => |r| {
                let condition = r.boxed();
                let then_value = r.skip().boxed();
                let else_value = r.skip().boxed();
                r.op(Op::Conditional { condition, then_value, else_value })
            };
            Expr => [
                T(K::Map), T(K::LeftParen), N(NT::Params), T(K::RightParen), T(K::Arrow), N(NT::Expr)
            ] => |r| {
                let params = r.skip().skip().names();
                let body = r.skip().skip().node();
                let span = r.span;
                r.op(Op::Map(Rc::new(FunctionLiteral { params, body, span })))
            };

            LogicalOr => [N(NT::LogicalOr), T(K::Or), N(NT::LogicalAnd)] => binary!(Or);
            LogicalOr => [N(NT::LogicalAnd)] => pass_through!();
            LogicalAnd => [N(NT::LogicalAnd), T(K::And), N(NT::Compare)] => binary!(And);
            LogicalAnd => [N(NT::Compare)] => pass_through!();

            Compare => [N(NT::Compare), T(K::Equal), N(NT::AddSub)] => binary!(Equal);
            Compare => [N(NT::Compare), T(K::NotEqual), N(NT::AddSub)] => binary!(NotEqual);
            Compare => [N(NT::Compare), T(K::Approx), N(NT::AddSub)] => binary!(Approx);
            Compare => [N(NT::Compare), T(K::Less), N(NT::AddSub)] => binary!(Less);
            Compare => [N(NT::Compare), T(K::Greater), N(NT::AddSub)] => binary!(Greater);
            Compare => [N(NT::Compare), T(K::LessEqual), N(NT::AddSub)] => binary!(LessEqual);
            Compare => [N(NT::Compare), T(K::GreaterEqual), N(NT::AddSub)] => binary!(GreaterEqual);
            Compare => [N(NT::AddSub)] => pass_through!();

            AddSub => [N(NT::AddSub), T(K::Plus), N(NT::MulDiv)] => binary!(Add);
            AddSub => [N(NT::AddSub), T(K::Minus), N(NT::MulDiv)] => binary!(Subtract);
            AddSub => [N(NT::MulDiv)] => pass_through!();

            MulDiv => [N(NT::MulDiv), T(K::Star), N(NT::Unary)] => binary!(Multiply);
            MulDiv => [N(NT::MulDiv), T(K::Slash), N(NT::Unary)] => binary!(Divide);
            MulDiv => [N(NT::MulDiv), T(K::Percent), N(NT::Unary)] => binary!(Modulo);
            MulDiv => [N(NT::Unary)] => pass_through!();

            Unary => [T(K::Minus), N(NT::Unary)] => |r| {
                let operand = r.skip().boxed();
                r.op(Op::Unary { operator: UnaryOperator::Negate, operand })
            };
            // unary plus has no runtime meaning
            Unary => [T(K::Plus), N(NT::Unary)] => |r| {
                let mut operand = r.skip().node();
                operand.span = r.span;
                StackValue::Node(operand)
            };
            Unary => [T(K::Bang), N(NT::Unary)] => |r| {
                let operand = r.skip().boxed();
                r.op(Op::Unary { operator: UnaryOperator::Not, operand })
            };
            Unary => [N(NT::Power)] => pass_through!();

            Power => [N(NT::ExtValue), T(K::Caret), N(NT::Unary)] => binary!(Power);
            Power => [N(NT::ExtValue)] => pass_through!();

            ExtValue => [N(NT::ExtValue), T(K::LeftBracket), N(NT::Expr), T(K::RightBracket)] => |r| {
                let base = r.boxed();
                let index = r.skip().boxed();
                r.op(Op::Index { base, index })
            };
            ExtValue => [N(NT::ExtValue), T(K::Dot), N(NT::PropName)] => |r| {
                let object = r.boxed();
                let name = r.skip().name();
                r.leaf(NodeKind::Property { object, name })
            };
            ExtValue => [N(NT::ExtValue), T(K::LeftParen), N(NT::Args), T(K::RightParen)] => |r| {
                let callee = r.boxed();
                let args = r.skip().nodes();
                r.op(Op::Call { callee, args, attributes: None })
            };
            ExtValue => [
                N(NT::ExtValue), T(K::LeftParen), N(NT::Args), T(K::RightParen), N(NT::ObjectLit)
            ] => |r| {
                let callee = r.boxed();
                let args = r.skip().nodes();
                let attributes = match r.skip().node().kind {
                    NodeKind::Op(Op::Object(properties)) => properties,
                    other => unreachable!("object literal reduced to {:?}", other),
                };
                r.op(Op::Call { callee, args, attributes: Some(attributes) })
            };
            ExtValue => [N(NT::Value)] => pass_through!();

            Value => [T(K::Integer)] => |r| {
                let token = r.token();
                r.leaf(number(token, NumberKind::Integer))
            };
            Value => [T(K::Float)] => |r| {
                let token = r.token();
                r.leaf(number(token, NumberKind::Float))
            };
            Value => [T(K::String)] => |r| {
                let token = r.token();
                r.leaf(NodeKind::String(unescape_string_literal(&token.lexeme)))
            };
            Value => [T(K::True)] => |r| r.leaf(NodeKind::Boolean(true));
            Value => [T(K::False)] => |r| r.leaf(NodeKind::Boolean(false));
            Value => [T(K::Identifier)] => |r| {
                let token = r.token();
                r.leaf(NodeKind::Identifier(token.lexeme))
            };
            Value => [T(K::LeftParen), N(NT::Expr), T(K::RightParen)] => |r| {
                let mut inner = r.skip().node();
                inner.span = r.span;
                StackValue::Node(inner)
            };
            Value => [
                T(K::Function), T(K::LeftParen), N(NT::Params), T(K::RightParen),
                T(K::LeftBrace), N(NT::StmtList), T(K::RightBrace)
            ] => |r| {
                let function = function_literal(r, true);
                r.op(Op::Function(function))
            };
            Value => [N(NT::ObjectLit)] => pass_through!();
            Value => [T(K::LeftBracket), N(NT::Args), T(K::RightBracket)] => |r| {
                let items = r.skip().nodes();
                r.op(Op::Array(items))
            };
            Value => [T(K::CoordX), T(K::LeftParen), N(NT::Expr), T(K::RightParen)] => |r| {
                let target = r.skip().skip().boxed();
                r.leaf(NodeKind::Coordinate { axis: Axis::X, target })
            };
            Value => [T(K::CoordY), T(K::LeftParen), N(NT::Expr), T(K::RightParen)] => |r| {
                let target = r.skip().skip().boxed();
                r.leaf(NodeKind::Coordinate { axis: Axis::Y, target })
            };

            ObjectLit => [T(K::ObjectOpen), N(NT::Props), T(K::ObjectClose)] => |r| {
                let properties = r.skip().props();
                r.op(Op::Object(properties))
            };
            ObjectLit => [T(K::ObjectOpen), T(K::ObjectClose)] => |r| r.op(Op::Object(vec![]));
            Props => [
                N(NT::Props), T(K::Comma), T(K::Identifier), T(K::Colon), N(NT::Expr)
            ] => |r| {
                let mut properties = r.props();
                let name = r.skip().name();
                let value = r.skip().node();
                properties.push(PropertyDef { name, value });
                StackValue::Props(properties)
            };
            Props => [T(K::Identifier), T(K::Colon), N(NT::Expr)] => |r| {
                let name = r.name();
                let value = r.skip().node();
                StackValue::Props(vec![PropertyDef { name, value }])
            };

            Args => [] => |_| StackValue::Nodes(vec![]);
            Args => [N(NT::ArgList)] => pass_through!();
            ArgList => [N(NT::ArgList), T(K::Comma), N(NT::Expr)] => |r| {
                let mut args = r.nodes();
                args.push(r.skip().node());
                StackValue::Nodes(args)
            };
            ArgList => [N(NT::Expr)] => |r| StackValue::Nodes(vec![r.node()]);

            Params => [] => |_| StackValue::Names(vec![]);
            Params => [N(NT::ParamList)] => pass_through!();
            ParamList => [N(NT::ParamList), T(K::Comma), T(K::Identifier)] => |r| {
                let mut params = r.names();
                params.push(r.skip().name());
                StackValue::Names(params)
            };
            ParamList => [T(K::Identifier)] => |r| StackValue::Names(vec![r.name()]);

            PropName => [T(K::Identifier)] => |r| StackValue::Name(r.name());
            PropName => [T(K::CoordX)] => |r| StackValue::Name(r.name());
            PropName => [T(K::CoordY)] => |r| StackValue::Name(r.name());
        };
        Self { rules }
    }

    pub fn rule(&self, index: usize) -> &Rule {
        &self.rules[index]
    }

    pub fn rules_for(&self, lhs: NT) -> impl Iterator<Item = (usize, &Rule)> {
        self.rules
            .iter()
            .enumerate()
            .filter(move |(_, rule)| rule.lhs == lhs)
    }
}

lazy_static! {
    pub static ref GRAMMAR: Grammar = Grammar::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_rule_comes_first() {
        let start = GRAMMAR.rule(0);
        assert_eq!(start.lhs, NT::Accept);
        assert_eq!(start.rhs, vec![N(NT::Program)]);
        assert_eq!(GRAMMAR.rules_for(NT::Accept).count(), 1);
    }

    #[test]
    fn every_nonterminal_has_a_rule() {
        for rule in &GRAMMAR.rules {
            for symbol in &rule.rhs {
                if let N(non_terminal) = symbol {
                    assert!(
                        GRAMMAR.rules_for(*non_terminal).next().is_some(),
                        "{} has no productions",
                        non_terminal
                    );
                }
            }
        }
    }

    #[test]
    fn rules_render_readably() {
        let empty = GRAMMAR.rules_for(NT::Args).next().map(|(_, rule)| format!("{:?}", rule));
        assert_eq!(empty.as_deref(), Some("Args -> ε"));
    }
}

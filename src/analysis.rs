//! Static scans over function bodies.

use std::collections::BTreeSet;

use crate::ast::{AssignTarget, BinaryOperator, Node, NodeKind, Op, UnaryOperator};

/// Calls `visit` on every direct child of `node`, in source order.
pub fn for_each_child<'a>(node: &'a Node, visit: &mut impl FnMut(&'a Node)) {
    match &node.kind {
        NodeKind::Identifier(_) | NodeKind::Number(_) | NodeKind::String(_) | NodeKind::Boolean(_) => {}
        NodeKind::Coordinate { target, .. } => visit(target),
        NodeKind::Property { object, .. } => visit(object),
        NodeKind::Op(op) => match op {
            Op::Statements(nodes) | Op::Array(nodes) => nodes.iter().for_each(|node| visit(node)),
            Op::Assign { target, value } => {
                match target {
                    AssignTarget::Variable(_) => {}
                    AssignTarget::Property { object, .. } => visit(object),
                    AssignTarget::Index { base, index } => {
                        visit(base);
                        visit(index);
                    }
                }
                visit(value);
            }
            Op::If {
                condition,
                then_branch,
            } => {
                visit(condition);
                visit(then_branch);
            }
            Op::IfElse {
                condition,
                then_branch,
                else_branch,
            } => {
                visit(condition);
                visit(then_branch);
                visit(else_branch);
            }
            Op::Conditional {
                condition,
                then_value,
                else_value,
            } => {
                visit(condition);
                visit(then_value);
                visit(else_value);
            }
            Op::While { condition, body } => {
                visit(condition);
                visit(body);
            }
            Op::DoWhile { body, condition } => {
                visit(body);
                visit(condition);
            }
            Op::For {
                init,
                condition,
                step,
                body,
            } => {
                visit(init);
                visit(condition);
                visit(step);
                visit(body);
            }
            Op::Use(_) | Op::Return(None) => {}
            Op::Delete(node) | Op::Expression(node) | Op::Return(Some(node)) => visit(node),
            Op::Function(function) | Op::Map(function) => visit(&function.body),
            Op::Call {
                callee,
                args,
                attributes,
            } => {
                visit(callee);
                args.iter().for_each(|arg| visit(arg));
                attributes
                    .iter()
                    .flatten()
                    .for_each(|property| visit(&property.value));
            }
            Op::Object(properties) => properties
                .iter()
                .for_each(|property| visit(&property.value)),
            Op::Index { base, index } => {
                visit(base);
                visit(index);
            }
            Op::Binary { left, right, .. } => {
                visit(left);
                visit(right);
            }
            Op::Unary { operand, .. } => visit(operand),
        },
    }
}

/// Names a body may refer to host objects by: bare identifiers and the literal
/// argument of `$('name')` lookups.
pub fn referenced_names(body: &Node) -> BTreeSet<String> {
    fn scan(node: &Node, names: &mut BTreeSet<String>) {
        match &node.kind {
            NodeKind::Identifier(name) => {
                names.insert(name.clone());
            }
            NodeKind::Op(Op::Call { callee, args, .. })
                if callee.as_identifier() == Some("$") =>
            {
                if let Some(NodeKind::String(name)) = args.first().map(|arg| &arg.kind) {
                    names.insert(name.clone());
                }
            }
            _ => {}
        }
        for_each_child(node, &mut |child| scan(child, names));
    }

    let mut names = BTreeSet::new();
    scan(body, &mut names);
    names
}

/// Checks that a `map` body only computes a number. Returns the first offending node.
pub fn check_math_only(node: &Node) -> Result<(), &Node> {
    match &node.kind {
        NodeKind::Number(_) | NodeKind::Identifier(_) => Ok(()),
        NodeKind::Coordinate { target, .. } => check_math_only(target),
        NodeKind::Property { object, .. } => check_math_only(object),
        NodeKind::Op(Op::Binary {
            operator,
            left,
            right,
        }) => match operator {
            BinaryOperator::Add
            | BinaryOperator::Subtract
            | BinaryOperator::Multiply
            | BinaryOperator::Divide
            | BinaryOperator::Modulo
            | BinaryOperator::Power => {
                check_math_only(left)?;
                check_math_only(right)
            }
            _ => Err(node),
        },
        NodeKind::Op(Op::Unary {
            operator: UnaryOperator::Negate,
            operand,
        }) => check_math_only(operand),
        NodeKind::Op(Op::Call {
            callee,
            args,
            attributes: None,
        }) => match &callee.kind {
            NodeKind::Identifier(_) | NodeKind::Property { .. } => {
                args.iter().try_for_each(check_math_only)
            }
            _ => Err(callee),
        },
        _ => Err(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::Parser, scanner::Scanner, ParserOpts, SourceReference};
    use pretty_assertions::assert_eq;

    fn expression(source: &str) -> Node {
        let wrapped = format!("{};", source);
        let source_reference = SourceReference::new("test".to_string(), wrapped.clone());
        let (program, errors) =
            Parser::parse(Scanner::new(&wrapped), source_reference, ParserOpts::default());
        assert!(errors.is_empty(), "{:?}", errors);
        match program.map(|program| program.root.kind) {
            Some(NodeKind::Op(Op::Statements(mut statements))) => match statements.pop() {
                Some(Node {
                    kind: NodeKind::Op(Op::Expression(expression)),
                    ..
                }) => *expression,
                other => panic!("not an expression statement: {:?}", other),
            },
            other => panic!("unexpected program {:?}", other),
        }
    }

    #[test]
    fn math_bodies_are_accepted() {
        for source in ["x^2 + 1", "-sin(x) * A.radius", "X(p) / 2 % 3", "max(a, b(c))"] {
            assert_eq!(check_math_only(&expression(source)), Ok(()), "{}", source);
        }
    }

    #[test]
    fn non_math_bodies_are_rejected() {
        let node = expression("x + 'a'");
        let offending = check_math_only(&node).err().map(|node| node.to_string());
        assert_eq!(offending.as_deref(), Some("\"a\""));

        for source in ["x == 1", "[1, 2]", "f(1) << a: 1 >>", "a ? 1 : 2", "!x", "o[0]"] {
            assert!(check_math_only(&expression(source)).is_err(), "{}", source);
        }
    }

    #[test]
    fn referenced_names_include_lookups() {
        let node = expression("function () { q = $('A'); return B.x + q; }");
        let names: Vec<String> = referenced_names(&node).into_iter().collect();
        assert_eq!(names, vec!["$", "A", "B", "q"]);
    }
}

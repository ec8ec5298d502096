use std::{convert::TryFrom, rc::Rc};

use super::chunk::{Chunk, Constant, ConstantAddress, FunctionProto, OpCode};
use crate::{
    analysis::check_math_only,
    ast::*,
    codegen::{self, CompileError},
    SourceReference, SourceSpan,
};

/// Single pass from the syntax tree to bytecode. Every node compiles to code that leaves
/// exactly one value on the stack.
pub struct Compiler<'s> {
    chunk: Chunk,
    source_code: &'s SourceReference,
    in_function: bool,
}

impl<'s> Compiler<'s> {
    pub fn compile_script(node: &Node, source_code: &'s SourceReference) -> Result<Chunk, CompileError> {
        let mut compiler = Self {
            chunk: Chunk::new("<script>", source_code.clone()),
            source_code,
            in_function: false,
        };
        compiler.compile_node(node)?;
        compiler.chunk.write_op(OpCode::End, node.span);
        Ok(compiler.chunk)
    }

    fn compile_function(
        &self,
        literal: &Rc<FunctionLiteral>,
        is_map: bool,
    ) -> Result<FunctionProto, CompileError> {
        let line = self.source_code.line_of(literal.span.start());
        let name = match is_map {
            true => format!("map@{}", line),
            false => format!("function@{}", line),
        };
        let mut compiler = Compiler {
            chunk: Chunk::new(name, self.source_code.clone()),
            source_code: self.source_code,
            in_function: true,
        };
        let body = &literal.body;
        if is_map {
            check_math_only(body).map_err(|node| CompileError::NonMathClosureBody {
                found_at: node.span,
                source_code: self.source_code.clone(),
            })?;
            compiler.compile_node(body)?;
        } else {
            compiler.compile_node(body)?;
            compiler.chunk.write_op(OpCode::Pop, body.span);
            compiler.chunk.write_op(OpCode::Undefined, body.span);
        }
        compiler.chunk.write_op(OpCode::Return, body.span);
        Ok(FunctionProto {
            literal: literal.clone(),
            is_map,
            chunk: Rc::new(compiler.chunk),
        })
    }

    fn constant(&mut self, constant: Constant, span: SourceSpan) -> Result<ConstantAddress, CompileError> {
        self.chunk
            .register_constant(constant)
            .ok_or_else(|| CompileError::TooManyConstants {
                found_at: span,
                source_code: self.source_code.clone(),
            })
    }
    fn name(&mut self, name: &str, span: SourceSpan) -> Result<ConstantAddress, CompileError> {
        self.constant(Constant::String(Rc::new(name.to_string())), span)
    }
    fn write_with_name(&mut self, op: OpCode, name: &str, span: SourceSpan) -> Result<(), CompileError> {
        let address = self.name(name, span)?;
        self.chunk.write_op(op, span);
        self.chunk.write_address(address);
        Ok(())
    }
    fn count(&self, what: &str, count: usize, span: SourceSpan) -> Result<u8, CompileError> {
        u8::try_from(count).map_err(|_| CompileError::TooManyOperands {
            what: what.to_string(),
            found_at: span,
            source_code: self.source_code.clone(),
        })
    }

    fn patch_jump(&mut self, offset: usize, span: SourceSpan) -> Result<(), CompileError> {
        let distance = self.chunk.len() - offset - 2;
        let distance = u16::try_from(distance).map_err(|_| CompileError::JumpTooLong {
            found_at: span,
            source_code: self.source_code.clone(),
        })?;
        self.chunk.patch_u16(offset, distance);
        Ok(())
    }
    fn write_loop(&mut self, loop_start: usize, span: SourceSpan) -> Result<(), CompileError> {
        self.chunk.write_op(OpCode::Loop, span);
        let distance = self.chunk.len() + 2 - loop_start;
        let [high, low] = u16::try_from(distance)
            .map_err(|_| CompileError::JumpTooLong {
                found_at: span,
                source_code: self.source_code.clone(),
            })?
            .to_be_bytes();
        self.chunk.write_byte(high);
        self.chunk.write_byte(low);
        Ok(())
    }

    fn compile_node(&mut self, node: &Node) -> Result<(), CompileError> {
        let span = node.span;
        match &node.kind {
            NodeKind::Op(op) => self.compile_op(op, span),
            NodeKind::Identifier(name) => self.write_with_name(OpCode::GetName, name, span),
            NodeKind::Number(number) => {
                let address = self.constant(Constant::Number(number.value()), span)?;
                self.chunk.write_op(OpCode::Constant, span);
                self.chunk.write_address(address);
                Ok(())
            }
            NodeKind::String(value) => {
                let address = self.constant(Constant::String(Rc::new(value.clone())), span)?;
                self.chunk.write_op(OpCode::Constant, span);
                self.chunk.write_address(address);
                Ok(())
            }
            NodeKind::Boolean(value) => {
                self.chunk
                    .write_op(if *value { OpCode::True } else { OpCode::False }, span);
                Ok(())
            }
            NodeKind::Coordinate { axis, target } => {
                self.compile_node(target)?;
                self.chunk.write_op(OpCode::Coordinate, span);
                self.chunk.write_byte((*axis).into());
                Ok(())
            }
            NodeKind::Property { object, name } => {
                self.compile_node(object)?;
                self.write_with_name(OpCode::GetProperty, &name.name, name.span)
            }
        }
    }

    fn compile_op(&mut self, op: &Op, span: SourceSpan) -> Result<(), CompileError> {
        match op {
            Op::Statements(statements) => {
                if statements.is_empty() {
                    self.chunk.write_op(OpCode::Undefined, span);
                }
                for (position, statement) in statements.iter().enumerate() {
                    if position > 0 {
                        self.chunk.write_op(OpCode::Pop, statement.span);
                    }
                    self.compile_node(statement)?;
                }
            }
            Op::Assign { target, value } => self.compile_assign(target, value)?,
            Op::If {
                condition,
                then_branch,
            } => self.compile_branches(condition, then_branch, None, span)?,
            Op::IfElse {
                condition,
                then_branch,
                else_branch,
            } => self.compile_branches(condition, then_branch, Some(else_branch), span)?,
            Op::Conditional {
                condition,
                then_value,
                else_value,
            } => self.compile_branches(condition, then_value, Some(else_value), span)?,
            Op::While { condition, body } => {
                let loop_start = self.chunk.len();
                self.compile_node(condition)?;
                let exit = self.chunk.write_jump(OpCode::JumpIfFalse, span);
                self.chunk.write_op(OpCode::Pop, span);
                self.compile_node(body)?;
                self.chunk.write_op(OpCode::Pop, span);
                self.write_loop(loop_start, span)?;
                self.end_loop(exit, span)?;
            }
            Op::DoWhile { body, condition } => {
                let loop_start = self.chunk.len();
                self.compile_node(body)?;
                self.chunk.write_op(OpCode::Pop, span);
                self.compile_node(condition)?;
                let exit = self.chunk.write_jump(OpCode::JumpIfFalse, span);
                self.chunk.write_op(OpCode::Pop, span);
                self.write_loop(loop_start, span)?;
                self.end_loop(exit, span)?;
            }
            Op::For {
                init,
                condition,
                step,
                body,
            } => {
                self.compile_node(init)?;
                self.chunk.write_op(OpCode::Pop, span);
                let loop_start = self.chunk.len();
                self.compile_node(condition)?;
                let exit = self.chunk.write_jump(OpCode::JumpIfFalse, span);
                self.chunk.write_op(OpCode::Pop, span);
                self.compile_node(body)?;
                self.chunk.write_op(OpCode::Pop, span);
                self.compile_node(step)?;
                self.chunk.write_op(OpCode::Pop, span);
                self.write_loop(loop_start, span)?;
                self.end_loop(exit, span)?;
            }
            Op::Use(identifier) => self.write_with_name(OpCode::Use, &identifier.name, span)?,
            Op::Delete(target) => {
                self.compile_node(target)?;
                self.chunk.write_op(OpCode::Delete, span);
            }
            Op::Return(value) => {
                // at script level the value is never evaluated: the return itself fails
                match value {
                    Some(value) if self.in_function => self.compile_node(value)?,
                    _ => self.chunk.write_op(OpCode::Undefined, span),
                }
                self.chunk.write_op(OpCode::Return, span);
            }
            Op::Expression(expression) => self.compile_node(expression)?,
            Op::Function(literal) => self.compile_closure(literal, false, span)?,
            Op::Map(literal) => self.compile_closure(literal, true, span)?,
            Op::Call {
                callee,
                args,
                attributes,
            } => self.compile_call(callee, args, attributes.as_deref(), None, span)?,
            Op::Array(items) => {
                let count = self.count("array elements", items.len(), span)?;
                for item in items {
                    self.compile_node(item)?;
                }
                self.chunk.write_op(OpCode::Array, span);
                self.chunk.write_byte(count);
            }
            Op::Object(properties) => self.compile_object(properties, span)?,
            Op::Index { base, index } => {
                self.compile_node(base)?;
                self.compile_node(index)?;
                self.chunk.write_op(OpCode::GetIndex, span);
            }
            Op::Binary {
                operator: BinaryOperator::And,
                left,
                right,
            } => {
                self.compile_node(left)?;
                let end = self.chunk.write_jump(OpCode::JumpIfFalse, span);
                self.chunk.write_op(OpCode::Pop, span);
                self.compile_node(right)?;
                self.patch_jump(end, span)?;
            }
            Op::Binary {
                operator: BinaryOperator::Or,
                left,
                right,
            } => {
                self.compile_node(left)?;
                let else_jump = self.chunk.write_jump(OpCode::JumpIfFalse, span);
                let end = self.chunk.write_jump(OpCode::Jump, span);
                self.patch_jump(else_jump, span)?;
                self.chunk.write_op(OpCode::Pop, span);
                self.compile_node(right)?;
                self.patch_jump(end, span)?;
            }
            Op::Binary {
                operator,
                left,
                right,
            } => {
                self.compile_node(left)?;
                self.compile_node(right)?;
                self.chunk.write_op(OpCode::Binary, span);
                self.chunk.write_byte((*operator).into());
            }
            Op::Unary { operator, operand } => {
                self.compile_node(operand)?;
                let op = match operator {
                    UnaryOperator::Negate => OpCode::Negate,
                    UnaryOperator::Not => OpCode::Not,
                };
                self.chunk.write_op(op, span);
            }
        }
        Ok(())
    }

    fn end_loop(&mut self, exit: usize, span: SourceSpan) -> Result<(), CompileError> {
        self.patch_jump(exit, span)?;
        self.chunk.write_op(OpCode::Pop, span);
        self.chunk.write_op(OpCode::Undefined, span);
        Ok(())
    }

    fn compile_branches(
        &mut self,
        condition: &Node,
        then_branch: &Node,
        else_branch: Option<&Node>,
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        self.compile_node(condition)?;
        let else_jump = self.chunk.write_jump(OpCode::JumpIfFalse, span);
        self.chunk.write_op(OpCode::Pop, span);
        self.compile_node(then_branch)?;
        let end = self.chunk.write_jump(OpCode::Jump, span);
        self.patch_jump(else_jump, span)?;
        self.chunk.write_op(OpCode::Pop, span);
        match else_branch {
            Some(else_branch) => self.compile_node(else_branch)?,
            None => self.chunk.write_op(OpCode::Undefined, span),
        }
        self.patch_jump(end, span)
    }

    fn compile_assign(&mut self, target: &AssignTarget, value: &Node) -> Result<(), CompileError> {
        match target {
            AssignTarget::Variable(identifier) => {
                match value.as_op() {
                    Some(Op::Call {
                        callee,
                        args,
                        attributes,
                    }) => self.compile_call(
                        callee,
                        args,
                        attributes.as_deref(),
                        Some(&identifier.name),
                        value.span,
                    )?,
                    _ => self.compile_node(value)?,
                }
                self.write_with_name(OpCode::SetLocal, &identifier.name, identifier.span)
            }
            AssignTarget::Property { object, name } => {
                self.compile_node(object)?;
                self.compile_node(value)?;
                self.write_with_name(OpCode::SetProperty, &name.name, name.span)
            }
            AssignTarget::Index { base, index } => {
                self.compile_node(base)?;
                self.compile_node(index)?;
                self.compile_node(value)?;
                self.chunk.write_op(OpCode::SetIndex, value.span);
                Ok(())
            }
        }
    }

    fn compile_closure(
        &mut self,
        literal: &Rc<FunctionLiteral>,
        is_map: bool,
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        let proto = self.compile_function(literal, is_map)?;
        let address = self.constant(Constant::Function(Rc::new(proto)), span)?;
        self.chunk.write_op(OpCode::Closure, span);
        self.chunk.write_address(address);
        Ok(())
    }

    fn compile_object(&mut self, properties: &[PropertyDef], span: SourceSpan) -> Result<(), CompileError> {
        let count = self.count("object properties", properties.len(), span)?;
        for property in properties {
            let key = self.name(&property.name.name, property.name.span)?;
            self.chunk.write_op(OpCode::Constant, property.name.span);
            self.chunk.write_address(key);
            self.compile_node(&property.value)?;
        }
        self.chunk.write_op(OpCode::Object, span);
        self.chunk.write_byte(count);
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: &Node,
        args: &[Node],
        attributes: Option<&[PropertyDef]>,
        default_name: Option<&str>,
        span: SourceSpan,
    ) -> Result<(), CompileError> {
        let callee_text = match callee.as_identifier() {
            Some(name) => {
                self.write_with_name(OpCode::GetCallee, name, callee.span)?;
                name.to_string()
            }
            None => {
                self.compile_node(callee)?;
                codegen::to_surface(callee)
            }
        };
        let argc = self.count("arguments", args.len(), span)?;
        for arg in args {
            self.compile_node(arg)?;
        }
        let callee_text = self.name(&callee_text, span)?;
        match (attributes, default_name) {
            (Some(properties), _) => {
                self.compile_object(properties, span)?;
                self.chunk.write_op(OpCode::CallWithAttributes, span);
                self.chunk.write_byte(argc);
                self.chunk.write_address(callee_text);
            }
            (None, Some(name)) => {
                let name = self.name(name, span)?;
                self.chunk.write_op(OpCode::CallNamed, span);
                self.chunk.write_byte(argc);
                self.chunk.write_address(callee_text);
                self.chunk.write_address(name);
            }
            (None, None) => {
                self.chunk.write_op(OpCode::Call, span);
                self.chunk.write_byte(argc);
                self.chunk.write_address(callee_text);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Parser, ParserOpts, Scanner};
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Result<Chunk, CompileError> {
        let source_reference = SourceReference::new("test".to_string(), source.to_string());
        let (program, errors) = Parser::parse(
            Scanner::new(source),
            source_reference.clone(),
            ParserOpts::default(),
        );
        assert!(errors.is_empty(), "{:?}", errors);
        match program {
            Some(program) => Compiler::compile_script(&program.root, &source_reference),
            None => panic!("no program"),
        }
    }

    fn ops(chunk: &Chunk) -> Vec<OpCode> {
        let mut offset = 0;
        let mut ops = vec![];
        while offset < chunk.len() {
            match chunk.read_op_code(offset) {
                Ok((_, op)) => ops.push(op),
                Err(error) => panic!("{}", error),
            }
            offset = chunk.next_instruction(offset).unwrap_or(chunk.len());
        }
        ops
    }

    #[test]
    fn statements_leave_one_value() -> Result<(), CompileError> {
        use OpCode::*;
        let chunk = compile("a = 1; a + 2;")?;
        assert_eq!(
            ops(&chunk),
            vec![Constant, SetLocal, Pop, GetName, Constant, Binary, End]
        );
        assert_eq!(chunk.constants().len(), 3);
        Ok(())
    }

    #[test]
    fn short_circuit_and_loops() -> Result<(), CompileError> {
        use OpCode::*;
        assert_eq!(
            ops(&compile("a || b;")?),
            vec![GetName, JumpIfFalse, Jump, Pop, GetName, End]
        );
        assert_eq!(
            ops(&compile("while (x) x = x - 1;")?),
            vec![
                GetName, JumpIfFalse, Pop, GetName, Constant, Binary, SetLocal, Pop, Loop, Pop,
                Undefined, End
            ]
        );
        Ok(())
    }

    #[test]
    fn calls_carry_the_assigned_name() -> Result<(), CompileError> {
        use OpCode::*;
        let chunk = compile("A = point(1, 2); p.f() << a: 1 >>;")?;
        assert_eq!(
            ops(&chunk),
            vec![
                GetCallee, Constant, Constant, CallNamed, SetLocal, Pop, GetName, GetProperty,
                Constant, Constant, Object, CallWithAttributes, End
            ]
        );
        Ok(())
    }

    #[test]
    fn functions_compile_to_nested_chunks() -> Result<(), CompileError> {
        let chunk = compile("f = function (x) {\n return x; };\ng = map (t) -> t ^ 2;")?;
        let names: Vec<String> = chunk
            .constants()
            .iter()
            .filter_map(|constant| match constant {
                Constant::Function(proto) => Some(proto.chunk.name().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["function@1".to_string(), "map@3".to_string()]);
        Ok(())
    }

    #[test]
    fn map_bodies_must_be_math() {
        assert!(matches!(
            compile("f = map (x) -> 'a';"),
            Err(CompileError::NonMathClosureBody { .. })
        ));
    }
}

use std::{collections::BTreeMap, convert::TryFrom, io::Write};

use super::chunk::{Chunk, CodeReadError, Constant, OpCode};
use crate::{
    ast::{Axis, BinaryOperator, UnaryOperator},
    codegen::CompileError,
    tree_walk_interpreter::{
        binary_op, get_index, unary_op, CallSite, Closure, Ctx, Interpreter, PlainObject,
        RuntimeError, RuntimeValue,
    },
};

impl From<CodeReadError> for RuntimeError {
    fn from(cause: CodeReadError) -> Self {
        CompileError::from(cause).into()
    }
}

/// Stack machine for one chunk. Functions run in a fresh `Vm` on the same interpreter, so
/// scopes, builtins and the host are shared with the tree walker.
pub struct Vm<'c> {
    chunk: &'c Chunk,
    ctx: &'c Ctx,
    ip: usize,
    stack: Vec<RuntimeValue>,
}

impl<'c> Vm<'c> {
    pub fn run<W: Write>(
        interpreter: &mut Interpreter<W>,
        chunk: &'c Chunk,
        ctx: &'c Ctx,
    ) -> Result<RuntimeValue, RuntimeError> {
        let mut vm = Vm {
            chunk,
            ctx,
            ip: 0,
            stack: vec![],
        };
        vm.execute(interpreter)
    }

    fn execute<W: Write>(
        &mut self,
        interpreter: &mut Interpreter<W>,
    ) -> Result<RuntimeValue, RuntimeError> {
        let ctx = self.ctx;
        loop {
            let span = self
                .chunk
                .read_debug_span(self.ip)
                .ok_or(CodeReadError::MissingSpan(self.ip))?;
            interpreter.check_cancelled(span, ctx)?;

            #[cfg(feature = "debug")]
            self.trace();

            let op_code = self.next(Chunk::read_op_code)?;
            match op_code {
                OpCode::Constant => {
                    let value = match self.next(Chunk::read_constant_value)? {
                        Constant::Number(value) => RuntimeValue::Number(*value),
                        Constant::String(value) => RuntimeValue::String(value.clone()),
                        Constant::Function(_) => {
                            return Err(self.invalid_operand("a number or string constant").into())
                        }
                    };
                    self.push(value);
                }
                OpCode::Undefined => self.push(RuntimeValue::Undefined),
                OpCode::True => self.push(true.into()),
                OpCode::False => self.push(false.into()),
                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::GetName | OpCode::GetCallee => {
                    let name = self.next(Chunk::read_name)?;
                    let local = interpreter.scopes.lookup_local(&name);
                    let calling = op_code == OpCode::GetCallee;
                    let value = interpreter.resolve_name(local, &name, calling, span, ctx)?;
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let name = self.next(Chunk::read_name)?;
                    let value = self.peek()?.clone();
                    interpreter.assign_local(&name, value, span, ctx);
                }
                OpCode::GetProperty => {
                    let name = self.next(Chunk::read_name)?;
                    let object = self.pop()?;
                    let value = interpreter.get_property(&object, &name, span, ctx)?;
                    self.push(value);
                }
                OpCode::SetProperty => {
                    let name = self.next(Chunk::read_name)?;
                    let value = self.pop()?;
                    let object = self.pop()?;
                    interpreter.set_property(&object, &name, value.clone(), span, ctx)?;
                    self.push(value);
                }
                OpCode::GetIndex => {
                    let index = self.pop()?;
                    let base = self.pop()?;
                    self.push(get_index(&base, &index));
                }
                OpCode::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let base = self.pop()?;
                    interpreter.set_index(&base, &index, value.clone(), span, ctx)?;
                    self.push(value);
                }
                OpCode::Coordinate => {
                    let axis = self.next(Chunk::read_u8)?;
                    let axis = Axis::try_from(axis).map_err(|_| self.invalid_operand("an axis"))?;
                    let target = self.pop()?;
                    let value = interpreter.coordinate(axis, &target, span, ctx)?;
                    self.push(value);
                }
                OpCode::Binary => {
                    let operator = self.next(Chunk::read_u8)?;
                    let operator = BinaryOperator::try_from(operator)
                        .map_err(|_| self.invalid_operand("a binary operator"))?;
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.push(binary_op(operator, &left, &right, span, ctx)?);
                }
                OpCode::Negate | OpCode::Not => {
                    let operator = match op_code {
                        OpCode::Negate => UnaryOperator::Negate,
                        _ => UnaryOperator::Not,
                    };
                    let operand = self.pop()?;
                    self.push(unary_op(operator, &operand, span, ctx)?);
                }
                OpCode::Jump => {
                    let distance = self.next(Chunk::read_u16)?;
                    self.ip += distance as usize;
                }
                OpCode::JumpIfFalse => {
                    let distance = self.next(Chunk::read_u16)?;
                    if !self.peek()?.is_truthy() {
                        self.ip += distance as usize;
                    }
                }
                OpCode::Loop => {
                    let distance = self.next(Chunk::read_u16)?;
                    self.ip = self
                        .ip
                        .checked_sub(distance as usize)
                        .ok_or_else(|| self.invalid_operand("a jump inside the chunk"))?;
                }
                OpCode::Array => {
                    let count = self.next(Chunk::read_u8)?;
                    let items = self.pop_many(count as usize)?;
                    self.push(items.into());
                }
                OpCode::Object => {
                    let count = self.next(Chunk::read_u8)?;
                    let values = self.pop_many(count as usize * 2)?;
                    let entries = self.pairs(values)?;
                    self.push(PlainObject::new(entries).into());
                }
                OpCode::Closure => {
                    let proto = match self.next(Chunk::read_constant_value)? {
                        Constant::Function(proto) => proto.clone(),
                        _ => return Err(self.invalid_operand("a function constant").into()),
                    };
                    let closure = interpreter.make_closure(
                        &proto.literal,
                        proto.is_map,
                        Some(proto.chunk.clone()),
                        ctx,
                    )?;
                    self.push(closure.into());
                }
                OpCode::Call | OpCode::CallWithAttributes | OpCode::CallNamed => {
                    let argc = self.next(Chunk::read_u8)?;
                    let callee_text = self.next(Chunk::read_name)?;
                    let default_name = match op_code {
                        OpCode::CallNamed => Some(self.next(Chunk::read_name)?),
                        _ => None,
                    };
                    let attributes = match op_code {
                        OpCode::CallWithAttributes => match self.pop()? {
                            RuntimeValue::Object(object) => Some(object.entries()),
                            _ => return Err(self.invalid_operand("an attribute object").into()),
                        },
                        _ => None,
                    };
                    let args = self.pop_many(argc as usize)?;
                    let callee = self.pop()?;
                    let site = CallSite {
                        span,
                        callee: &callee_text,
                        default_name: default_name.as_deref().map(String::as_str),
                        ctx,
                    };
                    let value = interpreter.call_value(callee, &args, attributes, &site)?;
                    self.push(value);
                }
                OpCode::Return => {
                    let value = self.pop()?;
                    if interpreter.scopes.is_global() {
                        return Err(interpreter.unexpected_return(span, ctx));
                    }
                    return Ok(value);
                }
                OpCode::End => return Ok(self.stack.pop().unwrap_or(RuntimeValue::Undefined)),
                OpCode::Use => {
                    let name = self.next(Chunk::read_name)?;
                    interpreter.use_session(&name, span, ctx)?;
                    self.push(RuntimeValue::Undefined);
                }
                OpCode::Delete => {
                    let target = self.pop()?;
                    let value = interpreter.delete_value(&target, span, ctx)?;
                    self.push(value);
                }
            }

            #[cfg(feature = "debug_stack")]
            eprintln!("     | stack: {:?}", self.stack);
        }
    }

    #[cfg(feature = "debug")]
    fn trace(&self) {
        match self.chunk.disassemble_instruction_at(self.ip) {
            Ok((_, line)) => eprintln!("{}", line),
            Err(error) => eprintln!("Error reading code: {}", error),
        }
    }

    fn invalid_operand(&self, expected: &'static str) -> CodeReadError {
        CodeReadError::InvalidOperand {
            offset: self.ip,
            expected,
        }
    }
    fn pairs(
        &self,
        values: Vec<RuntimeValue>,
    ) -> Result<BTreeMap<String, RuntimeValue>, CodeReadError> {
        let mut entries = BTreeMap::new();
        let mut values = values.into_iter();
        while let (Some(key), Some(value)) = (values.next(), values.next()) {
            match key {
                RuntimeValue::String(key) => entries.insert(key.to_string(), value),
                _ => return Err(self.invalid_operand("a property name")),
            };
        }
        Ok(entries)
    }

    fn push(&mut self, value: RuntimeValue) {
        self.stack.push(value);
    }
    fn pop(&mut self) -> Result<RuntimeValue, CodeReadError> {
        self.stack.pop().ok_or(CodeReadError::StackUnderflow)
    }
    fn peek(&self) -> Result<&RuntimeValue, CodeReadError> {
        self.stack.last().ok_or(CodeReadError::StackUnderflow)
    }
    fn pop_many(&mut self, count: usize) -> Result<Vec<RuntimeValue>, CodeReadError> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or(CodeReadError::StackUnderflow)?;
        Ok(self.stack.split_off(start))
    }
    fn next<T, F: FnOnce(&'c Chunk, usize) -> Result<(usize, T), CodeReadError>>(
        &mut self,
        read: F,
    ) -> Result<T, CodeReadError> {
        let (next_ip, value) = read(self.chunk, self.ip)?;
        self.ip = next_ip;
        Ok(value)
    }
}

/// Calls a closure whose body was compiled: binds the arguments in a new scope whose
/// parent is the closure's defining scope, entered through its id, and runs the function
/// chunk.
pub fn call_compiled<W: Write>(
    interpreter: &mut Interpreter<W>,
    closure: &Closure,
    chunk: &Chunk,
    args: &[RuntimeValue],
) -> Result<RuntimeValue, RuntimeError> {
    let depth = interpreter.scopes.depth();
    let scope_id = closure.scope_id();
    interpreter
        .scopes
        .enter(scope_id, closure.params(), args)
        .ok_or(CodeReadError::UnknownScope(scope_id))?;
    let result = Vm::run(interpreter, chunk, closure.ctx());
    interpreter.scopes.unwind_to(depth);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InterpreterOpts, SourceReference, SourceSpan};
    use pretty_assertions::assert_eq;

    fn source() -> SourceReference {
        SourceReference::new("test".to_string(), "x = 1;".to_string())
    }

    #[test]
    fn malformed_chunks_are_reported() {
        let span = SourceSpan::from(0..1);
        let mut chunk = Chunk::new("broken", source());
        chunk.write_op(OpCode::Pop, span);
        chunk.write_op(OpCode::End, span);
        let mut output = Vec::new();
        let mut interpreter = Interpreter::new(&mut output);
        let ctx = Ctx::new(source());
        let result = Vm::run(&mut interpreter, &chunk, &ctx).map_err(|error| error.to_string());
        assert_eq!(result, Err("Malformed bytecode: Stack underflow".to_string()));

        let mut chunk = Chunk::new("truncated", source());
        chunk.write_op(OpCode::True, span);
        let result = Vm::run(&mut interpreter, &chunk, &ctx).map_err(|error| error.to_string());
        assert_eq!(
            result,
            Err("Malformed bytecode: No source span for the instruction at index 1".to_string())
        );
    }

    #[test]
    fn assignments_inside_calls_stay_local() -> Result<(), crate::ExecuteError> {
        let mut output = Vec::new();
        let mut interpreter =
            Interpreter::new(&mut output).with_opts(InterpreterOpts::default().compiled());
        interpreter.parse(
            "make = function (start) { n = start; return function () { n = n + 1; return n; }; };
             next = make(10); next(); next();",
        )?;
        // each call writes `n` into its own activation
        assert_eq!(interpreter.snippet("next()")?, RuntimeValue::Number(11.0));
        assert_eq!(interpreter.snippet("n")?, RuntimeValue::Undefined);
        Ok(())
    }
}

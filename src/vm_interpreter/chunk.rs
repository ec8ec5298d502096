use std::{collections::HashMap, convert::TryFrom, fmt::Display, rc::Rc};

use miette::Diagnostic;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;
use thiserror::Error;

use crate::{ast::FunctionLiteral, SourceReference, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantAddress(u8);
impl Display for ConstantAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Instructions. Operands follow the opcode byte; every instruction that finishes an
/// expression leaves exactly one value on the stack.
#[derive(Debug, IntoPrimitive, TryFromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// `address`
    Constant,
    Undefined,
    True,
    False,
    Pop,
    /// `name address`: read a variable.
    GetName,
    /// `name address`: resolve a name in calling position.
    GetCallee,
    /// `name address`: bind the top of the stack in the current scope, leaving it there.
    SetLocal,
    /// `name address`
    GetProperty,
    /// `name address`: object, value -> value
    SetProperty,
    GetIndex,
    /// base, index, value -> value
    SetIndex,
    /// `axis`
    Coordinate,
    /// `operator`
    Binary,
    Negate,
    Not,
    /// `u16 forward offset`
    Jump,
    /// `u16 forward offset`; peeks the condition.
    JumpIfFalse,
    /// `u16 backward offset`
    Loop,
    /// `count`
    Array,
    /// `pair count`: key constant and value for each pair.
    Object,
    /// `function address`
    Closure,
    /// `argument count, callee text address`
    Call,
    /// `argument count, callee text address`; the attribute object is on top of the stack.
    CallWithAttributes,
    /// `argument count, callee text address, name address`: right-hand side of `name = f(...)`.
    CallNamed,
    Return,
    /// End of a script.
    End,
    /// `name address`
    Use,
    Delete,
}

impl OpCode {
    /// Number of operand bytes following the opcode.
    pub fn operand_width(self) -> usize {
        use OpCode::*;
        match self {
            Constant | GetName | GetCallee | SetLocal | GetProperty | SetProperty | Coordinate
            | Binary | Array | Object | Closure | Use => 1,
            Jump | JumpIfFalse | Loop | Call | CallWithAttributes => 2,
            CallNamed => 3,
            Undefined | True | False | Pop | GetIndex | SetIndex | Negate | Not | Return | End
            | Delete => 0,
        }
    }
}

/// A compiled function body plus what is needed to build closures from it.
#[derive(Debug)]
pub struct FunctionProto {
    pub literal: Rc<FunctionLiteral>,
    pub is_map: bool,
    pub chunk: Rc<Chunk>,
}

#[derive(Debug, Clone)]
pub enum Constant {
    Number(f64),
    String(Rc<String>),
    Function(Rc<FunctionProto>),
}
impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Number(value) => write!(f, "{}", value),
            Constant::String(value) => write!(f, "{:?}", value),
            Constant::Function(proto) => write!(f, "<{}>", proto.chunk.name()),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum ConstantKey {
    Number(OrderedFloat<f64>),
    String(Rc<String>),
}

#[derive(Debug)]
pub struct Chunk {
    name: String,
    code: Vec<u8>,
    constants: Vec<Constant>,
    interned: HashMap<ConstantKey, u8>,
    source_code: SourceReference,
    source_spans: Vec<Option<SourceSpan>>,
}

impl Chunk {
    pub fn new(name: impl Into<String>, source_code: SourceReference) -> Self {
        Self {
            name: name.into(),
            code: vec![],
            constants: vec![],
            interned: HashMap::new(),
            source_code,
            source_spans: vec![],
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn code(&self) -> &[u8] {
        &self.code[..]
    }
    pub fn source_code(&self) -> &SourceReference {
        &self.source_code
    }
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Adds a constant, reusing an equal number or string. `None` once the table is full.
    pub fn register_constant(&mut self, constant: Constant) -> Option<ConstantAddress> {
        let key = match &constant {
            Constant::Number(value) => Some(ConstantKey::Number(OrderedFloat(*value))),
            Constant::String(value) => Some(ConstantKey::String(value.clone())),
            Constant::Function(_) => None,
        };
        if let Some(address) = key.as_ref().and_then(|key| self.interned.get(key)) {
            return Some(ConstantAddress(*address));
        }
        let address = u8::try_from(self.constants.len()).ok()?;
        self.constants.push(constant);
        if let Some(key) = key {
            self.interned.insert(key, address);
        }
        Some(ConstantAddress(address))
    }
    pub fn get_constant(&self, address: ConstantAddress) -> Result<&Constant, CodeReadError> {
        self.constants
            .get(address.0 as usize)
            .ok_or(CodeReadError::InvalidConstantAddress(address))
    }

    pub fn write_op(&mut self, op: OpCode, source_span: SourceSpan) {
        self.code.push(op.into());
        self.source_spans.push(Some(source_span));
    }
    pub fn write_byte(&mut self, byte: u8) {
        self.code.push(byte);
        self.source_spans.push(None);
    }
    pub fn write_address(&mut self, address: ConstantAddress) {
        self.write_byte(address.0);
    }
    /// Writes a jump with a placeholder offset and returns where the offset lives.
    pub fn write_jump(&mut self, op: OpCode, source_span: SourceSpan) -> usize {
        self.write_op(op, source_span);
        self.write_byte(0xff);
        self.write_byte(0xff);
        self.code.len() - 2
    }
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        let [high, low] = value.to_be_bytes();
        self.code[offset] = high;
        self.code[offset + 1] = low;
    }
    pub fn len(&self) -> usize {
        self.code.len()
    }
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn read_byte(&self, offset: usize) -> Result<u8, CodeReadError> {
        self.code
            .get(offset)
            .cloned()
            .ok_or(CodeReadError::UnexpectedEnd)
    }
    pub fn read_debug_span(&self, offset: usize) -> Option<SourceSpan> {
        *self.source_spans.get(offset)?
    }
    pub fn read_op_code(&self, offset: usize) -> Result<(usize, OpCode), CodeReadError> {
        let op_code = self.read_byte(offset)?;
        Ok((
            offset + 1,
            OpCode::try_from(op_code).map_err(|_| CodeReadError::InvalidOpCode(offset, op_code))?,
        ))
    }
    pub fn next_instruction(&self, offset: usize) -> Result<usize, CodeReadError> {
        let (offset, op_code) = self.read_op_code(offset)?;
        Ok(offset + op_code.operand_width())
    }
    pub fn read_u8(&self, offset: usize) -> Result<(usize, u8), CodeReadError> {
        Ok((offset + 1, self.read_byte(offset)?))
    }
    pub fn read_u16(&self, offset: usize) -> Result<(usize, u16), CodeReadError> {
        let high = self.read_byte(offset)?;
        let low = self.read_byte(offset + 1)?;
        Ok((offset + 2, u16::from_be_bytes([high, low])))
    }
    pub fn read_constant_address(
        &self,
        offset: usize,
    ) -> Result<(usize, ConstantAddress), CodeReadError> {
        let address = self.read_byte(offset)?;
        Ok((offset + 1, ConstantAddress(address)))
    }
    pub fn read_constant_value(&self, offset: usize) -> Result<(usize, &Constant), CodeReadError> {
        let (offset, address) = self.read_constant_address(offset)?;
        Ok((offset, self.get_constant(address)?))
    }
    pub fn read_name(&self, offset: usize) -> Result<(usize, Rc<String>), CodeReadError> {
        match self.read_constant_value(offset)? {
            (offset, Constant::String(name)) => Ok((offset, name.clone())),
            _ => Err(CodeReadError::InvalidOperand {
                offset,
                expected: "a string constant",
            }),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CodeReadError {
    #[error("Unexpected end of code")]
    UnexpectedEnd,
    #[error("Unexpected opcode {1} at index {0}")]
    InvalidOpCode(usize, u8),
    #[error("Unknown constant {0}")]
    InvalidConstantAddress(ConstantAddress),
    #[error("Expected {expected} at index {offset}")]
    InvalidOperand {
        offset: usize,
        expected: &'static str,
    },
    #[error("No source span for the instruction at index {0}")]
    MissingSpan(usize),
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Scope {0} is no longer alive")]
    UnknownScope(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk() -> Chunk {
        Chunk::new("test", SourceReference::new("test".to_string(), "x".to_string()))
    }

    #[test]
    fn equal_constants_share_an_address() {
        let mut chunk = chunk();
        let one = chunk.register_constant(Constant::Number(1.0));
        let name = chunk.register_constant(Constant::String(Rc::new("a".to_string())));
        assert_eq!(chunk.register_constant(Constant::Number(1.0)), one);
        assert_eq!(
            chunk.register_constant(Constant::String(Rc::new("a".to_string()))),
            name
        );
        assert_eq!(chunk.constants().len(), 2);
        assert_eq!(one.map(|address| address.to_string()), Some("@0".to_string()));
    }

    #[test]
    fn constant_table_is_bounded() {
        let mut chunk = chunk();
        for value in 0..256 {
            assert!(chunk.register_constant(Constant::Number(value as f64)).is_some());
        }
        assert_eq!(chunk.register_constant(Constant::Number(1000.0)), None);
        assert_eq!(
            chunk.register_constant(Constant::Number(3.0)),
            Some(ConstantAddress(3))
        );
    }

    #[test]
    fn jumps_are_patched_big_endian() -> Result<(), CodeReadError> {
        let mut chunk = chunk();
        let span = SourceSpan::from(0..1);
        let offset = chunk.write_jump(OpCode::Jump, span);
        chunk.patch_u16(offset, 0x0102);
        assert_eq!(chunk.read_op_code(0)?, (1, OpCode::Jump));
        assert_eq!(chunk.read_u16(1)?, (3, 0x0102));
        assert_eq!(chunk.read_debug_span(0), Some(span));
        assert_eq!(chunk.read_debug_span(1), None);
        assert!(matches!(chunk.read_byte(3), Err(CodeReadError::UnexpectedEnd)));
        Ok(())
    }
}

mod chunk;
mod compiler;
mod disassembler;
mod vm;

pub use chunk::{Chunk, CodeReadError, Constant, ConstantAddress, FunctionProto, OpCode};
pub use compiler::Compiler;
pub use vm::{call_compiled, Vm};

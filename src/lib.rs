pub mod analysis;
pub mod ast;
pub mod codegen;
mod grammar;
pub mod host;
mod lalr;
mod parser;
mod scanner;
mod source;
mod source_reference;
mod tokens;
mod tree_walk_interpreter;
mod unique_id;
mod vm_interpreter;

pub use codegen::{CompileError, CompileMode};
pub use parser::{Parser, ParserError, ParserOpts};
pub use scanner::Scanner;
pub use source::{SourceOffset, SourceSpan};
pub use source_reference::SourceReference;
pub use tokens::{Token, TokenKind};
pub use tree_walk_interpreter::{
    BuiltinCall, BuiltinFunction, BuiltinImplementation, CancelFlag, Closure, CreatedObject,
    ExecuteError, ExecutionMode, Interpreter, InterpreterOpts, ParseOutcome, PlainObject,
    RuntimeError, RuntimeValue, RuntimeWarning, ValueDescriptor, ValueType,
};
pub use vm_interpreter::{Chunk, CodeReadError, Compiler};

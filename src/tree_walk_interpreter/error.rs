use super::{ValueDescriptor, ValueType};
use crate::{codegen::CompileError, host::HostError, SourceReference, SourceSpan};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum RuntimeError {
    #[error("Function '{name}' is undefined.")]
    UndefinedFunction {
        name: String,
        #[label("no function, builtin, creator or math function is called '{name}'")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Cannot call {}", .actual_type.fmt_a())]
    NotCallable {
        name: String,
        actual_type: ValueType,
        #[label("'{name}' is {} here", .actual_type.fmt_a())]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Left-hand side of assignment is read-only.")]
    ReadOnlyProperty {
        name: String,
        #[label("'{name}' cannot be assigned")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Operation {operator} not defined on operands {left_type} and {right_type}")]
    OperandTypeError {
        operator: String,
        left_type: ValueType,
        right_type: ValueType,
        #[label("here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Operation {operator} not defined on operand {operand_type}")]
    UnaryOperandTypeError {
        operator: String,
        operand_type: ValueType,
        #[label("here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{function} expects {}, but found {}", .expected.fmt_a(), .actual_type.fmt_a())]
    ArgumentTypeError {
        function: String,
        expected: ValueDescriptor,
        actual_type: ValueType,
        #[label("in this call")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Creator {name} failed: {cause}")]
    CreatorFailed {
        name: String,
        #[source]
        cause: HostError,
        #[label("while creating this")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unexpected value. Only element creators are allowed to have a value after the function call.")]
    UnexpectedAttributes {
        #[label("attributes given here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unexpected return.")]
    UnexpectedReturn {
        #[label("return outside of a function")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Maximum runtime exceeded.")]
    Cancelled {
        #[label("stopped here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Maximum call depth exceeded.")]
    StackOverflow {
        limit: usize,
        #[label("more than {limit} nested calls")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Cannot assign to {} of {}", .target, .actual_type.fmt_a())]
    InvalidAssignmentTarget {
        target: String,
        actual_type: ValueType,
        #[label("assignment here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Only objects, arrays and elements have properties")]
    PropertyAccessOnNonObject {
        actual_type: ValueType,
        property_name: String,
        #[label("Attempted to access {property_name} on {} here", .actual_type.fmt_a())]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("unknown property {name}")]
    UnknownProperty {
        name: String,
        #[label("This property is unknown")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("In a map only function calls and mathematical expressions are allowed.")]
    NonMathClosureBody {
        #[label("not allowed in a map")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{name} expects {expected_arity} arguments but got {actual_arity}")]
    UnexpectedCallArity {
        name: String,
        expected_arity: String,
        actual_arity: usize,
        #[label("On this function call")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Board '{name}' not found!")]
    UnknownSession {
        name: String,
        #[label("in this use statement")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{name}: {message}")]
    BuiltinFailed {
        name: String,
        message: String,
        #[label("in this call")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{cause}")]
    Host {
        #[source]
        cause: HostError,
        #[label("in this operation")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Could not write output")]
    Output {
        #[source]
        cause: std::io::Error,
        #[label("while running this")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("{cause}")]
    Compile {
        #[source]
        cause: CompileError,
    },
}

impl From<CompileError> for RuntimeError {
    fn from(error: CompileError) -> Self {
        match error {
            CompileError::NonMathClosureBody {
                found_at,
                source_code,
            } => RuntimeError::NonMathClosureBody {
                found_at,
                source_code,
            },
            cause => RuntimeError::Compile { cause },
        }
    }
}

/// Non-fatal diagnostics. Execution continues after they are recorded.
#[derive(Error, Diagnostic, Debug)]
pub enum RuntimeWarning {
    #[error("\"{name}\" is a predefined value.")]
    #[diagnostic(severity(Warning))]
    ShadowedPredefined {
        name: String,
        #[label("assigned here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Use of the 'use' operator is deprecated.")]
    #[diagnostic(severity(Warning))]
    DeprecatedUse {
        #[label("here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Use of the 'delete' operator is deprecated. Please use the remove() function.")]
    #[diagnostic(severity(Warning))]
    DeprecatedDelete {
        #[label("here")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
}

use super::{RuntimeError, RuntimeValue};

/// Abrupt end of a statement: a `return` travelling to its function, or an error.
#[derive(Debug)]
pub enum Unwind {
    Return(RuntimeValue),
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Error(error)
    }
}

pub type Completion = Result<RuntimeValue, Unwind>;

use super::{Ctx, Interpreter, RuntimeValue};
use crate::{RuntimeError, SourceSpan};
use std::io::Write;

/// Where a call happens: used for diagnostics and for naming created objects.
pub struct CallSite<'c> {
    pub span: SourceSpan,
    /// Surface text of the callee expression.
    pub callee: &'c str,
    /// Set when the call is the whole right-hand side of `name = ...`.
    pub default_name: Option<&'c str>,
    pub ctx: &'c Ctx,
}

pub trait Callable {
    fn call<W: Write>(
        &self,
        interpreter: &mut Interpreter<W>,
        args: &[RuntimeValue],
        site: &CallSite,
    ) -> Result<RuntimeValue, RuntimeError>;
}

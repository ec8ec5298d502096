use super::{
    callable::{CallSite, Callable},
    scope::{ScopeId, ScopeRef},
    Ctx, Interpreter, RuntimeError, RuntimeValue,
};
use crate::{
    ast::FunctionLiteral, codegen, host::HostRef, unique_id::UniqueId, vm_interpreter,
    vm_interpreter::Chunk,
};
use std::{
    fmt::{Debug, Display},
    io::Write,
    rc::Rc,
};

/// A function value: a literal plus the scope it was defined in.
#[derive(Clone)]
pub struct Closure(Rc<ClosureImpl>);
struct ClosureImpl {
    id: UniqueId,
    literal: Rc<FunctionLiteral>,
    params: Vec<String>,
    scope: ScopeRef,
    is_map: bool,
    dependencies: Vec<HostRef>,
    compiled: Option<Rc<Chunk>>,
    ctx: Ctx,
}

impl Closure {
    pub(crate) fn new(
        literal: Rc<FunctionLiteral>,
        scope: ScopeRef,
        is_map: bool,
        dependencies: Vec<HostRef>,
        compiled: Option<Rc<Chunk>>,
        ctx: Ctx,
    ) -> Self {
        Self(Rc::new(ClosureImpl {
            id: UniqueId::new(),
            params: literal.param_names().map(str::to_string).collect(),
            literal,
            scope,
            is_map,
            dependencies,
            compiled,
            ctx,
        }))
    }
    pub fn literal(&self) -> &FunctionLiteral {
        &self.0.literal
    }
    pub fn params(&self) -> &[String] {
        &self.0.params
    }
    pub fn scope(&self) -> &ScopeRef {
        &self.0.scope
    }
    pub fn scope_id(&self) -> ScopeId {
        self.0.scope.borrow().id()
    }
    /// `map` closures: the body is one math expression.
    pub fn is_map(&self) -> bool {
        self.0.is_map
    }
    /// Host objects named in the body, resolved when the closure was created.
    pub fn dependencies(&self) -> &[HostRef] {
        &self.0.dependencies
    }
    pub fn is_compiled(&self) -> bool {
        self.0.compiled.is_some()
    }
    pub fn ctx(&self) -> &Ctx {
        &self.0.ctx
    }
}

impl Callable for Closure {
    fn call<W: Write>(
        &self,
        interpreter: &mut Interpreter<W>,
        args: &[RuntimeValue],
        site: &CallSite,
    ) -> Result<RuntimeValue, RuntimeError> {
        interpreter.enter_call(site)?;
        let result = match &self.0.compiled {
            Some(chunk) => vm_interpreter::call_compiled(interpreter, self, chunk, args),
            None => interpreter.call_interpreted(self, args),
        };
        interpreter.leave_call();
        result
    }
}

impl Display for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&codegen::function_to_surface(&self.0.literal, self.0.is_map))
    }
}
impl Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

mod builtin_function;
mod callable;
mod closure;
mod completion;
mod error;
mod guard;
mod object;
pub(crate) mod operators;
mod runtime_value;
mod scope;

use crate::{
    analysis::{check_math_only, referenced_names},
    ast::*,
    codegen::{self, CompileError, CompileMode},
    host::{Attributes, CreatorCache, CreatorHandle, Host, HostRef, SessionId},
    vm_interpreter::{Chunk, Compiler, Vm},
    Parser, ParserError, ParserOpts, Scanner, SourceReference, SourceSpan,
};
use completion::{Completion, Unwind};
use guard::RunGuard;
use miette::Diagnostic;
use operators::{OperandMismatch, EPSILON};
use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap, HashSet},
    io::Write,
    mem,
    ops::RangeInclusive,
    rc::Rc,
    time::Duration,
};
use thiserror::Error;

pub use builtin_function::{
    builtins, constant, BuiltinCall, BuiltinFunction, BuiltinImplementation, BOARD_NAME,
};
pub use callable::{CallSite, Callable};
pub use closure::Closure;
pub use error::{RuntimeError, RuntimeWarning};
pub use guard::CancelFlag;
pub use object::PlainObject;
pub use runtime_value::*;
pub use scope::{lookup_from, Scope, ScopeId, ScopeRef, ScopeTable, GLOBAL_SCOPE};

#[derive(Debug, Clone)]
pub struct Ctx {
    pub(crate) source_code: SourceReference,
}
impl Ctx {
    pub fn new(source_code: SourceReference) -> Self {
        Self { source_code }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    TreeWalk,
    /// Lower each program to bytecode and run it on the stack VM.
    Compiled,
}
impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::TreeWalk
    }
}

pub const DEFAULT_MAX_CALL_DEPTH: usize = 100;

#[derive(Debug, Clone)]
pub struct InterpreterOpts {
    pub mode: ExecutionMode,
    pub max_runtime: Option<Duration>,
    pub warn_on_shadowing: bool,
    /// Closure calls nested deeper than this fail instead of exhausting the native stack.
    pub max_call_depth: usize,
    pub parser: ParserOpts,
}
impl Default for InterpreterOpts {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::TreeWalk,
            max_runtime: None,
            warn_on_shadowing: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            parser: ParserOpts::default(),
        }
    }
}
impl InterpreterOpts {
    pub fn compiled(self) -> Self {
        Self {
            mode: ExecutionMode::Compiled,
            ..self
        }
    }
    pub fn with_max_runtime(self, max_runtime: Duration) -> Self {
        Self {
            max_runtime: Some(max_runtime),
            ..self
        }
    }
    pub fn with_max_call_depth(self, max_call_depth: usize) -> Self {
        Self {
            max_call_depth,
            ..self
        }
    }
    pub fn for_repl(self) -> Self {
        Self {
            parser: self.parser.for_repl(),
            ..self
        }
    }
}

/// Result of [`Interpreter::parse`]. `value` is set only when the program was error free
/// and therefore executed.
#[derive(Debug)]
pub struct ParseOutcome {
    pub error_count: usize,
    pub errors: Vec<ParserError>,
    pub value: Option<RuntimeValue>,
}

#[derive(Error, Diagnostic, Debug)]
pub enum ExecuteError {
    #[error("{} syntax error(s)", .errors.len())]
    Syntax {
        #[related]
        errors: Vec<ParserError>,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A host object built by a creator call, with the source lines of that call.
#[derive(Debug, Clone)]
pub struct CreatedObject {
    pub object: HostRef,
    pub lines: RangeInclusive<usize>,
}

pub struct Interpreter<'out, W: Write> {
    pub(crate) scopes: ScopeTable,
    pub(crate) stdout: &'out mut W,
    pub(crate) host: Host,
    creators: CreatorCache,
    session: SessionId,
    builtins: HashMap<String, BuiltinFunction>,
    opts: InterpreterOpts,
    warnings: Vec<RuntimeWarning>,
    created: Vec<CreatedObject>,
    cancel: CancelFlag,
    running: usize,
    call_depth: usize,
}

impl<'out, W: Write> Interpreter<'out, W> {
    pub fn new(stdout: &'out mut W) -> Self {
        let mut interpreter = Self {
            scopes: ScopeTable::new(),
            stdout,
            host: Host::default(),
            creators: CreatorCache::default(),
            session: 0,
            builtins: HashMap::new(),
            opts: InterpreterOpts::default(),
            warnings: vec![],
            created: vec![],
            cancel: CancelFlag::new(),
            running: 0,
            call_depth: 0,
        };
        for (name, arity, implementation) in builtins::all() {
            interpreter.register_builtin(name, arity, implementation);
        }
        interpreter
    }
    pub fn with_host(mut self, host: Host) -> Self {
        self.host = host;
        self.creators.clear();
        self
    }
    pub fn with_opts(mut self, opts: InterpreterOpts) -> Self {
        self.opts = opts;
        self
    }
    pub fn opts(&self) -> &InterpreterOpts {
        &self.opts
    }
    /// Adds or replaces a builtin. Must not be called while a program runs.
    pub fn register_builtin(
        &mut self,
        name: &str,
        arity: RangeInclusive<usize>,
        implementation: BuiltinImplementation,
    ) {
        self.builtins.insert(
            name.to_string(),
            BuiltinFunction::new(name, arity, implementation),
        );
    }
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
    pub fn take_warnings(&mut self) -> Vec<RuntimeWarning> {
        mem::take(&mut self.warnings)
    }
    pub fn created_objects(&self) -> &[CreatedObject] {
        &self.created
    }
    /// The most recently created object whose creating call spans `line`.
    pub fn object_at_line(&self, line: usize) -> Option<HostRef> {
        self.created
            .iter()
            .rev()
            .find(|created| created.lines.contains(&line))
            .map(|created| created.object.clone())
    }
    pub fn creator_cache(&mut self) -> &mut CreatorCache {
        &mut self.creators
    }

    pub fn parse(&mut self, source: &str) -> Result<ParseOutcome, RuntimeError> {
        self.parse_source(SourceReference::new(
            "script".to_string(),
            source.to_string(),
        ))
    }
    /// Parses and, when there are no syntax errors, executes.
    pub fn parse_source(
        &mut self,
        source_reference: SourceReference,
    ) -> Result<ParseOutcome, RuntimeError> {
        let (program, errors) = Parser::parse(
            Scanner::new(source_reference.text()),
            source_reference,
            self.opts.parser,
        );
        let value = match program {
            Some(program) if errors.is_empty() => Some(self.execute_program(&program)?),
            _ => None,
        };
        Ok(ParseOutcome {
            error_count: errors.len(),
            errors,
            value,
        })
    }
    pub fn parse_ast(&self, source: &str) -> Result<Program, Vec<ParserError>> {
        let source_reference = SourceReference::new("script".to_string(), source.to_string());
        match Parser::parse(Scanner::new(source), source_reference, self.opts.parser) {
            (Some(program), errors) if errors.is_empty() => Ok(program),
            (_, errors) => Err(errors),
        }
    }
    pub fn parse_to_code(&self, source: &str, mode: CompileMode) -> Result<String, ExecuteError> {
        let program = self
            .parse_ast(source)
            .map_err(|errors| ExecuteError::Syntax { errors })?;
        Ok(codegen::compile(
            &program.root,
            mode,
            &program.source_reference,
        )?)
    }
    /// Evaluates one expression inside a fresh zero-argument function.
    pub fn snippet(&mut self, expression: &str) -> Result<RuntimeValue, ExecuteError> {
        let source = format!("function () {{ return {}; }};", expression);
        let program = self
            .parse_ast(&source)
            .map_err(|errors| ExecuteError::Syntax { errors })?;
        let function = self.execute_program(&program)?;
        let ctx = Ctx::new(program.source_reference.clone());
        let site = CallSite {
            span: program.root.span,
            callee: "snippet",
            default_name: None,
            ctx: &ctx,
        };
        Ok(self.call_value(function, &[], None, &site)?)
    }
    pub fn execute_program(&mut self, program: &Program) -> Result<RuntimeValue, RuntimeError> {
        self.execute(&program.root, &program.source_reference)
    }
    pub fn execute(
        &mut self,
        node: &Node,
        source_code: &SourceReference,
    ) -> Result<RuntimeValue, RuntimeError> {
        let ctx = Ctx::new(source_code.clone());
        let _guard = match self.running {
            0 => {
                self.cancel.clear();
                self.opts
                    .max_runtime
                    .map(|limit| RunGuard::start(self.cancel.clone(), limit))
            }
            _ => None,
        };
        let depth = self.scopes.depth();
        self.running += 1;
        let result = match self.opts.mode {
            ExecutionMode::TreeWalk => match self.eval(node, &ctx) {
                Ok(value) | Err(Unwind::Return(value)) => Ok(value),
                Err(Unwind::Error(error)) => Err(error),
            },
            ExecutionMode::Compiled => Compiler::compile_script(node, source_code)
                .map_err(RuntimeError::from)
                .and_then(|chunk| Vm::run(self, &chunk, &ctx)),
        };
        self.running -= 1;
        self.scopes.unwind_to(depth);
        result
    }

    fn eval(&mut self, node: &Node, ctx: &Ctx) -> Completion {
        self.check_cancelled(node.span, ctx)?;
        match &node.kind {
            NodeKind::Op(op) => self.eval_op(op, node.span, ctx),
            NodeKind::Identifier(name) => Ok(self.resolve_identifier(name, false, node.span, ctx)?),
            NodeKind::Number(number) => Ok(number.value().into()),
            NodeKind::String(string) => Ok(string.as_str().into()),
            NodeKind::Boolean(value) => Ok((*value).into()),
            NodeKind::Coordinate { axis, target } => {
                let target = self.eval(target, ctx)?;
                Ok(self.coordinate(*axis, &target, node.span, ctx)?)
            }
            NodeKind::Property { object, name } => {
                let object = self.eval(object, ctx)?;
                Ok(self.get_property(&object, &name.name, name.span, ctx)?)
            }
        }
    }
    fn eval_op(&mut self, op: &Op, span: SourceSpan, ctx: &Ctx) -> Completion {
        match op {
            Op::Statements(statements) => {
                try_for_each_and_return_last(statements, RuntimeValue::Undefined, |statement| {
                    self.eval(statement, ctx)
                })
            }
            Op::Assign { target, value } => self.eval_assign(target, value, ctx),
            Op::If {
                condition,
                then_branch,
            } => match self.eval(condition, ctx)?.is_truthy() {
                true => self.eval(then_branch, ctx),
                false => Ok(RuntimeValue::Undefined),
            },
            Op::IfElse {
                condition,
                then_branch,
                else_branch,
            } => match self.eval(condition, ctx)?.is_truthy() {
                true => self.eval(then_branch, ctx),
                false => self.eval(else_branch, ctx),
            },
            Op::Conditional {
                condition,
                then_value,
                else_value,
            } => match self.eval(condition, ctx)?.is_truthy() {
                true => self.eval(then_value, ctx),
                false => self.eval(else_value, ctx),
            },
            Op::While { condition, body } => {
                while self.eval(condition, ctx)?.is_truthy() {
                    self.eval(body, ctx)?;
                }
                Ok(RuntimeValue::Undefined)
            }
            Op::DoWhile { body, condition } => {
                loop {
                    self.eval(body, ctx)?;
                    if !self.eval(condition, ctx)?.is_truthy() {
                        break;
                    }
                }
                Ok(RuntimeValue::Undefined)
            }
            Op::For {
                init,
                condition,
                step,
                body,
            } => {
                self.eval(init, ctx)?;
                while self.eval(condition, ctx)?.is_truthy() {
                    self.eval(body, ctx)?;
                    self.eval(step, ctx)?;
                }
                Ok(RuntimeValue::Undefined)
            }
            Op::Use(identifier) => {
                self.use_session(&identifier.name, span, ctx)?;
                Ok(RuntimeValue::Undefined)
            }
            Op::Delete(target) => {
                let target = self.eval(target, ctx)?;
                Ok(self.delete_value(&target, span, ctx)?)
            }
            Op::Return(value) => {
                if self.scopes.is_global() {
                    return Err(self.unexpected_return(span, ctx).into());
                }
                let value = match value {
                    Some(value) => self.eval(value, ctx)?,
                    None => RuntimeValue::Undefined,
                };
                Err(Unwind::Return(value))
            }
            Op::Expression(expression) => self.eval(expression, ctx),
            Op::Function(literal) => Ok(self.make_closure(literal, false, None, ctx)?.into()),
            Op::Map(literal) => Ok(self.make_closure(literal, true, None, ctx)?.into()),
            Op::Call {
                callee,
                args,
                attributes,
            } => self.eval_call(callee, args, attributes.as_deref(), span, None, ctx),
            Op::Array(items) => Ok(items
                .iter()
                .map(|item| self.eval(item, ctx))
                .collect::<Result<Vec<_>, _>>()?
                .into()),
            Op::Object(properties) => {
                Ok(PlainObject::new(self.eval_properties(properties, ctx)?).into())
            }
            Op::Index { base, index } => {
                let base = self.eval(base, ctx)?;
                let index = self.eval(index, ctx)?;
                Ok(get_index(&base, &index))
            }
            Op::Binary {
                operator: BinaryOperator::And,
                left,
                right,
            } => {
                let left = self.eval(left, ctx)?;
                match left.is_truthy() {
                    true => self.eval(right, ctx),
                    false => Ok(left),
                }
            }
            Op::Binary {
                operator: BinaryOperator::Or,
                left,
                right,
            } => {
                let left = self.eval(left, ctx)?;
                match left.is_truthy() {
                    true => Ok(left),
                    false => self.eval(right, ctx),
                }
            }
            Op::Binary {
                operator,
                left,
                right,
            } => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                Ok(binary_op(*operator, &left, &right, span, ctx)?)
            }
            Op::Unary { operator, operand } => {
                let operand = self.eval(operand, ctx)?;
                Ok(unary_op(*operator, &operand, span, ctx)?)
            }
        }
    }
    fn eval_assign(&mut self, target: &AssignTarget, value_node: &Node, ctx: &Ctx) -> Completion {
        match target {
            AssignTarget::Variable(identifier) => {
                let value = match &value_node.kind {
                    NodeKind::Op(Op::Call {
                        callee,
                        args,
                        attributes,
                    }) => self.eval_call(
                        callee,
                        args,
                        attributes.as_deref(),
                        value_node.span,
                        Some(&identifier.name),
                        ctx,
                    )?,
                    _ => self.eval(value_node, ctx)?,
                };
                self.assign_local(&identifier.name, value.clone(), identifier.span, ctx);
                Ok(value)
            }
            AssignTarget::Property { object, name } => {
                let object = self.eval(object, ctx)?;
                let value = self.eval(value_node, ctx)?;
                self.set_property(&object, &name.name, value.clone(), name.span, ctx)?;
                Ok(value)
            }
            AssignTarget::Index { base, index } => {
                let base = self.eval(base, ctx)?;
                let index = self.eval(index, ctx)?;
                let value = self.eval(value_node, ctx)?;
                self.set_index(&base, &index, value.clone(), value_node.span, ctx)?;
                Ok(value)
            }
        }
    }
    fn eval_properties(
        &mut self,
        properties: &[PropertyDef],
        ctx: &Ctx,
    ) -> Result<BTreeMap<String, RuntimeValue>, Unwind> {
        properties
            .iter()
            .map(|property| -> Result<(String, RuntimeValue), Unwind> {
                Ok((property.name.name.clone(), self.eval(&property.value, ctx)?))
            })
            .collect()
    }
    fn eval_call(
        &mut self,
        callee: &Node,
        args: &[Node],
        attributes: Option<&[PropertyDef]>,
        span: SourceSpan,
        default_name: Option<&str>,
        ctx: &Ctx,
    ) -> Completion {
        let callee_value = match &callee.kind {
            NodeKind::Identifier(name) => self.resolve_identifier(name, true, callee.span, ctx)?,
            _ => self.eval(callee, ctx)?,
        };
        let args = args
            .iter()
            .map(|arg| self.eval(arg, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let attributes = match attributes {
            Some(properties) => Some(self.eval_properties(properties, ctx)?),
            None => None,
        };
        let callee_text: Cow<str> = match callee.as_identifier() {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(codegen::to_surface(callee)),
        };
        let site = CallSite {
            span,
            callee: &callee_text,
            default_name,
            ctx,
        };
        Ok(self.call_value(callee_value, &args, attributes, &site)?)
    }

    /// Counts one closure activation; fails once `max_call_depth` is exceeded.
    pub(crate) fn enter_call(&mut self, site: &CallSite) -> Result<(), RuntimeError> {
        if self.call_depth >= self.opts.max_call_depth {
            return Err(RuntimeError::StackOverflow {
                limit: self.opts.max_call_depth,
                found_at: site.span,
                source_code: site.ctx.source_code.clone(),
            });
        }
        self.call_depth += 1;
        Ok(())
    }
    pub(crate) fn leave_call(&mut self) {
        self.call_depth -= 1;
    }

    pub(crate) fn call_interpreted(
        &mut self,
        closure: &Closure,
        args: &[RuntimeValue],
    ) -> Result<RuntimeValue, RuntimeError> {
        let depth = self.scopes.depth();
        self.scopes
            .push_scope(closure.scope().clone(), closure.params(), args);
        let result = self.eval(&closure.literal().body, closure.ctx());
        self.scopes.unwind_to(depth);
        match result {
            Ok(value) if closure.is_map() => Ok(value),
            Ok(_) => Ok(RuntimeValue::Undefined),
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Error(error)) => Err(error),
        }
    }

    pub(crate) fn call_value(
        &mut self,
        callee: RuntimeValue,
        args: &[RuntimeValue],
        attributes: Option<Attributes>,
        site: &CallSite,
    ) -> Result<RuntimeValue, RuntimeError> {
        if attributes.is_some() && !matches!(callee, RuntimeValue::Creator(_)) {
            return Err(RuntimeError::UnexpectedAttributes {
                found_at: site.span,
                source_code: site.ctx.source_code.clone(),
            });
        }
        match callee {
            RuntimeValue::Closure(closure) => closure.call(self, args, site),
            RuntimeValue::Builtin(builtin) => builtin.call(self, args, site),
            RuntimeValue::Creator(handle) => self.invoke_creator(&handle, args, attributes, site),
            RuntimeValue::Math(function) => {
                let numbers = args
                    .iter()
                    .map(|arg| {
                        arg.cast_number(|expected, actual_type| RuntimeError::ArgumentTypeError {
                            function: function.name.to_string(),
                            expected,
                            actual_type,
                            found_at: site.span,
                            source_code: site.ctx.source_code.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((function.function)(&numbers).into())
            }
            RuntimeValue::BoundMethod(bound) => bound
                .receiver
                .call_method(&bound.method, args)
                .map_err(|cause| RuntimeError::Host {
                    cause,
                    found_at: site.span,
                    source_code: site.ctx.source_code.clone(),
                }),
            other => Err(RuntimeError::NotCallable {
                name: site.callee.to_string(),
                actual_type: other.type_of(),
                found_at: site.span,
                source_code: site.ctx.source_code.clone(),
            }),
        }
    }
    fn invoke_creator(
        &mut self,
        handle: &CreatorHandle,
        parents: &[RuntimeValue],
        attributes: Option<Attributes>,
        site: &CallSite,
    ) -> Result<RuntimeValue, RuntimeError> {
        let attributes = attributes.unwrap_or_else(|| {
            let mut attributes = Attributes::new();
            if let Some(name) = site.default_name {
                attributes.insert("name".to_string(), name.into());
            }
            attributes
        });
        let created = self
            .host
            .creators
            .invoke(handle.session, &handle.name, parents, &attributes)
            .map_err(|cause| RuntimeError::CreatorFailed {
                name: handle.name.clone(),
                cause,
                found_at: site.span,
                source_code: site.ctx.source_code.clone(),
            })?;
        if let RuntimeValue::Host(object) = &created {
            let source = &site.ctx.source_code;
            let last_byte = site.span.end().byte_offset().max(site.span.start().byte_offset() + 1) - 1;
            self.created.push(CreatedObject {
                object: object.clone(),
                lines: source.line_of(site.span.start())..=source.line_of(last_byte.into()),
            });
        }
        Ok(created)
    }

    /// Name lookup for the tree walker: the scope chain starts at the current scope.
    fn resolve_identifier(
        &mut self,
        name: &str,
        calling: bool,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<RuntimeValue, RuntimeError> {
        let local = self.scopes.lookup_local(name);
        self.resolve_name(local, name, calling, span, ctx)
    }
    /// Resolves `name` given the result of the scope chain lookup.
    ///
    /// Reads fall back to the named constants, `$board` and then to host objects; an
    /// unknown name reads as undefined. In calling position a callable local wins, then
    /// builtins, creators of the current session and the math table.
    pub(crate) fn resolve_name(
        &mut self,
        local: Option<RuntimeValue>,
        name: &str,
        calling: bool,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<RuntimeValue, RuntimeError> {
        if !calling {
            return Ok(match local {
                Some(value) => value,
                None => match constant(name) {
                    Some(value) => value.into(),
                    None if name == BOARD_NAME => self
                        .host
                        .creators
                        .clone()
                        .session_object(self.session)
                        .unwrap_or(RuntimeValue::Undefined),
                    None => self
                        .host
                        .names
                        .select_by_name_or_id(name)
                        .unwrap_or(RuntimeValue::Undefined),
                },
            });
        }
        match local {
            Some(value) if value.is_callable() => Ok(value),
            local => {
                if let Some(builtin) = self.builtins.get(name) {
                    Ok(RuntimeValue::Builtin(builtin.clone()))
                } else if self.host.creators.has(self.session, name) {
                    Ok(RuntimeValue::Creator(
                        self.creators.get_or_insert(self.session, name),
                    ))
                } else if let Some(function) = self.host.math.get(name) {
                    Ok(RuntimeValue::Math(function))
                } else if let Some(value) = local {
                    Err(RuntimeError::NotCallable {
                        name: name.to_string(),
                        actual_type: value.type_of(),
                        found_at: span,
                        source_code: ctx.source_code.clone(),
                    })
                } else {
                    Err(RuntimeError::UndefinedFunction {
                        name: name.to_string(),
                        found_at: span,
                        source_code: ctx.source_code.clone(),
                    })
                }
            }
        }
    }

    fn is_predefined(&self, name: &str) -> bool {
        self.builtins.contains_key(name) || constant(name).is_some() || name == BOARD_NAME
    }
    /// Binds `name` in the current scope.
    pub(crate) fn assign_local(
        &mut self,
        name: &str,
        value: RuntimeValue,
        span: SourceSpan,
        ctx: &Ctx,
    ) {
        if self.opts.warn_on_shadowing && self.is_predefined(name) {
            self.warnings.push(RuntimeWarning::ShadowedPredefined {
                name: name.to_string(),
                found_at: span,
                source_code: ctx.source_code.clone(),
            });
        }
        self.scopes.define_local(name, value);
    }

    pub(crate) fn make_closure(
        &self,
        literal: &Rc<FunctionLiteral>,
        is_map: bool,
        compiled: Option<Rc<Chunk>>,
        ctx: &Ctx,
    ) -> Result<Closure, RuntimeError> {
        if is_map {
            check_math_only(&literal.body).map_err(|node| RuntimeError::NonMathClosureBody {
                found_at: node.span,
                source_code: ctx.source_code.clone(),
            })?;
        }
        let params: HashSet<&str> = literal.param_names().collect();
        let dependencies = referenced_names(&literal.body)
            .into_iter()
            .filter(|name| !params.contains(name.as_str()))
            .filter_map(|name| {
                match self
                    .scopes
                    .lookup_local(&name)
                    .or_else(|| self.host.names.select_by_name_or_id(&name))
                {
                    Some(RuntimeValue::Host(object)) => Some(object),
                    _ => None,
                }
            })
            .collect();
        Ok(Closure::new(
            literal.clone(),
            self.scopes.current().clone(),
            is_map,
            dependencies,
            compiled,
            ctx.clone(),
        ))
    }

    pub(crate) fn get_property(
        &self,
        value: &RuntimeValue,
        name: &str,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<RuntimeValue, RuntimeError> {
        let unknown = || RuntimeError::UnknownProperty {
            name: name.to_string(),
            found_at: span,
            source_code: ctx.source_code.clone(),
        };
        match value {
            RuntimeValue::Host(object) => {
                if let Some(sub_object) = object.sub_object(name) {
                    return Ok(sub_object);
                }
                if let Some(method) = object.method_alias(name) {
                    return Ok(RuntimeValue::BoundMethod(BoundMethod {
                        receiver: object.clone(),
                        method: Rc::new(method),
                    }));
                }
                object.attribute(&name.to_lowercase()).ok_or_else(unknown)
            }
            RuntimeValue::Object(object) => Ok(object.get(name).unwrap_or(RuntimeValue::Undefined)),
            RuntimeValue::Array(array) if name == "length" => Ok((array.len() as f64).into()),
            RuntimeValue::String(string) if name == "length" => {
                Ok((string.chars().count() as f64).into())
            }
            RuntimeValue::Array(_) | RuntimeValue::String(_) => Err(unknown()),
            other => Err(RuntimeError::PropertyAccessOnNonObject {
                actual_type: other.type_of(),
                property_name: name.to_string(),
                found_at: span,
                source_code: ctx.source_code.clone(),
            }),
        }
    }
    pub(crate) fn set_property(
        &self,
        target: &RuntimeValue,
        name: &str,
        value: RuntimeValue,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<(), RuntimeError> {
        match target {
            RuntimeValue::Host(object) => {
                let name = name.to_lowercase();
                if object.is_read_only(&name) {
                    return Err(RuntimeError::ReadOnlyProperty {
                        name,
                        found_at: span,
                        source_code: ctx.source_code.clone(),
                    });
                }
                object
                    .set_property(&name, value)
                    .map_err(|cause| RuntimeError::Host {
                        cause,
                        found_at: span,
                        source_code: ctx.source_code.clone(),
                    })
            }
            RuntimeValue::Object(object) => {
                object.set(name, value);
                Ok(())
            }
            RuntimeValue::Array(_) | RuntimeValue::String(_) if name == "length" => {
                Err(RuntimeError::ReadOnlyProperty {
                    name: name.to_string(),
                    found_at: span,
                    source_code: ctx.source_code.clone(),
                })
            }
            RuntimeValue::Array(_) | RuntimeValue::String(_) => {
                Err(RuntimeError::InvalidAssignmentTarget {
                    target: format!("property {}", name),
                    actual_type: target.type_of(),
                    found_at: span,
                    source_code: ctx.source_code.clone(),
                })
            }
            other => Err(RuntimeError::PropertyAccessOnNonObject {
                actual_type: other.type_of(),
                property_name: name.to_string(),
                found_at: span,
                source_code: ctx.source_code.clone(),
            }),
        }
    }
    pub(crate) fn set_index(
        &self,
        base: &RuntimeValue,
        index: &RuntimeValue,
        value: RuntimeValue,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<(), RuntimeError> {
        let invalid = || RuntimeError::InvalidAssignmentTarget {
            target: format!("index {:?}", index),
            actual_type: base.type_of(),
            found_at: span,
            source_code: ctx.source_code.clone(),
        };
        match base {
            RuntimeValue::Array(array) => {
                let position = integer_index(index)
                    .filter(|position| *position < MAX_ARRAY_LENGTH)
                    .ok_or_else(invalid)?;
                array.set(position, value);
                Ok(())
            }
            RuntimeValue::Host(object) => {
                let position = integer_index(index).ok_or_else(invalid)?;
                object
                    .set_element(position, value)
                    .map_err(|cause| RuntimeError::Host {
                        cause,
                        found_at: span,
                        source_code: ctx.source_code.clone(),
                    })
            }
            RuntimeValue::Object(object) => {
                object.set(&index.to_string(), value);
                Ok(())
            }
            _ => Err(invalid()),
        }
    }
    pub(crate) fn coordinate(
        &self,
        axis: Axis,
        target: &RuntimeValue,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<RuntimeValue, RuntimeError> {
        match target {
            RuntimeValue::Host(object) => Ok(object
                .coordinate(axis)
                .map_or(RuntimeValue::Undefined, RuntimeValue::from)),
            RuntimeValue::Array(array) => {
                Ok(array.get(axis.index()).unwrap_or(RuntimeValue::Undefined))
            }
            other => Err(RuntimeError::ArgumentTypeError {
                function: axis.to_string(),
                expected: ValueDescriptor::AnyOf(vec![ValueType::HostObject, ValueType::Array]),
                actual_type: other.type_of(),
                found_at: span,
                source_code: ctx.source_code.clone(),
            }),
        }
    }
    pub(crate) fn use_session(
        &mut self,
        name: &str,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<(), RuntimeError> {
        self.warnings.push(RuntimeWarning::DeprecatedUse {
            found_at: span,
            source_code: ctx.source_code.clone(),
        });
        match self.host.creators.select_session(name) {
            Some(session) => {
                self.session = session;
                Ok(())
            }
            None => Err(RuntimeError::UnknownSession {
                name: name.to_string(),
                found_at: span,
                source_code: ctx.source_code.clone(),
            }),
        }
    }
    pub(crate) fn delete_value(
        &mut self,
        target: &RuntimeValue,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> Result<RuntimeValue, RuntimeError> {
        self.warnings.push(RuntimeWarning::DeprecatedDelete {
            found_at: span,
            source_code: ctx.source_code.clone(),
        });
        if let RuntimeValue::Host(object) = target {
            object.remove().map_err(|cause| RuntimeError::Host {
                cause,
                found_at: span,
                source_code: ctx.source_code.clone(),
            })?;
        }
        Ok(RuntimeValue::Undefined)
    }
    pub(crate) fn unexpected_return(&self, span: SourceSpan, ctx: &Ctx) -> RuntimeError {
        RuntimeError::UnexpectedReturn {
            found_at: span,
            source_code: ctx.source_code.clone(),
        }
    }
    pub(crate) fn check_cancelled(&self, span: SourceSpan, ctx: &Ctx) -> Result<(), RuntimeError> {
        match self.cancel.is_set() {
            true => Err(RuntimeError::Cancelled {
                found_at: span,
                source_code: ctx.source_code.clone(),
            }),
            false => Ok(()),
        }
    }
}

/// Accepts numbers within `EPSILON` of a non-negative integer.
fn integer_index(index: &RuntimeValue) -> Option<usize> {
    let value = index.as_number()?;
    let rounded = value.round();
    match (value - rounded).abs() < EPSILON && rounded >= 0.0 {
        true => Some(rounded as usize),
        false => None,
    }
}

/// Index read. Anything that cannot be indexed by `index` reads as undefined.
pub(crate) fn get_index(base: &RuntimeValue, index: &RuntimeValue) -> RuntimeValue {
    let element = match base {
        RuntimeValue::Array(array) => integer_index(index).and_then(|position| array.get(position)),
        RuntimeValue::String(string) => integer_index(index)
            .and_then(|position| string.chars().nth(position))
            .map(|ch| ch.to_string().into()),
        RuntimeValue::Host(object) => integer_index(index).and_then(|position| object.element(position)),
        RuntimeValue::Object(object) => object.get(&index.to_string()),
        _ => None,
    };
    element.unwrap_or(RuntimeValue::Undefined)
}

pub(crate) fn binary_op(
    operator: BinaryOperator,
    left: &RuntimeValue,
    right: &RuntimeValue,
    span: SourceSpan,
    ctx: &Ctx,
) -> Result<RuntimeValue, RuntimeError> {
    operators::binary(operator, left, right).map_err(|OperandMismatch { left, right }| {
        RuntimeError::OperandTypeError {
            operator: operator.to_string(),
            left_type: left,
            right_type: right,
            found_at: span,
            source_code: ctx.source_code.clone(),
        }
    })
}

pub(crate) fn unary_op(
    operator: UnaryOperator,
    operand: &RuntimeValue,
    span: SourceSpan,
    ctx: &Ctx,
) -> Result<RuntimeValue, RuntimeError> {
    operators::unary(operator, operand).map_err(|operand_type| {
        RuntimeError::UnaryOperandTypeError {
            operator: operator.to_string(),
            operand_type,
            found_at: span,
            source_code: ctx.source_code.clone(),
        }
    })
}

fn try_for_each_and_return_last<In, F: FnMut(&In) -> Completion>(
    items: &[In],
    default: RuntimeValue,
    mut run: F,
) -> Completion {
    for item in &items[..items.len().max(1) - 1] {
        run(item)?;
    }
    match items.last() {
        Some(item) => run(item),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Board;
    use pretty_assertions::assert_eq;

    struct Run {
        result: Result<String, String>,
        output: String,
        warnings: Vec<String>,
    }

    fn run_in(mode: ExecutionMode, source: &str) -> Run {
        let mut output = Vec::new();
        let (result, warnings) = {
            let mut interpreter = Interpreter::new(&mut output)
                .with_host(Host::with_board(Rc::new(Board::new("board"))))
                .with_opts(InterpreterOpts {
                    mode,
                    ..InterpreterOpts::default()
                });
            let result = interpreter.parse(source).map(|outcome| {
                assert_eq!(outcome.error_count, 0, "{:?}", outcome.errors);
                outcome.value.unwrap_or(RuntimeValue::Undefined)
            });
            let warnings = interpreter.take_warnings();
            (result, warnings)
        };
        Run {
            result: result
                .map(|value| value.to_string())
                .map_err(|error| error.to_string()),
            output: String::from_utf8_lossy(&output).to_string(),
            warnings: warnings.iter().map(ToString::to_string).collect(),
        }
    }

    /// Runs `source` tree walked and compiled; both must agree.
    fn run(source: &str) -> Run {
        let tree_walk = run_in(ExecutionMode::TreeWalk, source);
        let compiled = run_in(ExecutionMode::Compiled, source);
        assert_eq!(tree_walk.result, compiled.result, "{}", source);
        assert_eq!(tree_walk.output, compiled.output, "{}", source);
        assert_eq!(tree_walk.warnings, compiled.warnings, "{}", source);
        tree_walk
    }

    fn value_of(source: &str) -> String {
        match run(source).result {
            Ok(value) => value,
            Err(error) => panic!("{} failed: {}", source, error),
        }
    }

    fn error_of(source: &str) -> String {
        match run(source).result {
            Ok(value) => panic!("{} evaluated to {}", source, value),
            Err(error) => error,
        }
    }

    #[test]
    fn precedence() {
        assert_eq!(value_of("3*4+5;"), "17");
        assert_eq!(value_of("2^3*4;"), "32");
        assert_eq!(value_of("4^3^2;"), "262144");
        assert_eq!(value_of("3*(4+5);"), "27");
        assert_eq!(value_of("1 + 2 < 4 && 2 * 3 == 6;"), "true");
    }

    #[test]
    fn number_literals() {
        assert_eq!(value_of("a = 1; b = 1.5; [a, b];"), "[1, 1.5]");
        assert_eq!(value_of("a = 2^3; b = -2^3; c = 2^-3; [a, b, c];"), "[8, -8, 0.125]");
        assert_eq!(value_of("9 % -4;"), "-3");
    }

    #[test]
    fn closures_capture_their_defining_scope() {
        let source = "f = function(x) { return function() { return x; }; }; g = f(5); x = 1; g();";
        assert_eq!(value_of(source), "5");
        let counter = "make = function() { n = 0; return function() { n = n + 1; return n; }; };
            c = make(); c(); c();";
        // assignment binds in the activation scope of the inner call
        assert_eq!(value_of(counter), "1");
    }

    #[test]
    fn else_if_chain() {
        let source = "r = 0; a = 1;
            if (a == 2) { r = r + 1; } else if (a == 1) { r = r + 10; } else { r = r + 100; }
            r;";
        assert_eq!(value_of(source), "10");
    }

    #[test]
    fn loops() {
        assert_eq!(value_of("s = 0; for (i = 0; i < 5; i = i + 1) { s = s + i; } s;"), "10");
        assert_eq!(value_of("s = 0; while (s < 7) { s = s + 3; } s;"), "9");
        assert_eq!(value_of("s = 10; do { s = s + 1; } while (s < 5); s;"), "11");
    }

    #[test]
    fn calling_position() {
        assert_eq!(value_of("x = 3; x;"), "3");
        assert_eq!(error_of("x = 3; x(1);"), "Cannot call a number");
        assert_eq!(error_of("nothing(1);"), "Function 'nothing' is undefined.");
        assert_eq!(value_of("nothing;"), "undefined");
        assert_eq!(value_of("sin = 2; [sin, sin(0)];"), "[2, 0]");
        assert_eq!(value_of("round(2.5) + max(1, 7, 3);"), "10");
    }

    #[test]
    fn return_outside_a_function() {
        assert_eq!(error_of("return 1;"), "Unexpected return.");
        assert_eq!(value_of("f = function() { if (true) { return 2; } return 3; }; f();"), "2");
        assert_eq!(value_of("f = function() { 4; }; f();"), "undefined");
    }

    #[test]
    fn map_closures() {
        assert_eq!(value_of("f = map (x) -> x^2 + 1; f(3);"), "10");
        assert_eq!(
            error_of("f = map (x) -> x == 1;"),
            "In a map only function calls and mathematical expressions are allowed."
        );
    }

    #[test]
    fn arrays_objects_and_strings() {
        assert_eq!(value_of("a = [1, 2]; a[3] = 5; a;"), "[1, 2, undefined, 5]");
        assert_eq!(value_of("a = [1, 2]; [a[0.5], a[1.0000000001], a.length];"), "[undefined, 2, 2]");
        assert_eq!(value_of("a = [1, 2]; b = a; b[0] = 7; a[0];"), "7");
        assert_eq!(value_of("o = <<a: 1>>; o.b = 2; o.a + o.b;"), "3");
        assert_eq!(value_of("'x' + 1 + 2;"), "x12");
        assert_eq!(value_of("[1, 2] + [3, 4, 5];"), "[4, 6]");
        assert_eq!(value_of("X([3, 4]) * Y([3, 4]);"), "12");
        assert_eq!(
            error_of("'a' - 1;"),
            "Operation - not defined on operands string and number"
        );
        assert_eq!(error_of("[1].foo;"), "unknown property foo");
    }

    #[test]
    fn huge_array_indices_are_rejected() {
        assert_eq!(
            error_of("x = [1]; x[10000000000] = 2;"),
            "Cannot assign to index 10000000000 of an array"
        );
        assert_eq!(error_of("x = []; x[-1] = 2;"), "Cannot assign to index -1 of an array");
        assert_eq!(value_of("x = []; x[2] = 1; x.length;"), "3");
    }

    #[test]
    fn builtins_write_and_compute() {
        let run = run("$log('sum', 1 + 2); $log(); IfThen(0, 'a', 'b');");
        assert_eq!(run.result, Ok("b".to_string()));
        assert_eq!(run.output, "sum 3\n\n");
        assert_eq!(value_of("trunc(-2.75, 1);"), "-2.7");
        assert_eq!(value_of("dist([0, 0], [3, 4]);"), "5");
        assert_eq!(
            error_of("factorial();"),
            "factorial expects 1 arguments but got 0"
        );
    }

    #[test]
    fn creators_and_host_objects() {
        let source = "A = point(1, 2); B = point(4, 6); s = segment(A, B);
            A.x = 4; [s.L(), A.name, A.label.text, X(B), B[1], dist(A, B)];";
        assert_eq!(value_of(source), "[4, 'A', 'A', 4, 6, 4]");
        assert_eq!(value_of("p = point(1, 1) << name: 'Q', color: 'red' >>; [p.name, p.Color];"), "['Q', 'red']");
        assert_eq!(error_of("p = point(1, 1); p.id = 'x';"), "Left-hand side of assignment is read-only.");
        assert_eq!(error_of("p = point(1, 1); p.nope;"), "unknown property nope");
        assert_eq!(
            error_of("segment(1, 2);"),
            "Creator segment failed: segment needs two points as parents"
        );
        assert_eq!(
            error_of("f = function() {}; f() << a: 1 >>;"),
            "Unexpected value. Only element creators are allowed to have a value after the function call."
        );
        assert_eq!(value_of("point(1, 1) << name: 'P' >>; $('P').y;"), "1");
    }

    #[test]
    fn value_length_and_board_builtins() {
        let source = "A = point(0, 0); B = point(3, 4); s = segment(A, B);
            t = slider([0, 0], [4, 0], [0, 2, 10]);
            [L(s), V(t), t.Value(), $board.name, $board.select('B').y];";
        assert_eq!(value_of(source), "[5, 2, 2, 'board', 4]");
        assert_eq!(value_of("t = slider([0, 0], [4, 0], [0, 2, 10]); t.value = 20; V(t);"), "10");
        assert_eq!(
            error_of("L(3);"),
            "L expects an element, but found a number"
        );
        assert_eq!(
            error_of("A = point(0, 0); V(A);"),
            "A has no method Value"
        );
        let run = run("$board = 1;");
        assert_eq!(run.warnings, vec!["\"$board\" is a predefined value.".to_string()]);
    }

    #[test]
    fn created_objects_remember_their_lines() -> Result<(), RuntimeError> {
        let mut output = Vec::new();
        let mut interpreter =
            Interpreter::new(&mut output).with_host(Host::with_board(Rc::new(Board::new("board"))));
        interpreter.parse("a = 1;\nA = point(\n  1, 2);\nB = point(3, 4);")?;
        assert_eq!(interpreter.created_objects().len(), 2);
        assert_eq!(interpreter.object_at_line(3).map(|object| object.name()), Some("A".to_string()));
        assert_eq!(interpreter.object_at_line(4).map(|object| object.name()), Some("B".to_string()));
        assert!(interpreter.object_at_line(1).is_none());
        Ok(())
    }

    #[test]
    fn closures_record_host_dependencies() -> Result<(), RuntimeError> {
        let mut output = Vec::new();
        let mut interpreter =
            Interpreter::new(&mut output).with_host(Host::with_board(Rc::new(Board::new("board"))));
        let outcome = interpreter.parse(
            "A = point(1, 1); point(2, 2) << name: 'B' >>; n = 3;
            f = function(x, B) { return A.X() + x + q + n; };
            g = function(x) { return B.Y() + x; };
            [f, g];",
        )?;
        let closures = match outcome.value {
            Some(RuntimeValue::Array(array)) => (0..2).filter_map(|i| array.get(i)).collect::<Vec<_>>(),
            other => panic!("expected an array, got {:?}", other),
        };
        let names = |value: &RuntimeValue| match value {
            RuntimeValue::Closure(closure) => {
                assert_eq!(closure.scope_id(), GLOBAL_SCOPE);
                closure
                    .dependencies()
                    .iter()
                    .map(|object| object.name())
                    .collect::<Vec<_>>()
            }
            other => panic!("expected a closure, got {:?}", other),
        };
        // bound variables and host names both count, parameters never do
        assert_eq!(names(&closures[0]), vec!["A".to_string()]);
        assert_eq!(names(&closures[1]), vec!["B".to_string()]);
        Ok(())
    }

    #[test]
    fn unused_closure_has_no_dependencies() -> Result<(), RuntimeError> {
        let mut output = Vec::new();
        let mut interpreter =
            Interpreter::new(&mut output).with_host(Host::with_board(Rc::new(Board::new("board"))));
        let outcome = interpreter.parse("f = function(x) { return x + 1; }; f;")?;
        match outcome.value {
            Some(RuntimeValue::Closure(closure)) => {
                assert!(closure.dependencies().is_empty());
            }
            other => panic!("expected a closure, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn closures_stored_in_their_own_scope_are_freed() -> Result<(), RuntimeError> {
        for mode in [ExecutionMode::TreeWalk, ExecutionMode::Compiled] {
            let mut output = Vec::new();
            let mut interpreter = Interpreter::new(&mut output).with_opts(InterpreterOpts {
                mode,
                ..InterpreterOpts::default()
            });
            interpreter.parse(
                "f = function() { return 1; };
                 make = function() { g = function() { return g; }; return g; };
                 h = make();",
            )?;
            let global = Rc::downgrade(interpreter.scopes.global());
            drop(interpreter);
            assert!(global.upgrade().is_none());
        }
        Ok(())
    }

    #[test]
    fn warnings_do_not_stop_execution() {
        let run = run("PI = 3; $log = 1; PI;");
        assert_eq!(run.result, Ok("3".to_string()));
        assert_eq!(
            run.warnings,
            vec![
                "\"PI\" is a predefined value.".to_string(),
                "\"$log\" is a predefined value.".to_string()
            ]
        );
        let run = run_in(ExecutionMode::TreeWalk, "use board; p = point(0, 0); delete p; $('p');");
        assert_eq!(run.result, Ok("undefined".to_string()));
        assert_eq!(run.warnings.len(), 2);
        assert_eq!(error_of("use elsewhere;"), "Board 'elsewhere' not found!");
    }

    #[test]
    fn runaway_programs_are_cancelled() {
        for mode in [ExecutionMode::TreeWalk, ExecutionMode::Compiled] {
            let mut output = Vec::new();
            let mut interpreter = Interpreter::new(&mut output).with_opts(InterpreterOpts {
                mode,
                ..InterpreterOpts::default().with_max_runtime(Duration::from_millis(50))
            });
            let error = interpreter.parse("while (true) {}").err().map(|error| error.to_string());
            assert_eq!(error, Some("Maximum runtime exceeded.".to_string()));
            // the flag is reset for the next run
            let value = interpreter.parse("1 + 1;").ok().and_then(|outcome| outcome.value);
            assert_eq!(value, Some(RuntimeValue::Number(2.0)));
        }
    }

    #[test]
    fn unbounded_recursion_is_an_error() {
        for mode in [ExecutionMode::TreeWalk, ExecutionMode::Compiled] {
            let mut output = Vec::new();
            let mut interpreter = Interpreter::new(&mut output).with_opts(InterpreterOpts {
                mode,
                ..InterpreterOpts::default().with_max_call_depth(16)
            });
            let error = interpreter
                .parse("f = function(n) { return f(n + 1); }; f(0);")
                .err();
            assert!(matches!(error, Some(RuntimeError::StackOverflow { limit: 16, .. })));
            // the depth counter unwinds with the error
            let value = interpreter
                .parse("g = function(n) { if (n == 0) { return 0; } return g(n - 1); }; g(15);")
                .ok()
                .and_then(|outcome| outcome.value);
            assert_eq!(value, Some(RuntimeValue::Number(0.0)));
        }
    }

    #[test]
    fn syntax_errors_prevent_execution() -> Result<(), RuntimeError> {
        let mut output = Vec::new();
        let mut interpreter = Interpreter::new(&mut output);
        let outcome = interpreter.parse("$log(1); a = ; $log(2);")?;
        assert_eq!(outcome.error_count, 1);
        assert!(outcome.value.is_none());
        drop(interpreter);
        assert!(output.is_empty());
        Ok(())
    }

    #[test]
    fn snippets_and_code_generation() -> Result<(), ExecuteError> {
        let mut output = Vec::new();
        let mut interpreter = Interpreter::new(&mut output);
        interpreter.parse("k = 4;")?;
        assert_eq!(interpreter.snippet("k * 2")?, RuntimeValue::Number(8.0));
        assert_eq!(
            interpreter.parse_to_code("a = 1 + 2 * b;", CompileMode::Surface)?,
            "a = (1 + (2 * b));\n"
        );
        assert!(matches!(
            interpreter.parse_to_code("a = ;", CompileMode::Surface),
            Err(ExecuteError::Syntax { .. })
        ));
        Ok(())
    }
}

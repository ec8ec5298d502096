use super::{
    callable::{CallSite, Callable},
    Ctx, Interpreter, RuntimeError, RuntimeValue, ValueDescriptor, ValueType,
};
use crate::{ast::Axis, host::Host, unique_id::UniqueId, SourceSpan};
use std::{
    fmt::{Debug, Display},
    io::Write,
    ops::RangeInclusive,
    rc::Rc,
};

pub type BuiltinImplementation = fn(&mut BuiltinCall) -> Result<RuntimeValue, RuntimeError>;

/// Arguments and surroundings of one builtin invocation.
pub struct BuiltinCall<'a> {
    pub name: &'a str,
    pub args: &'a [RuntimeValue],
    pub output: &'a mut dyn Write,
    pub host: &'a Host,
    pub span: SourceSpan,
    pub ctx: &'a Ctx,
}

impl<'a> BuiltinCall<'a> {
    pub fn arg(&self, index: usize) -> RuntimeValue {
        self.args
            .get(index)
            .cloned()
            .unwrap_or(RuntimeValue::Undefined)
    }
    pub fn number(&self, index: usize) -> Result<f64, RuntimeError> {
        self.arg(index)
            .cast_number(|expected, actual_type| self.type_error(expected, actual_type))
    }
    /// A coordinate pair, taken from a two element array or from a host object.
    pub fn point(&self, index: usize) -> Result<[f64; 2], RuntimeError> {
        let value = self.arg(index);
        let coords = match &value {
            RuntimeValue::Array(array) => array
                .get(0)
                .and_then(|x| x.as_number())
                .zip(array.get(1).and_then(|y| y.as_number())),
            RuntimeValue::Host(host) => host.coordinate(Axis::X).zip(host.coordinate(Axis::Y)),
            _ => None,
        };
        coords.map(|(x, y)| [x, y]).ok_or_else(|| {
            self.type_error(
                ValueDescriptor::AnyOf(vec![ValueType::Array, ValueType::HostObject]),
                value.type_of(),
            )
        })
    }
    pub fn type_error(&self, expected: ValueDescriptor, actual_type: ValueType) -> RuntimeError {
        RuntimeError::ArgumentTypeError {
            function: self.name.to_string(),
            expected,
            actual_type,
            found_at: self.span,
            source_code: self.ctx.source_code.clone(),
        }
    }
    pub fn fail(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::BuiltinFailed {
            name: self.name.to_string(),
            message: message.into(),
            found_at: self.span,
            source_code: self.ctx.source_code.clone(),
        }
    }
    pub fn write_line(&mut self, line: &str) -> Result<(), RuntimeError> {
        writeln!(self.output, "{}", line).map_err(|cause| RuntimeError::Output {
            cause,
            found_at: self.span,
            source_code: self.ctx.source_code.clone(),
        })
    }
}

#[derive(Clone)]
pub struct BuiltinFunction(Rc<BuiltinFunctionImpl>);
struct BuiltinFunctionImpl {
    id: UniqueId,
    name: String,
    arity: RangeInclusive<usize>,
    implementation: BuiltinImplementation,
}

impl BuiltinFunction {
    pub fn new(name: &str, arity: RangeInclusive<usize>, implementation: BuiltinImplementation) -> Self {
        Self(Rc::new(BuiltinFunctionImpl {
            id: UniqueId::new(),
            name: name.to_string(),
            arity,
            implementation,
        }))
    }
    pub fn name(&self) -> &str {
        &self.0.name
    }
    fn describe_arity(&self) -> String {
        let (min, max) = (*self.0.arity.start(), *self.0.arity.end());
        if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        }
    }
}

impl Callable for BuiltinFunction {
    fn call<W: Write>(
        &self,
        interpreter: &mut Interpreter<W>,
        args: &[RuntimeValue],
        site: &CallSite,
    ) -> Result<RuntimeValue, RuntimeError> {
        if !self.0.arity.contains(&args.len()) {
            return Err(RuntimeError::UnexpectedCallArity {
                name: self.0.name.clone(),
                expected_arity: self.describe_arity(),
                actual_arity: args.len(),
                found_at: site.span,
                source_code: site.ctx.source_code.clone(),
            });
        }
        let mut call = BuiltinCall {
            name: &self.0.name,
            args,
            output: &mut *interpreter.stdout,
            host: &interpreter.host,
            span: site.span,
            ctx: site.ctx,
        };
        (self.0.implementation)(&mut call)
    }
}

impl Display for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "function {}() {{ <native code> }}", self.0.name)
    }
}
impl Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
impl PartialEq for BuiltinFunction {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

/// Reads as the current board session.
pub const BOARD_NAME: &str = "$board";

/// Values readable by bare name.
pub fn constant(name: &str) -> Option<f64> {
    match name {
        "PI" => Some(std::f64::consts::PI),
        "EULER" => Some(std::f64::consts::E),
        _ => None,
    }
}

pub mod builtins {
    use super::{
        BuiltinCall, BuiltinImplementation, RuntimeError, RuntimeValue, ValueDescriptor,
        ValueType,
    };
    use itertools::Itertools;
    use std::{f64::consts::PI, ops::RangeInclusive};

    type In<'a, 'b> = &'a mut BuiltinCall<'b>;
    type Out = Result<RuntimeValue, RuntimeError>;

    const VARIADIC: RangeInclusive<usize> = 0..=usize::MAX;

    pub fn all() -> [(&'static str, RangeInclusive<usize>, BuiltinImplementation); 20] {
        [
            ("$log", VARIADIC, log_output),
            ("$", 1..=1, select),
            ("remove", 1..=1, remove),
            ("IfThen", 3..=3, if_then),
            ("V", 1..=1, value),
            ("L", 1..=1, length),
            ("dist", 2..=2, dist),
            ("rad", 3..=3, rad),
            ("deg", 3..=3, deg),
            ("factorial", 1..=1, factorial),
            ("trunc", 1..=2, trunc),
            ("log", 1..=2, log),
            ("ln", 1..=1, ln),
            ("log10", 1..=1, log10),
            ("lg", 1..=1, log10),
            ("log2", 1..=1, log2),
            ("lb", 1..=1, log2),
            ("ld", 1..=1, log2),
            ("cosh", 1..=1, cosh),
            ("sinh", 1..=1, sinh),
        ]
    }

    pub fn log_output(call: In) -> Out {
        let line = call.args.iter().map(ToString::to_string).join(" ");
        call.write_line(&line)?;
        Ok(RuntimeValue::Undefined)
    }
    pub fn select(call: In) -> Out {
        let name = call.arg(0).to_string();
        Ok(call
            .host
            .names
            .select_by_name_or_id(&name)
            .unwrap_or(RuntimeValue::Undefined))
    }
    pub fn remove(call: In) -> Out {
        if let RuntimeValue::Host(object) = call.arg(0) {
            object.remove().map_err(|cause| RuntimeError::Host {
                cause,
                found_at: call.span,
                source_code: call.ctx.source_code.clone(),
            })?;
        }
        Ok(RuntimeValue::Undefined)
    }
    /// Calls `method` on the host object passed as the only argument.
    fn delegate(call: In, method: &str) -> Out {
        let object = match call.arg(0) {
            RuntimeValue::Host(object) => object,
            other => {
                return Err(call.type_error(
                    ValueDescriptor::Single(ValueType::HostObject),
                    other.type_of(),
                ))
            }
        };
        object
            .call_method(method, &[])
            .map_err(|cause| RuntimeError::Host {
                cause,
                found_at: call.span,
                source_code: call.ctx.source_code.clone(),
            })
    }
    pub fn value(call: In) -> Out {
        delegate(call, "Value")
    }
    pub fn length(call: In) -> Out {
        delegate(call, "L")
    }
    pub fn if_then(call: In) -> Out {
        Ok(match call.arg(0).is_truthy() {
            true => call.arg(1),
            false => call.arg(2),
        })
    }
    pub fn dist(call: In) -> Out {
        let [ax, ay] = call.point(0)?;
        let [bx, by] = call.point(1)?;
        Ok((ax - bx).hypot(ay - by).into())
    }
    fn angle(call: In) -> Result<f64, RuntimeError> {
        let [ax, ay] = call.point(0)?;
        let [bx, by] = call.point(1)?;
        let [cx, cy] = call.point(2)?;
        let phi = (cy - by).atan2(cx - bx) - (ay - by).atan2(ax - bx);
        Ok(if phi < 0.0 { phi + 2.0 * PI } else { phi })
    }
    pub fn rad(call: In) -> Out {
        angle(call).map(RuntimeValue::from)
    }
    pub fn deg(call: In) -> Out {
        angle(call).map(|phi| (phi * 180.0 / PI).into())
    }
    pub fn factorial(call: In) -> Out {
        let n = call.number(0)?;
        if n < 0.0 {
            return Ok(f64::NAN.into());
        }
        let n = n.floor() as u64;
        Ok((2..=n).map(|k| k as f64).product::<f64>().into())
    }
    pub fn trunc(call: In) -> Out {
        let value = call.number(0)?;
        let digits = match call.args.len() {
            2 => call.number(1)?,
            _ => 0.0,
        };
        let scale = 10f64.powi(digits.trunc() as i32);
        Ok(((value * scale).trunc() / scale).into())
    }
    pub fn log(call: In) -> Out {
        let value = call.number(0)?;
        match call.args.len() {
            2 => Ok((value.ln() / call.number(1)?.ln()).into()),
            _ => Ok(value.ln().into()),
        }
    }
    pub fn ln(call: In) -> Out {
        Ok(call.number(0)?.ln().into())
    }
    pub fn log10(call: In) -> Out {
        Ok(call.number(0)?.log10().into())
    }
    pub fn log2(call: In) -> Out {
        Ok(call.number(0)?.log2().into())
    }
    pub fn cosh(call: In) -> Out {
        Ok(call.number(0)?.cosh().into())
    }
    pub fn sinh(call: In) -> Out {
        Ok(call.number(0)?.sinh().into())
    }
}

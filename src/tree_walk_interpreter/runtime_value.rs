use super::{
    builtin_function::BuiltinFunction, closure::Closure, object::PlainObject, RuntimeError,
};
use crate::host::{CreatorHandle, HostRef, MathFunction};
use itertools::Itertools;
use std::{
    cell::RefCell,
    fmt::{Debug, Display},
    rc::Rc,
};

/// Dynamically typed value. Arrays, objects, closures and host objects compare by identity.
#[derive(PartialEq, Clone)]
pub enum RuntimeValue {
    Number(f64),
    String(Rc<String>),
    Boolean(bool),
    Array(ArrayRef),
    Object(PlainObject),
    Closure(Closure),
    Builtin(BuiltinFunction),
    Creator(Rc<CreatorHandle>),
    Math(MathFunction),
    BoundMethod(BoundMethod),
    Host(HostRef),
    Undefined,
}

/// Writes at or past this index are rejected instead of padding the array.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Shared, mutable list. Cloning the handle aliases the same storage.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<RefCell<Vec<RuntimeValue>>>);

impl ArrayRef {
    pub fn new(items: Vec<RuntimeValue>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Option<RuntimeValue> {
        self.0.borrow().get(index).cloned()
    }
    /// Writes in place, padding with undefined when `index` is past the end.
    pub fn set(&self, index: usize, value: RuntimeValue) {
        let mut items = self.0.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, RuntimeValue::Undefined);
        }
        items[index] = value;
    }
    pub fn snapshot(&self) -> Vec<RuntimeValue> {
        self.0.borrow().clone()
    }
}

impl PartialEq for ArrayRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A host method looked up through a property read, remembered with its receiver.
#[derive(Clone, PartialEq)]
pub struct BoundMethod {
    pub receiver: HostRef,
    pub method: Rc<String>,
}

impl Debug for RuntimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(string) => {
                f.write_str("'")?;
                f.write_str(string.replace('\'', "''").as_str())?;
                f.write_str("'")
            }
            Self::Array(array) => write!(
                f,
                "[{}]",
                array.snapshot().iter().map(|item| format!("{:?}", item)).join(", ")
            ),
            other => Display::fmt(other, f),
        }
    }
}

pub fn format_number(value: f64) -> String {
    if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if value == 0.0 {
        // covers -0
        "0".to_string()
    } else {
        value.to_string()
    }
}

impl Display for RuntimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(string) => f.write_str(string),
            Self::Boolean(b) => match b {
                true => f.write_str("true"),
                false => f.write_str("false"),
            },
            Self::Array(array) => write!(
                f,
                "[{}]",
                array.snapshot().iter().map(|item| format!("{:?}", item)).join(", ")
            ),
            Self::Object(object) => Display::fmt(object, f),
            Self::Closure(closure) => Display::fmt(closure, f),
            Self::Builtin(builtin) => Display::fmt(builtin, f),
            Self::Creator(creator) => write!(f, "<creator {}>", creator.name),
            Self::Math(function) => write!(f, "<math {}>", function.name),
            Self::BoundMethod(bound) => {
                write!(f, "<method {}.{}>", bound.receiver.name(), bound.method)
            }
            Self::Host(host) => f.write_str(&host.name()),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

impl From<f64> for RuntimeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}
impl From<bool> for RuntimeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}
impl From<String> for RuntimeValue {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}
impl From<&str> for RuntimeValue {
    fn from(value: &str) -> Self {
        Self::string(value.to_string())
    }
}
impl From<Vec<RuntimeValue>> for RuntimeValue {
    fn from(items: Vec<RuntimeValue>) -> Self {
        Self::Array(ArrayRef::new(items))
    }
}
impl From<Closure> for RuntimeValue {
    fn from(value: Closure) -> Self {
        Self::Closure(value)
    }
}
impl From<HostRef> for RuntimeValue {
    fn from(value: HostRef) -> Self {
        Self::Host(value)
    }
}
impl From<PlainObject> for RuntimeValue {
    fn from(value: PlainObject) -> Self {
        Self::Object(value)
    }
}

impl RuntimeValue {
    pub fn string(value: String) -> Self {
        RuntimeValue::String(Rc::new(value))
    }
    pub fn numbers(values: impl IntoIterator<Item = f64>) -> Self {
        values
            .into_iter()
            .map(RuntimeValue::Number)
            .collect::<Vec<_>>()
            .into()
    }
    pub fn type_of(&self) -> ValueType {
        match self {
            RuntimeValue::Number(_) => ValueType::Number,
            RuntimeValue::String(_) => ValueType::String,
            RuntimeValue::Boolean(_) => ValueType::Boolean,
            RuntimeValue::Array(_) => ValueType::Array,
            RuntimeValue::Object(_) => ValueType::Object,
            RuntimeValue::Closure(_)
            | RuntimeValue::Builtin(_)
            | RuntimeValue::Creator(_)
            | RuntimeValue::Math(_)
            | RuntimeValue::BoundMethod(_) => ValueType::Function,
            RuntimeValue::Host(_) => ValueType::HostObject,
            RuntimeValue::Undefined => ValueType::Undefined,
        }
    }
    pub fn is_callable(&self) -> bool {
        self.type_of() == ValueType::Function
    }
    pub fn is_truthy(&self) -> bool {
        match self {
            RuntimeValue::Boolean(value) => *value,
            RuntimeValue::Number(value) => !(*value == 0.0 || value.is_nan()),
            RuntimeValue::String(value) => !value.is_empty(),
            RuntimeValue::Undefined => false,
            _ => true,
        }
    }
    pub fn cast_number<F: Fn(ValueDescriptor, ValueType) -> RuntimeError>(
        &self,
        make_error: F,
    ) -> Result<f64, RuntimeError> {
        match self {
            RuntimeValue::Number(value) => Ok(*value),
            other => Err(make_error(ValueType::Number.into(), other.type_of())),
        }
    }
    pub fn cast_string<F: Fn(ValueDescriptor, ValueType) -> RuntimeError>(
        &self,
        make_error: F,
    ) -> Result<&str, RuntimeError> {
        match self {
            RuntimeValue::String(string) => Ok(string.as_str()),
            other => Err(make_error(ValueType::String.into(), other.type_of())),
        }
    }
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RuntimeValue::Number(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            RuntimeValue::Array(array) => Some(array),
            _ => None,
        }
    }
    pub fn as_host(&self) -> Option<&HostRef> {
        match self {
            RuntimeValue::Host(host) => Some(host),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Number,
    String,
    Boolean,
    Array,
    Object,
    Function,
    HostObject,
    Undefined,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Function => "function",
            ValueType::HostObject => "element",
            ValueType::Undefined => "undefined",
        })
    }
}

impl ValueType {
    pub fn fmt_a(&self) -> &str {
        match self {
            ValueType::Number => "a number",
            ValueType::String => "a string",
            ValueType::Boolean => "a boolean",
            ValueType::Array => "an array",
            ValueType::Object => "an object",
            ValueType::Function => "a function",
            ValueType::HostObject => "an element",
            ValueType::Undefined => "undefined",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ValueDescriptor {
    Single(ValueType),
    AnyOf(Vec<ValueType>),
}
impl From<ValueType> for ValueDescriptor {
    fn from(value_type: ValueType) -> Self {
        ValueDescriptor::Single(value_type)
    }
}
impl ValueDescriptor {
    pub fn fmt_a(&self) -> String {
        match self {
            Self::Single(value_type) => value_type.fmt_a().to_string(),
            Self::AnyOf(types) => {
                Itertools::intersperse(types.iter().map(ValueType::fmt_a), " or ").collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truthiness() {
        for falsy in [
            RuntimeValue::Boolean(false),
            RuntimeValue::Number(0.0),
            RuntimeValue::Number(f64::NAN),
            RuntimeValue::from(""),
            RuntimeValue::Undefined,
        ] {
            assert!(!falsy.is_truthy(), "{:?}", falsy);
        }
        for truthy in [
            RuntimeValue::Boolean(true),
            RuntimeValue::Number(-0.5),
            RuntimeValue::from("0"),
            RuntimeValue::from(Vec::<RuntimeValue>::new()),
        ] {
            assert!(truthy.is_truthy(), "{:?}", truthy);
        }
    }

    #[test]
    fn arrays_alias_and_grow() {
        let array = ArrayRef::new(vec![1.0.into()]);
        let alias = RuntimeValue::Array(array.clone());
        array.set(3, "x".into());
        assert_eq!(array.len(), 4);
        assert_eq!(alias.to_string(), "[1, undefined, undefined, 'x']");
        assert_eq!(alias, RuntimeValue::Array(array));
        assert!(alias != RuntimeValue::numbers(vec![1.0]));
    }

    #[test]
    fn display_numbers_like_the_language() {
        assert_eq!(RuntimeValue::Number(3.0).to_string(), "3");
        assert_eq!(RuntimeValue::Number(0.125).to_string(), "0.125");
        assert_eq!(RuntimeValue::Number(-1.0 / 0.0).to_string(), "-Infinity");
        assert_eq!(RuntimeValue::Number(-0.0).to_string(), "0");
        assert_eq!(RuntimeValue::numbers(vec![-0.0, -1.0]).to_string(), "[0, -1]");
        assert_eq!(
            ValueDescriptor::AnyOf(vec![ValueType::Number, ValueType::Array]).fmt_a(),
            "a number or an array"
        );
    }
}

//! Collaborators the language engine calls into: element creators, host objects,
//! name lookup and the math table.

mod board;

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    ops::Deref,
    rc::Rc,
};

use lazy_static::lazy_static;
use miette::Diagnostic;
use thiserror::Error;

use crate::{ast::Axis, tree_walk_interpreter::RuntimeValue};

pub use board::{Board, BoardElement, ElementKind};

pub type SessionId = usize;
pub type Attributes = BTreeMap<String, RuntimeValue>;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct HostError {
    message: String,
}
impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait HostObject: Debug {
    fn id(&self) -> String;
    fn name(&self) -> String;
    /// Named child objects, checked before methods and attributes.
    fn sub_object(&self, _name: &str) -> Option<RuntimeValue> {
        None
    }
    /// Maps a property name to the method it stands for.
    fn method_alias(&self, _name: &str) -> Option<String> {
        None
    }
    fn call_method(&self, method: &str, _args: &[RuntimeValue]) -> Result<RuntimeValue, HostError> {
        Err(HostError::new(format!("{} has no method {}", self.name(), method)))
    }
    /// Attribute lookup; `name` is already lower case.
    fn attribute(&self, name: &str) -> Option<RuntimeValue>;
    fn set_property(&self, name: &str, value: RuntimeValue) -> Result<(), HostError>;
    fn is_read_only(&self, _name: &str) -> bool {
        false
    }
    fn element(&self, _index: usize) -> Option<RuntimeValue> {
        None
    }
    fn set_element(&self, index: usize, _value: RuntimeValue) -> Result<(), HostError> {
        Err(HostError::new(format!(
            "{} has no element {}",
            self.name(),
            index
        )))
    }
    fn coordinate(&self, _axis: Axis) -> Option<f64> {
        None
    }
    fn remove(&self) -> Result<(), HostError> {
        Ok(())
    }
}

/// Shared handle to a host object. Two handles are equal when they point at the same object.
#[derive(Clone, Debug)]
pub struct HostRef(Rc<dyn HostObject>);

impl HostRef {
    pub fn new(object: Rc<dyn HostObject>) -> Self {
        Self(object)
    }
}

impl Deref for HostRef {
    type Target = dyn HostObject;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::as_ptr(&self.0) as *const () == Rc::as_ptr(&other.0) as *const ()
    }
}

pub trait CreatorRegistry {
    fn has(&self, session: SessionId, name: &str) -> bool;
    fn invoke(
        &self,
        session: SessionId,
        name: &str,
        parents: &[RuntimeValue],
        attributes: &Attributes,
    ) -> Result<RuntimeValue, HostError>;
    fn select_session(&self, _name: &str) -> Option<SessionId> {
        None
    }
    /// The session itself as a script value, read through `$board`.
    fn session_object(self: Rc<Self>, _session: SessionId) -> Option<RuntimeValue> {
        None
    }
}

pub trait NameResolver {
    fn select_by_name_or_id(&self, name: &str) -> Option<RuntimeValue>;
}

pub trait MathLibrary {
    fn get(&self, name: &str) -> Option<MathFunction>;
}

#[derive(Clone)]
pub struct MathFunction {
    pub name: Rc<String>,
    pub function: fn(&[f64]) -> f64,
}

impl PartialEq for MathFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreatorHandle {
    pub session: SessionId,
    pub name: String,
}

/// Memoized creator handles, owned by one interpreter.
#[derive(Debug, Default)]
pub struct CreatorCache {
    handles: HashMap<(SessionId, String), Rc<CreatorHandle>>,
}

impl CreatorCache {
    pub fn get_or_insert(&mut self, session: SessionId, name: &str) -> Rc<CreatorHandle> {
        self.handles
            .entry((session, name.to_string()))
            .or_insert_with(|| {
                Rc::new(CreatorHandle {
                    session,
                    name: name.to_string(),
                })
            })
            .clone()
    }
    pub fn len(&self) -> usize {
        self.handles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
    pub fn clear(&mut self) {
        self.handles.clear();
    }
    pub fn clear_session(&mut self, session: SessionId) {
        self.handles.retain(|(handle_session, _), _| *handle_session != session);
    }
}

#[derive(Debug, Default)]
pub struct NoCreators;
impl CreatorRegistry for NoCreators {
    fn has(&self, _: SessionId, _: &str) -> bool {
        false
    }
    fn invoke(
        &self,
        _: SessionId,
        name: &str,
        _: &[RuntimeValue],
        _: &Attributes,
    ) -> Result<RuntimeValue, HostError> {
        Err(HostError::new(format!("no creator named {}", name)))
    }
}

#[derive(Debug, Default)]
pub struct NoNames;
impl NameResolver for NoNames {
    fn select_by_name_or_id(&self, _: &str) -> Option<RuntimeValue> {
        None
    }
}

fn arg(args: &[f64], index: usize) -> f64 {
    args.get(index).copied().unwrap_or(f64::NAN)
}

lazy_static! {
    static ref STD_MATH: HashMap<&'static str, fn(&[f64]) -> f64> = {
        let mut table: HashMap<&'static str, fn(&[f64]) -> f64> = HashMap::new();
        table.insert("sin", |args| arg(args, 0).sin());
        table.insert("cos", |args| arg(args, 0).cos());
        table.insert("tan", |args| arg(args, 0).tan());
        table.insert("asin", |args| arg(args, 0).asin());
        table.insert("acos", |args| arg(args, 0).acos());
        table.insert("atan", |args| arg(args, 0).atan());
        table.insert("atan2", |args| arg(args, 0).atan2(arg(args, 1)));
        table.insert("sqrt", |args| arg(args, 0).sqrt());
        table.insert("cbrt", |args| arg(args, 0).cbrt());
        table.insert("abs", |args| arg(args, 0).abs());
        table.insert("exp", |args| arg(args, 0).exp());
        table.insert("pow", |args| arg(args, 0).powf(arg(args, 1)));
        table.insert("floor", |args| arg(args, 0).floor());
        table.insert("ceil", |args| arg(args, 0).ceil());
        table.insert("round", |args| (arg(args, 0) + 0.5).floor());
        table.insert("sign", |args| {
            let value = arg(args, 0);
            if value == 0.0 || value.is_nan() {
                value
            } else {
                value.signum()
            }
        });
        table.insert("hypot", |args| args.iter().map(|value| value * value).sum::<f64>().sqrt());
        table.insert("min", |args| args.iter().copied().fold(f64::INFINITY, f64::min));
        table.insert("max", |args| args.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        table
    };
}

/// The standard `f64` functions.
#[derive(Debug, Default)]
pub struct StdMath;
impl MathLibrary for StdMath {
    fn get(&self, name: &str) -> Option<MathFunction> {
        STD_MATH.get(name).map(|function| MathFunction {
            name: Rc::new(name.to_string()),
            function: *function,
        })
    }
}

/// Everything the interpreter needs from its embedding.
#[derive(Clone)]
pub struct Host {
    pub creators: Rc<dyn CreatorRegistry>,
    pub names: Rc<dyn NameResolver>,
    pub math: Rc<dyn MathLibrary>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            creators: Rc::new(NoCreators),
            names: Rc::new(NoNames),
            math: Rc::new(StdMath),
        }
    }
}

impl Host {
    pub fn with_board(board: Rc<Board>) -> Self {
        Self {
            creators: board.clone(),
            names: board,
            math: Rc::new(StdMath),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn creator_cache_memoizes_per_session() {
        let mut cache = CreatorCache::default();
        let first = cache.get_or_insert(0, "point");
        let again = cache.get_or_insert(0, "point");
        assert!(Rc::ptr_eq(&first, &again));
        cache.get_or_insert(1, "point");
        assert_eq!(cache.len(), 2);
        cache.clear_session(0);
        assert_eq!(cache.len(), 1);
        assert!(!Rc::ptr_eq(&first, &cache.get_or_insert(0, "point")));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn std_math_table() {
        let call = |name: &str, args: &[f64]| StdMath.get(name).map(|f| (f.function)(args));
        assert_eq!(call("max", &[1.0, 5.0, 3.0]), Some(5.0));
        assert_eq!(call("hypot", &[3.0, 4.0]), Some(5.0));
        assert_eq!(call("round", &[-2.5]), Some(-2.0));
        assert_eq!(call("random", &[]), None);
        assert!(call("sqrt", &[]).map_or(false, f64::is_nan));
    }
}

use super::RuntimeValue;
use crate::unique_id::UniqueId;
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt::{Debug, Display},
    rc::Rc,
};

/// Attribute map built by `<< key: value >>`. Shared by reference like arrays.
#[derive(Clone)]
pub struct PlainObject(Rc<PlainObjectImpl>);
struct PlainObjectImpl {
    id: UniqueId,
    values: RefCell<BTreeMap<String, RuntimeValue>>,
}

impl PlainObject {
    pub fn new(values: BTreeMap<String, RuntimeValue>) -> Self {
        Self(Rc::new(PlainObjectImpl {
            id: UniqueId::new(),
            values: RefCell::new(values),
        }))
    }
    pub fn get(&self, name: &str) -> Option<RuntimeValue> {
        self.0.values.borrow().get(name).cloned()
    }
    pub fn set(&self, name: &str, value: RuntimeValue) {
        self.0.values.borrow_mut().insert(name.to_string(), value);
    }
    pub fn entries(&self) -> BTreeMap<String, RuntimeValue> {
        self.0.values.borrow().clone()
    }
}
impl Display for PlainObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.0.values.borrow();
        if values.is_empty() {
            return f.write_str("<< >>");
        }
        f.write_str("<< ")?;
        for (index, (name, value)) in values.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:?}", name, value)?;
        }
        f.write_str(" >>")
    }
}
impl Debug for PlainObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
impl PartialEq for PlainObject {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

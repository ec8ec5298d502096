use super::RuntimeValue;
use std::{
    cell::RefCell,
    collections::HashMap,
    mem,
    rc::{Rc, Weak},
};

pub type ScopeId = usize;
pub type ScopeRef = Rc<RefCell<Scope>>;

pub const GLOBAL_SCOPE: ScopeId = 0;

/// One lexical environment. The parent is fixed at creation.
#[derive(Debug)]
pub struct Scope {
    id: ScopeId,
    parent: Option<ScopeRef>,
    locals: HashMap<String, RuntimeValue>,
    params: Vec<String>,
}

impl Scope {
    pub fn id(&self) -> ScopeId {
        self.id
    }
    pub fn parent(&self) -> Option<&ScopeRef> {
        self.parent.as_ref()
    }
    pub fn params(&self) -> &[String] {
        &self.params
    }
    pub fn get_local(&self, name: &str) -> Option<RuntimeValue> {
        self.locals.get(name).cloned()
    }
    pub fn define(&mut self, name: &str, value: RuntimeValue) {
        self.locals.insert(name.to_string(), value);
    }
}

/// Walks from `scope` to the global scope and returns the innermost binding of `name`.
pub fn lookup_from(scope: &ScopeRef, name: &str) -> Option<RuntimeValue> {
    let mut current = scope.clone();
    loop {
        let next = {
            let borrowed = current.borrow();
            if let Some(value) = borrowed.get_local(name) {
                return Some(value);
            }
            borrowed.parent.clone()?
        };
        current = next;
    }
}

/// All scopes of one interpreter plus the current-scope pointer.
///
/// Scopes are owned by the closures and activations that use them; the table keeps weak
/// references so compiled calls can enter a scope by id. Dropping the table empties every
/// scope still alive, which frees closures stored in the scope they captured.
#[derive(Debug)]
pub struct ScopeTable {
    by_id: HashMap<ScopeId, Weak<RefCell<Scope>>>,
    global: ScopeRef,
    current: ScopeRef,
    suspended: Vec<ScopeRef>,
    next_id: ScopeId,
}

impl Default for ScopeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTable {
    pub fn new() -> Self {
        let global = Rc::new(RefCell::new(Scope {
            id: GLOBAL_SCOPE,
            parent: None,
            locals: HashMap::new(),
            params: vec![],
        }));
        let mut by_id = HashMap::new();
        by_id.insert(GLOBAL_SCOPE, Rc::downgrade(&global));
        Self {
            by_id,
            current: global.clone(),
            global,
            suspended: vec![],
            next_id: GLOBAL_SCOPE + 1,
        }
    }

    pub fn global(&self) -> &ScopeRef {
        &self.global
    }
    pub fn current(&self) -> &ScopeRef {
        &self.current
    }
    pub fn current_id(&self) -> ScopeId {
        self.current.borrow().id
    }
    pub fn is_global(&self) -> bool {
        self.current_id() == GLOBAL_SCOPE
    }
    pub fn depth(&self) -> usize {
        self.suspended.len()
    }

    pub fn get(&self, id: ScopeId) -> Option<ScopeRef> {
        self.by_id.get(&id).and_then(Weak::upgrade)
    }

    /// Creates a child of `parent` holding `params` bound to `args` and makes it current.
    /// Missing arguments are undefined.
    pub fn push_scope(
        &mut self,
        parent: ScopeRef,
        params: &[String],
        args: &[RuntimeValue],
    ) -> ScopeRef {
        let id = self.next_id;
        self.next_id += 1;
        let locals = params
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let value = args.get(index).cloned().unwrap_or(RuntimeValue::Undefined);
                (name.clone(), value)
            })
            .collect();
        let scope = Rc::new(RefCell::new(Scope {
            id,
            parent: Some(parent),
            locals,
            params: params.to_vec(),
        }));
        if id % 1024 == 0 {
            self.by_id.retain(|_, scope| scope.strong_count() > 0);
        }
        self.by_id.insert(id, Rc::downgrade(&scope));
        let previous = mem::replace(&mut self.current, scope.clone());
        self.suspended.push(previous);
        scope
    }

    /// [`push_scope`](Self::push_scope) with the parent addressed by id. `None` when no live
    /// scope has that id; the current scope is left unchanged then.
    pub fn enter(
        &mut self,
        parent: ScopeId,
        params: &[String],
        args: &[RuntimeValue],
    ) -> Option<ScopeRef> {
        let parent = self.get(parent)?;
        Some(self.push_scope(parent, params, args))
    }

    /// Restores the scope that was current before the last push. No-op at the global scope.
    pub fn pop_scope(&mut self) {
        if let Some(previous) = self.suspended.pop() {
            self.current = previous;
        }
    }

    /// Drops every activation above `depth`. Used when a call is abandoned by an error.
    pub fn unwind_to(&mut self, depth: usize) {
        while self.suspended.len() > depth {
            self.pop_scope();
        }
    }

    pub fn lookup_local(&self, name: &str) -> Option<RuntimeValue> {
        lookup_from(&self.current, name)
    }

    pub fn define_local(&self, name: &str, value: RuntimeValue) {
        self.current.borrow_mut().define(name, value);
    }
}

impl Drop for ScopeTable {
    fn drop(&mut self) {
        for scope in self.by_id.values().filter_map(Weak::upgrade) {
            let locals = mem::take(&mut scope.borrow_mut().locals);
            drop(locals);
        }
    }
}

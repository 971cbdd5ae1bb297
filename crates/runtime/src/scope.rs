//! Lexical scope: name lookup, address lookup, and assignment.
//!
//! A scope is created for function calls, compound-statement blocks (`if`,
//! `while`, `foreach` bodies get their own child so loop-local bindings
//! don't leak), and the main entry. Two invariants hold for the lifetime of
//! every scope: every named cell's address is resolvable through
//! `lookup_by_address`, and lookup/assignment both walk the parent chain,
//! with assignment writing at the shallowest binding found.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use yks_core::{Address, CellRef, Error, Instance, Result, Table, Value, ValueCell};
use yks_syntax::Position;

/// The sentinel name that always succeeds to define and is never
/// observable afterwards.
pub const DISCARD: &str = "_";

pub struct Scope {
    data: RefCell<HashMap<String, CellRef>>,
    pointers: RefCell<HashMap<Address, CellRef>>,
    parent: Option<Rc<Scope>>,
    pub is_function: bool,
    pub is_loop: bool,
    pub is_main: bool,
    pub imported_libs: RefCell<HashSet<String>>,
    /// Once any non-import statement has run in the main scope, later
    /// `import` statements are rejected.
    pub imports_closed: RefCell<bool>,
}

impl Scope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(HashMap::new()),
            pointers: RefCell::new(HashMap::new()),
            parent: None,
            is_function: false,
            is_loop: false,
            is_main: true,
            imported_libs: RefCell::new(HashSet::new()),
            imports_closed: RefCell::new(false),
        })
    }

    pub fn child(parent: &Rc<Scope>, is_function: bool, is_loop: bool) -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(HashMap::new()),
            pointers: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            is_function,
            is_loop,
            is_main: false,
            imported_libs: RefCell::new(HashSet::new()),
            imports_closed: RefCell::new(false),
        })
    }

    pub fn parent(&self) -> Option<&Rc<Scope>> {
        self.parent.as_ref()
    }

    /// Walk to the outermost (main) scope. User functions and methods are
    /// always called with this as their parent, not the call-site scope:
    /// the only lexical capture the language supports is a bound receiver.
    pub fn global(self: &Rc<Self>) -> Rc<Scope> {
        let mut current = self.clone();
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    /// True if this scope or an ancestor is a function scope (used to
    /// determine where `return` stops propagating).
    pub fn nearest_loop(&self) -> bool {
        if self.is_loop {
            return true;
        }
        match &self.parent {
            Some(p) if !self.is_function => p.nearest_loop(),
            _ => false,
        }
    }

    /// Recursively index a cell's own address, then any nested field/entry
    /// cells, so pointers into composite sub-fields resolve later.
    fn register_address(&self, cell: &CellRef) {
        self.pointers.borrow_mut().insert(cell.address(), cell.clone());
        match cell.get() {
            Value::Table(t) => {
                for (_, nested) in t.borrow().iter() {
                    self.register_address(nested);
                }
            }
            Value::Instance(i) => {
                for (_, nested) in &i.borrow().fields {
                    self.register_address(nested);
                }
            }
            _ => {}
        }
    }

    pub fn define(&self, name: &str, value: Value, position: Position) -> Result<CellRef> {
        let cell = ValueCell::new(value);
        if name == DISCARD {
            return Ok(cell);
        }
        if self.data.borrow().contains_key(name) {
            return Err(Error::redeclared(
                format!("'{name}' is already declared in this scope"),
                position,
            ));
        }
        self.data.borrow_mut().insert(name.to_string(), cell.clone());
        self.register_address(&cell);
        Ok(cell)
    }

    fn find_owner(self: &Rc<Self>, name: &str) -> Option<Rc<Scope>> {
        if self.data.borrow().contains_key(name) {
            return Some(self.clone());
        }
        self.parent.as_ref().and_then(|p| p.find_owner(name))
    }

    pub fn assign(self: &Rc<Self>, name: &str, value: Value, position: Position) -> Result<()> {
        if name == DISCARD {
            return Ok(());
        }
        let owner = self
            .find_owner(name)
            .ok_or_else(|| Error::undefined(format!("'{name}' is not defined"), position))?;
        let cell = owner.data.borrow().get(name).cloned().expect("found by find_owner");
        if matches!(cell.get(), Value::Struct(_) | Value::Func(_)) {
            return Err(Error::not_assignable(
                format!("'{name}' is bound to a structure declaration or function"),
                position,
            ));
        }
        cell.set(value);
        owner.register_address(&cell);
        Ok(())
    }

    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<CellRef> {
        if let Some(cell) = self.data.borrow().get(name) {
            return Some(cell.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn lookup_by_address(self: &Rc<Self>, addr: Address) -> Option<CellRef> {
        if let Some(cell) = self.pointers.borrow().get(&addr) {
            if cell.address() == addr {
                return Some(cell.clone());
            }
        }
        self.parent.as_ref().and_then(|p| p.lookup_by_address(addr))
    }

    /// Register a cell's current and nested addresses without defining a
    /// name for it; used when a builtin or expression creates an
    /// addressable value (e.g. `ptr`/`pvoid`) that must still resolve
    /// through `*p` without being named.
    pub fn adopt(self: &Rc<Self>, cell: &CellRef) {
        self.register_address(cell);
    }

    /// Render this scope's own bindings (not the parent chain), one
    /// `name: value` per line, for the `runinfo` CLI command.
    pub fn describe(&self) -> String {
        let mut names: Vec<_> = self.data.borrow().keys().cloned().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let value = self.data.borrow().get(&name).unwrap().get();
                format!("{name}: {}", yks_core::format_value(&value))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Recursively re-adopt a table or instance's sub-cells into `scope`; used
/// after the native bridge's writeback replaces nested values.
pub fn readopt_nested(scope: &Rc<Scope>, table: &Table) {
    for (_, cell) in table.iter() {
        scope.adopt(cell);
    }
}

pub fn readopt_instance(scope: &Rc<Scope>, instance: &Instance) {
    for (_, cell) in &instance.fields {
        scope.adopt(cell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::new(1, 1)
    }

    #[test]
    fn lookup_by_address_matches_invariant() {
        let scope = Scope::root();
        let cell = scope.define("x", Value::Int(1), pos()).unwrap();
        let addr = cell.address();
        assert!(Rc::ptr_eq(&scope.lookup_by_address(addr).unwrap(), &cell));
    }

    #[test]
    fn reassigning_repins_address_and_invalidates_old_one() {
        let scope = Scope::root();
        let cell = scope.define("x", Value::Int(1), pos()).unwrap();
        let old_addr = cell.address();
        scope.assign("x", Value::Int(2), pos()).unwrap();
        assert!(scope.lookup_by_address(old_addr).is_none());
        assert!(scope.lookup_by_address(cell.address()).is_some());
    }

    #[test]
    fn redeclaring_fails_but_discard_never_does() {
        let scope = Scope::root();
        scope.define("x", Value::Int(1), pos()).unwrap();
        assert!(scope.define("x", Value::Int(2), pos()).is_err());
        assert!(scope.define(DISCARD, Value::Int(1), pos()).is_ok());
        assert!(scope.define(DISCARD, Value::Int(2), pos()).is_ok());
    }

    #[test]
    fn child_scope_walks_parent_chain() {
        let root = Scope::root();
        root.define("x", Value::Int(7), pos()).unwrap();
        let child = Scope::child(&root, false, false);
        assert!(matches!(child.lookup("x").unwrap().get(), Value::Int(7)));
        child.assign("x", Value::Int(8), pos()).unwrap();
        assert!(matches!(root.lookup("x").unwrap().get(), Value::Int(8)));
    }

    #[test]
    fn not_assignable_for_func_and_struct_bindings() {
        let scope = Scope::root();
        let decl = std::rc::Rc::new(yks_core::StructDecl {
            name: "P".to_string(),
            fields: vec![],
        });
        scope
            .define("P", Value::Struct(decl), pos())
            .unwrap();
        assert!(scope.assign("P", Value::Int(1), pos()).is_err());
    }
}

//! The tagged runtime value and the addressable cell that owns it.
//!
//! Every value that can be named, indexed, or pointed to lives inside a
//! [`ValueCell`]. A cell owns exactly one [`Value`] plus a stable [`Address`]
//! that other cells may capture with `&x` and later dereference with `*p`.
//! Composite values (tables, instances) are themselves built from nested
//! cells so that `&t[0]` and `&p.field` resolve to their own, independently
//! re-settable, addressable storage.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use yks_syntax::ast;

use crate::instance::{Instance, StructDecl};
use crate::table::Table;

/// An opaque handle standing in for a real memory address.
///
/// The interpreter never dereferences an `Address` itself; it is only ever
/// used as a key into a scope's `pointers` index (see
/// `yks-runtime::scope::Scope`). Real pointers into process memory are
/// produced separately by the native bridge's `to_pointer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

static NEXT_ADDRESS: AtomicU64 = AtomicU64::new(1);

fn fresh_address() -> Address {
    Address(NEXT_ADDRESS.fetch_add(1, Ordering::Relaxed))
}

/// A user-defined function: its formal parameters, its AST body, and, for
/// methods, the instance it was bound to at field-access time.
#[derive(Clone)]
pub struct UserFunc {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<[ast::Stmt]>,
    pub receiver: Option<CellRef>,
    pub is_method: bool,
}

impl fmt::Debug for UserFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserFunc")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("is_method", &self.is_method)
            .finish()
    }
}

/// A native closure installed into the root scope at interpreter
/// construction (see `yks-runtime::builtins`).
pub struct BuiltinFunc {
    pub name: &'static str,
    pub call: Rc<dyn Fn(Vec<Value>, yks_syntax::Position) -> crate::error::Result<Vec<Value>>>,
}

impl fmt::Debug for BuiltinFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunc").field("name", &self.name).finish()
    }
}

/// A host error descriptor, produced either by `throw` or wrapped around a
/// `HostError` returned from a native call.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub message: String,
}

#[derive(Debug)]
pub enum FuncValue {
    User(UserFunc),
    Builtin(BuiltinFunc),
}

/// The tagged value every [`ValueCell`] carries.
#[derive(Clone)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(Rc<str>),
    Ptr(u64),
    Table(Rc<RefCell<Table>>),
    Instance(Rc<RefCell<Instance>>),
    Func(Rc<FuncValue>),
    Error(Rc<ErrorValue>),
    Struct(Rc<StructDecl>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Ptr(_) => "ptr",
            Value::Table(_) => "table",
            Value::Instance(_) => "instance",
            Value::Func(_) => "func",
            Value::Error(_) => "error",
            Value::Struct(_) => "struct",
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            _ => true,
        }
    }

    /// Structural equality for scalars, reference identity for composites.
    /// Mirrors the evaluator's `==`/`!=` semantics (see
    /// `yks-runtime::evaluator`); see `DESIGN.md` for why identity was kept
    /// for composites.
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Ptr(a), Value::Ptr(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Ptr(v) => write!(f, "Ptr({v:#x})"),
            Value::Table(_) => write!(f, "Table(..)"),
            Value::Instance(_) => write!(f, "Instance(..)"),
            Value::Func(v) => write!(f, "Func({v:?})"),
            Value::Error(v) => write!(f, "Error({:?})", v.message),
            Value::Struct(s) => write!(f, "Struct({})", s.name),
        }
    }
}

/// The default textual formatter used by `print`, `tostr`, and string
/// concatenation of a non-string operand.
pub fn format_value(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(fl) => {
            if fl.fract() == 0.0 && fl.is_finite() {
                format!("{fl:.1}")
            } else {
                fl.to_string()
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.to_string(),
        Value::Ptr(p) => format!("{p:#x}"),
        Value::Table(t) => t.borrow().format(),
        Value::Instance(i) => i.borrow().format(),
        Value::Func(fun) => match fun.as_ref() {
            FuncValue::User(u) => format!("<func {}>", u.name),
            FuncValue::Builtin(b) => format!("<builtin {}>", b.name),
        },
        Value::Error(e) => format!("<error {}>", e.message),
        Value::Struct(s) => format!("<struct {}>", s.name),
    }
}

/// An addressable owner of a single [`Value`].
///
/// `set` always re-pins a fresh [`Address`]; any index keyed on the previous
/// address becomes stale and must stop resolving to this cell. See
/// `yks-runtime::scope::Scope::lookup_by_address`, which enforces this by
/// comparing the stored cell's *current* address against the lookup key
/// rather than relying on eager removal.
pub struct ValueCell {
    value: RefCell<Value>,
    address: StdCell<Address>,
}

impl ValueCell {
    pub fn new(value: Value) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            address: StdCell::new(fresh_address()),
        })
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Replace the payload, pinning a new address.
    pub fn set(&self, value: Value) {
        *self.value.borrow_mut() = value;
        self.address.set(fresh_address());
    }

    pub fn address(&self) -> Address {
        self.address.get()
    }
}

impl fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell")
            .field("address", &self.address())
            .field("value", &*self.value.borrow())
            .finish()
    }
}

pub type CellRef = Rc<ValueCell>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_repins_address() {
        let cell = ValueCell::new(Value::Int(1));
        let a1 = cell.address();
        cell.set(Value::Int(2));
        let a2 = cell.address();
        assert_ne!(a1, a2);
    }

    #[test]
    fn scalar_equality_is_structural() {
        assert!(Value::Int(1).value_eq(&Value::Float(1.0)));
        assert!(!Value::Int(1).value_eq(&Value::Int(2)));
    }

    #[test]
    fn composite_equality_is_identity() {
        let t1 = Value::Table(Rc::new(RefCell::new(Table::new())));
        let t2 = Value::Table(Rc::new(RefCell::new(Table::new())));
        assert!(!t1.value_eq(&t2));
        assert!(t1.value_eq(&t1.clone()));
    }
}

//! Expression evaluation.
//!
//! [`eval`] yields a single value; [`eval_multi`] yields the full ordered
//! sequence a node can produce (only calls return more than one). Call
//! argument lists, `yar`/assignment right-hand sides, and `return` lists all
//! flatten their component expressions through [`eval_flattened_list`] so a
//! multi-return call spliced among other expressions contributes every
//! value it returns, in place.

use std::cell::RefCell;
use std::rc::Rc;

use yks_core::{Address, CellRef, Error, FuncValue, Result, Table, Value};
use yks_syntax::ast::{self, BinOp};
use yks_syntax::Position;

use crate::scope::Scope;
use crate::statements;

pub fn eval(scope: &Rc<Scope>, expr: &ast::Expr) -> Result<Value> {
    Ok(eval_multi(scope, expr)?.into_iter().next().unwrap_or(Value::Nil))
}

pub fn eval_flattened_list(scope: &Rc<Scope>, exprs: &[ast::Expr]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(exprs.len());
    for e in exprs {
        out.extend(eval_multi(scope, e)?);
    }
    Ok(out)
}

pub fn eval_multi(scope: &Rc<Scope>, expr: &ast::Expr) -> Result<Vec<Value>> {
    match expr {
        ast::Expr::Nil(_) => Ok(vec![Value::Nil]),
        ast::Expr::Int(i, _) => Ok(vec![Value::Int(*i)]),
        ast::Expr::Float(f, _) => Ok(vec![Value::Float(*f)]),
        ast::Expr::Bool(b, _) => Ok(vec![Value::Bool(*b)]),
        ast::Expr::Str(s, _) => Ok(vec![Value::string(s.clone())]),
        ast::Expr::Ident(name, _) => Ok(vec![scope.lookup(name).map(|c| c.get()).unwrap_or(Value::Nil)]),

        ast::Expr::Map { entries, bit_hint, position } => {
            let mut table = Table::new();
            table.bit_width = *bit_hint;
            for entry in entries {
                let key = eval(scope, &entry.key)?;
                let value = eval(scope, &entry.value)?;
                table.set(key, value);
            }
            let _ = position;
            Ok(vec![Value::Table(Rc::new(RefCell::new(table)))])
        }

        ast::Expr::StructNew { name, fields, position } => {
            let decl = match scope.lookup(name).map(|c| c.get()) {
                Some(Value::Struct(decl)) => decl,
                Some(other) => {
                    return Err(Error::type_mismatch(
                        format!("'{name}' is not a structure declaration, found {}", other.kind()),
                        *position,
                    ))
                }
                None => return Err(Error::undefined(format!("structure '{name}' is not defined"), *position)),
            };
            Ok(vec![statements::build_instance(scope, decl, fields, *position)?])
        }

        ast::Expr::Index { target, key, position } => Ok(vec![eval_index(scope, target, key, *position)?]),
        ast::Expr::Field { target, name, position } => Ok(vec![eval_field(scope, target, name, *position)?]),
        ast::Expr::PtrOf { target, position } => Ok(vec![eval_ptr_of(scope, target, *position)?]),

        ast::Expr::Call { callee, args, position } => {
            let callee_val = eval(scope, callee)?;
            let arg_vals = eval_flattened_list(scope, args)?;
            call_value(scope, &callee_val, arg_vals, *position)
        }

        ast::Expr::BinOp { op, left, right, position } => Ok(vec![eval_binop(scope, *op, left, right, *position)?]),

        ast::Expr::Neg { right, position } => {
            let v = eval(scope, right)?;
            Ok(vec![negate(&v, *position)?])
        }
    }
}

fn negate(v: &Value, position: Position) -> Result<Value> {
    match v {
        Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(Error::type_mismatch(
            format!("cannot negate a value of kind {}", other.kind()),
            position,
        )),
    }
}

fn eval_index(scope: &Rc<Scope>, target: &ast::Expr, key: &ast::Expr, position: Position) -> Result<Value> {
    let target_val = eval(scope, target)?;
    let key_val = eval(scope, key)?;
    match target_val {
        Value::Table(t) => Ok(t.borrow().get(&key_val).map(|c| c.get()).unwrap_or(Value::Nil)),
        Value::String(s) => {
            let idx = match key_val {
                Value::Int(i) => i,
                other => {
                    return Err(Error::type_mismatch(
                        format!("string index must be an integer, found {}", other.kind()),
                        position,
                    ))
                }
            };
            if idx < 0 {
                return Err(Error::out_of_bounds("string index is negative", position));
            }
            s.chars()
                .nth(idx as usize)
                .map(|c| Value::string(c.to_string()))
                .ok_or_else(|| Error::out_of_bounds("string index out of range", position))
        }
        other => Err(Error::type_mismatch(
            format!("cannot index a value of kind {}", other.kind()),
            position,
        )),
    }
}

fn eval_field(scope: &Rc<Scope>, target: &ast::Expr, name: &str, position: Position) -> Result<Value> {
    let target_val = eval(scope, target)?;
    match target_val {
        Value::Instance(inst) => inst
            .borrow()
            .get(name)
            .map(|c| c.get())
            .ok_or_else(|| Error::undefined(format!("field '{name}' not found"), position)),
        other => Err(Error::type_mismatch(
            format!("cannot access field '{name}' on a value of kind {}", other.kind()),
            position,
        )),
    }
}

/// Resolve the addressable cell an lvalue-shaped expression denotes,
/// without reading its value. Shared by `&expr` and indirect assignment's
/// sibling operations in `statements`.
fn resolve_cell(scope: &Rc<Scope>, expr: &ast::Expr, position: Position) -> Result<CellRef> {
    match expr {
        ast::Expr::Ident(name, _) => scope
            .lookup(name)
            .ok_or_else(|| Error::undefined(format!("'{name}' is not defined"), position)),
        ast::Expr::Index { target, key, .. } => {
            let target_val = eval(scope, target)?;
            let key_val = eval(scope, key)?;
            match target_val {
                Value::Table(t) => t
                    .borrow()
                    .get(&key_val)
                    .ok_or_else(|| Error::out_of_bounds("no entry at that key to take the address of", position)),
                other => Err(Error::type_mismatch(
                    format!("cannot take the address of an index into a value of kind {}", other.kind()),
                    position,
                )),
            }
        }
        ast::Expr::Field { target, name, .. } => {
            let target_val = eval(scope, target)?;
            match target_val {
                Value::Instance(inst) => inst
                    .borrow()
                    .get(name)
                    .ok_or_else(|| Error::undefined(format!("field '{name}' not found"), position)),
                other => Err(Error::type_mismatch(
                    format!("cannot take the address of a field on a value of kind {}", other.kind()),
                    position,
                )),
            }
        }
        _ => Err(Error::type_mismatch(
            "cannot take the address of this expression",
            position,
        )),
    }
}

fn eval_ptr_of(scope: &Rc<Scope>, target: &ast::Expr, position: Position) -> Result<Value> {
    let cell = resolve_cell(scope, target, position)?;
    scope.adopt(&cell);
    Ok(Value::Ptr(cell.address().0))
}

/// `*p` is handled here too (by the bridge's `to_pointer` callers and by
/// `statements::run_stmt`'s `IndirAssign`), both resolving through this
/// same `Address` newtype rather than a raw integer.
pub fn deref_address(raw: u64) -> Address {
    Address(raw)
}

fn eval_binop(scope: &Rc<Scope>, op: BinOp, left: &ast::Expr, right: &ast::Expr, position: Position) -> Result<Value> {
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = eval(scope, left)?;
        return match op {
            BinOp::And => {
                if !l.truthy() {
                    Ok(l)
                } else {
                    eval(scope, right)
                }
            }
            BinOp::Or => {
                if l.truthy() {
                    Ok(l)
                } else {
                    eval(scope, right)
                }
            }
            _ => unreachable!(),
        };
    }

    let l = eval(scope, left)?;
    let r = eval(scope, right)?;

    match op {
        BinOp::Add => match (&l, &r) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::string(format!("{}{}", yks_core::format_value(&l), yks_core::format_value(&r))))
            }
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            _ if l.is_number() && r.is_number() => Ok(Value::Float(l.as_f64().unwrap() + r.as_f64().unwrap())),
            _ => Err(type_mismatch_binop("+", &l, &r, position)),
        },
        BinOp::Sub => numeric_op(&l, &r, position, "-", i64::wrapping_sub, |a, b| a - b),
        BinOp::Mul => numeric_op(&l, &r, position, "*", i64::wrapping_mul, |a, b| a * b),
        BinOp::Div => {
            if l.is_number() && r.is_number() {
                Ok(Value::Float(l.as_f64().unwrap() / r.as_f64().unwrap()))
            } else {
                Err(type_mismatch_binop("/", &l, &r, position))
            }
        }
        BinOp::BitOr => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
            _ => Err(Error::type_mismatch(
                format!("bit-or requires two integers, found {} and {}", l.kind(), r.kind()),
                position,
            )),
        },
        BinOp::Equals => Ok(Value::Bool(l.value_eq(&r))),
        BinOp::NotEquals => Ok(Value::Bool(!l.value_eq(&r))),
        BinOp::Greater => compare(&l, &r, position, |a, b| a > b),
        BinOp::Less => compare(&l, &r, position, |a, b| a < b),
        BinOp::GreaterEq => compare(&l, &r, position, |a, b| a >= b),
        BinOp::LessEq => compare(&l, &r, position, |a, b| a <= b),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

/// Both operands integers wrap on overflow via `int_op`; any float operand
/// promotes the whole operation to `f64` via `float_op`, matching the rest
/// of the language's int/float promotion rules.
fn numeric_op(
    l: &Value,
    r: &Value,
    position: Position,
    sym: &str,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        _ if l.is_number() && r.is_number() => Ok(Value::Float(float_op(l.as_f64().unwrap(), r.as_f64().unwrap()))),
        _ => Err(type_mismatch_binop(sym, l, r, position)),
    }
}

fn compare(l: &Value, r: &Value, position: Position, f: impl Fn(f64, f64) -> bool) -> Result<Value> {
    if l.is_number() && r.is_number() {
        Ok(Value::Bool(f(l.as_f64().unwrap(), r.as_f64().unwrap())))
    } else {
        Err(Error::type_mismatch(
            format!("comparison requires two numbers, found {} and {}", l.kind(), r.kind()),
            position,
        ))
    }
}

fn type_mismatch_binop(sym: &str, l: &Value, r: &Value, position: Position) -> Error {
    Error::type_mismatch(
        format!("'{sym}' is not defined for {} and {}", l.kind(), r.kind()),
        position,
    )
}

/// Invoke a callable value, dispatching to a user function's fresh call
/// scope or straight into a builtin's native closure.
pub fn call_value(scope: &Rc<Scope>, callee: &Value, args: Vec<Value>, position: Position) -> Result<Vec<Value>> {
    match callee {
        Value::Func(f) => match f.as_ref() {
            FuncValue::Builtin(b) => (b.call)(args, position),
            FuncValue::User(u) => statements::call_user_func(scope, u, args, position),
        },
        other => Err(Error::type_mismatch(
            format!("cannot call a value of kind {}", other.kind()),
            position,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yks_syntax::parse_source;

    fn run_expr_program(src: &str) -> Rc<Scope> {
        let program = parse_source(src).unwrap();
        let scope = Scope::root();
        crate::statements::run_block(&scope, &program.statements).unwrap();
        scope
    }

    #[test]
    fn mixed_int_float_addition_promotes_to_float() {
        let scope = run_expr_program("yar a = 1, b = 2.5, c = a + b;");
        assert!(matches!(scope.lookup("c").unwrap().get(), Value::Float(f) if f == 3.5));
    }

    #[test]
    fn string_indexing_yields_scalar_and_rejects_out_of_range() {
        let program = parse_source("yar s = \"hi\"; yar c = s[0];").unwrap();
        let scope = Scope::root();
        crate::statements::run_block(&scope, &program.statements).unwrap();
        assert!(matches!(scope.lookup("c").unwrap().get(), Value::String(s) if &*s == "h"));

        let program = parse_source("yar s = \"hi\"; yar c = s[5];").unwrap();
        let scope = Scope::root();
        assert!(crate::statements::run_block(&scope, &program.statements).is_err());
    }

    #[test]
    fn equality_is_structural_for_scalars() {
        let scope = run_expr_program("yar a = (1 == 1.0);");
        assert!(matches!(scope.lookup("a").unwrap().get(), Value::Bool(true)));
    }
}

//! Statement execution: the `(terminated, skipped, return-values)` state
//! machine described for the body runner, collapsed here into a `Flow`
//! enum with the same four shapes.

use std::rc::Rc;

use yks_core::{Error, Instance, Result, StructDecl, StructFieldDecl, UserFunc, Value, ValueCell};
use yks_syntax::ast;

use crate::evaluator::{self, eval, eval_flattened_list};
use crate::scope::Scope;

pub enum Flow {
    Next,
    Break,
    Continue,
    Return(Vec<Value>),
}

pub fn run_block(scope: &Rc<Scope>, stmts: &[ast::Stmt]) -> Result<Flow> {
    for stmt in stmts {
        match run_stmt(scope, stmt)? {
            Flow::Next => continue,
            other => return Ok(other),
        }
    }
    Ok(Flow::Next)
}

/// Run the main program's own top-level statements. `import` is only valid
/// before any other statement *in the main program's own source* (spec
/// §4.7), so only this entry point — never a nested block, a function
/// body, or an imported module's own top-level statements, all of which run
/// through plain `run_block` — closes `imports_closed`.
pub fn run_main_block(scope: &Rc<Scope>, stmts: &[ast::Stmt]) -> Result<Flow> {
    for stmt in stmts {
        if !matches!(stmt, ast::Stmt::Import { .. }) {
            *scope.imports_closed.borrow_mut() = true;
        }
        match run_stmt(scope, stmt)? {
            Flow::Next => continue,
            other => return Ok(other),
        }
    }
    Ok(Flow::Next)
}

pub fn run_stmt(scope: &Rc<Scope>, stmt: &ast::Stmt) -> Result<Flow> {
    match stmt {
        ast::Stmt::Expr(e) => {
            eval(scope, e)?;
            Ok(Flow::Next)
        }

        ast::Stmt::VarDec { idents, values, position, .. } => {
            let rhs = eval_flattened_list(scope, values)?;
            bind_multi(idents.len(), &rhs, *position)?;
            for (i, name) in idents.iter().enumerate() {
                let v = rhs.get(i).cloned().unwrap_or(Value::Nil);
                scope.define(name, v, *position)?;
            }
            Ok(Flow::Next)
        }

        ast::Stmt::SetVar { targets, values, position } => {
            let rhs = eval_flattened_list(scope, values)?;
            bind_multi(targets.len(), &rhs, *position)?;
            for (i, name) in targets.iter().enumerate() {
                let v = rhs.get(i).cloned().unwrap_or(Value::Nil);
                scope.assign(name, v, *position)?;
            }
            Ok(Flow::Next)
        }

        ast::Stmt::SetIndex { target, value, position } => {
            set_index(scope, target, value, *position)?;
            Ok(Flow::Next)
        }

        ast::Stmt::SetField { target, value, position } => {
            set_field(scope, target, value, *position)?;
            Ok(Flow::Next)
        }

        ast::Stmt::IndirAssign { ptr_expr, value, position } => {
            let ptr = eval(scope, ptr_expr)?;
            let addr = match ptr {
                Value::Ptr(p) => yks_core::Address(p),
                other => {
                    return Err(Error::type_mismatch(
                        format!("cannot dereference a value of kind {}", other.kind()),
                        *position,
                    ))
                }
            };
            let cell = scope
                .lookup_by_address(addr)
                .ok_or_else(|| Error::dangling_pointer("pointer does not resolve to a live cell", *position))?;
            let v = eval(scope, value)?;
            cell.set(v);
            scope.adopt(&cell);
            Ok(Flow::Next)
        }

        ast::Stmt::If { cond, body, else_branch, position: _ } => {
            if eval(scope, cond)?.truthy() {
                let child = Scope::child(scope, false, false);
                run_block(&child, body)
            } else if let Some(next) = else_branch {
                run_stmt(scope, next)
            } else {
                Ok(Flow::Next)
            }
        }

        ast::Stmt::Else { cond, body, else_branch, position: _ } => {
            let take = match cond {
                Some(c) => eval(scope, c)?.truthy(),
                None => true,
            };
            if take {
                let child = Scope::child(scope, false, false);
                run_block(&child, body)
            } else if let Some(next) = else_branch {
                run_stmt(scope, next)
            } else {
                Ok(Flow::Next)
            }
        }

        ast::Stmt::While { cond, body, position: _ } => {
            while eval(scope, cond)?.truthy() {
                let child = Scope::child(scope, false, true);
                match run_block(&child, body)? {
                    Flow::Break => break,
                    Flow::Continue | Flow::Next => continue,
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            }
            Ok(Flow::Next)
        }

        ast::Stmt::Foreach { key_ident, value_ident, iterable, body, position } => {
            let table = match eval(scope, iterable)? {
                Value::Table(t) => t,
                other => {
                    return Err(Error::not_iterable(
                        format!("cannot iterate over a value of kind {}", other.kind()),
                        *position,
                    ))
                }
            };
            let entries: Vec<(Value, Value)> = table
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.get()))
                .collect();
            for (k, v) in entries {
                let child = Scope::child(scope, false, true);
                child.define(key_ident, k, *position)?;
                child.define(value_ident, v, *position)?;
                match run_block(&child, body)? {
                    Flow::Break => break,
                    Flow::Continue | Flow::Next => continue,
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            }
            Ok(Flow::Next)
        }

        ast::Stmt::Break(_) => Ok(Flow::Break),
        ast::Stmt::Continue(_) => Ok(Flow::Continue),

        ast::Stmt::Return { values, position } => {
            let rets = eval_flattened_list(scope, values)?;
            let _ = position;
            Ok(Flow::Return(rets))
        }

        ast::Stmt::FuncDec(f) => {
            define_func(scope, f, None, f.position)?;
            Ok(Flow::Next)
        }

        ast::Stmt::StructDec(s) => {
            define_struct(scope, s)?;
            Ok(Flow::Next)
        }

        ast::Stmt::Import { path, position } => {
            crate::import::run_import(scope, path, *position)?;
            Ok(Flow::Next)
        }
    }
}

fn bind_multi(lhs_len: usize, rhs: &[Value], position: yks_syntax::Position) -> Result<()> {
    if rhs.len() != lhs_len {
        return Err(Error::arity(
            format!(
                "assignment expects {lhs_len} value(s) but right-hand side produced {}",
                rhs.len()
            ),
            position,
        ));
    }
    Ok(())
}

fn set_index(scope: &Rc<Scope>, target: &ast::Expr, value_expr: &ast::Expr, position: yks_syntax::Position) -> Result<()> {
    let (target_expr, key_expr) = match target {
        ast::Expr::Index { target, key, .. } => (target.as_ref(), key.as_ref()),
        _ => unreachable!("parser only produces SetIndex with an Index target"),
    };
    let target_val = eval(scope, target_expr)?;
    let key_val = eval(scope, key_expr)?;
    let value = eval(scope, value_expr)?;
    match target_val {
        Value::Table(t) => {
            t.borrow_mut().set(key_val.clone(), value);
            if let Some(cell) = t.borrow().get(&key_val) {
                scope.adopt(&cell);
            }
            Ok(())
        }
        other => Err(Error::type_mismatch(
            format!("cannot index-assign into a value of kind {}", other.kind()),
            position,
        )),
    }
}

fn set_field(scope: &Rc<Scope>, target: &ast::Expr, value_expr: &ast::Expr, position: yks_syntax::Position) -> Result<()> {
    let (target_expr, name) = match target {
        ast::Expr::Field { target, name, .. } => (target.as_ref(), name.as_str()),
        _ => unreachable!("parser only produces SetField with a Field target"),
    };
    let target_val = eval(scope, target_expr)?;
    let value = eval(scope, value_expr)?;
    match target_val {
        Value::Instance(inst) => {
            let cell = inst
                .borrow()
                .get(name)
                .ok_or_else(|| Error::undefined(format!("field '{name}' not found"), position))?;
            cell.set(value);
            scope.adopt(&cell);
            Ok(())
        }
        other => Err(Error::type_mismatch(
            format!("cannot set a field on a value of kind {}", other.kind()),
            position,
        )),
    }
}

fn define_func(scope: &Rc<Scope>, f: &ast::FuncDec, receiver: Option<yks_core::CellRef>, position: yks_syntax::Position) -> Result<yks_core::CellRef> {
    let user = UserFunc {
        name: f.name.clone(),
        params: f.params.clone(),
        body: Rc::from(f.body.clone().into_boxed_slice()),
        receiver,
        is_method: false,
    };
    scope.define(
        &f.name,
        Value::Func(Rc::new(yks_core::FuncValue::User(user))),
        position,
    )
}

fn define_struct(scope: &Rc<Scope>, s: &ast::StructDec) -> Result<()> {
    let fields = s
        .fields
        .iter()
        .map(|f| StructFieldDecl {
            name: f.name.clone(),
            bits: f.bits,
            method: f.method.clone().map(Rc::new),
        })
        .collect();
    let decl = Rc::new(StructDecl {
        name: s.name.clone(),
        fields,
    });
    scope.define(&s.name, Value::Struct(decl), s.position)?;
    Ok(())
}

/// Build an instance from a `StructNew` expression: eager method-receiver
/// binding, then layout computation and an initial serialization pass.
pub fn build_instance(
    scope: &Rc<Scope>,
    decl: Rc<StructDecl>,
    inits: &[ast::StructFieldInit],
    position: yks_syntax::Position,
) -> Result<Value> {
    let mut fields = Vec::with_capacity(decl.fields.len());
    let mut method_slots = Vec::new();

    for (idx, decl_field) in decl.fields.iter().enumerate() {
        if let Some(method) = &decl_field.method {
            fields.push((decl_field.name.clone(), ValueCell::new(Value::Nil)));
            method_slots.push((idx, method.clone()));
            continue;
        }
        let init = inits.iter().find(|i| i.name == decl_field.name);
        let value = match init {
            Some(i) => eval(scope, &i.value)?,
            None => Value::Nil,
        };
        fields.push((decl_field.name.clone(), ValueCell::new(value)));
    }

    let instance = Rc::new(std::cell::RefCell::new(Instance::new(decl, fields)));
    let receiver_cell = ValueCell::new(Value::Instance(instance.clone()));

    for (idx, method) in method_slots {
        let user = UserFunc {
            name: method.name.clone(),
            params: method.params.clone(),
            body: Rc::from(method.body.clone().into_boxed_slice()),
            receiver: Some(receiver_cell.clone()),
            is_method: true,
        };
        instance.borrow().fields[idx]
            .1
            .set(Value::Func(Rc::new(yks_core::FuncValue::User(user))));
    }

    instance.borrow_mut().serialize(position)?;
    Ok(Value::Instance(instance))
}

pub fn call_user_func(scope: &Rc<Scope>, u: &UserFunc, args: Vec<Value>, position: yks_syntax::Position) -> Result<Vec<Value>> {
    if args.len() > u.params.len() {
        return Err(Error::arity(
            format!(
                "'{}' takes {} argument(s) but {} were given",
                u.name,
                u.params.len(),
                args.len()
            ),
            position,
        ));
    }
    let global = scope.global();
    let call_scope = Scope::child(&global, true, false);
    if let Some(receiver) = &u.receiver {
        call_scope.define("this", receiver.get(), position)?;
    }
    for (i, param) in u.params.iter().enumerate() {
        let v = args.get(i).cloned().unwrap_or(Value::Nil);
        call_scope.define(param, v, position)?;
    }
    match run_block(&call_scope, &u.body)? {
        Flow::Return(values) => Ok(values),
        _ => Ok(Vec::new()),
    }
}

pub use evaluator::call_value;

//! The fixed set of native callables installed into the root scope at
//! interpreter construction. Per the shared-resource policy, this set is
//! installed once and never mutated afterward.

use std::rc::Rc;
use std::time::Duration;

use yks_core::{format_value, BuiltinFunc, Error, ErrorValue, FuncValue, Result, Value};
use yks_syntax::Position;

use crate::bridge::Bridge;
use crate::scope::Scope;

fn def(scope: &Rc<Scope>, name: &'static str, call: impl Fn(Vec<Value>, Position) -> Result<Vec<Value>> + 'static) {
    let func = Value::Func(Rc::new(FuncValue::Builtin(BuiltinFunc {
        name,
        call: Rc::new(call),
    })));
    scope
        .define(name, func, Position::new(0, 0))
        .expect("builtin names are installed once into an empty root scope");
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Nil)
}

/// Install every builtin named in the root-scope contract.
pub fn install(scope: &Rc<Scope>, bridge: Rc<Bridge>) {
    def(scope, "print", |args, _| {
        let line = args.iter().map(format_value).collect::<Vec<_>>().join(" ");
        println!("{line}");
        Ok(vec![])
    });

    def(scope, "len", |args, position| {
        let v = arg(&args, 0);
        let n = match &v {
            Value::Table(t) => t.borrow().len() as i64,
            Value::String(s) => s.chars().count() as i64,
            other => {
                return Err(Error::type_mismatch(
                    format!("len() is not defined for a value of kind {}", other.kind()),
                    position,
                ))
            }
        };
        Ok(vec![Value::Int(n)])
    });

    def(scope, "tonum", |args, position| {
        let v = arg(&args, 0);
        let out = match &v {
            Value::Int(_) | Value::Float(_) => v,
            Value::Bool(b) => Value::Int(if *b { 1 } else { 0 }),
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Value::Int(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    Value::Float(f)
                } else {
                    return Err(Error::type_mismatch(
                        format!("'{s}' cannot be parsed as a number"),
                        position,
                    ));
                }
            }
            other => {
                return Err(Error::type_mismatch(
                    format!("tonum() is not defined for a value of kind {}", other.kind()),
                    position,
                ))
            }
        };
        Ok(vec![out])
    });

    def(scope, "tostr", |args, _| Ok(vec![Value::string(format_value(&arg(&args, 0)))]));

    def(scope, "gettype", |args, _| Ok(vec![Value::string(arg(&args, 0).kind())]));

    def(scope, "sleep", |args, position| {
        match arg(&args, 0) {
            Value::Int(ms) if ms >= 0 => std::thread::sleep(Duration::from_millis(ms as u64)),
            Value::Float(secs) if secs >= 0.0 => std::thread::sleep(Duration::from_secs_f64(secs)),
            other => {
                return Err(Error::type_mismatch(
                    format!("sleep() expects a non-negative int or float, found {}", other.kind()),
                    position,
                ))
            }
        }
        Ok(vec![])
    });

    def(scope, "throw", |args, position| {
        let message = match arg(&args, 0) {
            Value::String(s) => s.to_string(),
            other => format_value(&other),
        };
        let _ = position;
        Ok(vec![Value::Error(Rc::new(ErrorValue { message }))])
    });

    def(scope, "delete", |args, position| {
        let key = arg(&args, 1);
        match arg(&args, 0) {
            Value::Table(t) => Ok(vec![Value::Bool(t.borrow_mut().delete(&key))]),
            other => Err(Error::type_mismatch(
                format!("delete() is not defined for a value of kind {}", other.kind()),
                position,
            )),
        }
    });

    def(scope, "bytestostr", |args, position| {
        let bytes = table_of_ints(&arg(&args, 0), position)?;
        let raw: Vec<u8> = bytes.into_iter().map(|i| i as u8).collect();
        Ok(vec![Value::string(String::from_utf8_lossy(&raw).into_owned())])
    });

    def(scope, "unicodetostr", |args, position| {
        let points = table_of_ints(&arg(&args, 0), position)?;
        let mut s = String::new();
        for p in points {
            let c = char::from_u32(p as u32)
                .ok_or_else(|| Error::type_mismatch(format!("{p} is not a valid unicode scalar value"), position))?;
            s.push(c);
        }
        Ok(vec![Value::string(s)])
    });

    {
        let bridge = bridge.clone();
        def(scope, "ptr", move |args, position| {
            let addr = bridge.alloc_scalar(&arg(&args, 0), position)?;
            Ok(vec![Value::Ptr(addr)])
        });
    }

    {
        let bridge = bridge.clone();
        def(scope, "pvoid", move |args, position| {
            let size = match arg(&args, 0) {
                Value::Int(n) if n >= 0 => n as usize,
                other => {
                    return Err(Error::type_mismatch(
                        format!("pvoid() expects a non-negative int size, found {}", other.kind()),
                        position,
                    ))
                }
            };
            Ok(vec![Value::Ptr(bridge.alloc_bytes(size))])
        });
    }

    {
        let bridge = bridge.clone();
        def(scope, "syscall", move |args, position| syscall_builtin(&bridge, &args, position));
    }
    {
        let bridge = bridge.clone();
        def(scope, "syscall6", move |args, position| syscall_builtin(&bridge, &args, position));
    }

    {
        let bridge = bridge.clone();
        def(scope, "call", move |args, position| {
            let library = match arg(&args, 0) {
                Value::String(s) => s.to_string(),
                other => {
                    return Err(Error::type_mismatch(
                        format!("call() expects a library name string, found {}", other.kind()),
                        position,
                    ))
                }
            };
            let symbol = match arg(&args, 1) {
                Value::String(s) => s.to_string(),
                other => {
                    return Err(Error::type_mismatch(
                        format!("call() expects a symbol name string, found {}", other.kind()),
                        position,
                    ))
                }
            };
            let rest = if args.len() > 2 { args[2..].to_vec() } else { Vec::new() };
            let (w0, w1, err) = bridge.invoke_procedure(&library, &symbol, &rest, position)?;
            Ok(vec![Value::Int(w0), Value::Int(w1), err_to_value(err)])
        });
    }
}

fn syscall_builtin(bridge: &Bridge, args: &[Value], position: Position) -> Result<Vec<Value>> {
    let trap = match arg(args, 0) {
        Value::Int(n) => n,
        other => {
            return Err(Error::type_mismatch(
                format!("syscall() expects an integer trap number, found {}", other.kind()),
                position,
            ))
        }
    };
    let rest = if args.len() > 1 { args[1..].to_vec() } else { Vec::new() };
    let (w0, w1, err) = bridge.invoke_syscall(trap, &rest, position)?;
    Ok(vec![Value::Int(w0), Value::Int(w1), err_to_value(err)])
}

fn err_to_value(err: Option<ErrorValue>) -> Value {
    match err {
        Some(e) => Value::Error(Rc::new(e)),
        None => Value::Nil,
    }
}

fn table_of_ints(v: &Value, position: Position) -> Result<Vec<i64>> {
    match v {
        Value::Table(t) => t
            .borrow()
            .iter()
            .map(|(_, cell)| match cell.get() {
                Value::Int(i) => Ok(i),
                other => Err(Error::type_mismatch(
                    format!("expected a table of int byte values, found {}", other.kind()),
                    position,
                )),
            })
            .collect(),
        other => Err(Error::type_mismatch(
            format!("expected a table, found {}", other.kind()),
            position,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_reports_table_and_string_sizes() {
        let scope = Scope::root();
        install(&scope, Rc::new(Bridge::new()));
        let program = yks_syntax::parse_source("yar n = len([1,2,3]); yar m = len(\"hi\");").unwrap();
        crate::statements::run_block(&scope, &program.statements).unwrap();
        assert!(matches!(scope.lookup("n").unwrap().get(), Value::Int(3)));
        assert!(matches!(scope.lookup("m").unwrap().get(), Value::Int(2)));
    }

    #[test]
    fn throw_produces_an_error_value_not_a_fatal_error() {
        let scope = Scope::root();
        install(&scope, Rc::new(Bridge::new()));
        let program = yks_syntax::parse_source("yar e = throw(\"boom\");").unwrap();
        crate::statements::run_block(&scope, &program.statements).unwrap();
        assert!(matches!(scope.lookup("e").unwrap().get(), Value::Error(_)));
    }
}

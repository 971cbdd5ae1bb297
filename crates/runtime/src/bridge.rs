//! The native-call bridge: the only module in this crate that touches
//! `unsafe`. Everything else operates purely on [`Value`]s.
//!
//! `to_pointer` turns a value into a platform address plus an [`Anchor`]
//! that keeps its backing storage alive for the duration of a call;
//! `invoke_syscall`/`invoke_procedure` make the actual native call;
//! `writeback` re-deserializes any table/instance anchor afterward so a
//! callee's mutation is visible back in the language.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::rc::Rc;

use yks_core::{Error, ErrorValue, Instance, Result, Table, Value};
use yks_syntax::Position;

/// Backing storage for one marshalled argument, kept alive until the call
/// returns and writeback has run.
pub enum Anchor {
    None,
    Scalar(Box<[u8]>),
    CStr(CString),
    Table(Rc<RefCell<Table>>, Vec<u8>),
    Instance(Rc<RefCell<Instance>>, Vec<u8>),
}

pub struct Bridge {
    libs: RefCell<HashMap<String, *mut c_void>>,
    /// Buffers allocated by the `ptr`/`pvoid` builtins. Unlike a call's
    /// transient [`Anchor`]s, these live for the process's remaining
    /// lifetime: their whole purpose is to outlive a single native call.
    allocations: RefCell<Vec<Box<[u8]>>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            libs: RefCell::new(HashMap::new()),
            allocations: RefCell::new(Vec::new()),
        }
    }

    /// Marshal a scalar value into a permanently anchored buffer and
    /// return its address; backs the `ptr` builtin.
    pub fn alloc_scalar(&self, value: &Value, position: Position) -> Result<u64> {
        let bytes: Box<[u8]> = match value {
            Value::Int(i) => i.to_le_bytes().into(),
            Value::Float(f) => f.to_le_bytes().into(),
            Value::Bool(b) => Box::new([if *b { 1u8 } else { 0 }]),
            Value::Ptr(p) => p.to_le_bytes().into(),
            other => {
                return Err(Error::unsupported_type(
                    format!("cannot allocate a native pointer to a value of kind {}", other.kind()),
                    position,
                ))
            }
        };
        let addr = bytes.as_ptr() as u64;
        self.allocations.borrow_mut().push(bytes);
        Ok(addr)
    }

    /// Allocate `len` zeroed bytes permanently and return their address;
    /// backs the `pvoid` builtin (a raw scratch buffer for out-params).
    pub fn alloc_bytes(&self, len: usize) -> u64 {
        let bytes: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let addr = bytes.as_ptr() as u64;
        self.allocations.borrow_mut().push(bytes);
        addr
    }

    /// Marshal one value into a platform address usable by a native
    /// callee, anchoring whatever storage that address points into.
    pub fn to_pointer(&self, value: &Value, position: Position) -> Result<(u64, Anchor)> {
        match value {
            Value::Nil => Ok((0, Anchor::None)),
            Value::Ptr(p) => Ok((*p, Anchor::None)),
            Value::Int(i) => {
                let buf: Box<[u8]> = i.to_le_bytes().into();
                let addr = buf.as_ptr() as u64;
                Ok((addr, Anchor::Scalar(buf)))
            }
            Value::Float(f) => {
                let buf: Box<[u8]> = f.to_le_bytes().into();
                let addr = buf.as_ptr() as u64;
                Ok((addr, Anchor::Scalar(buf)))
            }
            Value::Bool(b) => {
                let buf: Box<[u8]> = Box::new([if *b { 1u8 } else { 0 }]);
                let addr = buf.as_ptr() as u64;
                Ok((addr, Anchor::Scalar(buf)))
            }
            Value::String(s) => {
                let c = CString::new(s.as_bytes()).map_err(|e| {
                    Error::host_error(format!("string argument contains a NUL byte: {e}"), position)
                })?;
                let addr = c.as_ptr() as u64;
                Ok((addr, Anchor::CStr(c)))
            }
            Value::Table(t) => {
                let bytes = t.borrow_mut().serialize(position)?;
                let addr = bytes.as_ptr() as u64;
                Ok((addr, Anchor::Table(t.clone(), bytes)))
            }
            Value::Instance(i) => {
                let bytes = i.borrow_mut().serialize(position)?;
                let addr = bytes.as_ptr() as u64;
                Ok((addr, Anchor::Instance(i.clone(), bytes)))
            }
            other => Err(Error::unsupported_type(
                format!("cannot marshal a value of kind {} to a native pointer", other.kind()),
                position,
            )),
        }
    }

    /// Re-deserialize every table/instance anchor from its (possibly
    /// native-mutated) byte image back into its cells.
    pub fn writeback(&self, anchors: &[Anchor], position: Position) -> Result<()> {
        for anchor in anchors {
            match anchor {
                Anchor::Table(t, bytes) => t.borrow_mut().deserialize(bytes, position)?,
                Anchor::Instance(i, bytes) => i.borrow_mut().deserialize(bytes, position)?,
                Anchor::None | Anchor::Scalar(_) | Anchor::CStr(_) => {}
            }
        }
        Ok(())
    }

    /// Marshal every argument, padding to the six registers a syscall's
    /// raw entry point accepts, and trap into the kernel.
    pub fn invoke_syscall(
        &self,
        trap: i64,
        args: &[Value],
        position: Position,
    ) -> Result<(i64, i64, Option<ErrorValue>)> {
        let mut words = [0u64; 6];
        let mut anchors = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().take(6).enumerate() {
            let (addr, anchor) = self.to_pointer(arg, position)?;
            words[i] = addr;
            anchors.push(anchor);
        }

        // SAFETY: `libc::syscall` is variadic in C; passing all six slots
        // unconditionally is the standard way to call it generically from
        // Rust. Extra words are ignored by syscalls that take fewer.
        let ret = unsafe {
            libc::syscall(
                trap as libc::c_long,
                words[0] as libc::c_long,
                words[1] as libc::c_long,
                words[2] as libc::c_long,
                words[3] as libc::c_long,
                words[4] as libc::c_long,
                words[5] as libc::c_long,
            )
        };

        self.writeback(&anchors, position)?;

        if ret < 0 {
            // SAFETY: a negative return is the raw syscall's documented
            // "-errno" convention; `*__errno_location()` is left alone by
            // `libc::syscall` itself, so read the return value directly.
            let err = ErrorValue {
                message: format!("syscall {trap} failed with code {ret}"),
            };
            Ok((ret as i64, 0, Some(err)))
        } else {
            Ok((ret as i64, 0, None))
        }
    }

    /// Lazily `dlopen` a library (cached for the process lifetime, per
    /// the bridge's no-unload policy), `dlsym` the entry point, and call
    /// it through a fixed six-word calling convention.
    pub fn invoke_procedure(
        &self,
        library: &str,
        symbol: &str,
        args: &[Value],
        position: Position,
    ) -> Result<(i64, i64, Option<ErrorValue>)> {
        let handle = match self.libs.borrow().get(library).copied() {
            Some(h) => h,
            None => {
                let c_lib = CString::new(library).map_err(|e| {
                    Error::host_error(format!("library name contains a NUL byte: {e}"), position)
                })?;
                // SAFETY: `c_lib` outlives the call; `dlopen` returns a
                // stable handle we cache and never `dlclose`.
                let handle = unsafe { libc::dlopen(c_lib.as_ptr(), libc::RTLD_NOW) };
                if handle.is_null() {
                    return Ok((0, 0, Some(ErrorValue {
                        message: format!("dlopen('{library}') failed: {}", dlerror_string()),
                    })));
                }
                self.libs.borrow_mut().insert(library.to_string(), handle);
                handle
            }
        };

        let c_sym = CString::new(symbol)
            .map_err(|e| Error::host_error(format!("symbol name contains a NUL byte: {e}"), position))?;
        // SAFETY: `handle` was returned live by a prior successful `dlopen`.
        let sym = unsafe { libc::dlsym(handle, c_sym.as_ptr()) };
        if sym.is_null() {
            return Ok((0, 0, Some(ErrorValue {
                message: format!("dlsym('{symbol}') failed: {}", dlerror_string()),
            })));
        }

        let mut words = [0u64; 6];
        let mut anchors = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().take(6).enumerate() {
            let (addr, anchor) = self.to_pointer(arg, position)?;
            words[i] = addr;
            anchors.push(anchor);
        }

        // SAFETY: the entry point was just resolved by `dlsym`; callers
        // are responsible for matching its real arity and ABI (this
        // bridge does not, and by design cannot, verify either).
        let entry: extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64 =
            unsafe { std::mem::transmute::<*mut c_void, extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64>(sym) };
        let ret = entry(words[0], words[1], words[2], words[3], words[4], words[5]);

        self.writeback(&anchors, position)?;

        Ok((ret as i64, 0, None))
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

fn dlerror_string() -> String {
    // SAFETY: `dlerror` returns either null or a pointer to a static,
    // NUL-terminated message owned by libdl; we copy it before returning.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "unknown error".to_string()
        } else {
            std::ffi::CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yks_syntax::Position;

    fn pos() -> Position {
        Position::new(1, 1)
    }

    #[test]
    fn scalar_to_pointer_round_trips_through_the_anchor() {
        let bridge = Bridge::new();
        let (addr, anchor) = bridge.to_pointer(&Value::Int(42), pos()).unwrap();
        match anchor {
            Anchor::Scalar(buf) => {
                assert_eq!(addr, buf.as_ptr() as u64);
                assert_eq!(i64::from_le_bytes(buf[..].try_into().unwrap()), 42);
            }
            _ => panic!("expected a scalar anchor"),
        }
    }

    #[test]
    fn invoking_an_unresolvable_library_reports_a_host_error_not_a_fatal_error() {
        let bridge = Bridge::new();
        let (_, _, err) = bridge
            .invoke_procedure("libdoesnotexist_yks.so", "nothing", &[], pos())
            .unwrap();
        assert!(err.is_some());
    }

    #[test]
    fn func_value_is_rejected_as_unmarshalable() {
        let bridge = Bridge::new();
        let f = Value::Func(Rc::new(yks_core::FuncValue::Builtin(yks_core::BuiltinFunc {
            name: "noop",
            call: Rc::new(|_, _| Ok(vec![])),
        })));
        assert!(bridge.to_pointer(&f, pos()).is_err());
    }
}

//! Interpreter error kinds.
//!
//! Every error carries the source position it was raised at so the CLI can
//! format it as `yks <line>:<column>: <message>.` (see `yks-cli`). Errors are
//! fatal to the running program unless the language explicitly inspects a
//! `HostError` value returned from a native call.

use std::fmt;

pub use yks_syntax::Position;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    TypeMismatch,
    Arity,
    Undefined,
    Redeclared,
    NotAssignable,
    OutOfBounds,
    NotIterable,
    CyclicImport,
    ImportNotFound,
    DanglingPointer,
    UnsupportedType,
    HostError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::Arity => "Arity",
            ErrorKind::Undefined => "Undefined",
            ErrorKind::Redeclared => "Redeclared",
            ErrorKind::NotAssignable => "NotAssignable",
            ErrorKind::OutOfBounds => "OutOfBounds",
            ErrorKind::NotIterable => "NotIterable",
            ErrorKind::CyclicImport => "CyclicImport",
            ErrorKind::ImportNotFound => "ImportNotFound",
            ErrorKind::DanglingPointer => "DanglingPointer",
            ErrorKind::UnsupportedType => "UnsupportedType",
            ErrorKind::HostError => "HostError",
        };
        f.write_str(s)
    }
}

/// A raised interpreter error, fatal unless caught as a `HostError` value.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Position,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
        }
    }

    /// Format following the CLI's `<prog> <line>:<column>: <message>.` pattern,
    /// appending a trailing period if the message doesn't already end with one.
    pub fn format(&self, prog: &str) -> String {
        let mut message = self.message.clone();
        if !message.ends_with('.') {
            message.push('.');
        }
        format!(
            "{} {}:{}: {}",
            prog,
            self.position.line,
            self.position.column,
            message
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

macro_rules! err_ctor {
    ($name:ident, $kind:ident) => {
        impl Error {
            pub fn $name(message: impl Into<String>, position: Position) -> Self {
                Self::new(ErrorKind::$kind, message, position)
            }
        }
    };
}

err_ctor!(type_mismatch, TypeMismatch);
err_ctor!(arity, Arity);
err_ctor!(undefined, Undefined);
err_ctor!(redeclared, Redeclared);
err_ctor!(not_assignable, NotAssignable);
err_ctor!(out_of_bounds, OutOfBounds);
err_ctor!(not_iterable, NotIterable);
err_ctor!(cyclic_import, CyclicImport);
err_ctor!(import_not_found, ImportNotFound);
err_ctor!(dangling_pointer, DanglingPointer);
err_ctor!(unsupported_type, UnsupportedType);
err_ctor!(host_error, HostError);

//! Core value model for the Yarik# interpreter.
//!
//! - `value`: the tagged [`value::Value`] and the addressable [`value::ValueCell`]
//! - `table`: insertion-ordered tables and their native byte-image codec
//! - `instance`: structure declarations, instances, and computed field layout
//! - `error`: the fatal [`error::Error`] kinds raised throughout the interpreter

pub mod error;
pub mod instance;
pub mod table;
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use instance::{FieldKind, FieldLayout, Instance, StructDecl, StructFieldDecl};
pub use table::Table;
pub use value::{
    format_value, Address, BuiltinFunc, CellRef, ErrorValue, FuncValue, UserFunc, Value, ValueCell,
};

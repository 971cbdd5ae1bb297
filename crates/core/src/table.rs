//! Insertion-ordered table with a bidirectional byte-image codec.
//!
//! A [`Table`] maps cell-valued keys to cell-valued values, preserving
//! insertion order. Before any native call exposes its address, its logical
//! contents are flattened into a little-endian byte image (`serialize`);
//! after the call returns, `deserialize` walks the same per-entry layout
//! recorded at serialize time and overwrites each value cell in place so a
//! callee's mutation is visible back in the language.

use std::fmt::Write as _;

use yks_syntax::Position;

use crate::error::{Error, Result};
use crate::value::{format_value, CellRef, Value, ValueCell};

/// Per-entry encoding recorded at `serialize` time, consumed in the same
/// order by `deserialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryLayout {
    Int(u8),
    Float(u8),
    Bool,
    Str,
    Ptr,
    Nested,
}

pub struct Table {
    entries: Vec<(Value, CellRef)>,
    /// Optional element bit width (8/16/32/64) that coerces scalar element
    /// storage on serialization.
    pub bit_width: Option<u8>,
    last_layout: Vec<EntryLayout>,
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            bit_width: None,
            last_layout: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, CellRef)> {
        self.entries.iter()
    }

    fn find(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.value_eq(key))
    }

    pub fn get(&self, key: &Value) -> Option<CellRef> {
        self.find(key).map(|i| self.entries[i].1.clone())
    }

    /// Indexed assignment: duplicate keys overwrite in place and preserve
    /// position; new keys are appended, preserving insertion order.
    pub fn set(&mut self, key: Value, value: Value) {
        if let Some(i) = self.find(&key) {
            self.entries[i].1.set(value);
        } else {
            self.entries.push((key, ValueCell::new(value)));
        }
    }

    pub fn delete(&mut self, key: &Value) -> bool {
        if let Some(i) = self.find(key) {
            self.entries.remove(i);
            true
        } else {
            false
        }
    }

    pub fn format(&self) -> String {
        let mut out = String::from("[");
        for (i, (k, cell)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}: {}", format_value(k), format_value(&cell.get()));
        }
        out.push(']');
        out
    }

    /// Flatten the table's current contents into a little-endian byte image,
    /// recording the per-entry layout deserialize will later replay.
    pub fn serialize(&mut self, position: Position) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut layout = Vec::with_capacity(self.entries.len());
        for (_, cell) in &self.entries {
            let desc = encode_value(&cell.get(), self.bit_width, &mut bytes, position)?;
            layout.push(desc);
        }
        self.last_layout = layout;
        Ok(bytes)
    }

    /// Re-populate cells from bytes produced by a prior `serialize` (and
    /// possibly mutated by a native callee in between).
    pub fn deserialize(&mut self, bytes: &[u8], position: Position) -> Result<()> {
        let mut cursor = 0usize;
        let layout = self.last_layout.clone();
        for ((_, cell), desc) in self.entries.iter().zip(layout.iter()) {
            cursor += decode_value(*desc, &bytes[cursor..], cell, position)?;
        }
        Ok(())
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_value(
    value: &Value,
    bit_width: Option<u8>,
    out: &mut Vec<u8>,
    position: Position,
) -> Result<EntryLayout> {
    match value {
        Value::Int(i) => {
            let width = bit_width.unwrap_or(64);
            write_int(out, *i, width);
            Ok(EntryLayout::Int(width / 8))
        }
        Value::Float(f) => {
            let width = bit_width.unwrap_or(64);
            if width == 32 {
                out.extend_from_slice(&(*f as f32).to_le_bytes());
                Ok(EntryLayout::Float(4))
            } else {
                out.extend_from_slice(&f.to_le_bytes());
                Ok(EntryLayout::Float(8))
            }
        }
        Value::Bool(b) => {
            out.push(if *b { 1 } else { 0 });
            Ok(EntryLayout::Bool)
        }
        Value::String(s) => {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
            Ok(EntryLayout::Str)
        }
        Value::Error(e) => {
            out.extend_from_slice(e.message.as_bytes());
            out.push(0);
            Ok(EntryLayout::Str)
        }
        Value::Ptr(p) => {
            out.extend_from_slice(&p.to_le_bytes());
            Ok(EntryLayout::Ptr)
        }
        Value::Table(nested) => {
            let nested_bytes = nested.borrow_mut().serialize(position)?;
            out.extend_from_slice(&(nested_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&nested_bytes);
            Ok(EntryLayout::Nested)
        }
        other => Err(Error::unsupported_type(
            format!(
                "cannot serialize {} value into a table's native byte image",
                other.kind()
            ),
            position,
        )),
    }
}

fn write_int(out: &mut Vec<u8>, value: i64, width: u8) {
    match width {
        8 => out.push(value as u8),
        16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn decode_value(
    desc: EntryLayout,
    bytes: &[u8],
    cell: &ValueCell,
    position: Position,
) -> Result<usize> {
    let need = |n: usize| -> Result<()> {
        if bytes.len() < n {
            Err(Error::unsupported_type(
                "truncated native byte image during table deserialization",
                position,
            ))
        } else {
            Ok(())
        }
    };
    match desc {
        EntryLayout::Int(width_bytes) => {
            need(width_bytes as usize)?;
            let v = match width_bytes {
                1 => bytes[0] as i8 as i64,
                2 => i16::from_le_bytes(bytes[0..2].try_into().unwrap()) as i64,
                4 => i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as i64,
                _ => i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            };
            cell.set(Value::Int(v));
            Ok(width_bytes as usize)
        }
        EntryLayout::Float(width_bytes) => {
            need(width_bytes as usize)?;
            let v = if width_bytes == 4 {
                f32::from_le_bytes(bytes[0..4].try_into().unwrap()) as f64
            } else {
                f64::from_le_bytes(bytes[0..8].try_into().unwrap())
            };
            cell.set(Value::Float(v));
            Ok(width_bytes as usize)
        }
        EntryLayout::Bool => {
            need(1)?;
            cell.set(Value::Bool(bytes[0] != 0));
            Ok(1)
        }
        EntryLayout::Str => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            let s = String::from_utf8_lossy(&bytes[..end]).into_owned();
            cell.set(Value::string(s));
            Ok(end + 1)
        }
        EntryLayout::Ptr => {
            need(8)?;
            cell.set(Value::Ptr(u64::from_le_bytes(bytes[0..8].try_into().unwrap())));
            Ok(8)
        }
        EntryLayout::Nested => {
            need(4)?;
            let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            need(4 + len)?;
            if let Value::Table(nested) = cell.get() {
                nested
                    .borrow_mut()
                    .deserialize(&bytes[4..4 + len], position)?;
            }
            Ok(4 + len)
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
    fn round_trips_scalar_table() {
        let mut t = Table::new();
        t.set(Value::Int(0), Value::Int(42));
        t.set(Value::Int(1), Value::string("hi"));
        t.set(Value::Int(2), Value::Bool(true));

        let bytes = t.serialize(pos()).unwrap();
        t.set(Value::Int(0), Value::Int(0));
        t.set(Value::Int(1), Value::string(""));
        t.set(Value::Int(2), Value::Bool(false));
        t.deserialize(&bytes, pos()).unwrap();

        assert!(matches!(t.get(&Value::Int(0)).unwrap().get(), Value::Int(42)));
        assert!(matches!(t.get(&Value::Int(2)).unwrap().get(), Value::Bool(true)));
    }

    #[test]
    fn duplicate_keys_overwrite_in_place() {
        let mut t = Table::new();
        t.set(Value::string("a"), Value::Int(1));
        t.set(Value::string("b"), Value::Int(2));
        t.set(Value::string("a"), Value::Int(99));

        let keys: Vec<_> = t.iter().map(|(k, _)| format_value(k)).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(t.get(&Value::string("a")).unwrap().get(), Value::Int(99)));
    }

    #[test]
    fn unsupported_entry_kind_fails_serialize() {
        let mut t = Table::new();
        t.set(
            Value::Int(0),
            Value::Func(std::rc::Rc::new(crate::value::FuncValue::Builtin(
                crate::value::BuiltinFunc {
                    name: "noop",
                    call: std::rc::Rc::new(|_, _| Ok(vec![])),
                },
            ))),
        );
        assert!(t.serialize(pos()).is_err());
    }
}

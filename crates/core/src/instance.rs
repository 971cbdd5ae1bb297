//! Structure declarations, instances, and their computed native layout.
//!
//! A [`StructDecl`] names a structure and lists its fields: an identifier,
//! an optional signed bit width (negative = signed `N`-bit integer, positive
//! = unsigned, absent/zero = inferred from the current value), and an
//! optional method body. An [`Instance`] supplies values for the non-method
//! fields; at construction every method's implicit receiver is bound to the
//! new instance (see `yks-runtime::evaluator::eval_struct_new`), a layout is
//! computed from the declared bit widths, and the instance is serialized
//! into its byte image.

use std::rc::Rc;

use yks_syntax::{ast, Position};

use crate::error::{Error, Result};
use crate::value::{CellRef, Value, ValueCell, format_value};

#[derive(Debug, Clone)]
pub struct StructFieldDecl {
    pub name: String,
    pub bits: Option<i32>,
    pub method: Option<Rc<ast::FuncDec>>,
}

#[derive(Debug)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<StructFieldDecl>,
}

impl StructDecl {
    pub fn field(&self, name: &str) -> Option<&StructFieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Per-field `{offset, size, kind}` record computed from declared bit
/// widths, or inferred from the current value when a field has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    /// Nested instance; payload is its own total size in bytes.
    Instance(usize),
}

impl FieldKind {
    fn size(self) -> usize {
        match self {
            FieldKind::I8 | FieldKind::U8 | FieldKind::Bool => 1,
            FieldKind::I16 | FieldKind::U16 => 2,
            FieldKind::I32 | FieldKind::U32 => 4,
            FieldKind::I64 | FieldKind::U64 => 8,
            FieldKind::Instance(size) => size,
        }
    }

    fn align(self) -> usize {
        match self {
            FieldKind::Instance(_) => 8,
            other => other.size(),
        }
    }

    fn from_bits(bits: i32) -> Self {
        match bits {
            -8 => FieldKind::I8,
            -16 => FieldKind::I16,
            -32 => FieldKind::I32,
            -64 => FieldKind::I64,
            8 => FieldKind::U8,
            16 => FieldKind::U16,
            32 => FieldKind::U32,
            _ => FieldKind::U64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldLayout {
    pub offset: usize,
    pub size: usize,
    pub kind: FieldKind,
}

pub struct Instance {
    pub decl: Rc<StructDecl>,
    pub fields: Vec<(String, CellRef)>,
    last_layout: Vec<FieldLayout>,
}

impl Instance {
    pub fn new(decl: Rc<StructDecl>, fields: Vec<(String, CellRef)>) -> Self {
        Self {
            decl,
            fields,
            last_layout: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<CellRef> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, c)| c.clone())
    }

    pub fn format(&self) -> String {
        let mut out = format!("{} {{ ", self.decl.name);
        for (i, (name, cell)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&format_value(&cell.get()));
        }
        out.push_str(" }");
        out
    }

    /// Walk declared data fields (methods carry no storage) in order,
    /// padding each offset up to the field's alignment.
    pub fn compute_layout(&mut self, position: Position) -> Result<Vec<FieldLayout>> {
        let mut offset = 0usize;
        let mut layout = Vec::new();
        for decl_field in &self.decl.fields {
            if decl_field.method.is_some() {
                continue;
            }
            let cell = self
                .get(&decl_field.name)
                .ok_or_else(|| Error::undefined(format!("field '{}' not set", decl_field.name), position))?;
            let kind = match decl_field.bits {
                Some(bits) if bits != 0 => FieldKind::from_bits(bits),
                _ => infer_kind(&cell.get(), position)?,
            };
            let align = kind.align();
            offset = offset.div_ceil(align) * align;
            layout.push(FieldLayout {
                offset,
                size: kind.size(),
                kind,
            });
            offset += kind.size();
        }
        self.last_layout = layout.clone();
        Ok(layout)
    }

    pub fn total_size(&mut self, position: Position) -> Result<usize> {
        let layout = self.compute_layout(position)?;
        Ok(layout.last().map(|f| f.offset + f.size).unwrap_or(0))
    }

    pub fn serialize(&mut self, position: Position) -> Result<Vec<u8>> {
        let layout = self.compute_layout(position)?;
        let total = layout.last().map(|f| f.offset + f.size).unwrap_or(0);
        let mut bytes = vec![0u8; total];
        let data_fields: Vec<_> = self
            .decl
            .fields
            .iter()
            .filter(|f| f.method.is_none())
            .map(|f| f.name.clone())
            .collect();
        for (name, field) in data_fields.iter().zip(layout.iter()) {
            let cell = self.get(name).expect("layout derived from same fields");
            write_field(&mut bytes, *field, &cell.get(), position)?;
        }
        Ok(bytes)
    }

    pub fn deserialize(&mut self, bytes: &[u8], position: Position) -> Result<()> {
        let layout = self.last_layout.clone();
        let data_fields: Vec<_> = self
            .decl
            .fields
            .iter()
            .filter(|f| f.method.is_none())
            .map(|f| f.name.clone())
            .collect();
        for (name, field) in data_fields.iter().zip(layout.iter()) {
            let cell = self.get(name).expect("layout derived from same fields");
            read_field(bytes, *field, &cell, position)?;
        }
        Ok(())
    }
}

fn infer_kind(value: &Value, position: Position) -> Result<FieldKind> {
    match value {
        Value::Int(_) | Value::Float(_) | Value::Ptr(_) => Ok(FieldKind::U64),
        Value::Bool(_) => Ok(FieldKind::Bool),
        Value::Instance(nested) => {
            let size = nested.borrow_mut().total_size(position)?;
            Ok(FieldKind::Instance(size))
        }
        other => Err(Error::unsupported_type(
            format!("cannot lay out field of kind {}", other.kind()),
            position,
        )),
    }
}

fn write_field(bytes: &mut [u8], field: FieldLayout, value: &Value, position: Position) -> Result<()> {
    let slot = &mut bytes[field.offset..field.offset + field.size];
    match (field.kind, value) {
        (FieldKind::Bool, Value::Bool(b)) => slot[0] = if *b { 1 } else { 0 },
        (FieldKind::Instance(_), Value::Instance(nested)) => {
            let nested_bytes = nested.borrow_mut().serialize(position)?;
            let n = nested_bytes.len().min(slot.len());
            slot[..n].copy_from_slice(&nested_bytes[..n]);
        }
        (kind, Value::Int(i)) => write_int(slot, *i, kind),
        (kind, Value::Float(f)) => write_int(slot, *f as i64, kind),
        (kind, Value::Ptr(p)) => write_int(slot, *p as i64, kind),
        _ => {
            return Err(Error::unsupported_type(
                format!("field value {} does not match its declared layout", value.kind()),
                position,
            ))
        }
    }
    Ok(())
}

fn write_int(slot: &mut [u8], value: i64, kind: FieldKind) {
    match kind {
        FieldKind::I8 | FieldKind::U8 => slot[0] = value as u8,
        FieldKind::I16 | FieldKind::U16 => slot.copy_from_slice(&(value as i16).to_le_bytes()),
        FieldKind::I32 | FieldKind::U32 => slot.copy_from_slice(&(value as i32).to_le_bytes()),
        _ => slot.copy_from_slice(&value.to_le_bytes()),
    }
}

fn read_field(bytes: &[u8], field: FieldLayout, cell: &ValueCell, position: Position) -> Result<()> {
    if bytes.len() < field.offset + field.size {
        return Err(Error::unsupported_type(
            "truncated native byte image during instance deserialization",
            position,
        ));
    }
    let slot = &bytes[field.offset..field.offset + field.size];
    match field.kind {
        FieldKind::Bool => cell.set(Value::Bool(slot[0] != 0)),
        FieldKind::Instance(_) => {
            if let Value::Instance(nested) = cell.get() {
                nested.borrow_mut().deserialize(slot, position)?;
            }
        }
        FieldKind::I8 => cell.set(Value::Int(slot[0] as i8 as i64)),
        FieldKind::U8 => cell.set(Value::Int(slot[0] as i64)),
        FieldKind::I16 => cell.set(Value::Int(i16::from_le_bytes(slot.try_into().unwrap()) as i64)),
        FieldKind::U16 => cell.set(Value::Int(u16::from_le_bytes(slot.try_into().unwrap()) as i64)),
        FieldKind::I32 => cell.set(Value::Int(i32::from_le_bytes(slot.try_into().unwrap()) as i64)),
        FieldKind::U32 => cell.set(Value::Int(u32::from_le_bytes(slot.try_into().unwrap()) as i64)),
        FieldKind::I64 => cell.set(Value::Int(i64::from_le_bytes(slot.try_into().unwrap()))),
        FieldKind::U64 => cell.set(Value::Int(u64::from_le_bytes(slot.try_into().unwrap()) as i64)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(fields: Vec<(&str, Option<i32>)>) -> Rc<StructDecl> {
        Rc::new(StructDecl {
            name: "P".to_string(),
            fields: fields
                .into_iter()
                .map(|(name, bits)| StructFieldDecl {
                    name: name.to_string(),
                    bits,
                    method: None,
                })
                .collect(),
        })
    }

    fn pos() -> Position {
        Position::new(1, 1)
    }

    #[test]
    fn layout_pads_to_alignment() {
        let decl = decl(vec![("flag", Some(8)), ("x", Some(64))]);
        let mut inst = Instance::new(
            decl,
            vec![
                ("flag".to_string(), ValueCell::new(Value::Int(1))),
                ("x".to_string(), ValueCell::new(Value::Int(10))),
            ],
        );
        let layout = inst.compute_layout(pos()).unwrap();
        assert_eq!(layout[0].offset, 0);
        assert_eq!(layout[1].offset, 8);
    }

    #[test]
    fn round_trips_explicit_width_fields() {
        let decl = decl(vec![("x", Some(-32)), ("y", Some(32))]);
        let mut inst = Instance::new(
            decl,
            vec![
                ("x".to_string(), ValueCell::new(Value::Int(-5))),
                ("y".to_string(), ValueCell::new(Value::Int(20))),
            ],
        );
        let bytes = inst.serialize(pos()).unwrap();
        inst.get("x").unwrap().set(Value::Int(0));
        inst.get("y").unwrap().set(Value::Int(0));
        inst.deserialize(&bytes, pos()).unwrap();
        assert!(matches!(inst.get("x").unwrap().get(), Value::Int(-5)));
        assert!(matches!(inst.get("y").unwrap().get(), Value::Int(20)));
    }
}

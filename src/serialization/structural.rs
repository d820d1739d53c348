//! A `serde::Serializer` that builds a [`Value`] tree.
//!
//! Structs become named objects in declaration order, maps become [`Value::Map`] with keys
//! rendered to text, newtypes are transparent, and tuples become lists. Enum variants follow
//! the externally-tagged shape: unit variants are bare names, data-carrying variants become a
//! single-member object keyed by the variant name.

use std::fmt::{self, Display};

use serde::ser::{self, Serialize};

use crate::diagnostics::Result;
use crate::err_cause;
use crate::registry::format_float;
use crate::value::Value;

/// Serializes any `Serialize` value into a [`Value`] tree.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    value.serialize(ValueSerializer).map_err(|e| {
        err_cause!(
            Conversion,
            e,
            "structural serialization of {} failed",
            std::any::type_name::<T>()
        )
    })
}

/// Error raised by a `Serialize` impl during the structural walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralError(String);

impl Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StructuralError {}

impl ser::Error for StructuralError {
    fn custom<T: Display>(msg: T) -> Self {
        StructuralError(msg.to_string())
    }
}

type SerResult<T> = std::result::Result<T, StructuralError>;

/// Stateless serializer; every nested value gets a fresh one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = StructuralError;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantSeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = StructBuilder;
    type SerializeStructVariant = VariantStructBuilder;

    fn serialize_bool(self, v: bool) -> SerResult<Value> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i128(self, v: i128) -> SerResult<Value> {
        Ok(Value::Int(v))
    }

    fn serialize_u8(self, v: u8) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> SerResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u128(self, v: u128) -> SerResult<Value> {
        Ok(match i128::try_from(v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::String(v.to_string()),
        })
    }

    // Widening through text keeps the f32's shortest representation (0.1, not 0.100000001).
    fn serialize_f32(self, v: f32) -> SerResult<Value> {
        let widened = format_float(v as f64, v.to_string())
            .parse::<f64>()
            .unwrap_or(v as f64);
        Ok(Value::Float(widened))
    }

    fn serialize_f64(self, v: f64) -> SerResult<Value> {
        Ok(Value::Float(v))
    }

    fn serialize_char(self, v: char) -> SerResult<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> SerResult<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> SerResult<Value> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> SerResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> SerResult<Value> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> SerResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, name: &'static str) -> SerResult<Value> {
        Ok(Value::String(name.to_string()))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> SerResult<Value> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> SerResult<Value> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> SerResult<Value> {
        Ok(Value::object([(variant, value.serialize(self)?)]))
    }

    fn serialize_seq(self, len: Option<usize>) -> SerResult<SeqBuilder> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> SerResult<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> SerResult<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> SerResult<VariantSeqBuilder> {
        Ok(VariantSeqBuilder {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> SerResult<MapBuilder> {
        Ok(MapBuilder {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            next_key: None,
        })
    }

    fn serialize_struct(self, name: &'static str, len: usize) -> SerResult<StructBuilder> {
        Ok(StructBuilder {
            type_name: name,
            members: Vec::with_capacity(len),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> SerResult<VariantStructBuilder> {
        Ok(VariantStructBuilder {
            variant,
            members: Vec::with_capacity(len),
        })
    }
}

// =====================
// Compound builders
// =====================

pub struct SeqBuilder {
    items: Vec<Value>,
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Value;
    type Error = StructuralError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        Ok(Value::List(self.items))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Value;
    type Error = StructuralError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> SerResult<Value> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Value;
    type Error = StructuralError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> SerResult<Value> {
        ser::SerializeSeq::end(self)
    }
}

pub struct VariantSeqBuilder {
    variant: &'static str,
    items: Vec<Value>,
}

impl ser::SerializeTupleVariant for VariantSeqBuilder {
    type Ok = Value;
    type Error = StructuralError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        Ok(Value::object([(self.variant, Value::List(self.items))]))
    }
}

pub struct MapBuilder {
    entries: Vec<(String, Value)>,
    next_key: Option<String>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Value;
    type Error = StructuralError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> SerResult<()> {
        self.next_key = Some(key_text(key.serialize(ValueSerializer)?)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> SerResult<()> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| StructuralError("map value serialized before its key".to_string()))?;
        self.entries.push((key, value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        Ok(Value::Map(self.entries))
    }
}

/// Map keys must be scalar; they are rendered the way the scalar itself would be.
fn key_text(key: Value) -> SerResult<String> {
    match key {
        Value::String(s) => Ok(s),
        Value::Int(i) => Ok(i.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Float(f) => Ok(format_float(f, f.to_string())),
        Value::Null => Ok("null".to_string()),
        other => Err(StructuralError(format!(
            "map keys must be scalar, found {}",
            other.type_name()
        ))),
    }
}

pub struct StructBuilder {
    type_name: &'static str,
    members: Vec<(String, Value)>,
}

impl ser::SerializeStruct for StructBuilder {
    type Ok = Value;
    type Error = StructuralError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SerResult<()> {
        self.members
            .push((key.to_string(), value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn skip_field(&mut self, _key: &'static str) -> SerResult<()> {
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        Ok(Value::Object {
            type_name: Some(self.type_name.to_string()),
            members: self.members,
        })
    }
}

pub struct VariantStructBuilder {
    variant: &'static str,
    members: Vec<(String, Value)>,
}

impl ser::SerializeStructVariant for VariantStructBuilder {
    type Ok = Value;
    type Error = StructuralError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> SerResult<()> {
        self.members
            .push((key.to_string(), value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> SerResult<Value> {
        let inner = Value::Object {
            type_name: Some(self.variant.to_string()),
            members: self.members,
        };
        Ok(Value::object([(self.variant, inner)]))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Order {
        id: u32,
        note: Option<String>,
        lines: Vec<Line>,
    }

    #[derive(Serialize)]
    struct Line {
        sku: &'static str,
        qty: u8,
    }

    #[derive(Serialize)]
    enum Shape {
        Point,
        Circle(f32),
        Rect { w: u8, h: u8 },
    }

    #[test]
    fn structs_keep_type_name_and_declaration_order() {
        let order = Order {
            id: 7,
            note: None,
            lines: vec![Line { sku: "A", qty: 2 }],
        };
        let Value::Object { type_name, members } = to_value(&order).unwrap() else {
            panic!("expected object");
        };
        assert_eq!(type_name.as_deref(), Some("Order"));
        let names: Vec<_> = members.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["id", "note", "lines"]);
        assert!(members[1].1.is_null());
    }

    #[test]
    fn enum_variants_are_externally_tagged() {
        assert!(matches!(to_value(&Shape::Point).unwrap(), Value::String(s) if s == "Point"));

        let Value::Object { members, .. } = to_value(&Shape::Circle(0.1)).unwrap() else {
            panic!("expected object");
        };
        assert_eq!(members[0].0, "Circle");
        assert!(matches!(members[0].1, Value::Float(f) if f == 0.1));

        let Value::Object { members, .. } = to_value(&Shape::Rect { w: 1, h: 2 }).unwrap() else {
            panic!("expected object");
        };
        assert_eq!(members[0].0, "Rect");
    }

    #[test]
    fn map_keys_become_text() {
        let mut map = HashMap::new();
        map.insert(3u8, "three");
        let Value::Map(entries) = to_value(&map).unwrap() else {
            panic!("expected map");
        };
        assert_eq!(entries[0].0, "3");
    }

    #[test]
    fn composite_map_keys_are_rejected() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1u8);
        let err = to_value(&map).unwrap_err();
        assert_eq!(err.error_type(), crate::ErrorType::Conversion);
    }

    #[test]
    fn huge_unsigned_values_fall_back_to_text() {
        assert!(matches!(to_value(&u128::MAX).unwrap(), Value::String(_)));
        assert!(matches!(to_value(&5u128).unwrap(), Value::Int(5)));
    }
}

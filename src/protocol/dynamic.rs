//! Runtime-described messages.
//!
//! For payloads whose layout is only known at runtime. A [`Schema`] lists the
//! fields of a message and their [`Shape`]; a [`DynamicMessage`] carries one
//! [`Value`] per field. The wire layout is the same as for a `wire_message!`
//! struct with the same fields, so either side may use either path.
//!
//! Statically known messages should use `wire_message!` or a hand written
//! [`Encodable`](super::Encodable) impl; both are faster than walking values.
//!
//! Misuse is a programmer error and panics: an unknown directive, a
//! directive that does not fit its field, or a value whose variant does not
//! match the field's shape.

use std::sync::Arc;

use bytes::Bytes;

use super::{Message, Pack, Unpack};
use crate::AppResult;

/// Per-field override of the default wire framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    U8,
    U16,
    U32,
    U64,
    Str,
    Str32,
    Skip,
}

impl Directive {
    /// Parses a directive tag, panicking on anything unknown.
    pub fn parse(tag: &str) -> Directive {
        match tag {
            "u8" => Directive::U8,
            "u16" => Directive::U16,
            "u32" => Directive::U32,
            "u64" => Directive::U64,
            "str" => Directive::Str,
            "str32" => Directive::Str32,
            "skip" | "-" => Directive::Skip,
            other => panic!("unsupported wire directive: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Bool,
    U8,
    U16,
    U32,
    U64,
    /// u16 length prefixed utf-8 string
    Str,
    /// u16 length prefixed byte string
    Bytes,
    Seq(Box<Shape>),
    Map(Box<Shape>, Box<Shape>),
    Struct(Vec<FieldSpec>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    UInt(u64),
    Str(String),
    Bytes(Bytes),
    Seq(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Vec<Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: String,
    shape: Shape,
    directive: Option<Directive>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        FieldSpec {
            name: name.into(),
            shape,
            directive: None,
        }
    }

    /// Attaches a directive tag such as `"u8"` or `"str32"`.
    pub fn with_directive(mut self, tag: &str) -> Self {
        let directive = Directive::parse(tag);
        let fits = match directive {
            Directive::U8 | Directive::U16 | Directive::U32 | Directive::U64 => matches!(
                self.shape,
                Shape::U8 | Shape::U16 | Shape::U32 | Shape::U64
            ),
            Directive::Str | Directive::Str32 => matches!(self.shape, Shape::Str | Shape::Bytes),
            Directive::Skip => true,
        };
        if !fits {
            panic!(
                "wire directive {:?} does not apply to field {} of shape {:?}",
                directive, self.name, self.shape
            );
        }
        self.directive = Some(directive);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    fn encode(&self, value: &Value, pack: &mut Pack) {
        match self.directive {
            None | Some(Directive::Str) => self.shape.encode(value, pack),
            Some(Directive::Skip) => {}
            Some(Directive::U8) => pack.put_u8(expect_uint(value) as u8),
            Some(Directive::U16) => pack.put_u16(expect_uint(value) as u16),
            Some(Directive::U32) => pack.put_u32(expect_uint(value) as u32),
            Some(Directive::U64) => pack.put_u64(expect_uint(value)),
            Some(Directive::Str32) => match value {
                Value::Str(s) => pack.put_long_str(s),
                Value::Bytes(b) => pack.put_long_bytes(b),
                other => mismatch(&self.shape, other),
            },
        }
    }

    fn decode(&self, unpack: &mut Unpack<'_>) -> AppResult<Value> {
        let value = match self.directive {
            None | Some(Directive::Str) => return self.shape.decode(unpack),
            Some(Directive::Skip) => self.shape.default_value(),
            Some(Directive::U8) => Value::UInt(unpack.pop_u8()? as u64),
            Some(Directive::U16) => Value::UInt(unpack.pop_u16()? as u64),
            Some(Directive::U32) => Value::UInt(unpack.pop_u32()? as u64),
            Some(Directive::U64) => Value::UInt(unpack.pop_u64()?),
            Some(Directive::Str32) => match self.shape {
                Shape::Str => Value::Str(unpack.pop_long_str()?),
                _ => Value::Bytes(Bytes::copy_from_slice(unpack.pop_long_bytes()?)),
            },
        };
        Ok(value)
    }
}

fn expect_uint(value: &Value) -> u64 {
    match value {
        Value::UInt(v) => *v,
        other => panic!("unsupported value {:?} for an integer field", other),
    }
}

fn mismatch(shape: &Shape, value: &Value) -> ! {
    panic!("unsupported value {:?} for shape {:?}", value, shape)
}

impl Shape {
    pub fn seq(item: Shape) -> Shape {
        Shape::Seq(Box::new(item))
    }

    pub fn map(key: Shape, value: Shape) -> Shape {
        Shape::Map(Box::new(key), Box::new(value))
    }

    pub fn default_value(&self) -> Value {
        match self {
            Shape::Bool => Value::Bool(false),
            Shape::U8 | Shape::U16 | Shape::U32 | Shape::U64 => Value::UInt(0),
            Shape::Str => Value::Str(String::new()),
            Shape::Bytes => Value::Bytes(Bytes::new()),
            Shape::Seq(_) => Value::Seq(Vec::new()),
            Shape::Map(_, _) => Value::Map(Vec::new()),
            Shape::Struct(fields) => {
                Value::Struct(fields.iter().map(|f| f.shape.default_value()).collect())
            }
        }
    }

    pub fn encode(&self, value: &Value, pack: &mut Pack) {
        match (self, value) {
            (Shape::Bool, Value::Bool(b)) => pack.put_bool(*b),
            (Shape::U8, Value::UInt(v)) => pack.put_u8(*v as u8),
            (Shape::U16, Value::UInt(v)) => pack.put_u16(*v as u16),
            (Shape::U32, Value::UInt(v)) => pack.put_u32(*v as u32),
            (Shape::U64, Value::UInt(v)) => pack.put_u64(*v),
            (Shape::Str, Value::Str(s)) => pack.put_short_str(s),
            (Shape::Bytes, Value::Bytes(b)) => pack.put_short_bytes(b),
            (Shape::Seq(item), Value::Seq(items)) => {
                pack.put_count(items.len());
                for v in items {
                    item.encode(v, pack);
                }
            }
            (Shape::Map(key, val), Value::Map(entries)) => {
                pack.put_count(entries.len());
                for (k, v) in entries {
                    key.encode(k, pack);
                    val.encode(v, pack);
                }
            }
            (Shape::Struct(fields), Value::Struct(values)) => encode_fields(fields, values, pack),
            (shape, value) => mismatch(shape, value),
        }
    }

    pub fn decode(&self, unpack: &mut Unpack<'_>) -> AppResult<Value> {
        let value = match self {
            Shape::Bool => Value::Bool(unpack.pop_bool()?),
            Shape::U8 => Value::UInt(unpack.pop_u8()? as u64),
            Shape::U16 => Value::UInt(unpack.pop_u16()? as u64),
            Shape::U32 => Value::UInt(unpack.pop_u32()? as u64),
            Shape::U64 => Value::UInt(unpack.pop_u64()?),
            Shape::Str => Value::Str(unpack.pop_short_str()?),
            Shape::Bytes => Value::Bytes(Bytes::copy_from_slice(unpack.pop_short_bytes()?)),
            Shape::Seq(item) => {
                let count = unpack.pop_count()?;
                let mut items = Vec::with_capacity(unpack.capacity_hint::<Value>(count));
                for _ in 0..count {
                    items.push(item.decode(unpack)?);
                }
                Value::Seq(items)
            }
            Shape::Map(key, val) => {
                let count = unpack.pop_count()?;
                let mut entries =
                    Vec::with_capacity(unpack.capacity_hint::<(Value, Value)>(count));
                for _ in 0..count {
                    let k = key.decode(unpack)?;
                    let v = val.decode(unpack)?;
                    entries.push((k, v));
                }
                Value::Map(entries)
            }
            Shape::Struct(fields) => Value::Struct(decode_fields(fields, unpack)?),
        };
        Ok(value)
    }
}

fn encode_fields(fields: &[FieldSpec], values: &[Value], pack: &mut Pack) {
    if fields.len() != values.len() {
        panic!(
            "struct value has {} fields, shape declares {}",
            values.len(),
            fields.len()
        );
    }
    for (field, value) in fields.iter().zip(values) {
        field.encode(value, pack);
    }
}

fn decode_fields(fields: &[FieldSpec], unpack: &mut Unpack<'_>) -> AppResult<Vec<Value>> {
    fields.iter().map(|field| field.decode(unpack)).collect()
}

/// Field layout of one message type.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    type_id: u32,
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(type_id: u32) -> Self {
        Schema {
            type_id,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn decode_message(self: &Arc<Self>, unpack: &mut Unpack<'_>) -> AppResult<DynamicMessage> {
        let values = decode_fields(&self.fields, unpack)?;
        Ok(DynamicMessage {
            schema: Arc::clone(self),
            values,
        })
    }
}

/// A message whose fields are described by a [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl DynamicMessage {
    /// A message with every field at its default value.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = schema.fields.iter().map(|f| f.shape.default_value()).collect();
        DynamicMessage { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.position(name).map(|idx| &self.values[idx])
    }

    /// Replaces a field value; panics if the schema has no such field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        match self.schema.position(name) {
            Some(idx) => self.values[idx] = value.into(),
            None => panic!(
                "message type {} has no field {}",
                self.schema.type_id, name
            ),
        }
        self
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Message for DynamicMessage {
    fn message_type(&self) -> u32 {
        self.schema.type_id
    }

    fn encode_body(&self, pack: &mut Pack) {
        encode_fields(&self.schema.fields, &self.values, pack);
    }
}

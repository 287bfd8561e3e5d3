//! ROS1 message decoding from textual `.msg` definitions.
//!
//! The ROS1 wire format is packed little-endian with no alignment:
//! length-prefixed strings and dynamic arrays, raw fixed arrays, and
//! nested messages serialized field by field.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context as _};
use byteorder::{ByteOrder as _, LittleEndian};

use crate::decode::msg_def::{ArraySize, BuiltInType, MessageSchema, MessageSpec, Type, TypeResolver};
use crate::decode::{well_known, Decoder, DecoderFactory};
use crate::records::{MessageRecord, SchemaRecord};
use crate::value::Value;

pub struct Ros1DecoderFactory;

impl DecoderFactory for Ros1DecoderFactory {
    fn decoder_for(
        &self,
        message_encoding: &str,
        _schema: Option<&SchemaRecord>,
    ) -> Option<Box<dyn Decoder>> {
        (message_encoding == well_known::message_encoding::ROS1)
            .then(|| Box::new(Ros1Decoder::default()) as Box<dyn Decoder>)
    }
}

/// Caches one parsed definition per schema id for the session.
#[derive(Default)]
pub struct Ros1Decoder {
    schemas: HashMap<u16, MessageSchema>,
}

impl Decoder for Ros1Decoder {
    fn decode(
        &mut self,
        schema: Option<&SchemaRecord>,
        message: &MessageRecord,
    ) -> anyhow::Result<Value> {
        let Some(schema) = schema else {
            bail!("ros1 messages require a schema");
        };

        if !self.schemas.contains_key(&schema.id) {
            let text = std::str::from_utf8(&schema.data)
                .context("ros1msg schema data is not valid UTF-8")?;
            let parsed = MessageSchema::parse(&schema.name, text)?;
            self.schemas.insert(schema.id, parsed);
        }
        let parsed = &self.schemas[&schema.id];
        let resolver = TypeResolver::new(parsed);

        let mut cursor = Ros1Cursor::new(&message.data);
        let value = cursor.read_message(&parsed.spec, &resolver)?;
        if !cursor.is_empty() {
            bail!("{} trailing bytes after message body", cursor.remaining());
        }
        Ok(value)
    }
}

struct Ros1Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Ros1Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.buf.len() < n {
            bail!("unexpected end of payload (wanted {n} bytes, had {})", self.buf.len());
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn read_u32(&mut self) -> anyhow::Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn read_string(&mut self) -> anyhow::Result<String> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8(raw.to_vec()).context("string field is not valid UTF-8")?)
    }

    fn read_message(
        &mut self,
        spec: &MessageSpec,
        resolver: &TypeResolver<'_>,
    ) -> anyhow::Result<Value> {
        let mut out = BTreeMap::new();
        for field in &spec.fields {
            let value = self
                .read_value(&field.ty, resolver)
                .with_context(|| format!("field `{}`", field.name))?;
            out.insert(field.name.clone(), value);
        }
        Ok(Value::Message(out))
    }

    fn read_value(&mut self, ty: &Type, resolver: &TypeResolver<'_>) -> anyhow::Result<Value> {
        use BuiltInType as B;

        match ty {
            Type::BuiltIn(b) => Ok(match b {
                B::Bool => Value::Bool(self.take(1)?[0] != 0),
                B::Byte | B::UInt8 => Value::U8(self.take(1)?[0]),
                B::Char | B::Int8 => Value::I8(self.take(1)?[0] as i8),
                B::Int16 => Value::I16(LittleEndian::read_i16(self.take(2)?)),
                B::UInt16 => Value::U16(LittleEndian::read_u16(self.take(2)?)),
                B::Int32 => Value::I32(LittleEndian::read_i32(self.take(4)?)),
                B::UInt32 => Value::U32(self.read_u32()?),
                B::Int64 => Value::I64(LittleEndian::read_i64(self.take(8)?)),
                B::UInt64 => Value::U64(LittleEndian::read_u64(self.take(8)?)),
                B::Float32 => Value::F32(LittleEndian::read_f32(self.take(4)?)),
                B::Float64 => Value::F64(LittleEndian::read_f64(self.take(8)?)),
                B::String => Value::String(self.read_string()?),
                B::Time => Value::Message(BTreeMap::from([
                    ("secs".to_owned(), Value::U32(self.read_u32()?)),
                    ("nsecs".to_owned(), Value::U32(self.read_u32()?)),
                ])),
                B::Duration => Value::Message(BTreeMap::from([
                    (
                        "secs".to_owned(),
                        Value::I32(LittleEndian::read_i32(self.take(4)?)),
                    ),
                    (
                        "nsecs".to_owned(),
                        Value::I32(LittleEndian::read_i32(self.take(4)?)),
                    ),
                ])),
            }),

            Type::Array { elem, size } => {
                let len = match size {
                    ArraySize::Fixed(n) => *n,
                    ArraySize::Bounded(_) | ArraySize::Unbounded => self.read_u32()? as usize,
                };
                // Byte arrays are payloads, not element lists.
                if matches!(elem.as_ref(), Type::BuiltIn(B::Byte | B::UInt8)) {
                    return Ok(Value::Bytes(self.take(len)?.to_vec()));
                }
                let mut out = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    out.push(self.read_value(elem, resolver)?);
                }
                Ok(Value::Array(out))
            }

            Type::Complex(name) => {
                let spec = resolver
                    .resolve(name)
                    .with_context(|| format!("unknown message type `{name}`"))?;
                self.read_message(spec, resolver)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str, def: &str) -> SchemaRecord {
        SchemaRecord {
            id: 1,
            name: name.to_owned(),
            encoding: well_known::schema_encoding::ROS1_MSG.to_owned(),
            data: def.as_bytes().to_vec(),
        }
    }

    fn message(data: Vec<u8>) -> MessageRecord {
        MessageRecord {
            channel_id: 1,
            sequence: 0,
            log_time: 0,
            publish_time: 0,
            data,
        }
    }

    #[test]
    fn decodes_std_msgs_string() {
        let text = "hello ros1";
        let mut data = (text.len() as u32).to_le_bytes().to_vec();
        data.extend_from_slice(text.as_bytes());

        let mut decoder = Ros1Decoder::default();
        let value = decoder
            .decode(Some(&schema("std_msgs/String", "string data\n")), &message(data))
            .unwrap();
        assert_eq!(value.get("data").and_then(Value::as_str), Some(text));
    }

    #[test]
    fn decodes_nested_and_array_fields() {
        let def = "\
geometry_msgs/Point position
int32[] ids
================================================================================
MSG: geometry_msgs/Point
float64 x
float64 y
float64 z
";
        let mut data = Vec::new();
        for coord in [1.0_f64, 2.0, 3.0] {
            data.extend_from_slice(&coord.to_le_bytes());
        }
        data.extend_from_slice(&2_u32.to_le_bytes());
        data.extend_from_slice(&7_i32.to_le_bytes());
        data.extend_from_slice(&8_i32.to_le_bytes());

        let mut decoder = Ros1Decoder::default();
        let value = decoder
            .decode(Some(&schema("fleet_msgs/Pose", def)), &message(data))
            .unwrap();

        let position = value.get("position").unwrap();
        assert_eq!(position.get("y").and_then(Value::as_f64), Some(2.0));
        assert_eq!(
            value.get("ids"),
            Some(&Value::Array(vec![Value::I32(7), Value::I32(8)]))
        );
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut data = 0_u32.to_le_bytes().to_vec();
        data.push(0xaa);

        let mut decoder = Ros1Decoder::default();
        assert!(decoder
            .decode(Some(&schema("std_msgs/String", "string data\n")), &message(data))
            .is_err());
    }
}

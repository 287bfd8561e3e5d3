//! ROS2 message decoding: CDR payloads described by `.msg` definitions.
//!
//! Payloads start with a 4-byte encapsulation header selecting the
//! byte order; primitives after it are aligned to their natural size,
//! with offsets measured from the first byte after the header.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use anyhow::{bail, Context as _};
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::decode::msg_def::{ArraySize, BuiltInType, MessageSchema, MessageSpec, Type, TypeResolver};
use crate::decode::{well_known, Decoder, DecoderFactory};
use crate::records::{MessageRecord, SchemaRecord};
use crate::value::Value;

pub struct Ros2DecoderFactory;

impl DecoderFactory for Ros2DecoderFactory {
    fn decoder_for(
        &self,
        message_encoding: &str,
        _schema: Option<&SchemaRecord>,
    ) -> Option<Box<dyn Decoder>> {
        (message_encoding == well_known::message_encoding::CDR)
            .then(|| Box::new(Ros2Decoder::default()) as Box<dyn Decoder>)
    }
}

#[derive(Default)]
pub struct Ros2Decoder {
    schemas: HashMap<u16, MessageSchema>,
}

impl Decoder for Ros2Decoder {
    fn decode(
        &mut self,
        schema: Option<&SchemaRecord>,
        message: &MessageRecord,
    ) -> anyhow::Result<Value> {
        let Some(schema) = schema else {
            bail!("cdr messages require a schema");
        };

        if !self.schemas.contains_key(&schema.id) {
            let text = std::str::from_utf8(&schema.data)
                .context("ros2msg schema data is not valid UTF-8")?;
            let parsed = MessageSchema::parse(&schema.name, text)?;
            self.schemas.insert(schema.id, parsed);
        }
        let parsed = &self.schemas[&schema.id];
        let resolver = TypeResolver::new(parsed);

        let mut cursor = CdrCursor::new(&message.data)?;
        cursor.read_message(&parsed.spec, &resolver)
    }
}

/// `builtin_interfaces/Time` and `Duration` are referenced by nearly
/// every recorded definition but rarely included in it; both are two
/// ordinary fields on the wire.
fn builtin_interfaces_fallback(name: &str) -> Option<&'static MessageSpec> {
    static TIME: OnceLock<MessageSpec> = OnceLock::new();
    static DURATION: OnceLock<MessageSpec> = OnceLock::new();

    let make = |name: &str| MessageSpec {
        name: name.to_owned(),
        fields: vec![
            crate::decode::msg_def::Field {
                name: "sec".to_owned(),
                ty: Type::BuiltIn(BuiltInType::Int32),
            },
            crate::decode::msg_def::Field {
                name: "nanosec".to_owned(),
                ty: Type::BuiltIn(BuiltInType::UInt32),
            },
        ],
    };

    match name {
        "builtin_interfaces/Time" => {
            Some(TIME.get_or_init(|| make("builtin_interfaces/Time")))
        }
        "builtin_interfaces/Duration" => {
            Some(DURATION.get_or_init(|| make("builtin_interfaces/Duration")))
        }
        _ => None,
    }
}

struct CdrCursor<'a> {
    /// Payload after the encapsulation header.
    buf: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> CdrCursor<'a> {
    fn new(data: &'a [u8]) -> anyhow::Result<Self> {
        let Some((header, body)) = data.split_at_checked(4) else {
            bail!("payload shorter than the 4-byte encapsulation header");
        };
        if header[0] != 0 {
            bail!("unknown representation identifier {:?}", &header[..2]);
        }
        // 0x00/0x02: big-endian (PL_)CDR; 0x01/0x03: little-endian.
        Ok(Self {
            buf: body,
            pos: 0,
            little_endian: header[1] & 1 == 1,
        })
    }

    fn align(&mut self, n: usize) {
        let rem = self.pos % n;
        if rem != 0 {
            self.pos += n - rem;
        }
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        let end = self.pos.checked_add(n).context("offset overflow")?;
        let Some(raw) = self.buf.get(self.pos..end) else {
            bail!(
                "unexpected end of payload (wanted {n} bytes at offset {})",
                self.pos
            );
        };
        self.pos = end;
        Ok(raw)
    }

    fn take_aligned(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        self.align(n);
        self.take(n)
    }

    fn read_u32(&mut self) -> anyhow::Result<u32> {
        let raw = self.take_aligned(4)?;
        Ok(if self.little_endian {
            LittleEndian::read_u32(raw)
        } else {
            BigEndian::read_u32(raw)
        })
    }

    /// CDR strings are length-prefixed and NUL-terminated, with the
    /// NUL counted in the length.
    fn read_string(&mut self) -> anyhow::Result<String> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len)?;
        let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
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

        macro_rules! read_endian {
            ($read:ident, $n:expr) => {{
                let raw = self.take_aligned($n)?;
                if self.little_endian {
                    LittleEndian::$read(raw)
                } else {
                    BigEndian::$read(raw)
                }
            }};
        }

        match ty {
            Type::BuiltIn(b) => Ok(match b {
                B::Bool => Value::Bool(self.take(1)?[0] != 0),
                B::Byte | B::UInt8 => Value::U8(self.take(1)?[0]),
                B::Char | B::Int8 => Value::I8(self.take(1)?[0] as i8),
                B::Int16 => Value::I16(read_endian!(read_i16, 2)),
                B::UInt16 => Value::U16(read_endian!(read_u16, 2)),
                B::Int32 => Value::I32(read_endian!(read_i32, 4)),
                B::UInt32 => Value::U32(self.read_u32()?),
                B::Int64 => Value::I64(read_endian!(read_i64, 8)),
                B::UInt64 => Value::U64(read_endian!(read_u64, 8)),
                B::Float32 => Value::F32(read_endian!(read_f32, 4)),
                B::Float64 => Value::F64(read_endian!(read_f64, 8)),
                B::String => Value::String(self.read_string()?),
                B::Time | B::Duration => {
                    bail!("`time`/`duration` are not ros2 primitives")
                }
            }),

            Type::Array { elem, size } => {
                let len = match size {
                    ArraySize::Fixed(n) => *n,
                    ArraySize::Bounded(_) | ArraySize::Unbounded => self.read_u32()? as usize,
                };
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
                    .or_else(|| builtin_interfaces_fallback(name))
                    .with_context(|| format!("unknown message type `{name}`"))?;
                self.read_message(spec, resolver)
            }
        }
    }
}

//! Protobuf message decoding via runtime descriptor reflection.
//!
//! The schema data of a protobuf channel is a serialized
//! `FileDescriptorSet`; the schema name selects the message type
//! within it. No compiled-in message types are required.

use std::collections::HashMap;

use anyhow::{bail, Context as _};
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};

use crate::decode::{well_known, Decoder, DecoderFactory};
use crate::records::{MessageRecord, SchemaRecord};
use crate::value::Value;

pub struct ProtobufDecoderFactory;

impl DecoderFactory for ProtobufDecoderFactory {
    fn decoder_for(
        &self,
        message_encoding: &str,
        _schema: Option<&SchemaRecord>,
    ) -> Option<Box<dyn Decoder>> {
        (message_encoding == well_known::message_encoding::PROTOBUF)
            .then(|| Box::new(ProtobufDecoder::default()) as Box<dyn Decoder>)
    }
}

/// Caches one message descriptor per schema id for the session.
#[derive(Default)]
pub struct ProtobufDecoder {
    descriptors: HashMap<u16, MessageDescriptor>,
}

impl Decoder for ProtobufDecoder {
    fn decode(
        &mut self,
        schema: Option<&SchemaRecord>,
        message: &MessageRecord,
    ) -> anyhow::Result<Value> {
        let Some(schema) = schema else {
            bail!("protobuf messages require a schema");
        };

        if !self.descriptors.contains_key(&schema.id) {
            let pool = DescriptorPool::decode(schema.data.as_slice())
                .context("schema data is not a valid FileDescriptorSet")?;
            let descriptor = pool
                .get_message_by_name(&schema.name)
                .with_context(|| {
                    format!("descriptor set has no message named `{}`", schema.name)
                })?;
            self.descriptors.insert(schema.id, descriptor);
        }
        let descriptor = self.descriptors[&schema.id].clone();

        let decoded = DynamicMessage::decode(descriptor, message.data.as_slice())
            .context("invalid protobuf payload")?;
        Ok(dynamic_to_value(&decoded))
    }
}

fn dynamic_to_value(message: &DynamicMessage) -> Value {
    let mut out = std::collections::BTreeMap::new();
    for (field, value) in message.fields() {
        out.insert(field.name().to_owned(), reflect_to_value(value));
    }
    Value::Message(out)
}

fn reflect_to_value(value: &prost_reflect::Value) -> Value {
    use prost_reflect::Value as V;

    match value {
        V::Bool(v) => Value::Bool(*v),
        V::I32(v) => Value::I32(*v),
        V::I64(v) => Value::I64(*v),
        V::U32(v) => Value::U32(*v),
        V::U64(v) => Value::U64(*v),
        V::F32(v) => Value::F32(*v),
        V::F64(v) => Value::F64(*v),
        V::String(v) => Value::String(v.clone()),
        V::Bytes(v) => Value::Bytes(v.to_vec()),
        V::EnumNumber(v) => Value::I32(*v),
        V::Message(v) => dynamic_to_value(v),
        V::List(items) => Value::Array(items.iter().map(reflect_to_value).collect()),
        V::Map(entries) => Value::Message(
            entries
                .iter()
                .map(|(key, value)| (map_key_to_string(key), reflect_to_value(value)))
                .collect(),
        ),
    }
}

fn map_key_to_string(key: &prost_reflect::MapKey) -> String {
    use prost_reflect::MapKey as K;

    match key {
        K::Bool(v) => v.to_string(),
        K::I32(v) => v.to_string(),
        K::I64(v) => v.to_string(),
        K::U32(v) => v.to_string(),
        K::U64(v) => v.to_string(),
        K::String(v) => v.clone(),
    }
}

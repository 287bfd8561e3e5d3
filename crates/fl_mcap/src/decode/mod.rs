//! Pluggable message decoding.
//!
//! Channels declare a message encoding tag; a [`DecoderFactory`] list
//! (configuration, supplied at session start) maps those tags onto
//! [`Decoder`] instances. The [`DecoderRegistry`] constructs at most
//! one decoder per encoding per read session and owns the cache for
//! exactly that session.

use std::collections::HashMap;

use crate::error::McapError;
use crate::records::{MessageRecord, SchemaRecord};
use crate::value::Value;

pub mod json;

#[cfg(feature = "protobuf")]
pub mod protobuf;

#[cfg(feature = "ros")]
pub(crate) mod msg_def;

#[cfg(feature = "ros")]
pub mod ros1;

#[cfg(feature = "ros")]
pub mod ros2;

/// Well-known MCAP encoding tags.
pub mod well_known {
    /// Message encodings (declared per channel).
    pub mod message_encoding {
        pub const JSON: &str = "json";
        pub const PROTOBUF: &str = "protobuf";
        pub const ROS1: &str = "ros1";
        pub const CDR: &str = "cdr";
    }

    /// Schema encodings (declared per schema).
    pub mod schema_encoding {
        pub const JSON_SCHEMA: &str = "jsonschema";
        pub const PROTOBUF: &str = "protobuf";
        pub const ROS1_MSG: &str = "ros1msg";
        pub const ROS2_MSG: &str = "ros2msg";
    }
}

/// Translates encoded message payloads into structured [`Value`]s.
///
/// A decoder may hold per-schema compiled state (a descriptor pool, a
/// parsed `.msg` definition) and is reused for every message sharing
/// its encoding within one read session — never across sessions.
pub trait Decoder {
    /// Decode one message payload.
    ///
    /// Failures are wrapped with topic context by the message stream,
    /// so implementations just attach whatever decode-level context
    /// they have.
    fn decode(
        &mut self,
        schema: Option<&SchemaRecord>,
        message: &MessageRecord,
    ) -> anyhow::Result<Value>;
}

/// Builds [`Decoder`]s for the message encodings it supports.
///
/// `decoder_for` is both the capability check and the constructor:
/// returning `None` means "not my encoding" and lets the next factory
/// in the configured order have a go.
pub trait DecoderFactory {
    fn decoder_for(
        &self,
        message_encoding: &str,
        schema: Option<&SchemaRecord>,
    ) -> Option<Box<dyn Decoder>>;
}

/// The decoder factories enabled in this build: JSON always, protobuf
/// and ROS1/ROS2 when the corresponding cargo features are on.
///
/// A missing optional factory is a normal configuration state; it only
/// surfaces as [`McapError::UnsupportedEncoding`] if a message with
/// that encoding is actually encountered.
pub fn default_decoder_factories() -> Vec<Box<dyn DecoderFactory>> {
    #[allow(unused_mut)] // `mut` is unused when the optional decoders are compiled out
    let mut factories: Vec<Box<dyn DecoderFactory>> = vec![Box::new(json::JsonDecoderFactory)];

    #[cfg(feature = "protobuf")]
    factories.push(Box::new(protobuf::ProtobufDecoderFactory));

    #[cfg(feature = "ros")]
    {
        factories.push(Box::new(ros1::Ros1DecoderFactory));
        factories.push(Box::new(ros2::Ros2DecoderFactory));
    }

    factories
}

/// Session-scoped mapping from message encoding tag to a lazily
/// constructed decoder.
pub struct DecoderRegistry {
    factories: Vec<Box<dyn DecoderFactory>>,
    cache: HashMap<String, Box<dyn Decoder>>,
}

impl DecoderRegistry {
    pub fn new(factories: Vec<Box<dyn DecoderFactory>>) -> Self {
        Self {
            factories,
            cache: HashMap::new(),
        }
    }

    /// Returns the decoder for `message_encoding`, constructing and
    /// caching it on first use.
    ///
    /// Factories are consulted in their configured order; if none
    /// volunteers, the call fails with
    /// [`McapError::UnsupportedEncoding`] — messages are never silently
    /// skipped.
    pub fn resolve(
        &mut self,
        message_encoding: &str,
        schema: Option<&SchemaRecord>,
    ) -> Result<&mut Box<dyn Decoder>, McapError> {
        if !self.cache.contains_key(message_encoding) {
            let decoder = self
                .factories
                .iter()
                .find_map(|factory| factory.decoder_for(message_encoding, schema))
                .ok_or_else(|| McapError::UnsupportedEncoding(message_encoding.to_owned()))?;
            self.cache.insert(message_encoding.to_owned(), decoder);
        }

        Ok(self
            .cache
            .get_mut(message_encoding)
            .expect("just inserted above"))
    }
}

//! MCAP record types and their wire-level field parsers.
//!
//! All integers are little-endian; strings and byte blobs are
//! `u32`-length-prefixed. Record boundaries themselves (opcode +
//! `u64` length) are handled by [`crate::stream::McapStreamDecoder`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::McapError;

/// MCAP record opcodes. Only schema/channel/message (and the record
/// kinds needed to frame them) are interpreted; everything else is
/// skipped.
pub(crate) mod op {
    pub const HEADER: u8 = 0x01;
    pub const FOOTER: u8 = 0x02;
    pub const SCHEMA: u8 = 0x03;
    pub const CHANNEL: u8 = 0x04;
    pub const MESSAGE: u8 = 0x05;
    pub const CHUNK: u8 = 0x06;
}

/// The file magic: `\x89MCAP0\r\n`.
pub const MAGIC: [u8; 8] = [0x89, b'M', b'C', b'A', b'P', 0x30, 0x0d, 0x0a];

/// A schema definition: a named, encoded type definition referenced by
/// one or more channels. Immutable once registered within a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRecord {
    /// Unique per stream; `0` is reserved for "no schema" and never
    /// appears as a registered schema id.
    pub id: u16,
    pub name: String,
    /// Schema encoding tag, e.g. `"jsonschema"`, `"protobuf"`,
    /// `"ros1msg"`, `"ros2msg"`.
    pub encoding: String,
    /// Opaque definition blob (JSON schema text, serialized
    /// `FileDescriptorSet`, concatenated `.msg` definitions, ...).
    pub data: Vec<u8>,
}

/// A channel: a named topic bound to one schema and one message
/// encoding. Immutable once registered within a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: u16,
    /// Id of the schema all messages on this channel conform to.
    /// `0` means the channel carries schema-free messages.
    pub schema_id: u16,
    pub topic: String,
    /// Message encoding tag, e.g. `"json"`, `"protobuf"`, `"ros1"`,
    /// `"cdr"`.
    pub message_encoding: String,
    pub metadata: BTreeMap<String, String>,
}

/// A single timestamped message. Transient: exists only for the
/// duration of processing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub channel_id: u16,
    pub sequence: u32,
    /// Nanoseconds since epoch at which the message was recorded.
    /// Non-decreasing in platform-produced streams.
    pub log_time: u64,
    /// Nanoseconds since epoch at which the message was published.
    pub publish_time: u64,
    /// Opaque encoded payload.
    pub data: Vec<u8>,
}

/// A classified record yielded by the container stream reader, in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Schema(Arc<SchemaRecord>),
    Channel(Arc<ChannelRecord>),
    Message(MessageRecord),
}

/// Sequential little-endian reader over one record body.
pub(crate) struct RecordBody<'a> {
    buf: &'a [u8],
}

impl<'a> RecordBody<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], McapError> {
        if self.buf.len() < n {
            return Err(McapError::truncated(what));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub fn u16(&mut self, what: &str) -> Result<u16, McapError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, what: &str) -> Result<u32, McapError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self, what: &str) -> Result<u64, McapError> {
        let b = self.take(8, what)?;
        let mut out = [0; 8];
        out.copy_from_slice(b);
        Ok(u64::from_le_bytes(out))
    }

    /// `u32`-length-prefixed byte blob.
    pub fn bytes(&mut self, what: &str) -> Result<&'a [u8], McapError> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    /// `u32`-length-prefixed UTF-8 string.
    pub fn string(&mut self, what: &str) -> Result<String, McapError> {
        let raw = self.bytes(what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| McapError::MalformedContainer(format!("{what} is not valid UTF-8")))
    }

    /// The unread remainder of the body.
    pub fn rest(self) -> &'a [u8] {
        self.buf
    }
}

impl SchemaRecord {
    pub(crate) fn parse(body: &[u8]) -> Result<Self, McapError> {
        let mut r = RecordBody::new(body);
        Ok(Self {
            id: r.u16("schema id")?,
            name: r.string("schema name")?,
            encoding: r.string("schema encoding")?,
            data: r.bytes("schema data")?.to_vec(),
        })
    }
}

impl ChannelRecord {
    pub(crate) fn parse(body: &[u8]) -> Result<Self, McapError> {
        let mut r = RecordBody::new(body);
        let id = r.u16("channel id")?;
        let schema_id = r.u16("channel schema id")?;
        let topic = r.string("channel topic")?;
        let message_encoding = r.string("channel message encoding")?;

        let mut metadata = BTreeMap::new();
        let mut kv = RecordBody::new(r.bytes("channel metadata")?);
        while !kv.buf.is_empty() {
            let key = kv.string("channel metadata key")?;
            let value = kv.string("channel metadata value")?;
            metadata.insert(key, value);
        }

        Ok(Self {
            id,
            schema_id,
            topic,
            message_encoding,
            metadata,
        })
    }
}

impl MessageRecord {
    pub(crate) fn parse(body: &[u8]) -> Result<Self, McapError> {
        let mut r = RecordBody::new(body);
        Ok(Self {
            channel_id: r.u16("message channel id")?,
            sequence: r.u32("message sequence")?,
            log_time: r.u64("message log time")?,
            publish_time: r.u64("message publish time")?,
            data: r.rest().to_vec(),
        })
    }
}

/// The fields of a chunk record up to (but not including) its nested
/// records payload.
pub(crate) struct ChunkHeader {
    pub compression: String,
    pub records_len: u64,
}

impl ChunkHeader {
    /// Parses the chunk header and returns it along with the nested
    /// (possibly compressed) records payload.
    pub fn parse(body: &[u8]) -> Result<(Self, &[u8]), McapError> {
        let mut r = RecordBody::new(body);
        let _message_start_time = r.u64("chunk start time")?;
        let _message_end_time = r.u64("chunk end time")?;
        let _uncompressed_size = r.u64("chunk uncompressed size")?;
        let _uncompressed_crc = r.u32("chunk crc")?;
        let compression = r.string("chunk compression")?;
        let records_len = r.u64("chunk records length")?;
        let records = r.rest();
        if records.len() as u64 != records_len {
            return Err(McapError::MalformedContainer(format!(
                "chunk declares {records_len} record bytes but carries {}",
                records.len()
            )));
        }
        Ok((
            Self {
                compression,
                records_len,
            },
            records,
        ))
    }
}

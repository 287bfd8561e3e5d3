//! Pull-based readers on top of the framing state machine.
//!
//! [`RecordStream`] turns any [`Read`] source into an iterator of
//! records, pulling fixed-size byte chunks on demand. [`MessageStream`]
//! sits on top of it and resolves every message against the schemas
//! and channels seen so far, yielding fully decoded messages.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::decode::{default_decoder_factories, DecoderFactory, DecoderRegistry};
use crate::error::McapError;
use crate::records::{ChannelRecord, MessageRecord, Record, SchemaRecord};
use crate::stream::McapStreamDecoder;
use crate::value::Value;

/// How many bytes to pull from the source per refill.
const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Iterator of records over any byte source.
///
/// Memory use is bounded by the largest single record, independent of
/// container size; nothing is buffered beyond the record being framed.
pub struct RecordStream<R: Read> {
    source: R,
    decoder: McapStreamDecoder,
    eof: bool,
}

impl<R: Read> RecordStream<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            decoder: McapStreamDecoder::new(),
            eof: false,
        }
    }

    /// Next record in arrival order, or `Ok(None)` at the end of the
    /// container.
    ///
    /// A source that ends mid-record fails with
    /// [`McapError::MalformedContainer`]; a source that ends cleanly at
    /// a record boundary without a footer (a live stream cut short) is
    /// treated as a normal end.
    pub fn next_record(&mut self) -> Result<Option<Record>, McapError> {
        loop {
            if let Some(record) = self.decoder.try_read()? {
                return Ok(Some(record));
            }
            if self.decoder.is_done() {
                return Ok(None);
            }
            if self.eof {
                if self.decoder.has_partial_record() {
                    return Err(McapError::MalformedContainer(
                        "source ended mid-record".to_owned(),
                    ));
                }
                return Ok(None);
            }

            let mut byte_chunk = vec![0; READ_CHUNK_SIZE];
            let n = self.source.read(&mut byte_chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                byte_chunk.truncate(n);
                self.decoder.push_byte_chunk(byte_chunk);
            }
        }
    }
}

impl<R: Read> Iterator for RecordStream<R> {
    type Item = Result<Record, McapError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// One decoded message together with everything known about its
/// channel.
#[derive(Debug)]
pub struct DecodedMessage {
    /// `None` for schema-free channels (schema id 0).
    pub schema: Option<Arc<SchemaRecord>>,
    pub channel: Arc<ChannelRecord>,
    /// The raw message record, payload included.
    pub message: MessageRecord,
    /// The payload decoded per the channel's message encoding.
    pub value: Value,
}

/// Iterator of [`DecodedMessage`]s over any byte source.
///
/// Schemas and channels are registered as their records arrive;
/// messages resolve against them and are decoded through a
/// session-scoped [`DecoderRegistry`]. The first error ends the
/// stream.
pub struct MessageStream<R: Read> {
    records: RecordStream<R>,
    registry: DecoderRegistry,
    schemas: HashMap<u16, Arc<SchemaRecord>>,
    channels: HashMap<u16, Arc<ChannelRecord>>,
    failed: bool,
}

impl<R: Read> MessageStream<R> {
    /// Reads with the built-in decoders, see
    /// [`default_decoder_factories`].
    pub fn new(source: R) -> Self {
        Self::with_factories(source, default_decoder_factories())
    }

    pub fn with_factories(source: R, factories: Vec<Box<dyn DecoderFactory>>) -> Self {
        Self {
            records: RecordStream::new(source),
            registry: DecoderRegistry::new(factories),
            schemas: HashMap::new(),
            channels: HashMap::new(),
            failed: false,
        }
    }

    fn next_message(&mut self) -> Result<Option<DecodedMessage>, McapError> {
        while let Some(record) = self.records.next_record()? {
            match record {
                Record::Schema(schema) => {
                    self.schemas.insert(schema.id, schema);
                }

                Record::Channel(channel) => {
                    if channel.schema_id != 0 && !self.schemas.contains_key(&channel.schema_id) {
                        return Err(McapError::UnknownSchema(channel.schema_id));
                    }
                    self.channels.insert(channel.id, channel);
                }

                Record::Message(message) => {
                    return self.decode(message).map(Some);
                }
            }
        }
        Ok(None)
    }

    fn decode(&mut self, message: MessageRecord) -> Result<DecodedMessage, McapError> {
        let channel = self
            .channels
            .get(&message.channel_id)
            .ok_or(McapError::UnknownChannel(message.channel_id))?
            .clone();

        let schema = if channel.schema_id == 0 {
            None
        } else {
            Some(
                self.schemas
                    .get(&channel.schema_id)
                    .ok_or(McapError::UnknownSchema(channel.schema_id))?
                    .clone(),
            )
        };

        let decoder = self
            .registry
            .resolve(&channel.message_encoding, schema.as_deref())?;
        let value = decoder
            .decode(schema.as_deref(), &message)
            .map_err(|source| McapError::Decode {
                topic: channel.topic.clone(),
                source,
            })?;

        Ok(DecodedMessage {
            schema,
            channel,
            message,
            value,
        })
    }
}

impl<R: Read> Iterator for MessageStream<R> {
    type Item = Result<DecodedMessage, McapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_message().transpose() {
            Some(Err(err)) => {
                self.failed = true;
                Some(Err(err))
            }
            other => other,
        }
    }
}

/// Decode all messages of an MCAP container, lazily and in arrival
/// order.
pub fn read_messages<R: Read>(source: R) -> MessageStream<R> {
    MessageStream::new(source)
}

/// Decode all messages of an MCAP container in one go.
///
/// All-or-nothing: any error discards the messages decoded so far.
/// Prefer [`read_messages`] for anything sizeable.
pub fn get_messages<R: Read>(
    source: R,
    factories: Vec<Box<dyn DecoderFactory>>,
) -> Result<Vec<DecodedMessage>, McapError> {
    MessageStream::with_factories(source, factories).collect()
}

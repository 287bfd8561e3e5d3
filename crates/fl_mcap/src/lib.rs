//! Streaming reader and decoder for MCAP robot-telemetry containers.
//!
//! The container is read strictly in arrival order, record by record,
//! so a download can be decoded while it is still in flight and memory
//! use stays bounded by the largest single record:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! let file = std::fs::File::open("recording.mcap")?;
//! for message in fl_mcap::read_messages(file) {
//!     let message = message?;
//!     println!("{} @ {}: {:?}", message.channel.topic, message.message.log_time, message.value);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! JSON messages always decode. The `protobuf` and `ros` features (both
//! on by default) add protobuf, ROS1 and ROS2 (CDR) decoding; a message
//! whose encoding has no compiled-in decoder fails with
//! [`McapError::UnsupportedEncoding`].

pub mod decode;
mod error;
pub mod records;
mod stream;

mod read;
mod value;

pub use self::decode::{default_decoder_factories, Decoder, DecoderFactory, DecoderRegistry};
pub use self::error::McapError;
pub use self::read::{get_messages, read_messages, DecodedMessage, MessageStream, RecordStream};
pub use self::records::{ChannelRecord, MessageRecord, Record, SchemaRecord};
pub use self::stream::McapStreamDecoder;
pub use self::value::Value;

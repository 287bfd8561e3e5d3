//! Client for the FleetLog data platform.
//!
//! [`Client`] covers the REST API (devices, events, recordings,
//! sessions, projects, coverage, topics) and recording data transfer.
//! Downloaded recordings are MCAP containers; [`Client::iter_messages`]
//! decodes them through [`fl_mcap`] while the bytes are still arriving:
//!
//! ```no_run
//! # fn main() -> Result<(), fl_client::ClientError> {
//! use fl_client::{Client, DataQuery};
//!
//! let client = Client::new("my-token")?;
//! let query = DataQuery::device_name(
//!     "robot-1",
//!     "2025-01-01T00:00:00Z".parse().unwrap(),
//!     "2025-01-02T00:00:00Z".parse().unwrap(),
//! );
//! for message in client.iter_messages(&query, None)? {
//!     let message = message?;
//!     println!("{}: {:?}", message.channel.topic, message.value);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod params;
mod progress;
pub mod records;

pub use self::client::{Client, DownloadProgress, DEFAULT_HOST};
pub use self::error::ClientError;
pub use self::params::{
    AttachmentQuery, CoverageQuery, DataQuery, DeviceUpdate, EventQuery, ImportQuery, NewDevice,
    NewEvent, NewSession, OutputFormat, RecordingDataQuery, RecordingQuery, SessionUpdate,
    SortOrder, TopicQuery, UploadRequest,
};
pub use self::progress::{ProgressCallback, ProgressReader};

// Decoded messages and decoder plumbing come from the container crate.
pub use fl_mcap::{DecodedMessage, Decoder, DecoderFactory, McapError, MessageStream, Value};

use thiserror::Error;

/// The base error type for reading and decoding MCAP streams.
///
/// Framing errors are fatal for the stream that produced them; records
/// yielded before the failure remain valid.
#[derive(Error, Debug)]
pub enum McapError {
    #[error("malformed MCAP container: {0}")]
    MalformedContainer(String),

    #[error("message references unknown channel {0}")]
    UnknownChannel(u16),

    #[error("channel references unknown schema {0}")]
    UnknownSchema(u16),

    #[error("no decoder registered for message encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("unsupported chunk compression {0:?}")]
    UnsupportedCompression(String),

    #[error("failed to decode message on topic {topic:?}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl McapError {
    /// Truncated-framing helper used by the stream reader.
    pub(crate) fn truncated(what: &str) -> Self {
        Self::MalformedContainer(format!("truncated {what}"))
    }
}

use thiserror::Error;

/// The base error type for platform API calls.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The API rejected the request. For 4xx responses `message`
    /// carries the server's own error message when it sent one.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Mcap(#[from] fl_mcap::McapError),

    /// A caller-side violation, e.g. both `device_id` and
    /// `device_name` given where they are mutually exclusive.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No {rel} link found for system {serial}")]
    MissingLink { rel: String, serial: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Caller misuse detected before any request is made. Never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("no client available to send commands")]
    NoClient,

    #[error("no parent status available")]
    NoParent,

    #[error("zone index not set")]
    ZoneIndexNotSet,

    #[error("zone index out of range: {index} (zones: {len})")]
    ZoneIndexOutOfRange { index: usize, len: usize },

    #[error("set_temperature requires a mode")]
    NoMode,

    #[error("invalid mode '{value}': expected one of AUTO, COOL, FAN, HEAT, OFF")]
    InvalidMode { value: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Api,
    Validation,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth(_) => ErrorKind::Auth,
            Error::Status { .. }
            | Error::MissingLink { .. }
            | Error::Api(_)
            | Error::Http(_)
            | Error::Io(_) => ErrorKind::Api,
            Error::Validation(_) => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while parsing or interpreting SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The datagram is not a well-formed SIP message.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A header required by RFC 3261 §8.1.1 is absent.
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    /// A header is present but its value cannot be interpreted.
    #[error("Invalid {name} header: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    /// The status code is outside the set this crate models.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Message text was not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl Error {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::ParseError(msg.into())
    }
}

//! # SIP Methods
//!
//! Request methods as they appear on the request line and in CSeq. Methods
//! are case-sensitive (RFC 3261 §7.1); anything that is a valid token but not
//! one of the methods this UAS acts on is kept as [`Method::Extension`].

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::parser::is_token_char;

/// SIP request method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    /// Any other token (INFO, SUBSCRIBE, ...), preserved verbatim
    Extension(String),
}

impl Method {
    /// The method name as written on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Extension(name) => name,
        }
    }

    /// Methods this endpoint advertises in `Allow`.
    pub fn supported() -> &'static [Method] {
        &[
            Method::Invite,
            Method::Ack,
            Method::Bye,
            Method::Cancel,
            Method::Register,
            Method::Options,
        ]
    }

    /// Comma separated list suitable for an `Allow` header value.
    pub fn allow_header_value() -> String {
        Self::supported()
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INVITE" => Ok(Method::Invite),
            "ACK" => Ok(Method::Ack),
            "BYE" => Ok(Method::Bye),
            "CANCEL" => Ok(Method::Cancel),
            "REGISTER" => Ok(Method::Register),
            "OPTIONS" => Ok(Method::Options),
            other if !other.is_empty() && other.bytes().all(is_token_char) => {
                Ok(Method::Extension(other.to_string()))
            }
            other => Err(Error::parse(format!("Invalid method: {:?}", other))),
        }
    }
}

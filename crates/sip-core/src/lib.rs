//! # tonecall-sip-core
//!
//! SIP message vocabulary for the tonecall user agent server.
//!
//! This crate covers the subset of RFC 3261 a UDP-only UAS needs:
//!
//! - [`Method`] and [`StatusCode`] enums
//! - [`Request`] and [`Response`] with ordered, case-insensitive header access
//! - a `nom` based parser for inbound datagrams ([`parse_message`])
//! - response construction per RFC 3261 §8.2.6 ([`Response::from_request`])
//!
//! ## Example
//!
//! ```rust
//! use tonecall_sip_core::{parse_message, Message, Method, Response, StatusCode};
//!
//! let raw = b"INVITE sip:bob@example.com SIP/2.0\r\n\
//! Via: SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776asdhds\r\n\
//! From: Alice <sip:alice@example.com>;tag=1928301774\r\n\
//! To: Bob <sip:bob@example.com>\r\n\
//! Call-ID: a84b4c76e66710\r\n\
//! CSeq: 314159 INVITE\r\n\
//! Content-Length: 0\r\n\r\n";
//!
//! let Message::Request(request) = parse_message(raw).unwrap() else { panic!() };
//! assert_eq!(request.method, Method::Invite);
//! assert_eq!(request.from_tag(), Some("1928301774"));
//!
//! let ringing = Response::from_request(&request, StatusCode::Ringing).with_to_tag("8321234356");
//! assert_eq!(ringing.to_tag(), Some("8321234356"));
//! ```

pub mod error;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use parser::{parse_message, parse_request, parse_response};
pub use types::header::{header_param, Header, HeaderName};
pub use types::method::Method;
pub use types::request::Request;
pub use types::response::Response;
pub use types::status::StatusCode;

/// A parsed SIP message of either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Serialize the message for the wire.
    pub fn to_bytes(&self) -> bytes::Bytes {
        match self {
            Message::Request(request) => request.to_bytes(),
            Message::Response(response) => response.to_bytes(),
        }
    }
}

/// The SIP version string emitted on every start line.
pub const SIP_VERSION: &str = "SIP/2.0";

//! SIP request representation

use bytes::{BufMut, Bytes, BytesMut};

use super::header::{find, header_param, Header, HeaderName};
use super::method::Method;
use crate::error::{Error, Result};
use crate::SIP_VERSION;

/// A SIP request with headers in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method
    pub method: Method,
    /// Request-URI, kept as text
    pub uri: String,
    /// Protocol version from the request line
    pub version: String,
    /// Headers in the order they were received
    pub headers: Vec<Header>,
    /// Message body
    pub body: Bytes,
}

impl Request {
    /// Create an empty request; mostly useful for building test traffic.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: SIP_VERSION.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header, builder style
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Set the body and its Content-Type
    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers.retain(|h| !h.is(HeaderName::CONTENT_TYPE));
        self.headers.push(Header::new(HeaderName::CONTENT_TYPE, content_type));
        self.body = body.into();
        self
    }

    /// First value of the named header
    pub fn header(&self, name: &str) -> Option<&str> {
        find(&self.headers, name).map(|h| h.value.as_str())
    }

    /// All headers with the given name, in order
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Header> + 'a {
        self.headers.iter().filter(move |h| h.is(name))
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header(HeaderName::CALL_ID)
    }

    /// Tag of the From header (the remote party's tag for a UAS)
    pub fn from_tag(&self) -> Option<&str> {
        self.header(HeaderName::FROM).and_then(|v| header_param(v, "tag"))
    }

    /// Tag of the To header, present on in-dialog requests
    pub fn to_tag(&self) -> Option<&str> {
        self.header(HeaderName::TO)
            .and_then(|v| header_param(v, "tag"))
            .filter(|tag| !tag.is_empty())
    }

    /// Topmost Via header value
    pub fn top_via(&self) -> Option<&str> {
        self.header(HeaderName::VIA)
    }

    /// Branch parameter of the topmost Via
    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(|v| header_param(v, "branch"))
    }

    /// Sequence number and method from CSeq
    pub fn cseq(&self) -> Result<(u32, Method)> {
        let value = self
            .header(HeaderName::CSEQ)
            .ok_or(Error::MissingHeader(HeaderName::CSEQ))?;
        let mut parts = value.split_whitespace();
        let seq = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| Error::InvalidHeader {
                name: HeaderName::CSEQ,
                reason: format!("bad sequence number in {:?}", value),
            })?;
        let method = parts
            .next()
            .ok_or_else(|| Error::InvalidHeader {
                name: HeaderName::CSEQ,
                reason: format!("missing method in {:?}", value),
            })?
            .parse::<Method>()?;
        Ok((seq, method))
    }

    /// Check the headers every request must carry (RFC 3261 §8.1.1).
    pub fn validate(&self) -> Result<()> {
        for name in [
            HeaderName::VIA,
            HeaderName::FROM,
            HeaderName::TO,
            HeaderName::CALL_ID,
            HeaderName::CSEQ,
        ] {
            if self.header(name).is_none() {
                return Err(Error::MissingHeader(name));
            }
        }
        let (_, cseq_method) = self.cseq()?;
        if cseq_method != self.method {
            return Err(Error::InvalidHeader {
                name: HeaderName::CSEQ,
                reason: format!("method {} does not match request line {}", cseq_method, self.method),
            });
        }
        Ok(())
    }

    /// Serialize to wire format. Content-Length is always recomputed.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(512 + self.body.len());
        buf.put_slice(format!("{} {} {}\r\n", self.method, self.uri, self.version).as_bytes());
        for header in self.headers.iter().filter(|h| !h.is(HeaderName::CONTENT_LENGTH)) {
            buf.put_slice(format!("{}\r\n", header).as_bytes());
        }
        buf.put_slice(format!("{}: {}\r\n\r\n", HeaderName::CONTENT_LENGTH, self.body.len()).as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

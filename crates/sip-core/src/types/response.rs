//! SIP response construction and serialization

use bytes::{BufMut, Bytes, BytesMut};

use super::header::{find, header_param, Header, HeaderName};
use super::request::Request;
use super::status::StatusCode;
use crate::SIP_VERSION;

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    /// Reason phrase; defaults to the status code's standard phrase
    pub reason: String,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build a response to `request` as RFC 3261 §8.2.6.2 prescribes: every
    /// Via in order, then From, To, Call-ID and CSeq copied verbatim.
    pub fn from_request(request: &Request, status: StatusCode) -> Self {
        let mut response = Self::new(status);
        response
            .headers
            .extend(request.headers_named(HeaderName::VIA).cloned());
        for name in [
            HeaderName::FROM,
            HeaderName::TO,
            HeaderName::CALL_ID,
            HeaderName::CSEQ,
        ] {
            if let Some(value) = request.header(name) {
                response.headers.push(Header::new(name, value));
            }
        }
        response
    }

    /// Override the reason phrase
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Add a tag to the To header unless it already carries one.
    pub fn with_to_tag(mut self, tag: &str) -> Self {
        if let Some(to) = self.headers.iter_mut().find(|h| h.is(HeaderName::TO)) {
            if header_param(&to.value, "tag").is_none() {
                to.value = format!("{};tag={}", to.value, tag);
            }
        }
        self
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

    pub fn header(&self, name: &str) -> Option<&str> {
        find(&self.headers, name).map(|h| h.value.as_str())
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header(HeaderName::CALL_ID)
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.header(HeaderName::TO).and_then(|v| header_param(v, "tag"))
    }

    /// CSeq number, if the header is present and well formed
    pub fn cseq_number(&self) -> Option<u32> {
        self.header(HeaderName::CSEQ)?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    }

    /// Serialize to wire format. Content-Length is always recomputed.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(512 + self.body.len());
        buf.put_slice(
            format!("{} {} {}\r\n", SIP_VERSION, self.status.as_u16(), self.reason).as_bytes(),
        );
        for header in self.headers.iter().filter(|h| !h.is(HeaderName::CONTENT_LENGTH)) {
            buf.put_slice(format!("{}\r\n", header).as_bytes());
        }
        buf.put_slice(format!("{}: {}\r\n\r\n", HeaderName::CONTENT_LENGTH, self.body.len()).as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn invite() -> Request {
        Request::new(Method::Invite, "sip:tonecall@192.0.2.10")
            .with_header("Via", "SIP/2.0/UDP proxy.example.com;branch=z9hG4bK2d4790.1")
            .with_header("Via", "SIP/2.0/UDP 192.0.2.20:5060;branch=z9hG4bK74bf9;received=192.0.2.20")
            .with_header("Max-Forwards", "69")
            .with_header("From", "Alice <sip:alice@example.com>;tag=9fxced76sl")
            .with_header("To", "<sip:tonecall@192.0.2.10>")
            .with_header("Call-ID", "3848276298220188511@192.0.2.20")
            .with_header("CSeq", "1 INVITE")
    }

    #[test]
    fn test_from_request_copies_transaction_headers() {
        let response = Response::from_request(&invite(), StatusCode::Trying);
        let names: Vec<&str> = response.headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Via", "Via", "From", "To", "Call-ID", "CSeq"]);
        assert_eq!(response.headers[1].value, "SIP/2.0/UDP 192.0.2.20:5060;branch=z9hG4bK74bf9;received=192.0.2.20");
        assert!(response.header("Max-Forwards").is_none());
    }

    #[test]
    fn test_to_tag_is_added_once() {
        let response = Response::from_request(&invite(), StatusCode::Ringing)
            .with_to_tag("3f2a9c01")
            .with_to_tag("ignored");
        assert_eq!(response.header("To"), Some("<sip:tonecall@192.0.2.10>;tag=3f2a9c01"));
    }

    #[test]
    fn test_serialization_with_body() {
        let response = Response::from_request(&invite(), StatusCode::Ok)
            .with_body("application/sdp", "v=0\r\n");
        let text = String::from_utf8(response.to_bytes().to_vec()).unwrap();
        assert!(text.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(text.contains("Content-Type: application/sdp\r\n"));
        assert!(text.ends_with("Content-Length: 5\r\n\r\nv=0\r\n"));
    }
}

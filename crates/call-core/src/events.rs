//! Events delivered to call sessions and the response path back out
//!
//! The transaction layer is reached only through [`ResponseSender`], so the
//! call logic can be driven by a real UDP stack or by a recording double in
//! tests.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tonecall_sip_core::{Header, Method, Request, Response, StatusCode};

use crate::error::SendError;

/// Handle to the server transaction a request arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTxRef {
    /// Via branch of the transaction
    pub branch: String,
    pub method: Method,
    /// Where the request came from and where responses go
    pub source: SocketAddr,
    pub request: Arc<Request>,
}

impl ServerTxRef {
    pub fn new(branch: impl Into<String>, request: Request, source: SocketAddr) -> Self {
        Self {
            branch: branch.into(),
            method: request.method.clone(),
            source,
            request: Arc::new(request),
        }
    }
}

impl fmt::Display for ServerTxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} from {}", self.branch, self.method, self.source)
    }
}

/// Message body with its content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: String,
    pub content: Bytes,
}

/// A response the session wants sent on a server transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
    pub status: StatusCode,
    pub to_tag: Option<String>,
    pub headers: Vec<Header>,
    pub body: Option<Body>,
}

impl OutgoingResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            to_tag: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to_tag = Some(tag.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.body = Some(Body {
            content_type: content_type.into(),
            content: content.into(),
        });
        self
    }

    /// Build the wire response for `request`.
    pub fn into_response(self, request: &Request) -> Response {
        let mut response = Response::from_request(request, self.status);
        if let Some(tag) = &self.to_tag {
            response = response.with_to_tag(tag);
        }
        response.headers.extend(self.headers);
        if let Some(body) = self.body {
            response = response.with_body(&body.content_type, body.content);
        }
        response
    }
}

/// Sends responses through the transaction layer
#[async_trait]
pub trait ResponseSender: Send + Sync + 'static {
    async fn respond(&self, tx: &ServerTxRef, response: OutgoingResponse) -> Result<(), SendError>;
}

/// Input to a call session
#[derive(Debug, Clone)]
pub enum CallEvent {
    Invite(ServerTxRef),
    Ack(ServerTxRef),
    Bye(ServerTxRef),
    Cancel(ServerTxRef),
    /// The registry is shutting down
    Shutdown,
}

impl CallEvent {
    /// Wrap a request in the matching event; `None` for methods sessions do not handle.
    pub fn from_tx(tx: ServerTxRef) -> Option<Self> {
        match tx.method {
            Method::Invite => Some(CallEvent::Invite(tx)),
            Method::Ack => Some(CallEvent::Ack(tx)),
            Method::Bye => Some(CallEvent::Bye(tx)),
            Method::Cancel => Some(CallEvent::Cancel(tx)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::Invite(_) => "INVITE",
            CallEvent::Ack(_) => "ACK",
            CallEvent::Bye(_) => "BYE",
            CallEvent::Cancel(_) => "CANCEL",
            CallEvent::Shutdown => "shutdown",
        }
    }

    pub fn tx(&self) -> Option<&ServerTxRef> {
        match self {
            CallEvent::Invite(tx) | CallEvent::Ack(tx) | CallEvent::Bye(tx) | CallEvent::Cancel(tx) => Some(tx),
            CallEvent::Shutdown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Request {
        Request::new(Method::Invite, "sip:tonecall@192.0.2.10")
            .with_header("Via", "SIP/2.0/UDP 192.0.2.20;branch=z9hG4bK1")
            .with_header("From", "<sip:alice@192.0.2.20>;tag=r1")
            .with_header("To", "<sip:tonecall@192.0.2.10>")
            .with_header("Call-ID", "c1")
            .with_header("CSeq", "1 INVITE")
    }

    #[test]
    fn test_into_response() {
        let response = OutgoingResponse::new(StatusCode::Ok)
            .with_to_tag("l1")
            .with_header("Contact", "<sip:192.0.2.10:5060>")
            .with_body("application/sdp", "v=0\r\n")
            .into_response(&invite());

        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(response.to_tag(), Some("l1"));
        assert_eq!(response.header("Contact"), Some("<sip:192.0.2.10:5060>"));
        assert_eq!(response.header("Content-Type"), Some("application/sdp"));
        assert_eq!(&response.body[..], b"v=0\r\n");
    }

    #[test]
    fn test_event_from_tx() {
        let source = "192.0.2.20:5060".parse().unwrap();
        let tx = ServerTxRef::new("z9hG4bK1", invite(), source);
        assert!(matches!(CallEvent::from_tx(tx.clone()), Some(CallEvent::Invite(_))));

        let mut options = tx;
        options.method = Method::Options;
        assert!(CallEvent::from_tx(options).is_none());
    }
}

//! # SIP message parser
//!
//! Parses one UDP datagram into a [`Message`]. The start line and header
//! lines are parsed with `nom`; the body is bounded by Content-Length when
//! present and otherwise runs to the end of the datagram (RFC 3261 §18.3).

pub mod request;
pub mod response;
pub mod utils;

use std::str;

use bytes::Bytes;
use nom::multi::many0;
use nom::IResult;

use crate::error::{Error, Result};
use crate::types::header::{find, Header, HeaderName};
use crate::types::request::Request;
use crate::types::response::Response;
use crate::types::status::StatusCode;
use crate::Message;

pub use request::is_token_char;

// Type alias for parser result
pub type ParseResult<'a, O> = IResult<&'a [u8], O>;

fn describe(err: nom::Err<nom::error::Error<&[u8]>>) -> String {
    match err {
        nom::Err::Incomplete(_) => "incomplete input".to_string(),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let preview = &e.input[..e.input.len().min(32)];
            format!("{:?} near {:?}", e.code, String::from_utf8_lossy(preview))
        }
    }
}

/// Parse a datagram as either a request or a response.
pub fn parse_message(input: &[u8]) -> Result<Message> {
    let (head, body) = utils::split_head_body(input)
        .ok_or_else(|| Error::parse("missing empty line after headers"))?;
    let head = utils::unfold_lws(head);

    if head.len() >= 4 && head[..4].eq_ignore_ascii_case(b"SIP/") {
        build_response(&head, body).map(Message::Response)
    } else {
        build_request(&head, body).map(Message::Request)
    }
}

/// Parse a datagram that must be a request.
pub fn parse_request(input: &[u8]) -> Result<Request> {
    match parse_message(input)? {
        Message::Request(request) => Ok(request),
        Message::Response(_) => Err(Error::parse("expected a request, got a response")),
    }
}

/// Parse a datagram that must be a response.
pub fn parse_response(input: &[u8]) -> Result<Response> {
    match parse_message(input)? {
        Message::Response(response) => Ok(response),
        Message::Request(_) => Err(Error::parse("expected a response, got a request")),
    }
}

fn build_request(head: &[u8], body: &[u8]) -> Result<Request> {
    let (rest, (method, uri, version)) = request::request_line(head)
        .map_err(|e| Error::parse(format!("invalid request line: {}", describe(e))))?;
    let headers = parse_headers(rest)?;
    let body = take_body(&headers, body)?;

    let request = Request {
        method,
        uri: str::from_utf8(uri)?.to_string(),
        version: str::from_utf8(version)?.to_string(),
        headers,
        body,
    };
    request.validate()?;
    Ok(request)
}

fn build_response(head: &[u8], body: &[u8]) -> Result<Response> {
    let (rest, (_version, code, reason)) = response::parse_status_line(head)
        .map_err(|e| Error::parse(format!("invalid status line: {}", describe(e))))?;
    let headers = parse_headers(rest)?;
    let body = take_body(&headers, body)?;

    Ok(Response {
        status: StatusCode::from_u16(code)?,
        reason: str::from_utf8(reason)?.trim().to_string(),
        headers,
        body,
    })
}

fn parse_headers(input: &[u8]) -> Result<Vec<Header>> {
    let (rest, lines) = many0(request::header_line)(input)
        .map_err(|e| Error::parse(format!("invalid header: {}", describe(e))))?;
    if !rest.is_empty() {
        let line = rest.split(|&c| c == b'\n').next().unwrap_or(rest);
        return Err(Error::parse(format!(
            "malformed header line: {:?}",
            String::from_utf8_lossy(line).trim_end()
        )));
    }

    lines
        .into_iter()
        .map(|(name, value)| -> Result<Header> {
            Ok(Header::new(
                str::from_utf8(name)?,
                str::from_utf8(value)?.trim_end(),
            ))
        })
        .collect()
}

fn take_body(headers: &[Header], body: &[u8]) -> Result<Bytes> {
    let Some(header) = find(headers, HeaderName::CONTENT_LENGTH) else {
        return Ok(Bytes::copy_from_slice(body));
    };
    let length: usize = header.value.trim().parse().map_err(|_| Error::InvalidHeader {
        name: HeaderName::CONTENT_LENGTH,
        reason: format!("not a number: {:?}", header.value),
    })?;
    if body.len() < length {
        return Err(Error::parse(format!(
            "body is {} bytes but Content-Length is {}",
            body.len(),
            length
        )));
    }
    Ok(Bytes::copy_from_slice(&body[..length]))
}

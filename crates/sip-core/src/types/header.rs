//! SIP header storage and lookup
//!
//! Headers are kept in wire order as plain name/value pairs. Lookup is
//! case-insensitive and understands the RFC 3261 §7.3.3 compact forms, so
//! `i: abc` is found by `Call-ID`.

use std::fmt;

/// Well-known header names used by the UAS.
pub struct HeaderName;

impl HeaderName {
    pub const VIA: &'static str = "Via";
    pub const FROM: &'static str = "From";
    pub const TO: &'static str = "To";
    pub const CALL_ID: &'static str = "Call-ID";
    pub const CSEQ: &'static str = "CSeq";
    pub const CONTACT: &'static str = "Contact";
    pub const CONTENT_TYPE: &'static str = "Content-Type";
    pub const CONTENT_LENGTH: &'static str = "Content-Length";
    pub const MAX_FORWARDS: &'static str = "Max-Forwards";
    pub const ALLOW: &'static str = "Allow";
    pub const ACCEPT: &'static str = "Accept";
    pub const USER_AGENT: &'static str = "User-Agent";
    pub const SERVER: &'static str = "Server";
    pub const EXPIRES: &'static str = "Expires";
}

/// Expand a compact header form to its full name.
fn expand_compact(name: &str) -> &str {
    match name {
        "v" | "V" => HeaderName::VIA,
        "f" | "F" => HeaderName::FROM,
        "t" | "T" => HeaderName::TO,
        "i" | "I" => HeaderName::CALL_ID,
        "m" | "M" => HeaderName::CONTACT,
        "c" | "C" => HeaderName::CONTENT_TYPE,
        "l" | "L" => HeaderName::CONTENT_LENGTH,
        other => other,
    }
}

/// A single header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether this header has the given name, ignoring case and compact forms.
    pub fn is(&self, name: &str) -> bool {
        expand_compact(&self.name).eq_ignore_ascii_case(expand_compact(name))
    }

    /// Value of a `;name=value` parameter of this header.
    pub fn param(&self, name: &str) -> Option<&str> {
        header_param(&self.value, name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Extract a header parameter such as `tag` or `branch`.
///
/// Parameters inside a bracketed URI (`<sip:a@b;transport=udp>`) belong to the
/// URI, not the header, and are skipped. A parameter without a value yields
/// `Some("")`.
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let params = match value.rfind('>') {
        Some(idx) => &value[idx + 1..],
        None => value,
    };

    params.split(';').skip(1).find_map(|param| {
        let mut parts = param.splitn(2, '=');
        let key = parts.next()?.trim();
        if key.eq_ignore_ascii_case(name) {
            Some(parts.next().map(str::trim).unwrap_or(""))
        } else {
            None
        }
    })
}

/// Find the first header called `name`.
pub(crate) fn find<'a>(headers: &'a [Header], name: &str) -> Option<&'a Header> {
    headers.iter().find(|h| h.is(name))
}

//! # SIP Status Codes
//!
//! The response codes a UAS of this size ever emits, as defined in
//! [RFC 3261 Section 21](https://datatracker.ietf.org/doc/html/rfc3261#section-21):
//!
//! - `1xx`: Provisional (100 Trying, 180 Ringing)
//! - `2xx`: Success (200 OK)
//! - `4xx`: Client Error (400, 405, 481, 487)
//! - `5xx`: Server Error (503)
//!
//! Any other code in 100..=699 parses as [`StatusCode::Other`] so that
//! inbound responses can be read and ignored.
//!
//! ## Examples
//!
//! ```rust
//! use tonecall_sip_core::StatusCode;
//!
//! let status = StatusCode::Ok;
//! assert_eq!(status.as_u16(), 200);
//! assert_eq!(status.reason_phrase(), "OK");
//! assert!(status.is_final());
//!
//! assert_eq!(StatusCode::from_u16(487).unwrap(), StatusCode::RequestTerminated);
//! assert_eq!(StatusCode::Ringing.to_string(), "180 Ringing");
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// SIP status codes used by the UAS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 100 Trying
    Trying,
    /// 180 Ringing
    Ringing,
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 481 Call/Transaction Does Not Exist
    CallOrTransactionDoesNotExist,
    /// 487 Request Terminated
    RequestTerminated,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// Any other valid code, only seen on inbound responses
    Other(u16),
}

impl StatusCode {
    /// Numeric value of the status code
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Trying => 100,
            StatusCode::Ringing => 180,
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::CallOrTransactionDoesNotExist => 481,
            StatusCode::RequestTerminated => 487,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::Other(code) => *code,
        }
    }

    /// Look up a status code by its numeric value
    pub fn from_u16(code: u16) -> Result<Self> {
        match code {
            100 => Ok(StatusCode::Trying),
            180 => Ok(StatusCode::Ringing),
            200 => Ok(StatusCode::Ok),
            400 => Ok(StatusCode::BadRequest),
            405 => Ok(StatusCode::MethodNotAllowed),
            481 => Ok(StatusCode::CallOrTransactionDoesNotExist),
            487 => Ok(StatusCode::RequestTerminated),
            503 => Ok(StatusCode::ServiceUnavailable),
            100..=699 => Ok(StatusCode::Other(code)),
            other => Err(Error::InvalidStatusCode(other)),
        }
    }

    /// Default reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Trying => "Trying",
            StatusCode::Ringing => "Ringing",
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::CallOrTransactionDoesNotExist => "Call/Transaction Does Not Exist",
            StatusCode::RequestTerminated => "Request Terminated",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::Other(code) => match code / 100 {
                1 => "Provisional",
                2 => "Success",
                3 => "Redirection",
                4 => "Client Error",
                5 => "Server Error",
                _ => "Global Failure",
            },
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.as_u16() < 200
    }

    /// Any 2xx-6xx response ends the server transaction's proceeding phase.
    pub fn is_final(&self) -> bool {
        !self.is_provisional()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    pub fn is_error(&self) -> bool {
        self.as_u16() >= 400
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

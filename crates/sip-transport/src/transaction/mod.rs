//! # Server transactions
//!
//! A UAS only ever runs server transactions (RFC 3261 §17.2). This module
//! keeps one entry per (Via branch, method) and gives the transaction user
//! the guarantees it relies on:
//!
//! - a retransmitted request is absorbed and answered with the last response
//!   instead of being delivered twice
//! - at most one final response per transaction
//! - a 2xx to INVITE is retransmitted until the matching ACK arrives
//!   (RFC 3261 §13.3.1.4), since no transaction carries it
//!
//! ACK never creates a transaction. An ACK for a 2xx is passed up once; an
//! ACK for a non-2xx final or a retransmitted ACK is absorbed here.

mod layer;

pub use layer::TransactionLayer;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tonecall_sip_core::{Method, Request};

/// SIP timers (RFC 3261 §17.1.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipTimers {
    /// T1: RTT estimate (default 500ms)
    pub t1: Duration,
    /// T2: maximum retransmit interval (default 4s)
    pub t2: Duration,
}

impl Default for SipTimers {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
        }
    }
}

impl SipTimers {
    /// 64·T1: how long a 2xx is retransmitted and a completed transaction kept
    pub fn timer_h(&self) -> Duration {
        self.t1 * 64
    }
}

/// Identifies a server transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method) -> Self {
        Self {
            branch: branch.into(),
            method,
        }
    }

    /// Key for an inbound request.
    ///
    /// Requests from RFC 2543 peers have no branch; their key is built from
    /// Call-ID, From tag and CSeq number instead.
    pub fn from_request(request: &Request) -> Self {
        match request.branch() {
            Some(branch) if !branch.is_empty() => Self::new(branch, request.method.clone()),
            _ => {
                let seq = request.cseq().map(|(seq, _)| seq).unwrap_or_default();
                let branch = format!(
                    "rfc2543-{}-{}-{}",
                    request.call_id().unwrap_or_default(),
                    request.from_tag().unwrap_or_default(),
                    seq
                );
                Self::new(branch, request.method.clone())
            }
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.branch, self.method)
    }
}

/// Events the transaction layer delivers to its user
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A new request (or the first ACK for a 2xx)
    Request {
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    /// A datagram could not be used or the socket reported an error
    TransportError { error: String },

    /// The transport has shut down; no further events follow
    Closed,
}

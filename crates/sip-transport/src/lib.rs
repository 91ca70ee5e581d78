//! SIP transport and server transaction layer for the tonecall UAS
//!
//! Two layers live here:
//!
//! - [`UdpTransport`] owns the socket, runs the receive loop and reports
//!   parsed datagrams as [`TransportEvent`]s.
//! - [`TransactionLayer`] sits on top of any [`Transport`] and implements the
//!   server side of RFC 3261 §17.2 that a UAS needs: retransmission
//!   absorption, duplicate final-response prevention and 2xx retransmission
//!   until the ACK arrives.

pub mod error;
pub mod transaction;
pub mod transport;

pub use error::{Error, Result};
pub use transaction::{SipTimers, TransactionEvent, TransactionKey, TransactionLayer};
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

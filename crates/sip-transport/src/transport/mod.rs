pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tonecall_sip_core::Message;

use crate::error::Result;

/// Events emitted by a transport's receive loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A datagram parsed as a SIP message
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },

    /// A datagram was dropped or the socket reported an error
    Error { error: String },

    /// The receive loop has exited
    Closed,
}

/// Datagram transport used by the transaction layer
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Send serialized bytes to `destination`
    async fn send_bytes(&self, bytes: Bytes, destination: SocketAddr) -> Result<()>;

    /// Stop the receive loop and refuse further sends
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

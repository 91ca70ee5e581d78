//! Wiring between the UDP transaction layer and the session registry

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tonecall_call_core::audio::source_for;
use tonecall_call_core::dialog::generate_tag;
use tonecall_call_core::{CallConfig, OutgoingResponse, RegistryError, ResponseSender, ServerTxRef, SessionRegistry};
use tonecall_sip_core::{HeaderName, Method, Request, StatusCode};
use tonecall_sip_transport::{SipTimers, TransactionEvent, TransactionKey, TransactionLayer, Transport, UdpTransport};

use crate::sender::TransactionSender;

/// A bound UAS: transport, transaction layer and registry
pub struct Server {
    local_addr: SocketAddr,
    layer: TransactionLayer,
    sender: TransactionSender,
    registry: SessionRegistry,
    events: mpsc::Receiver<TransactionEvent>,
}

impl Server {
    /// Bind the SIP socket and start the transaction layer.
    pub async fn bind(addr: SocketAddr, mut config: CallConfig) -> Result<Self> {
        let (transport, transport_events) = UdpTransport::bind(addr, None)
            .await
            .with_context(|| format!("cannot bind SIP socket on {}", addr))?;
        let local_addr = transport.local_addr()?;
        // Port 0 binds an ephemeral port; Contact must carry the real one
        config.sip_port = local_addr.port();

        let audio = source_for(&config.audio).context("audio output unavailable")?;
        let (layer, events) = TransactionLayer::new(Arc::new(transport), transport_events, SipTimers::default());
        let sender = TransactionSender::new(layer.clone());
        let registry = SessionRegistry::new(config, Arc::new(sender.clone()), audio);

        info!("Listening for SIP on udp://{}", local_addr);
        Ok(Self {
            local_addr,
            layer,
            sender,
            registry,
            events,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Serve requests until `shutdown` resolves or the transport closes, then
    /// end every call and close the socket.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(TransactionEvent::Request { key, request, source }) => {
                        self.handle_request(key, request, source).await;
                    }
                    Some(TransactionEvent::TransportError { error }) => {
                        warn!("Transport error: {}", error);
                    }
                    Some(TransactionEvent::Closed) | None => {
                        info!("Transport closed");
                        break;
                    }
                },
            }
        }

        // Sessions may still answer pending INVITEs, so the socket closes last
        self.registry.shutdown().await;
        self.layer.close().await.context("failed to close transport")?;
        info!("Server stopped");
        Ok(())
    }

    async fn handle_request(&self, key: TransactionKey, request: Request, source: SocketAddr) {
        debug!(transaction = %key, "{} from {}", request.method, source);
        let tx = ServerTxRef::new(key.branch, request, source);

        let Err(error) = self.registry.handle_request(tx.clone()).await else {
            return;
        };
        let Some(rejection) = rejection_for(&tx, &error) else {
            return;
        };
        if let Err(e) = self.sender.respond(&tx, rejection).await {
            warn!("Failed to reject {}: {}", tx, e);
        }
    }
}

/// The response that tells the peer why its request was not handled; `None`
/// when nothing should be sent.
fn rejection_for(tx: &ServerTxRef, error: &RegistryError) -> Option<OutgoingResponse> {
    if tx.method == Method::Ack {
        debug!("Dropping ACK: {}", error);
        return None;
    }

    let response = match error {
        e if e.is_unknown_dialog() => {
            warn!("{} for unknown dialog: {}", tx.method, e);
            OutgoingResponse::new(StatusCode::CallOrTransactionDoesNotExist)
        }
        RegistryError::UnsupportedMethod(method) => {
            warn!("Rejecting unsupported method {}", method);
            OutgoingResponse::new(StatusCode::MethodNotAllowed)
                .with_header(HeaderName::ALLOW, Method::allow_header_value())
        }
        RegistryError::ShuttingDown => OutgoingResponse::new(StatusCode::ServiceUnavailable),
        RegistryError::MissingDialogField(field) => {
            warn!("Rejecting {} without {}", tx.method, field);
            OutgoingResponse::new(StatusCode::BadRequest)
        }
        other => {
            warn!("{} from {} not handled: {}", tx.method, tx.source, other);
            return None;
        }
    };
    Some(response.with_to_tag(generate_tag()))
}

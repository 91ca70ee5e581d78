use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use tonecall_sip_core::{Message, Method, Request, Response, StatusCode};

use super::{SipTimers, TransactionEvent, TransactionKey};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

struct ServerTransaction {
    call_id: String,
    cseq: u32,
    source: SocketAddr,
    last_response: Option<Bytes>,
    final_status: Option<StatusCode>,
    last_activity: Instant,
    completed_at: Option<Instant>,
    awaiting_ack: bool,
    retransmit: Option<JoinHandle<()>>,
}

impl ServerTransaction {
    fn new(request: &Request, source: SocketAddr) -> Self {
        Self {
            call_id: request.call_id().unwrap_or_default().to_string(),
            cseq: request.cseq().map(|(seq, _)| seq).unwrap_or_default(),
            source,
            last_response: None,
            final_status: None,
            last_activity: Instant::now(),
            completed_at: None,
            awaiting_ack: false,
            retransmit: None,
        }
    }

    /// Completed transactions live 64·T1 after their final response. The
    /// transaction user may also never answer (a BYE the session ignores, an
    /// INVITE whose session already ended), so unanswered ones live 64·T1
    /// after the last response sent, or after creation.
    fn is_expired(&self, lifetime: Duration) -> bool {
        match self.completed_at {
            Some(at) => at.elapsed() >= lifetime,
            None => self.last_activity.elapsed() >= lifetime,
        }
    }

    fn stop_retransmit(&mut self) {
        if let Some(handle) = self.retransmit.take() {
            handle.abort();
        }
    }
}

enum AckOutcome {
    /// First ACK for a 2xx; the transaction user needs it
    Forward,
    /// ACK for a non-2xx final, or a repeat of an ACK already forwarded
    Absorb,
    /// No INVITE matches; let the transaction user decide
    Unmatched,
}

/// Server transaction table on top of a [`Transport`]
#[derive(Clone)]
pub struct TransactionLayer {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    transactions: DashMap<TransactionKey, ServerTransaction>,
    timers: SipTimers,
    events_tx: mpsc::Sender<TransactionEvent>,
}

impl TransactionLayer {
    /// Start the layer on top of `transport`, consuming its event stream.
    ///
    /// Returns the layer handle and the stream of [`TransactionEvent`]s for
    /// the transaction user.
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        timers: SipTimers,
    ) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let layer = TransactionLayer {
            inner: Arc::new(Inner {
                transport,
                transactions: DashMap::new(),
                timers,
                events_tx,
            }),
        };

        layer.spawn_event_loop(transport_events);
        Self::spawn_sweeper(Arc::downgrade(&layer.inner));

        (layer, events_rx)
    }

    pub fn timers(&self) -> SipTimers {
        self.inner.timers
    }

    /// Number of transactions currently held
    pub fn transaction_count(&self) -> usize {
        self.inner.transactions.len()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.transport.local_addr()
    }

    /// Send `response` on the transaction identified by `key`.
    ///
    /// The response becomes the transaction's last response, which is what a
    /// retransmitted request gets back. Anything sent after a final response
    /// is rejected with [`Error::FinalResponseAlreadySent`].
    pub async fn respond(&self, key: &TransactionKey, response: Response) -> Result<()> {
        let status = response.status;
        let bytes = response.to_bytes();

        let destination = {
            let mut tx = self
                .inner
                .transactions
                .get_mut(key)
                .ok_or_else(|| Error::TransactionNotFound(key.clone()))?;

            if let Some(sent) = tx.final_status {
                warn!(
                    transaction = %key,
                    "Refusing {} after final response {}",
                    status, sent
                );
                return Err(Error::FinalResponseAlreadySent(key.clone()));
            }

            let source = tx.source;
            tx.last_response = Some(bytes.clone());
            tx.last_activity = Instant::now();
            if status.is_final() {
                tx.final_status = Some(status);
                tx.completed_at = Some(Instant::now());
                if key.method == Method::Invite && status.is_success() {
                    tx.awaiting_ack = true;
                    tx.retransmit = Some(self.spawn_2xx_retransmit(key.clone(), bytes.clone(), source));
                }
            }
            source
        };

        debug!(transaction = %key, "Sending {} to {}", status, destination);
        self.inner.transport.send_bytes(bytes, destination).await
    }

    /// Close the transport and stop all retransmissions.
    pub async fn close(&self) -> Result<()> {
        for mut tx in self.inner.transactions.iter_mut() {
            tx.stop_retransmit();
        }
        self.inner.transport.close().await
    }

    fn spawn_event_loop(&self, mut transport_events: mpsc::Receiver<TransportEvent>) {
        let layer = self.clone();

        tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                let forwarded = match event {
                    TransportEvent::MessageReceived {
                        message: Message::Request(request),
                        source,
                        ..
                    } => layer.handle_request(request, source).await,
                    TransportEvent::MessageReceived {
                        message: Message::Response(response),
                        source,
                        ..
                    } => {
                        debug!("Ignoring {} response from {}", response.status, source);
                        None
                    }
                    TransportEvent::Error { error } => Some(TransactionEvent::TransportError { error }),
                    TransportEvent::Closed => {
                        let _ = layer.inner.events_tx.send(TransactionEvent::Closed).await;
                        break;
                    }
                };

                if let Some(event) = forwarded {
                    if layer.inner.events_tx.send(event).await.is_err() {
                        error!("Transaction user dropped its event receiver");
                        break;
                    }
                }
            }
            debug!("Transaction event loop terminated");
        });
    }

    // Periodically drop transactions idle or completed for 64·T1
    fn spawn_sweeper(inner: Weak<Inner>) {
        tokio::spawn(async move {
            let period = match inner.upgrade() {
                Some(inner) => inner.timers.t2,
                None => return,
            };
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                if inner.transport.is_closed() {
                    break;
                }
                let removed = sweep(&inner);
                if removed > 0 {
                    trace!("Swept {} expired transactions", removed);
                }
            }
        });
    }

    async fn handle_request(&self, request: Request, source: SocketAddr) -> Option<TransactionEvent> {
        let key = TransactionKey::from_request(&request);

        if request.method == Method::Ack {
            return match self.match_ack(&request) {
                AckOutcome::Forward | AckOutcome::Unmatched => Some(TransactionEvent::Request {
                    key,
                    request,
                    source,
                }),
                AckOutcome::Absorb => {
                    trace!(transaction = %key, "Absorbed ACK");
                    None
                }
            };
        }

        let retransmission = match self.inner.transactions.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().last_response.clone()),
            Entry::Vacant(entry) => {
                entry.insert(ServerTransaction::new(&request, source));
                None
            }
        };

        match retransmission {
            None => Some(TransactionEvent::Request {
                key,
                request,
                source,
            }),
            Some(Some(last)) => {
                debug!(transaction = %key, "Retransmitted request, resending last response");
                if let Err(e) = self.inner.transport.send_bytes(last, source).await {
                    warn!(transaction = %key, "Failed to resend response: {}", e);
                }
                None
            }
            Some(None) => {
                debug!(transaction = %key, "Retransmitted request absorbed");
                None
            }
        }
    }

    fn match_ack(&self, ack: &Request) -> AckOutcome {
        let call_id = ack.call_id().unwrap_or_default();
        let Ok((cseq, _)) = ack.cseq() else {
            return AckOutcome::Unmatched;
        };

        for mut tx in self.inner.transactions.iter_mut() {
            if tx.key().method != Method::Invite || tx.call_id != call_id || tx.cseq != cseq {
                continue;
            }
            return match tx.final_status {
                Some(status) if status.is_success() && tx.awaiting_ack => {
                    tx.awaiting_ack = false;
                    tx.stop_retransmit();
                    AckOutcome::Forward
                }
                Some(_) => AckOutcome::Absorb,
                None => AckOutcome::Unmatched,
            };
        }
        AckOutcome::Unmatched
    }

    fn spawn_2xx_retransmit(&self, key: TransactionKey, bytes: Bytes, destination: SocketAddr) -> JoinHandle<()> {
        let transport = self.inner.transport.clone();
        let timers = self.inner.timers;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut interval = timers.t1;
            loop {
                tokio::time::sleep(interval).await;
                if started.elapsed() >= timers.timer_h() {
                    warn!(transaction = %key, "No ACK for 2xx after {:?}", timers.timer_h());
                    break;
                }
                trace!(transaction = %key, "Retransmitting 2xx to {}", destination);
                if let Err(e) = transport.send_bytes(bytes.clone(), destination).await {
                    warn!(transaction = %key, "2xx retransmission failed: {}", e);
                    break;
                }
                interval = (interval * 2).min(timers.t2);
            }
        })
    }
}

fn sweep(inner: &Inner) -> usize {
    let lifetime = inner.timers.timer_h();
    let before = inner.transactions.len();
    inner.transactions.retain(|key, tx| {
        let expired = tx.is_expired(lifetime);
        if expired {
            tx.stop_retransmit();
            if tx.final_status.is_none() {
                debug!(transaction = %key, "Dropping transaction that was never answered");
            } else {
                trace!(transaction = %key, "Transaction expired");
            }
        }
        !expired
    });
    before.saturating_sub(inner.transactions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Bytes, SocketAddr)>>,
        closed: AtomicBool,
    }

    impl RecordingTransport {
        fn sent_statuses(&self) -> Vec<u16> {
            self.sent
                .lock()
                .iter()
                .map(|(bytes, _)| match tonecall_sip_core::parse_message(bytes) {
                    Ok(Message::Response(response)) => response.status.as_u16(),
                    other => panic!("unexpected message {:?}", other),
                })
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        fn local_addr(&self) -> Result<SocketAddr> {
            Ok("127.0.0.1:5060".parse().unwrap())
        }

        async fn send_bytes(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
            self.sent.lock().push((bytes, destination));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
    }

    struct Harness {
        transport: Arc<RecordingTransport>,
        inject: mpsc::Sender<TransportEvent>,
        layer: TransactionLayer,
        events: mpsc::Receiver<TransactionEvent>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let (inject, transport_events) = mpsc::channel(16);
        let (layer, events) = TransactionLayer::new(transport.clone(), transport_events, SipTimers::default());
        Harness {
            transport,
            inject,
            layer,
            events,
        }
    }

    fn peer() -> SocketAddr {
        "192.0.2.20:5060".parse().unwrap()
    }

    fn request(method: Method, branch: &str, cseq: u32) -> Request {
        Request::new(method.clone(), "sip:tonecall@192.0.2.10")
            .with_header("Via", format!("SIP/2.0/UDP 192.0.2.20:5060;branch={}", branch))
            .with_header("From", "<sip:alice@192.0.2.20>;tag=a1")
            .with_header("To", "<sip:tonecall@192.0.2.10>")
            .with_header("Call-ID", "call-1")
            .with_header("CSeq", format!("{} {}", cseq, method))
    }

    async fn inject(h: &Harness, request: Request) {
        h.inject
            .send(TransportEvent::MessageReceived {
                message: Message::Request(request),
                source: peer(),
                destination: "127.0.0.1:5060".parse().unwrap(),
            })
            .await
            .unwrap();
    }

    async fn next_key(h: &mut Harness) -> TransactionKey {
        match h.events.recv().await {
            Some(TransactionEvent::Request { key, .. }) => key,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmitted_invite_gets_last_response() {
        let mut h = harness();
        let invite = request(Method::Invite, "z9hG4bK1", 1);
        inject(&h, invite.clone()).await;
        let key = next_key(&mut h).await;

        h.layer
            .respond(&key, Response::from_request(&invite, StatusCode::Ringing))
            .await
            .unwrap();
        inject(&h, invite.clone()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.transport.sent_statuses(), vec![180, 180]);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_final_response_is_rejected() {
        let mut h = harness();
        let bye = request(Method::Bye, "z9hG4bK2", 2);
        inject(&h, bye.clone()).await;
        let key = next_key(&mut h).await;

        h.layer.respond(&key, Response::from_request(&bye, StatusCode::Ok)).await.unwrap();
        let second = h.layer.respond(&key, Response::from_request(&bye, StatusCode::Ok)).await;
        assert!(matches!(second, Err(Error::FinalResponseAlreadySent(_))));
        assert_eq!(h.transport.sent_statuses(), vec![200]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_transaction() {
        let h = harness();
        let key = TransactionKey::new("z9hG4bKnope", Method::Bye);
        let result = h
            .layer
            .respond(&key, Response::new(StatusCode::Ok))
            .await;
        assert!(matches!(result, Err(Error::TransactionNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_2xx_retransmitted_until_ack() {
        let mut h = harness();
        let invite = request(Method::Invite, "z9hG4bK3", 1);
        inject(&h, invite.clone()).await;
        let key = next_key(&mut h).await;

        h.layer.respond(&key, Response::from_request(&invite, StatusCode::Ok)).await.unwrap();
        // Retransmissions at 0.5s and 1.5s
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(h.transport.sent_statuses(), vec![200, 200, 200]);

        inject(&h, request(Method::Ack, "z9hG4bK4", 1)).await;
        let ack_key = next_key(&mut h).await;
        assert_eq!(ack_key.method, Method::Ack);

        // A repeated ACK is absorbed and nothing more is sent
        inject(&h, request(Method::Ack, "z9hG4bK4", 1)).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.transport.sent_statuses().len(), 3);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_2xx_retransmission_gives_up_after_timer_h() {
        let mut h = harness();
        let invite = request(Method::Invite, "z9hG4bK5", 1);
        inject(&h, invite.clone()).await;
        let key = next_key(&mut h).await;

        h.layer.respond(&key, Response::from_request(&invite, StatusCode::Ok)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(40)).await;

        // 0.5, 1.5, 3.5, 7.5, then every 4s up to 31.5
        assert_eq!(h.transport.sent_statuses().len(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_for_error_final_is_absorbed() {
        let mut h = harness();
        let invite = request(Method::Invite, "z9hG4bK6", 1);
        inject(&h, invite.clone()).await;
        let key = next_key(&mut h).await;

        h.layer
            .respond(&key, Response::from_request(&invite, StatusCode::RequestTerminated))
            .await
            .unwrap();
        inject(&h, request(Method::Ack, "z9hG4bK6", 1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_transactions_are_swept() {
        let mut h = harness();
        let options = request(Method::Options, "z9hG4bK7", 1);
        inject(&h, options.clone()).await;
        let key = next_key(&mut h).await;
        assert_eq!(h.layer.transaction_count(), 1);

        h.layer.respond(&key, Response::from_request(&options, StatusCode::Ok)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.layer.transaction_count(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.layer.transaction_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_transactions_are_swept() {
        let mut h = harness();
        for n in 0..5 {
            inject(&h, request(Method::Bye, &format!("z9hG4bK-idle{}", n), 2)).await;
            next_key(&mut h).await;
        }
        assert_eq!(h.layer.transaction_count(), 5);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.layer.transaction_count(), 5);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.layer.transaction_count(), 0);
        assert!(h.transport.sent_statuses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisional_response_keeps_invite_alive() {
        let mut h = harness();
        let invite = request(Method::Invite, "z9hG4bK8", 1);
        inject(&h, invite.clone()).await;
        let key = next_key(&mut h).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        h.layer
            .respond(&key, Response::from_request(&invite, StatusCode::Ringing))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.layer.transaction_count(), 1);

        h.layer.respond(&key, Response::from_request(&invite, StatusCode::Ok)).await.unwrap();
        assert_eq!(h.transport.sent_statuses(), vec![180, 200]);
    }
}

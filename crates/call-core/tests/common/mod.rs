//! Shared fixtures for call-core integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use tonecall_call_core::audio::NullSource;
use tonecall_call_core::{
    AudioError, AudioSource, AudioTask, CallConfig, CallState, InboundDialog, OutgoingResponse, ResponseSender,
    SendError, ServerTxRef,
};
use tonecall_sip_core::{Method, Request};

pub const CALLER: &str = "192.0.2.20:5060";

pub fn caller() -> SocketAddr {
    CALLER.parse().unwrap()
}

/// A response handed to the sender, with the request it answers
#[derive(Debug, Clone)]
pub struct Sent {
    pub method: Method,
    pub branch: String,
    pub response: OutgoingResponse,
    /// Value of the snapshot hook at the moment the response was recorded
    pub snapshot: Option<usize>,
}

type SnapshotFn = Box<dyn Fn() -> usize + Send + Sync>;

/// Records every response instead of sending it
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
    fail: AtomicBool,
    changed: Notify,
    snapshot: Mutex<Option<SnapshotFn>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following send fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Evaluate `f` whenever a response is recorded
    pub fn snapshot_with(&self, f: impl Fn() -> usize + Send + Sync + 'static) {
        *self.snapshot.lock() = Some(Box::new(f));
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Status codes sent for requests of `method`, in order
    pub fn statuses(&self, method: Method) -> Vec<u16> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.method == method)
            .map(|s| s.response.status.as_u16())
            .collect()
    }

    pub fn last_for(&self, method: Method) -> Option<OutgoingResponse> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|s| s.method == method)
            .map(|s| s.response.clone())
    }

    /// Wait until at least `count` responses were recorded
    pub async fn wait_for_count(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.sent.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ResponseSender for RecordingSender {
    async fn respond(&self, tx: &ServerTxRef, response: OutgoingResponse) -> Result<(), SendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SendError::Transport("injected send failure".to_string()));
        }
        let snapshot = self.snapshot.lock().as_ref().map(|f| f());
        self.sent.lock().push(Sent {
            method: tx.method.clone(),
            branch: tx.branch.clone(),
            response,
            snapshot,
        });
        self.changed.notify_waiters();
        Ok(())
    }
}

/// Null audio that counts how often playback was started
#[derive(Default)]
pub struct SpyAudio {
    inner: NullSource,
    starts: AtomicUsize,
    last_duration: Mutex<Option<Duration>>,
}

impl SpyAudio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn last_duration(&self) -> Option<Duration> {
        *self.last_duration.lock()
    }
}

impl AudioSource for SpyAudio {
    fn start(&self, duration: Option<Duration>) -> Result<AudioTask, AudioError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_duration.lock() = duration;
        self.inner.start(duration)
    }

    fn name(&self) -> &'static str {
        "spy"
    }
}

/// Audio source whose device never opens
pub struct BrokenAudio;

impl AudioSource for BrokenAudio {
    fn start(&self, _duration: Option<Duration>) -> Result<AudioTask, AudioError> {
        Err(AudioError::StreamOpen("no output device".to_string()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Route session logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tonecall_call_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> CallConfig {
    CallConfig::new()
        .with_public_ip("192.0.2.10".parse().unwrap())
        .with_ring_delay(Duration::from_secs(2))
        .with_call_duration(Duration::from_secs(10))
        .with_linger(Duration::from_secs(32))
}

fn base_request(method: Method, call_id: &str, from_tag: &str, to_tag: Option<&str>, branch: &str, cseq: u32) -> Request {
    let to = match to_tag {
        Some(tag) => format!("<sip:tonecall@192.0.2.10>;tag={}", tag),
        None => "<sip:tonecall@192.0.2.10>".to_string(),
    };
    Request::new(method.clone(), "sip:tonecall@192.0.2.10")
        .with_header("Via", format!("SIP/2.0/UDP {};branch={}", CALLER, branch))
        .with_header("From", format!("<sip:alice@192.0.2.20>;tag={}", from_tag))
        .with_header("To", to)
        .with_header("Call-ID", call_id)
        .with_header("CSeq", format!("{} {}", cseq, method))
        .with_header("Max-Forwards", "70")
}

pub fn invite(call_id: &str, from_tag: &str) -> ServerTxRef {
    let branch = format!("z9hG4bK-inv-{}", call_id);
    let request = base_request(Method::Invite, call_id, from_tag, None, &branch, 1);
    ServerTxRef::new(branch, request, caller())
}

/// CANCEL shares the INVITE's branch and CSeq number
pub fn cancel(call_id: &str, from_tag: &str) -> ServerTxRef {
    let branch = format!("z9hG4bK-inv-{}", call_id);
    let request = base_request(Method::Cancel, call_id, from_tag, None, &branch, 1);
    ServerTxRef::new(branch, request, caller())
}

pub fn ack(call_id: &str, from_tag: &str, to_tag: &str) -> ServerTxRef {
    let branch = format!("z9hG4bK-ack-{}", call_id);
    let request = base_request(Method::Ack, call_id, from_tag, Some(to_tag), &branch, 1);
    ServerTxRef::new(branch, request, caller())
}

pub fn bye(call_id: &str, from_tag: &str, to_tag: &str) -> ServerTxRef {
    let branch = format!("z9hG4bK-bye-{}", call_id);
    let request = base_request(Method::Bye, call_id, from_tag, Some(to_tag), &branch, 2);
    ServerTxRef::new(branch, request, caller())
}

pub fn request(method: Method, call_id: &str) -> ServerTxRef {
    let branch = format!("z9hG4bK-{}-{}", method.as_str().to_lowercase(), call_id);
    let request = base_request(method, call_id, "r1", None, &branch, 1);
    ServerTxRef::new(branch, request, caller())
}

pub fn dialog_of(tx: &ServerTxRef) -> InboundDialog {
    InboundDialog::from_request(&tx.request).unwrap()
}

/// Wait until the watched state reaches `state`
pub async fn wait_for_state(rx: &mut watch::Receiver<CallState>, state: CallState) {
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .unwrap_or_else(|_| panic!("session ended before reaching {}", state));
}


//! Session registry
//!
//! Maps dialogs to running [`CallSession`] tasks. The initial INVITE of a
//! dialog creates the session; every later request for the same Call-ID and
//! From tag is routed to it. Sessions remove themselves when their task ends.
//!
//! Map access is short and never held across an await: the event sender is
//! cloned out of the entry and the send happens after the lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use tonecall_sip_core::{HeaderName, Method, StatusCode};

use crate::audio::AudioSource;
use crate::config::CallConfig;
use crate::dialog::{generate_tag, DialogId, DialogKey, InboundDialog};
use crate::error::RegistryError;
use crate::events::{CallEvent, OutgoingResponse, ResponseSender, ServerTxRef};
use crate::sdp::SDP_CONTENT_TYPE;
use crate::session::{CallSession, CallState, SessionContext};

/// Events queued per session before senders wait
const EVENT_QUEUE_CAPACITY: usize = 32;

struct SessionEntry {
    id: Uuid,
    dialog: DialogId,
    events: mpsc::Sender<CallEvent>,
    state: watch::Receiver<CallState>,
    task: JoinHandle<()>,
}

struct RegistryInner {
    sessions: Arc<DashMap<DialogKey, SessionEntry>>,
    ctx: SessionContext,
    shutting_down: AtomicBool,
}

/// Routes inbound requests to call sessions
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(config: CallConfig, sender: Arc<dyn ResponseSender>, audio: Arc<dyn AudioSource>) -> Self {
        info!(
            "Session registry ready (ring delay {:?}, call duration {:?}, {} audio)",
            config.ring_delay,
            config.call_duration,
            audio.name()
        );
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Arc::new(DashMap::new()),
                ctx: SessionContext::new(config, sender, audio),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &CallConfig {
        &self.inner.ctx.config
    }

    /// Handle one request from the transaction layer.
    ///
    /// REGISTER and OPTIONS are answered directly; dialog methods go to their
    /// session. Errors tell the caller which rejection to send, if any.
    pub async fn handle_request(&self, tx: ServerTxRef) -> Result<(), RegistryError> {
        let method = tx.method.clone();
        match method {
            Method::Register => {
                info!("REGISTER from {}", tx.source);
                self.respond_outside_dialog(&tx, OutgoingResponse::new(StatusCode::Ok))
                    .await
            }
            Method::Options => {
                debug!("OPTIONS from {}", tx.source);
                let response = OutgoingResponse::new(StatusCode::Ok)
                    .with_header(HeaderName::ALLOW, Method::allow_header_value())
                    .with_header(HeaderName::ACCEPT, SDP_CONTENT_TYPE);
                self.respond_outside_dialog(&tx, response).await
            }
            Method::Invite | Method::Ack | Method::Bye | Method::Cancel => {
                let dialog = InboundDialog::from_request(&tx.request)?;
                let event =
                    CallEvent::from_tx(tx).ok_or_else(|| RegistryError::UnsupportedMethod(method.to_string()))?;
                self.dispatch(dialog, event).await.map(|_| ())
            }
            other => Err(RegistryError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Deliver `event` to the session for `dialog`, creating it for an
    /// initial INVITE. Returns the full dialog identity.
    pub async fn dispatch(&self, dialog: InboundDialog, event: CallEvent) -> Result<DialogId, RegistryError> {
        let key = dialog.key();
        let (dialog_id, events) = match &event {
            CallEvent::Invite(_) => {
                let entry = self.inner.sessions.entry(key);
                // Checked under the shard lock: shutdown either sees the new
                // entry or the INVITE sees the flag
                if self.inner.shutting_down.load(Ordering::SeqCst) {
                    return Err(RegistryError::ShuttingDown);
                }
                match entry {
                    Entry::Occupied(entry) => {
                        let session = entry.get();
                        if !dialog.matches(&session.dialog) {
                            return Err(unknown_dialog(&dialog));
                        }
                        (session.dialog.clone(), session.events.clone())
                    }
                    Entry::Vacant(entry) => {
                        // A tagged INVITE for a dialog we do not know is a stale re-INVITE
                        if dialog.local_tag.is_some() {
                            return Err(unknown_dialog(&dialog));
                        }
                        let session = self.spawn_session(entry.key().clone(), &dialog);
                        let routed = (session.dialog.clone(), session.events.clone());
                        entry.insert(session);
                        routed
                    }
                }
            }
            _ => {
                let session = self
                    .inner
                    .sessions
                    .get(&key)
                    .ok_or_else(|| unknown_dialog(&dialog))?;
                if !dialog.matches(&session.dialog) {
                    return Err(unknown_dialog(&dialog));
                }
                (session.dialog.clone(), session.events.clone())
            }
        };

        debug!("Routing {} to {}", event.name(), dialog_id);
        events
            .send(event)
            .await
            .map_err(|_| RegistryError::SessionClosed(dialog_id.clone()))?;
        Ok(dialog_id)
    }

    fn spawn_session(&self, key: DialogKey, dialog: &InboundDialog) -> SessionEntry {
        let id = Uuid::new_v4();
        let dialog_id = DialogId::new(&dialog.call_id, generate_tag(), &dialog.remote_tag);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (session, state) = CallSession::new(id, dialog_id.clone(), self.inner.ctx.clone());

        let sessions = self.inner.sessions.clone();
        let span = info_span!("call", call_id = %dialog_id.call_id, tag = %dialog_id.local_tag);
        let task = tokio::spawn(
            async move {
                session.run(events_rx).await;
                // The key may already belong to a newer session for the same dialog
                if sessions.remove_if(&key, |_, entry| entry.id == id).is_some() {
                    debug!("Session removed from registry");
                }
            }
            .instrument(span),
        );

        info!("New call session {} for {}", id, dialog_id);
        SessionEntry {
            id,
            dialog: dialog_id,
            events: events_tx,
            state,
            task,
        }
    }

    async fn respond_outside_dialog(&self, tx: &ServerTxRef, response: OutgoingResponse) -> Result<(), RegistryError> {
        let response = response.with_to_tag(generate_tag());
        self.inner.ctx.sender.respond(tx, response).await?;
        Ok(())
    }

    /// Current state of the session for a dialog, if one exists
    pub fn state_of(&self, call_id: &str, remote_tag: &str) -> Option<CallState> {
        let key = DialogKey {
            call_id: call_id.to_string(),
            remote_tag: remote_tag.to_string(),
        };
        self.inner.sessions.get(&key).map(|entry| *entry.state.borrow())
    }

    /// Watch state changes of the session for a dialog
    pub fn subscribe(&self, call_id: &str, remote_tag: &str) -> Option<watch::Receiver<CallState>> {
        let key = DialogKey {
            call_id: call_id.to_string(),
            remote_tag: remote_tag.to_string(),
        };
        self.inner.sessions.get(&key).map(|entry| entry.state.clone())
    }

    /// Dialog identity, including the local tag, of a known session
    pub fn dialog_of(&self, call_id: &str, remote_tag: &str) -> Option<DialogId> {
        let key = DialogKey {
            call_id: call_id.to_string(),
            remote_tag: remote_tag.to_string(),
        };
        self.inner.sessions.get(&key).map(|entry| entry.dialog.clone())
    }

    /// Sessions that have not terminated yet
    pub fn active_sessions(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|entry| !entry.state.borrow().is_terminated())
            .count()
    }

    /// Sessions in the registry, including lingering ones
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new calls, end every session and wait for their tasks.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let keys: Vec<DialogKey> = self.inner.sessions.iter().map(|entry| entry.key().clone()).collect();
        info!("Shutting down {} call sessions", keys.len());

        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            let Some((_, entry)) = self.inner.sessions.remove(&key) else {
                continue;
            };
            if entry.events.send(CallEvent::Shutdown).await.is_err() {
                debug!("Session {} already exited", entry.id);
            }
            tasks.push((entry.id, entry.task));
        }

        for (id, task) in tasks {
            if let Err(e) = task.await {
                warn!("Session {} task failed: {}", id, e);
            }
        }
        info!("Session registry shut down");
    }
}

fn unknown_dialog(dialog: &InboundDialog) -> RegistryError {
    RegistryError::UnknownDialog {
        call_id: dialog.call_id.clone(),
        remote_tag: dialog.remote_tag.clone(),
    }
}

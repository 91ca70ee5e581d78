use std::net::SocketAddr;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tonecall_sip_core::{HeaderName, StatusCode};

use super::{CallState, SessionContext};
use crate::audio::{AudioTask, PlaybackReport};
use crate::config::DurationPolicy;
use crate::dialog::DialogId;
use crate::error::{AudioError, SessionError};
use crate::events::{CallEvent, OutgoingResponse, ServerTxRef};
use crate::sdp::SDP_CONTENT_TYPE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Ring,
    AckTimeout,
    CallDuration,
}

#[derive(Debug, Default)]
struct Deadlines {
    ring: Option<Instant>,
    ack: Option<Instant>,
    duration: Option<Instant>,
}

impl Deadlines {
    fn next(&self) -> Option<(Instant, Timer)> {
        [
            self.ring.map(|at| (at, Timer::Ring)),
            self.ack.map(|at| (at, Timer::AckTimeout)),
            self.duration.map(|at| (at, Timer::CallDuration)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(at, _)| *at)
    }

    fn clear(&mut self, timer: Timer) {
        match timer {
            Timer::Ring => self.ring = None,
            Timer::AckTimeout => self.ack = None,
            Timer::CallDuration => self.duration = None,
        }
    }

    fn clear_all(&mut self) {
        *self = Self::default();
    }
}

/// State machine of one inbound call
///
/// Owned by its task; the registry reaches it only through the event channel
/// and observes it through the state watch.
pub struct CallSession {
    id: Uuid,
    dialog: DialogId,
    ctx: SessionContext,
    state: watch::Sender<CallState>,
    remote_addr: Option<SocketAddr>,
    local_media: Option<SocketAddr>,
    invite: Option<ServerTxRef>,
    audio: Option<AudioTask>,
    deadlines: Deadlines,
    created_at: Instant,
}

impl CallSession {
    pub fn new(id: Uuid, dialog: DialogId, ctx: SessionContext) -> (Self, watch::Receiver<CallState>) {
        let (state, state_rx) = watch::channel(CallState::Idle);
        let session = Self {
            id,
            dialog,
            ctx,
            state,
            remote_addr: None,
            local_media: None,
            invite: None,
            audio: None,
            deadlines: Deadlines::default(),
            created_at: Instant::now(),
        };
        (session, state_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dialog(&self) -> &DialogId {
        &self.dialog
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Process events until the call terminates, then absorb late requests
    /// for the linger period.
    pub async fn run(mut self, mut events: mpsc::Receiver<CallEvent>) {
        debug!(session = %self.id, "Call session started for {}", self.dialog);
        let mut channel_closed = false;

        while !self.state().is_terminated() {
            let next_timer = self.deadlines.next();
            let result = tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Event channel closed");
                        channel_closed = true;
                        self.shutdown().await
                    }
                },
                timer = wait_for(next_timer) => self.handle_timer(timer).await,
                outcome = wait_audio(&mut self.audio) => {
                    self.on_audio_finished(outcome);
                    Ok(())
                }
            };

            if let Err(e) = result {
                error!("Call session failed in {}: {}", self.state(), e);
                self.abort().await;
            }
        }

        self.stop_audio().await;
        info!(
            remote = ?self.remote_addr,
            media = ?self.local_media,
            "Call terminated after {:?}",
            self.created_at.elapsed()
        );

        if !channel_closed {
            self.linger(&mut events).await;
        }
    }

    async fn handle_event(&mut self, event: CallEvent) -> Result<(), SessionError> {
        let state = self.state();
        match event {
            CallEvent::Invite(tx) => {
                if state == CallState::Idle {
                    self.on_invite(tx).await
                } else {
                    debug!("Retransmitted INVITE ignored in {}", state);
                    Ok(())
                }
            }
            CallEvent::Cancel(tx) => match state {
                CallState::Trying | CallState::Ringing => self.on_cancel(tx).await,
                CallState::Accepted | CallState::Established => self.on_late_cancel(tx).await,
                _ => {
                    warn!("CANCEL ignored in {}", state);
                    Ok(())
                }
            },
            CallEvent::Ack(_) => {
                if state == CallState::Accepted {
                    self.on_ack()
                } else {
                    debug!("ACK ignored in {}", state);
                    Ok(())
                }
            }
            CallEvent::Bye(tx) => match state {
                CallState::Established | CallState::Accepted => self.on_bye(tx).await,
                _ => {
                    warn!("BYE ignored in {}", state);
                    Ok(())
                }
            },
            CallEvent::Shutdown => self.shutdown().await,
        }
    }

    async fn handle_timer(&mut self, timer: Timer) -> Result<(), SessionError> {
        self.deadlines.clear(timer);
        let state = self.state();
        match (timer, state) {
            (Timer::Ring, CallState::Ringing) => self.on_ring_elapsed().await,
            (Timer::AckTimeout, CallState::Accepted) => {
                warn!("No ACK within {:?}, giving up on the call", self.ctx.config.ack_timeout);
                self.transition(CallState::Terminated)
            }
            (Timer::CallDuration, CallState::Established) => self.on_duration_elapsed().await,
            _ => {
                debug!("Stale {:?} timer in {}", timer, state);
                Ok(())
            }
        }
    }

    async fn on_invite(&mut self, tx: ServerTxRef) -> Result<(), SessionError> {
        info!("Incoming call from {}", tx.source);
        self.remote_addr = Some(tx.source);
        self.invite = Some(tx.clone());

        self.respond(&tx, OutgoingResponse::new(StatusCode::Trying)).await?;
        self.transition(CallState::Trying)?;

        let ringing = OutgoingResponse::new(StatusCode::Ringing).with_to_tag(&self.dialog.local_tag);
        self.respond(&tx, ringing).await?;
        self.transition(CallState::Ringing)?;

        self.deadlines.ring = Some(Instant::now() + self.ctx.config.ring_delay);
        Ok(())
    }

    async fn on_ring_elapsed(&mut self) -> Result<(), SessionError> {
        let Some(invite) = self.invite.clone() else {
            return self.transition(CallState::Terminated);
        };

        let media_ip = self.ctx.config.media_ip();
        let contact = SocketAddr::new(media_ip, self.ctx.config.sip_port);
        let sdp = self.ctx.negotiator.negotiate(media_ip);

        let ok = OutgoingResponse::new(StatusCode::Ok)
            .with_to_tag(&self.dialog.local_tag)
            .with_header(HeaderName::CONTACT, format!("<sip:{}>", contact))
            .with_body(SDP_CONTENT_TYPE, sdp);
        self.respond(&invite, ok).await?;

        let media = SocketAddr::new(media_ip, self.ctx.negotiator.media_port());
        self.local_media = Some(media);
        self.transition(CallState::Accepted)?;
        info!("Call answered, media at {}", media);

        self.deadlines.ack = Some(Instant::now() + self.ctx.config.ack_timeout);
        Ok(())
    }

    fn on_ack(&mut self) -> Result<(), SessionError> {
        self.deadlines.clear(Timer::AckTimeout);
        let duration = self.ctx.config.call_duration;

        match self.ctx.audio.start(Some(duration)) {
            Ok(task) => {
                debug!("Started {} audio for {:?}", self.ctx.audio.name(), duration);
                self.audio = Some(task);
            }
            Err(e) => error!("Audio failed to start, call continues without audio: {}", e),
        }

        self.transition(CallState::Established)?;
        self.deadlines.duration = Some(Instant::now() + duration);
        Ok(())
    }

    async fn on_duration_elapsed(&mut self) -> Result<(), SessionError> {
        self.stop_audio().await;
        match self.ctx.config.duration_policy {
            DurationPolicy::AwaitBye => {
                info!(
                    "Simulated call complete after {:?}, waiting for BYE",
                    self.ctx.config.call_duration
                );
                Ok(())
            }
            DurationPolicy::Terminate => {
                info!(
                    "Simulated call complete after {:?}, terminating",
                    self.ctx.config.call_duration
                );
                self.transition(CallState::Terminated)
            }
        }
    }

    async fn on_bye(&mut self, tx: ServerTxRef) -> Result<(), SessionError> {
        info!("Remote hung up");
        if self.state() == CallState::Established {
            self.transition(CallState::Terminating)?;
        }
        self.stop_audio().await;
        self.respond(&tx, OutgoingResponse::new(StatusCode::Ok).with_to_tag(&self.dialog.local_tag))
            .await?;
        self.transition(CallState::Terminated)
    }

    async fn on_cancel(&mut self, tx: ServerTxRef) -> Result<(), SessionError> {
        info!("Call cancelled before answer");
        self.deadlines.clear(Timer::Ring);
        self.transition(CallState::Terminating)?;

        let tag = self.dialog.local_tag.clone();
        self.respond(&tx, OutgoingResponse::new(StatusCode::Ok).with_to_tag(&tag)).await?;
        if let Some(invite) = self.invite.clone() {
            self.respond(&invite, OutgoingResponse::new(StatusCode::RequestTerminated).with_to_tag(&tag))
                .await?;
        }
        self.transition(CallState::Terminated)
    }

    // The INVITE already has its final response; only the CANCEL is answered
    async fn on_late_cancel(&mut self, tx: ServerTxRef) -> Result<(), SessionError> {
        info!("CANCEL after answer, call continues");
        self.respond(&tx, OutgoingResponse::new(StatusCode::Ok).with_to_tag(&self.dialog.local_tag))
            .await
    }

    async fn shutdown(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_terminated() {
            return Ok(());
        }
        info!("Shutting down call in {}", state);

        if state.is_pending_invite() {
            self.deadlines.clear(Timer::Ring);
            if let Some(invite) = self.invite.clone() {
                let unavailable =
                    OutgoingResponse::new(StatusCode::ServiceUnavailable).with_to_tag(&self.dialog.local_tag);
                if let Err(e) = self.respond(&invite, unavailable).await {
                    warn!("Could not reject pending INVITE: {}", e);
                }
            }
        }
        if state.can_transition_to(CallState::Terminating) {
            self.transition(CallState::Terminating)?;
        }
        self.stop_audio().await;
        self.transition(CallState::Terminated)
    }

    async fn abort(&mut self) {
        self.stop_audio().await;
        if !self.state().is_terminated() {
            self.deadlines.clear_all();
            self.state.send_replace(CallState::Terminated);
        }
    }

    fn on_audio_finished(&mut self, outcome: Result<PlaybackReport, AudioError>) {
        self.audio = None;
        match outcome {
            Ok(report) => debug!("Audio finished after {} frames", report.frames),
            Err(e) => error!("Audio playback failed, call continues without audio: {}", e),
        }
    }

    async fn stop_audio(&mut self) {
        let Some(mut task) = self.audio.take() else {
            return;
        };
        match task.stop().await {
            Some(Ok(report)) => debug!("Audio stopped after {} frames", report.frames),
            Some(Err(e)) => warn!("Audio ended with error: {}", e),
            None => {}
        }
    }

    async fn respond(&self, tx: &ServerTxRef, response: OutgoingResponse) -> Result<(), SessionError> {
        let status = response.status;
        self.ctx.sender.respond(tx, response).await?;
        debug!("Sent {} for {}", status, tx.method);
        Ok(())
    }

    fn transition(&mut self, next: CallState) -> Result<(), SessionError> {
        let current = self.state();
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(SessionError::InvalidTransition { from: current, to: next });
        }
        self.state.send_replace(next);
        debug!("State {} -> {}", current, next);
        if next.is_terminated() {
            self.deadlines.clear_all();
        }
        Ok(())
    }

    async fn linger(&self, events: &mut mpsc::Receiver<CallEvent>) {
        let linger = self.ctx.config.linger;
        if linger.is_zero() {
            return;
        }
        let deadline = tokio::time::sleep(linger);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.recv() => match event {
                    Some(CallEvent::Shutdown) | None => break,
                    Some(event) => debug!("Discarding late {} for terminated call", event.name()),
                },
            }
        }
    }
}

async fn wait_for(next: Option<(Instant, Timer)>) -> Timer {
    match next {
        Some((at, timer)) => {
            tokio::time::sleep_until(at).await;
            timer
        }
        None => std::future::pending().await,
    }
}

async fn wait_audio(audio: &mut Option<AudioTask>) -> Result<PlaybackReport, AudioError> {
    match audio {
        Some(task) => task.wait().await,
        None => std::future::pending().await,
    }
}

//! Audio playback for established calls
//!
//! An [`AudioSource`] is started when the ACK arrives and produces audio until
//! its duration runs out or the session stops it. Playback runs as its own
//! task behind an [`AudioTask`] handle owned by the session:
//!
//! ```text
//! CallSession ──start()──▶ AudioSource ──spawn──▶ playback task ──write()──▶ AudioStream
//!      │                                              ▲
//!      └────────────── AudioTask::stop() ─────────────┘  (flag + wake, then join)
//! ```
//!
//! `stop()` returns only after the playback task has exited, so no frame
//! reaches the sink after it returns.

mod memory;
mod null;
mod sink;
mod tone;

#[cfg(feature = "device-cpal")]
mod cpal_sink;

pub use memory::{FailureMode, MemorySink};
pub use null::NullSource;
pub use sink::{AudioSink, AudioStream, StreamParams};
pub use tone::ToneSource;

#[cfg(feature = "device-cpal")]
pub use cpal_sink::CpalSink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{AudioConfig, AudioMode};
use crate::error::AudioError;

/// Produces audio for one call at a time per [`AudioTask`]
pub trait AudioSource: Send + Sync + 'static {
    /// Begin playback. `None` plays until stopped.
    fn start(&self, duration: Option<Duration>) -> Result<AudioTask, AudioError>;

    fn name(&self) -> &'static str;
}

/// Summary of a finished playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Sample frames delivered to the sink
    pub frames: u64,
    /// Whether playback ended because of `stop()` rather than running out
    pub stopped: bool,
}

/// Cancellation flag shared between an [`AudioTask`] and its playback loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once `stop` was requested, including before this call.
    pub async fn stopped(&self) {
        while !self.is_stopped() {
            self.notify.notified().await;
        }
    }

    fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

type PlaybackHandle = JoinHandle<Result<PlaybackReport, AudioError>>;

/// Owned handle to running playback
///
/// Dropping the handle requests a stop but does not wait for it.
#[derive(Debug)]
pub struct AudioTask {
    signal: StopSignal,
    handle: Option<PlaybackHandle>,
}

impl AudioTask {
    pub fn new(signal: StopSignal, handle: PlaybackHandle) -> Self {
        Self {
            signal,
            handle: Some(handle),
        }
    }

    /// Whether playback is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop playback and wait until the playback task has exited.
    ///
    /// Safe to call repeatedly; only the first call after a run returns the
    /// playback outcome.
    pub async fn stop(&mut self) -> Option<Result<PlaybackReport, AudioError>> {
        self.signal.trigger();
        let handle = self.handle.take()?;
        let outcome = join(handle).await;
        debug!("Audio playback stopped: {:?}", outcome);
        Some(outcome)
    }

    /// Wait for playback to finish on its own. Cancel safe; pends forever once
    /// the outcome has been taken.
    pub async fn wait(&mut self) -> Result<PlaybackReport, AudioError> {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(AudioError::TaskFailed(e.to_string())),
        };
        self.handle = None;
        outcome
    }
}

impl Drop for AudioTask {
    fn drop(&mut self) {
        self.signal.trigger();
    }
}

async fn join(handle: PlaybackHandle) -> Result<PlaybackReport, AudioError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(AudioError::TaskFailed(e.to_string())),
    }
}

/// Build the source configured by `config`.
pub fn source_for(config: &AudioConfig) -> Result<Arc<dyn AudioSource>, AudioError> {
    match config.mode {
        AudioMode::Null => Ok(Arc::new(NullSource::new())),
        AudioMode::Tone => tone_on_device(config),
    }
}

#[cfg(feature = "device-cpal")]
fn tone_on_device(config: &AudioConfig) -> Result<Arc<dyn AudioSource>, AudioError> {
    Ok(Arc::new(ToneSource::new(Arc::new(CpalSink::new()), config)))
}

#[cfg(not(feature = "device-cpal"))]
fn tone_on_device(_config: &AudioConfig) -> Result<Arc<dyn AudioSource>, AudioError> {
    Err(AudioError::Unavailable(
        "tone playback needs the device-cpal feature".to_string(),
    ))
}

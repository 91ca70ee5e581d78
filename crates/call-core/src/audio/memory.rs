use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::sink::{AudioSink, AudioStream, StreamParams};
use crate::error::AudioError;

/// When a [`MemorySink`] stream rejects writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    Never,
    /// Only the write with this index (0-based, counting failed attempts) fails
    Once { at_write: usize },
    /// Every write from this index on fails
    From { at_write: usize },
}

/// Records everything written to it
///
/// Clones share the recording. With pacing enabled each write blocks for the
/// real time its frames represent, like a device would.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    shared: Arc<Recording>,
    pace: bool,
    failure: FailureMode,
    open_delay: Duration,
}

#[derive(Debug, Default)]
struct Recording {
    samples: Mutex<Vec<f32>>,
    write_attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pacing(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    /// Block `open_stream` for `delay`, like a slow device would
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_failure(mut self, failure: FailureMode) -> Self {
        self.failure = failure;
        self
    }

    /// Copy of every sample written so far
    pub fn samples(&self) -> Vec<f32> {
        self.shared.samples.lock().clone()
    }

    pub fn sample_count(&self) -> usize {
        self.shared.samples.lock().len()
    }

    pub fn write_attempts(&self) -> usize {
        self.shared.write_attempts.load(Ordering::SeqCst)
    }

    pub fn streams_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn streams_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl AudioSink for MemorySink {
    fn open_stream(&self, params: StreamParams) -> Result<Box<dyn AudioStream>, AudioError> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStream {
            shared: self.shared.clone(),
            params,
            pace: self.pace,
            failure: self.failure,
            attempts: 0,
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryStream {
    shared: Arc<Recording>,
    params: StreamParams,
    pace: bool,
    failure: FailureMode,
    attempts: usize,
    closed: bool,
}

impl AudioStream for MemoryStream {
    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        if self.closed {
            return Err(AudioError::Device("stream is closed".to_string()));
        }
        let index = self.attempts;
        self.attempts += 1;
        self.shared.write_attempts.fetch_add(1, Ordering::SeqCst);

        let fail = match self.failure {
            FailureMode::Never => false,
            FailureMode::Once { at_write } => index == at_write,
            FailureMode::From { at_write } => index >= at_write,
        };
        if fail {
            return Err(AudioError::Device(format!("injected failure on write {}", index)));
        }

        if self.pace {
            let frames = samples.len() / self.params.channels.max(1) as usize;
            std::thread::sleep(Duration::from_secs_f64(
                frames as f64 / self.params.sample_rate as f64,
            ));
        }
        self.shared.samples.lock().extend_from_slice(samples);
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if !self.closed {
            self.closed = true;
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

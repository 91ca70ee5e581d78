use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use super::{AudioSource, AudioTask, PlaybackReport, StopSignal};
use crate::error::AudioError;

/// Simulated playback for headless deployments
///
/// Nothing is written anywhere; the task only models elapsed call time.
#[derive(Debug, Clone, Default)]
pub struct NullSource;

impl NullSource {
    pub fn new() -> Self {
        Self
    }
}

impl AudioSource for NullSource {
    fn start(&self, duration: Option<Duration>) -> Result<AudioTask, AudioError> {
        let signal = StopSignal::new();
        let stop = signal.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let stopped = match duration {
                Some(duration) => tokio::select! {
                    _ = tokio::time::sleep(duration) => false,
                    _ = stop.stopped() => true,
                },
                None => {
                    stop.stopped().await;
                    true
                }
            };
            info!(
                "Simulated playback {} after {:?}",
                if stopped { "stopped" } else { "completed" },
                started.elapsed()
            );
            Ok(PlaybackReport { frames: 0, stopped })
        });

        Ok(AudioTask::new(signal, handle))
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

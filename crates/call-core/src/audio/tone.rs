use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::sink::{AudioSink, AudioStream, StreamParams};
use super::{AudioSource, AudioTask, PlaybackReport, StopSignal};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Pause before the single retry of a rejected write
pub const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Sine tone written to an [`AudioSink`]
#[derive(Clone)]
pub struct ToneSource {
    sink: Arc<dyn AudioSink>,
    params: StreamParams,
    frequency: f32,
    amplitude: f32,
}

impl ToneSource {
    pub fn new(sink: Arc<dyn AudioSink>, config: &AudioConfig) -> Self {
        Self {
            sink,
            params: StreamParams::from(config),
            frequency: config.frequency,
            amplitude: config.amplitude,
        }
    }

    pub fn params(&self) -> StreamParams {
        self.params
    }
}

impl AudioSource for ToneSource {
    /// Opening the device can block, so it happens on the playback thread
    /// together with the writes. An open failure is the task's outcome.
    fn start(&self, duration: Option<Duration>) -> Result<AudioTask, AudioError> {
        let sink = self.sink.clone();
        let params = self.params;
        let total_frames = duration.map(|d| (d.as_secs_f64() * params.sample_rate as f64).round() as u64);
        let mut generator = SineGenerator::new(self.frequency, self.amplitude, params.sample_rate);

        info!(
            "Starting {} Hz tone on {} ({} Hz, {} channels, {:?})",
            self.frequency,
            self.sink.name(),
            params.sample_rate,
            params.channels,
            duration
        );

        let signal = StopSignal::new();
        let stop = signal.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut stream = sink.open_stream(params).map_err(|e| {
                error!("Could not open audio output on {}: {}", sink.name(), e);
                e
            })?;
            let result = play(stream.as_mut(), &mut generator, params, total_frames, &stop);
            if let Err(e) = stream.close() {
                warn!("Failed to close audio stream: {}", e);
            }
            result
        });

        Ok(AudioTask::new(signal, handle))
    }

    fn name(&self) -> &'static str {
        "tone"
    }
}

fn play(
    stream: &mut dyn AudioStream,
    generator: &mut SineGenerator,
    params: StreamParams,
    total_frames: Option<u64>,
    stop: &StopSignal,
) -> Result<PlaybackReport, AudioError> {
    let channels = params.channels as usize;
    let mut buf = vec![0.0f32; params.samples_per_write()];
    let mut written: u64 = 0;

    let stopped = loop {
        if stop.is_stopped() {
            break true;
        }
        let frames = match total_frames {
            Some(total) if written >= total => break false,
            Some(total) => (total - written).min(params.frame_size as u64) as usize,
            None => params.frame_size,
        };

        let chunk = &mut buf[..frames * channels];
        generator.fill_interleaved(chunk, channels);
        if let Err(e) = write_with_retry(stream, chunk) {
            error!("Audio playback aborted after {} frames: {}", written, e);
            return Err(e);
        }
        written += frames as u64;
    };

    info!("Tone playback {} after {} frames", if stopped { "stopped" } else { "completed" }, written);
    Ok(PlaybackReport {
        frames: written,
        stopped,
    })
}

// One retry after a short backoff; a second failure is terminal
fn write_with_retry(stream: &mut dyn AudioStream, samples: &[f32]) -> Result<(), AudioError> {
    match stream.write(samples) {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!("Audio write failed, retrying in {:?}: {}", WRITE_RETRY_BACKOFF, first);
            std::thread::sleep(WRITE_RETRY_BACKOFF);
            stream
                .write(samples)
                .map_err(|e| AudioError::Device(format!("write failed after retry: {}", e)))
        }
    }
}

/// Phase-continuous sine oscillator
#[derive(Debug, Clone)]
struct SineGenerator {
    phase: f64,
    step: f64,
    amplitude: f32,
}

impl SineGenerator {
    fn new(frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: frequency as f64 / sample_rate as f64,
            amplitude,
        }
    }

    fn next_sample(&mut self) -> f32 {
        let value = self.amplitude * (TAU * self.phase).sin() as f32;
        self.phase = (self.phase + self.step).fract();
        value
    }

    /// Fill `buf` with frames of `channels` identical samples
    fn fill_interleaved(&mut self, buf: &mut [f32], channels: usize) {
        for frame in buf.chunks_mut(channels) {
            let value = self.next_sample();
            frame.fill(value);
        }
    }
}

//! Default output device via CPAL
//!
//! CPAL streams are not `Send`, so each open stream lives on a dedicated
//! thread that builds it, plays it and drops it on shutdown. Samples reach the
//! device callback through a bounded buffer; `write` blocks while the buffer is
//! full, which paces playback to the device clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use super::sink::{AudioSink, AudioStream, StreamParams};
use crate::error::AudioError;

// How many writes' worth of samples may be queued ahead of the device
const BUFFERED_WRITES: usize = 4;

// A write that cannot make progress for this long means the device is gone
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Plays on the host's default output device
#[derive(Debug, Clone, Default)]
pub struct CpalSink;

impl CpalSink {
    pub fn new() -> Self {
        Self
    }
}

struct Shared {
    buffer: Mutex<VecDeque<f32>>,
    space: Condvar,
    failed: AtomicBool,
}

impl AudioSink for CpalSink {
    fn open_stream(&self, params: StreamParams) -> Result<Box<dyn AudioStream>, AudioError> {
        let capacity = params.samples_per_write() * BUFFERED_WRITES;
        let shared = Arc::new(Shared {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Condvar::new(),
            failed: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = mpsc::channel::<Result<String, AudioError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let callback_shared = shared.clone();

        let thread = std::thread::Builder::new()
            .name("tonecall-cpal".to_string())
            .spawn(move || {
                let stream = match build_stream(params, callback_shared) {
                    Ok((stream, device_name)) => {
                        let _ = ready_tx.send(Ok(device_name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until the writer side closes or drops the stream
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::StreamOpen(format!("failed to spawn audio thread: {}", e)))?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamOpen("audio thread exited during setup".to_string()))??;
        info!("Opened audio output on {}", device_name);

        Ok(Box::new(CpalStream {
            shared,
            capacity,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

fn build_stream(params: StreamParams, shared: Arc<Shared>) -> Result<(cpal::Stream, String), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::StreamOpen("no default output device".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "unknown device".to_string());

    let config = cpal::StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let error_shared = shared.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut buffer = shared.buffer.lock();
                let available = buffer.len().min(data.len());
                for (out, sample) in data.iter_mut().zip(buffer.drain(..available)) {
                    *out = sample;
                }
                // Underrun: pad with silence
                data[available..].fill(0.0);
                drop(buffer);
                shared.space.notify_all();
            },
            move |err| {
                error!("Audio output error: {}", err);
                error_shared.failed.store(true, Ordering::Release);
                error_shared.space.notify_all();
            },
            None,
        )
        .map_err(|e| AudioError::StreamOpen(format!("failed to build output stream on {}: {}", device_name, e)))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamOpen(format!("failed to start output stream: {}", e)))?;
    Ok((stream, device_name))
}

struct CpalStream {
    shared: Arc<Shared>,
    capacity: usize,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioStream for CpalStream {
    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        let mut buffer = self.shared.buffer.lock();
        while buffer.len() + samples.len() > self.capacity.max(samples.len()) {
            if self.shared.failed.load(Ordering::Acquire) {
                return Err(AudioError::Device("output stream reported an error".to_string()));
            }
            if self.shared.space.wait_for(&mut buffer, STALL_TIMEOUT).timed_out() {
                return Err(AudioError::Device("output device stopped consuming audio".to_string()));
            }
        }
        if self.shared.failed.load(Ordering::Acquire) {
            return Err(AudioError::Device("output stream reported an error".to_string()));
        }
        buffer.extend(samples.iter().copied());
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| AudioError::Device("audio thread panicked".to_string()))?;
        }
        self.shared.buffer.lock().clear();
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

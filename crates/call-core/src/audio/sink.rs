use crate::config::AudioConfig;
use crate::error::AudioError;

/// Output stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample frames per write
    pub frame_size: usize,
}

impl StreamParams {
    /// Interleaved samples in one full write
    pub fn samples_per_write(&self) -> usize {
        self.frame_size * self.channels as usize
    }
}

impl From<&AudioConfig> for StreamParams {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
        }
    }
}

/// An audio output that can open playback streams
///
/// Streams are opened and written from a blocking thread; `open_stream` may
/// take as long as the device needs, and `write` may block until the device
/// has room.
pub trait AudioSink: Send + Sync + 'static {
    fn open_stream(&self, params: StreamParams) -> Result<Box<dyn AudioStream>, AudioError>;

    fn name(&self) -> &str;
}

/// One open playback stream
pub trait AudioStream: Send {
    /// Write interleaved f32 samples
    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError>;

    fn close(&mut self) -> Result<(), AudioError>;
}

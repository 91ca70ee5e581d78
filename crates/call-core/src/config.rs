//! Call handling configuration
//!
//! [`CallConfig`] is resolved once at startup: YAML file first, then the
//! `PUBLIC_IP` environment variable, then command line overrides, and finally
//! public IP auto-detection. The resolved value is passed into the registry and
//! shared read-only by every session.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Environment variable holding the address advertised in Contact and SDP
pub const PUBLIC_IP_ENV: &str = "PUBLIC_IP";

/// Default SIP listen port
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Default RTP port advertised in the SDP answer
pub const DEFAULT_MEDIA_PORT: u16 = 20000;

/// Upper bound on the ring delay, 64·T1 with the default T1 of 500ms
pub const MAX_RING_DELAY: Duration = Duration::from_secs(32);

/// What happens when the call-duration timer fires before the peer hangs up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DurationPolicy {
    /// Stop audio, log the call as complete and keep the dialog until BYE
    #[default]
    AwaitBye,
    /// Stop audio and terminate the session locally without signalling
    Terminate,
}

impl FromStr for DurationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "await-bye" => Ok(DurationPolicy::AwaitBye),
            "terminate" => Ok(DurationPolicy::Terminate),
            other => Err(ConfigError::Invalid(format!(
                "unknown duration policy {:?} (expected await-bye or terminate)",
                other
            ))),
        }
    }
}

/// Which audio source plays during an established call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Simulated playback, no device needed
    #[default]
    Null,
    /// 440 Hz tone on the output device
    Tone,
}

impl FromStr for AudioMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "null" => Ok(AudioMode::Null),
            "tone" => Ok(AudioMode::Tone),
            other => Err(ConfigError::Invalid(format!(
                "unknown audio mode {:?} (expected null or tone)",
                other
            ))),
        }
    }
}

/// Audio playback parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub mode: AudioMode,
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample frames per write
    pub frame_size: usize,
    pub frequency: f32,
    /// Fraction of full scale
    pub amplitude: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mode: AudioMode::Null,
            sample_rate: 44_100,
            channels: 2,
            frame_size: 512,
            frequency: 440.0,
            amplitude: 0.3,
        }
    }
}

/// Configuration shared by the registry and every call session
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Address advertised in Contact and SDP; resolved at startup when unset
    pub public_ip: Option<IpAddr>,
    pub sip_port: u16,
    pub media_port: u16,
    #[serde(with = "seconds")]
    pub ring_delay: Duration,
    /// How long an accepted call waits for the ACK
    #[serde(with = "seconds")]
    pub ack_timeout: Duration,
    #[serde(with = "seconds")]
    pub call_duration: Duration,
    pub duration_policy: DurationPolicy,
    /// How long a terminated session keeps absorbing late requests
    #[serde(with = "seconds")]
    pub linger: Duration,
    pub audio: AudioConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            public_ip: None,
            sip_port: DEFAULT_SIP_PORT,
            media_port: DEFAULT_MEDIA_PORT,
            ring_delay: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(32),
            call_duration: Duration::from_secs(10),
            duration_policy: DurationPolicy::AwaitBye,
            linger: Duration::from_secs(32),
            audio: AudioConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document; missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&text)
    }

    /// Apply `PUBLIC_IP` from the environment when it is set.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var(PUBLIC_IP_ENV) {
            let value = value.trim();
            if !value.is_empty() {
                let ip = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidPublicIp(value.to_string()))?;
                info!("Using {} from environment: {}", PUBLIC_IP_ENV, ip);
                self.public_ip = Some(ip);
            }
        }
        Ok(self)
    }

    /// Fill in the public IP from interface detection if nothing set it.
    pub fn resolve_public_ip(mut self) -> Self {
        if self.public_ip.is_none() {
            let ip = detect_local_ip();
            info!("Detected public IP {}", ip);
            self.public_ip = Some(ip);
        }
        self
    }

    pub fn with_public_ip(mut self, ip: IpAddr) -> Self {
        self.public_ip = Some(ip);
        self
    }

    pub fn with_sip_port(mut self, port: u16) -> Self {
        self.sip_port = port;
        self
    }

    pub fn with_ring_delay(mut self, delay: Duration) -> Self {
        self.ring_delay = delay;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_call_duration(mut self, duration: Duration) -> Self {
        self.call_duration = duration;
        self
    }

    pub fn with_duration_policy(mut self, policy: DurationPolicy) -> Self {
        self.duration_policy = policy;
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_audio_mode(mut self, mode: AudioMode) -> Self {
        self.audio.mode = mode;
        self
    }

    /// Headless deployments answer immediately and never touch an audio device.
    pub fn with_headless(mut self) -> Self {
        self.ring_delay = Duration::ZERO;
        self.audio.mode = AudioMode::Null;
        self
    }

    /// Address used in Contact and SDP
    pub fn media_ip(&self) -> IpAddr {
        self.public_ip.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be positive".into()));
        }
        if audio.channels == 0 {
            return Err(ConfigError::Invalid("audio.channels must be positive".into()));
        }
        if audio.frame_size == 0 {
            return Err(ConfigError::Invalid("audio.frame_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&audio.amplitude) {
            return Err(ConfigError::Invalid(format!(
                "audio.amplitude must be within 0.0..=1.0, got {}",
                audio.amplitude
            )));
        }
        // The server transaction of an unanswered INVITE lives 64·T1
        if self.ring_delay >= MAX_RING_DELAY {
            return Err(ConfigError::Invalid(format!(
                "ring_delay must be below {:?}, got {:?}",
                MAX_RING_DELAY, self.ring_delay
            )));
        }
        if self.call_duration.is_zero() {
            return Err(ConfigError::Invalid("call_duration must be positive".into()));
        }
        Ok(())
    }
}

/// First non-loopback IPv4 address of this host, or 127.0.0.1.
pub fn detect_local_ip() -> IpAddr {
    match local_ip_address::local_ip() {
        Ok(ip) if !ip.is_loopback() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            warn!("Could not detect a local IP address, falling back to 127.0.0.1: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

// Durations in YAML are written as (fractional) seconds
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

//! Command line arguments

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use tonecall_call_core::{AudioMode, CallConfig, DurationPolicy};

#[derive(Parser, Debug)]
#[command(name = "tonecall")]
#[command(version, about = "Minimal SIP UAS: answers every call and plays a tone")]
pub struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// UDP address to listen on [default: 0.0.0.0 on the configured SIP port]
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Address advertised in Contact and SDP (overrides PUBLIC_IP)
    #[arg(long)]
    pub public_ip: Option<IpAddr>,

    /// Answer immediately and simulate audio
    #[arg(long, conflicts_with = "ring_delay")]
    pub headless: bool,

    /// Seconds between 180 Ringing and 200 OK
    #[arg(long, value_parser = parse_seconds)]
    pub ring_delay: Option<Duration>,

    /// Seconds of audio played after the ACK
    #[arg(long, value_parser = parse_seconds)]
    pub call_duration: Option<Duration>,

    /// What to do when the call duration runs out (await-bye, terminate)
    #[arg(long)]
    pub duration_policy: Option<DurationPolicy>,

    /// Audio source (null, tone)
    #[arg(long)]
    pub audio: Option<AudioMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl Args {
    /// Resolve the call configuration: file, then environment, then flags.
    pub fn call_config(&self) -> Result<CallConfig> {
        let mut config = match &self.config {
            Some(path) => CallConfig::from_yaml_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => CallConfig::default(),
        };
        config = config.apply_env().context("invalid environment")?;

        if let Some(bind) = self.bind {
            config = config.with_sip_port(bind.port());
        }
        if let Some(ip) = self.public_ip {
            config = config.with_public_ip(ip);
        }
        if let Some(delay) = self.ring_delay {
            config = config.with_ring_delay(delay);
        }
        if let Some(duration) = self.call_duration {
            config = config.with_call_duration(duration);
        }
        if let Some(policy) = self.duration_policy {
            config = config.with_duration_policy(policy);
        }
        if let Some(mode) = self.audio {
            config = config.with_audio_mode(mode);
        }
        if self.headless {
            config = config.with_headless();
        }

        let config = config.resolve_public_ip();
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Listen address, defaulting to all interfaces on the configured port
    pub fn bind_addr(&self, config: &CallConfig) -> SocketAddr {
        self.bind
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.sip_port))
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|_| format!("{:?} is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {:?}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "tonecall",
            "--bind",
            "127.0.0.1:5080",
            "--public-ip",
            "192.0.2.7",
            "--ring-delay",
            "0.25",
            "--duration-policy",
            "terminate",
        ]);
        let config = args.call_config().unwrap();
        assert_eq!(config.sip_port, 5080);
        assert_eq!(config.media_ip(), "192.0.2.7".parse::<IpAddr>().unwrap());
        assert_eq!(config.ring_delay, Duration::from_millis(250));
        assert_eq!(config.duration_policy, DurationPolicy::Terminate);
        assert_eq!(args.bind_addr(&config), "127.0.0.1:5080".parse().unwrap());
    }

    #[test]
    fn test_headless_conflicts_with_ring_delay() {
        assert!(Args::try_parse_from(["tonecall", "--headless", "--ring-delay", "1"]).is_err());

        let args = Args::parse_from(["tonecall", "--headless", "--public-ip", "192.0.2.7"]);
        let config = args.call_config().unwrap();
        assert_eq!(config.ring_delay, Duration::ZERO);
        assert_eq!(config.audio.mode, AudioMode::Null);
        assert_eq!(args.bind_addr(&config), "0.0.0.0:5060".parse().unwrap());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Args::try_parse_from(["tonecall", "--call-duration", "soon"]).is_err());
        assert!(Args::try_parse_from(["tonecall", "--audio", "loud"]).is_err());
    }
}

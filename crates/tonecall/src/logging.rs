//! Log output setup

use std::str::FromStr;

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// How log lines are produced
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub json: bool,
}

impl LoggingConfig {
    pub fn new(level: &str, json: bool) -> Result<Self> {
        let level = Level::from_str(level).map_err(|_| anyhow!("invalid log level: {}", level))?;
        Ok(Self { level, json })
    }
}

/// Install the global subscriber. `RUST_LOG` directives take precedence over
/// the configured level.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(config.level.into()));
    let builder = fmt::Subscriber::builder().with_env_filter(filter).with_target(false);

    let installed = if config.json {
        builder.json().with_writer(std::io::stdout).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}

//! Call sessions
//!
//! Each inbound call runs as one tokio task that owns its state machine,
//! timers and audio playback. Events reach it through a channel from the
//! registry, so one call's events are applied strictly in order while
//! different calls run in parallel.

mod call;
mod state;

pub use call::CallSession;
pub use state::CallState;

use std::sync::Arc;

use crate::audio::AudioSource;
use crate::config::CallConfig;
use crate::events::ResponseSender;
use crate::sdp::SdpNegotiator;

/// Collaborators shared by every session of a registry
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<CallConfig>,
    pub sender: Arc<dyn ResponseSender>,
    pub audio: Arc<dyn AudioSource>,
    pub negotiator: SdpNegotiator,
}

impl SessionContext {
    pub fn new(config: CallConfig, sender: Arc<dyn ResponseSender>, audio: Arc<dyn AudioSource>) -> Self {
        let negotiator = SdpNegotiator::new(config.media_port);
        Self {
            config: Arc::new(config),
            sender,
            audio,
            negotiator,
        }
    }
}

//! # tonecall-call-core
//!
//! Call handling for the tonecall user agent server: per-call state machines,
//! the session registry that routes requests to them, the SDP answer and the
//! audio played during an established call.
//!
//! The crate does not touch the network. Responses leave through a
//! [`ResponseSender`] supplied by the caller, which the binary backs with the
//! UDP transaction layer and tests back with a recording double.
//!
//! ## Call flow
//!
//! ```text
//! INVITE ──▶ 100 Trying ──▶ 180 Ringing ── ring delay ──▶ 200 OK + SDP
//!                                                            │
//!                                  ACK ──▶ audio for call_duration
//!                                                            │
//!                                  BYE ──▶ stop audio ──▶ 200 OK
//! ```
//!
//! A CANCEL before the 200 OK is answered with 200 and the INVITE with 487.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tonecall_call_core::{
//!     audio::NullSource, CallConfig, OutgoingResponse, ResponseSender, SendError, ServerTxRef,
//!     SessionRegistry,
//! };
//!
//! struct Discard;
//!
//! #[async_trait]
//! impl ResponseSender for Discard {
//!     async fn respond(&self, _tx: &ServerTxRef, _response: OutgoingResponse) -> Result<(), SendError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() {
//! let registry = SessionRegistry::new(CallConfig::new().with_headless(), Arc::new(Discard), Arc::new(NullSource::new()));
//! assert!(registry.is_empty());
//! registry.shutdown().await;
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod dialog;
pub mod error;
pub mod events;
pub mod registry;
pub mod sdp;
pub mod session;

pub use audio::{AudioSource, AudioTask, PlaybackReport};
pub use config::{AudioConfig, AudioMode, CallConfig, DurationPolicy};
pub use dialog::{DialogId, InboundDialog};
pub use error::{AudioError, CallError, ConfigError, RegistryError, Result, SendError, SessionError};
pub use events::{CallEvent, OutgoingResponse, ResponseSender, ServerTxRef};
pub use registry::SessionRegistry;
pub use sdp::{SdpNegotiator, SDP_CONTENT_TYPE};
pub use session::{CallSession, CallState, SessionContext};

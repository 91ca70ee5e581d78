//! Error types for call handling
//!
//! Each component has its own error enum; [`CallError`] wraps them for
//! callers that do not care which layer failed.

use std::path::PathBuf;

use thiserror::Error;

use crate::dialog::DialogId;
use crate::session::CallState;

/// Result type for call-core operations
pub type Result<T> = std::result::Result<T, CallError>;

/// Umbrella error for the crate
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures inside one call session's state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The state machine refused a transition
    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: CallState, to: CallState },

    /// A response could not be handed to the transaction layer
    #[error("Response not sent: {0}")]
    Send(#[from] SendError),
}

/// Failures of the transaction layer when sending a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The transport rejected or failed the send
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The server transaction no longer exists or is already completed
    #[error("Transaction unavailable: {0}")]
    Transaction(String),
}

/// Audio source and sink failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// The output stream could not be opened
    #[error("Failed to open audio stream: {0}")]
    StreamOpen(String),

    /// The sink rejected a write; terminal for the playback
    #[error("Audio device error: {0}")]
    Device(String),

    /// This build cannot provide the requested output
    #[error("Audio output unavailable: {0}")]
    Unavailable(String),

    /// The playback task panicked or was cancelled
    #[error("Audio task failed: {0}")]
    TaskFailed(String),
}

/// Routing failures in the session registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No session for this dialog; usually a stale or duplicate message
    #[error("No session for dialog (Call-ID {call_id}, remote tag {remote_tag})")]
    UnknownDialog { call_id: String, remote_tag: String },

    /// The request lacks the headers needed to identify a dialog
    #[error("Request cannot be matched to a dialog: {0}")]
    MissingDialogField(&'static str),

    /// The session exists but its task has already exited
    #[error("Session for {0} is no longer accepting events")]
    SessionClosed(DialogId),

    /// No method handler for this request
    #[error("Method {0} is not handled by the registry")]
    UnsupportedMethod(String),

    /// New calls are refused during shutdown
    #[error("Registry is shutting down")]
    ShuttingDown,

    /// REGISTER or OPTIONS could not be answered
    #[error("Response not sent: {0}")]
    Send(#[from] SendError),
}

impl RegistryError {
    /// Whether the request should be answered 481 Call/Transaction Does Not Exist
    pub fn is_unknown_dialog(&self) -> bool {
        matches!(
            self,
            RegistryError::UnknownDialog { .. } | RegistryError::SessionClosed(_)
        )
    }
}

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid public IP {0:?}")]
    InvalidPublicIp(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

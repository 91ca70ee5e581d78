use thiserror::Error;

use crate::transaction::TransactionKey;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the transport and transaction layers
#[derive(Error, Debug)]
pub enum Error {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was closed and can no longer send
    #[error("Transport closed")]
    TransportClosed,

    /// No server transaction exists for the key (never created or already swept)
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    /// The transaction already carries a final response
    #[error("Final response already sent for transaction {0}")]
    FinalResponseAlreadySent(TransactionKey),

    /// The message could not be parsed or is missing transaction headers
    #[error("SIP error: {0}")]
    Sip(#[from] tonecall_sip_core::Error),
}

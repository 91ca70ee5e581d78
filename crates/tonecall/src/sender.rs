//! Response path from call sessions into the transaction layer

use async_trait::async_trait;
use tracing::debug;

use tonecall_call_core::{OutgoingResponse, ResponseSender, SendError, ServerTxRef};
use tonecall_sip_transport::{Error as TransportError, TransactionKey, TransactionLayer};

/// [`ResponseSender`] backed by the server transaction table
#[derive(Clone)]
pub struct TransactionSender {
    layer: TransactionLayer,
}

impl TransactionSender {
    pub fn new(layer: TransactionLayer) -> Self {
        Self { layer }
    }
}

#[async_trait]
impl ResponseSender for TransactionSender {
    async fn respond(&self, tx: &ServerTxRef, response: OutgoingResponse) -> Result<(), SendError> {
        let key = TransactionKey::new(tx.branch.clone(), tx.method.clone());
        let response = response.into_response(&tx.request);
        debug!(transaction = %key, "Handing {} to transaction layer", response.status);
        self.layer.respond(&key, response).await.map_err(to_send_error)
    }
}

fn to_send_error(error: TransportError) -> SendError {
    match error {
        TransportError::TransactionNotFound(_) | TransportError::FinalResponseAlreadySent(_) => {
            SendError::Transaction(error.to_string())
        }
        other => SendError::Transport(other.to_string()),
    }
}

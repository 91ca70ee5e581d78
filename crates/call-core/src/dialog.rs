//! Dialog identity
//!
//! A UAS learns the Call-ID and the remote (From) tag from the INVITE and
//! picks its own local tag, which goes into the To header of every response
//! that creates the dialog. Requests arriving later are matched on Call-ID and
//! From tag, and on the To tag when they carry one.

use std::fmt;

use tonecall_sip_core::Request;

use crate::error::RegistryError;

/// Full identity of an established dialog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>, remote_tag: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};local={};remote={}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// Dialog fields carried by an inbound request
///
/// `local_tag` is the To tag, absent on the initial INVITE, its
/// retransmissions and CANCEL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDialog {
    pub call_id: String,
    pub remote_tag: String,
    pub local_tag: Option<String>,
}

impl InboundDialog {
    pub fn new(call_id: impl Into<String>, remote_tag: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            remote_tag: remote_tag.into(),
            local_tag: None,
        }
    }

    pub fn with_local_tag(mut self, tag: impl Into<String>) -> Self {
        self.local_tag = Some(tag.into());
        self
    }

    /// Extract the dialog fields from a request.
    pub fn from_request(request: &Request) -> Result<Self, RegistryError> {
        let call_id = request
            .call_id()
            .ok_or(RegistryError::MissingDialogField("Call-ID"))?;
        let remote_tag = request
            .from_tag()
            .filter(|tag| !tag.is_empty())
            .ok_or(RegistryError::MissingDialogField("From tag"))?;

        Ok(Self {
            call_id: call_id.to_string(),
            remote_tag: remote_tag.to_string(),
            local_tag: request.to_tag().map(str::to_string),
        })
    }

    pub(crate) fn key(&self) -> DialogKey {
        DialogKey {
            call_id: self.call_id.clone(),
            remote_tag: self.remote_tag.clone(),
        }
    }

    /// Whether this request belongs to `dialog`
    pub fn matches(&self, dialog: &DialogId) -> bool {
        self.call_id == dialog.call_id
            && self.remote_tag == dialog.remote_tag
            && self
                .local_tag
                .as_deref()
                .map_or(true, |tag| tag == dialog.local_tag)
    }
}

/// Registry key: what the remote side controls
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct DialogKey {
    pub call_id: String,
    pub remote_tag: String,
}

/// A fresh local tag: 8 random hex digits
pub fn generate_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

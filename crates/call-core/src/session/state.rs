use std::fmt;

/// Lifecycle of one inbound call
///
/// States are ordered; a session only ever moves to a later state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallState {
    /// Created, INVITE not yet processed
    Idle,
    /// 100 Trying sent
    Trying,
    /// 180 Ringing sent, ring timer running
    Ringing,
    /// 200 OK with SDP sent, waiting for ACK
    Accepted,
    /// ACK received, audio playing
    Established,
    /// Tearing down after CANCEL or BYE
    Terminating,
    /// Finished; no further events are processed
    Terminated,
}

impl CallState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// The happy path advances one step at a time. CANCEL enters Terminating
    /// from Trying or Ringing, BYE from Established. Any live state may end in
    /// Terminated directly (send failure, ACK timeout, shutdown).
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Idle, Trying) | (Trying, Ringing) | (Ringing, Accepted) | (Accepted, Established) => true,
            (Trying | Ringing | Established, Terminating) => true,
            (Terminated, _) => false,
            (_, Terminated) => true,
            _ => false,
        }
    }

    pub fn is_terminated(self) -> bool {
        self == CallState::Terminated
    }

    /// An INVITE is still waiting for its final response
    pub fn is_pending_invite(self) -> bool {
        matches!(self, CallState::Trying | CallState::Ringing)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "Idle",
            CallState::Trying => "Trying",
            CallState::Ringing => "Ringing",
            CallState::Accepted => "Accepted",
            CallState::Established => "Established",
            CallState::Terminating => "Terminating",
            CallState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

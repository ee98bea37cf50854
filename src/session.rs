use std::sync::Arc;

use crate::crypto::{ArmoredPublicKey, KeyPair, UnlockedSecretKey};
use crate::transport::PeerConnection;

/// Lifecycle of one bilateral connection.
///
/// `KeyExchanged` is already ready for chat traffic; there is no separate
/// active state beyond holding the remote key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Connected,
    KeyExchanged,
    Closed,
}

/// Client-side record for one remote participant. The connection handle is
/// owned by the transport library; keys are generated once per session and
/// never shared across sessions.
pub struct PeerSession {
    pub peer_id: String,
    pub initiator: bool,
    pub connection: Arc<dyn PeerConnection>,
    pub state: SessionState,
    pub keys: Option<KeyPair>,
    pub unlocked: Option<Arc<UnlockedSecretKey>>,
    pub remote_public_key: Option<ArmoredPublicKey>,
    pub display_name: Option<String>,
    pub introduced: bool,
}

impl PeerSession {
    pub fn new(peer_id: impl Into<String>, initiator: bool, connection: Arc<dyn PeerConnection>) -> Self {
        PeerSession {
            peer_id: peer_id.into(),
            initiator,
            connection,
            state: SessionState::Pending,
            keys: None,
            unlocked: None,
            remote_public_key: None,
            display_name: None,
            introduced: false,
        }
    }

    /// Whether chat traffic can be encrypted toward this peer.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::KeyExchanged && self.remote_public_key.is_some()
    }

    pub fn resolved_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.peer_id)
    }

    /// Store the peer's announced key. Only the first announcement counts;
    /// the session never holds more than one remote key.
    pub fn store_remote_key(&mut self, armor: String) -> bool {
        if self.remote_public_key.is_some() {
            return false;
        }
        self.remote_public_key = Some(ArmoredPublicKey::new(armor));
        self.state = SessionState::KeyExchanged;
        true
    }
}

/// Read-only view of a session, for callers outside the owning task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub peer_id: String,
    pub initiator: bool,
    pub state: SessionState,
    pub remote_public_key: Option<ArmoredPublicKey>,
    pub display_name: Option<String>,
}

impl From<&PeerSession> for SessionSnapshot {
    fn from(session: &PeerSession) -> Self {
        SessionSnapshot {
            peer_id: session.peer_id.clone(),
            initiator: session.initiator,
            state: session.state,
            remote_public_key: session.remote_public_key.clone(),
            display_name: session.display_name.clone(),
        }
    }
}

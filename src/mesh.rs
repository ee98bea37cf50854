use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::chat::{ChatEntry, ChatPayload, Transcript};
use crate::crypto::{self, CryptoError, KeyPair};
use crate::messages::ClientMessage;
use crate::session::{PeerSession, SessionSnapshot, SessionState};
use crate::transport::{Payload, PeerConnector, PeerEvent};

#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub room_id: String,
    pub local_id: String,
    pub display_name: String,
    pub key_identity: String,
    pub passphrase: String,
    pub key_bits: usize,
}

impl MeshConfig {
    pub fn new(
        room_id: impl Into<String>,
        local_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let display_name = display_name.into();
        MeshConfig {
            room_id: room_id.into(),
            local_id: local_id.into(),
            key_identity: display_name.clone(),
            display_name,
            passphrase: crypto::DEFAULT_PASSPHRASE.to_string(),
            key_bits: crypto::DEFAULT_RSA_BITS,
        }
    }
}

enum MeshEvent {
    PeerJoining {
        guest_id: String,
    },
    OfferReceived {
        from: String,
        payload: Value,
    },
    AnswerReceived {
        from: String,
        payload: Value,
    },
    SendChat {
        text: String,
    },
    Transport {
        peer_id: String,
        event: PeerEvent,
    },
    KeysReady {
        peer_id: String,
        result: Result<KeyPair, CryptoError>,
    },
    Snapshot {
        peer_id: String,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
}

/// Cheap handle for feeding events into a running mesh and reading its
/// transcript. All mutation happens inside the owning task.
#[derive(Clone)]
pub struct MeshHandle {
    inlet: mpsc::UnboundedSender<MeshEvent>,
    transcript: Arc<RwLock<Transcript>>,
}

impl MeshHandle {
    pub fn peer_joining(&self, guest_id: &str) {
        let _ = self.inlet.send(MeshEvent::PeerJoining {
            guest_id: guest_id.to_string(),
        });
    }

    pub fn offer_received(&self, from: &str, payload: Value) {
        let _ = self.inlet.send(MeshEvent::OfferReceived {
            from: from.to_string(),
            payload,
        });
    }

    pub fn answer_received(&self, from: &str, payload: Value) {
        let _ = self.inlet.send(MeshEvent::AnswerReceived {
            from: from.to_string(),
            payload,
        });
    }

    pub fn send_chat(&self, text: &str) {
        let _ = self.inlet.send(MeshEvent::SendChat {
            text: text.to_string(),
        });
    }

    pub async fn session(&self, peer_id: &str) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.inlet
            .send(MeshEvent::Snapshot {
                peer_id: peer_id.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self.inlet.send(MeshEvent::Sessions { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn transcript(&self) -> Vec<ChatEntry> {
        self.transcript.read().await.entries().to_vec()
    }
}

/// Owns every `PeerSession` of one local client and drives them through
/// negotiation, key exchange, and chat. A single task consumes the inlet,
/// so concurrent completions can never clobber each other's session
/// updates.
pub struct PeerSessionManager {
    config: MeshConfig,
    connector: Arc<dyn PeerConnector>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    sessions: HashMap<String, PeerSession>,
    transcript: Arc<RwLock<Transcript>>,
    inlet: mpsc::UnboundedSender<MeshEvent>,
    events: mpsc::UnboundedReceiver<MeshEvent>,
}

impl PeerSessionManager {
    pub fn new(
        config: MeshConfig,
        connector: Arc<dyn PeerConnector>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> (Self, MeshHandle) {
        let (inlet, events) = mpsc::unbounded_channel();
        let transcript = Arc::new(RwLock::new(Transcript::new()));
        let handle = MeshHandle {
            inlet: inlet.clone(),
            transcript: Arc::clone(&transcript),
        };
        let manager = PeerSessionManager {
            config,
            connector,
            outbound,
            sessions: HashMap::new(),
            transcript,
            inlet,
            events,
        };
        (manager, handle)
    }

    /// Event loop. Runs until every handle and forwarder is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::PeerJoining { guest_id } => {
                if self.sessions.contains_key(&guest_id) {
                    debug!("already negotiating with {guest_id}");
                    return;
                }
                self.open_session(&guest_id, true).await;
            }

            MeshEvent::OfferReceived { from, payload } => {
                if !self.sessions.contains_key(&from) {
                    self.open_session(&from, false).await;
                }
                self.feed_signal(&from, payload).await;
            }

            MeshEvent::AnswerReceived { from, payload } => {
                if self.sessions.contains_key(&from) {
                    self.feed_signal(&from, payload).await;
                } else {
                    debug!("answer from unknown peer {from} dropped");
                }
            }

            MeshEvent::SendChat { text } => self.send_chat(text).await,

            MeshEvent::Transport { peer_id, event } => {
                self.handle_transport(&peer_id, event).await;
            }

            MeshEvent::KeysReady { peer_id, result } => {
                self.handle_keys_ready(&peer_id, result).await;
            }

            MeshEvent::Snapshot { peer_id, reply } => {
                let snapshot = self.sessions.get(&peer_id).map(SessionSnapshot::from);
                let _ = reply.send(snapshot);
            }

            MeshEvent::Sessions { reply } => {
                let _ = reply.send(self.sessions.values().map(SessionSnapshot::from).collect());
            }
        }
    }

    async fn open_session(&mut self, peer_id: &str, initiator: bool) {
        let (connection, mut events) = self.connector.create(initiator).await;

        // The one subscription this session will ever have; it lives as
        // long as the connection produces events.
        let inlet = self.inlet.clone();
        let forward_id = peer_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inlet
                    .send(MeshEvent::Transport {
                        peer_id: forward_id.clone(),
                        event,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        info!("session with {peer_id} opened (initiator: {initiator})");
        self.sessions
            .insert(peer_id.to_string(), PeerSession::new(peer_id, initiator, connection));
    }

    async fn feed_signal(&mut self, peer_id: &str, payload: Value) {
        let Some(session) = self.sessions.get(peer_id) else {
            return;
        };
        if session.state == SessionState::Closed {
            return;
        }
        let connection = Arc::clone(&session.connection);
        if let Err(e) = connection.signal(payload).await {
            warn!("signal for {peer_id} rejected: {e}");
        }
    }

    async fn handle_transport(&mut self, peer_id: &str, event: PeerEvent) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            debug!("event for unknown session {peer_id} dropped");
            return;
        };
        if session.state == SessionState::Closed {
            // A closed session stops consuming; in-flight work elsewhere
            // finishes on its own and is discarded.
            return;
        }

        match event {
            PeerEvent::Signal(data) => {
                let message = if session.initiator {
                    ClientMessage::Offer {
                        room_id: self.config.room_id.clone(),
                        initiator: data,
                        offer_from: self.config.local_id.clone(),
                        offer_to: peer_id.to_string(),
                    }
                } else {
                    ClientMessage::Answer {
                        room_id: self.config.room_id.clone(),
                        answer: data,
                        answer_from: self.config.local_id.clone(),
                        answer_to: peer_id.to_string(),
                    }
                };
                let _ = self.outbound.send(message);
            }

            PeerEvent::Connect => {
                info!("transport to {peer_id} connected");
                session.state = SessionState::Connected;

                let identity = self.config.key_identity.clone();
                let passphrase = self.config.passphrase.clone();
                let bits = self.config.key_bits;
                let inlet = self.inlet.clone();
                let keygen_id = peer_id.to_string();
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        crypto::generate_key_pair(&identity, &passphrase, bits)
                    })
                    .await
                    .unwrap_or(Err(CryptoError::KeyGeneration));
                    let _ = inlet.send(MeshEvent::KeysReady {
                        peer_id: keygen_id,
                        result,
                    });
                });
            }

            PeerEvent::Data(payload) => self.handle_data(peer_id, payload).await,

            PeerEvent::Error(e) => {
                warn!("transport error on session {peer_id}: {e}");
                session.state = SessionState::Closed;
            }
        }
    }

    async fn handle_keys_ready(&mut self, peer_id: &str, result: Result<KeyPair, CryptoError>) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        if session.state == SessionState::Closed {
            return;
        }

        let pair = match result {
            Ok(pair) => pair,
            Err(e) => {
                error!("key generation for {peer_id} failed: {e}");
                session.state = SessionState::Closed;
                return;
            }
        };

        // The armored public key is the very first application payload on
        // this transport, ahead of any chat traffic.
        let armor = pair.public.as_str().to_string();
        session.keys = Some(pair);
        let connection = Arc::clone(&session.connection);
        if let Err(e) = connection.send(Payload::Text(armor)).await {
            warn!("public key announcement to {peer_id} failed: {e}");
        }

        self.maybe_introduce(peer_id);
    }

    async fn handle_data(&mut self, peer_id: &str, payload: Payload) {
        let text = payload.into_text();

        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };

        if session.remote_public_key.is_none() {
            // First payload on a keyless session is the peer's public key,
            // whatever it looks like.
            session.store_remote_key(text);
            info!("remote key stored for session {peer_id}");
            self.maybe_introduce(peer_id);
            return;
        }

        if session.unlocked.is_none() {
            let unlocked = session
                .keys
                .as_ref()
                .ok_or(CryptoError::InvalidKey)
                .and_then(|keys| keys.secret.unlock(&self.config.passphrase));
            match unlocked {
                Ok(secret) => session.unlocked = Some(Arc::new(secret)),
                Err(e) => {
                    error!("cannot unlock private key for session {peer_id}: {e}");
                    session.state = SessionState::Closed;
                    return;
                }
            }
        }
        let Some(secret) = session.unlocked.clone() else {
            return;
        };

        let plaintext = crypto::decrypt(&text, &secret)
            .and_then(|bytes| String::from_utf8(bytes).map_err(|_| CryptoError::Decryption))
            .and_then(|wire| {
                ChatPayload::from_wire(&wire).map_err(|_| CryptoError::Decryption)
            });

        match plaintext {
            Ok(ChatPayload::Chat { from: _, text }) => {
                let name = session.resolved_name().to_string();
                self.transcript.write().await.append(name, text);
            }
            Ok(ChatPayload::Introduction { from: _, display_name }) => {
                debug!("session {peer_id} introduced as {display_name}");
                session.display_name = Some(display_name);
            }
            Err(e) => {
                // Fatal for this one session; every other session and the
                // transcript stay live.
                error!("undecryptable payload on session {peer_id}: {e}");
                session.state = SessionState::Closed;
            }
        }
    }

    /// Announce the local display name once both key halves are in place.
    fn maybe_introduce(&mut self, peer_id: &str) {
        let local_id = self.config.local_id.clone();
        let display_name = self.config.display_name.clone();
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        if session.introduced || session.keys.is_none() || session.remote_public_key.is_none() {
            return;
        }
        session.introduced = true;

        let payload = ChatPayload::Introduction {
            from: local_id,
            display_name,
        };
        match payload.to_wire() {
            Ok(wire) => Self::spawn_encrypted_send(session, wire),
            Err(e) => warn!("introduction for {peer_id} not serializable: {e}"),
        }
    }

    async fn send_chat(&mut self, text: String) {
        // Optimistic append: the local transcript shows the message before
        // any per-peer encryption has finished.
        self.transcript
            .write()
            .await
            .append(self.config.display_name.clone(), text.clone());

        let payload = ChatPayload::Chat {
            from: self.config.display_name.clone(),
            text,
        };
        let wire = match payload.to_wire() {
            Ok(wire) => wire,
            Err(e) => {
                warn!("chat message not serializable: {e}");
                return;
            }
        };

        // Full-mesh fanout: one independent ciphertext per ready peer, each
        // on its own task, completing in no particular order.
        for session in self.sessions.values() {
            if session.is_ready() {
                Self::spawn_encrypted_send(session, wire.clone());
            }
        }
    }

    fn spawn_encrypted_send(session: &PeerSession, wire: String) {
        let Some(remote) = session.remote_public_key.clone() else {
            return;
        };
        let connection = Arc::clone(&session.connection);
        let peer_id = session.peer_id.clone();
        tokio::spawn(async move {
            match crypto::encrypt(wire.as_bytes(), &remote) {
                Ok(armored) => {
                    if let Err(e) = connection.send(Payload::Text(armored)).await {
                        warn!("chat delivery to {peer_id} failed: {e}");
                    }
                }
                Err(e) => warn!("encryption for {peer_id} failed: {e}"),
            }
        });
    }
}

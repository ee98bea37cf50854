use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::chat::ChatEntry;
use crate::crypto;
use crate::mesh::{MeshConfig, MeshHandle, PeerSessionManager};
use crate::messages::{ClientMessage, ServerMessage};
use crate::session::SessionSnapshot;
use crate::transport::PeerConnector;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("signaling socket failure: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("signaling connection closed")]
    ConnectionClosed,
    #[error("join refused for room {0}")]
    FailedJoin(String),
    #[error("room creation refused")]
    FailedCreate,
    #[error("message not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub display_name: String,
    pub passphrase: String,
    pub key_bits: usize,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, display_name: impl Into<String>) -> Self {
        ClientConfig {
            server_url: server_url.into(),
            display_name: display_name.into(),
            passphrase: crypto::DEFAULT_PASSPHRASE.to_string(),
            key_bits: crypto::DEFAULT_RSA_BITS,
        }
    }
}

/// A connected signaling socket that has not yet entered a room. Entering a
/// room consumes the client and hands back the live `RoomSession`.
pub struct RoomClient {
    config: ClientConfig,
    connector: Arc<dyn PeerConnector>,
    sink: WsSink,
    stream: WsStream,
}

impl RoomClient {
    pub async fn connect(
        config: ClientConfig,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self, ClientError> {
        let (socket, _) = connect_async(config.server_url.as_str()).await?;
        let (sink, stream) = socket.split();
        info!("signaling socket connected to {}", config.server_url);
        Ok(RoomClient {
            config,
            connector,
            sink,
            stream,
        })
    }

    pub async fn create_room(mut self, name: &str) -> Result<RoomSession, ClientError> {
        self.request(&ClientMessage::CreateRoom {
            name: name.to_string(),
        })
        .await?;

        let mut pending = Vec::new();
        loop {
            match self.next_message().await? {
                ServerMessage::RoomCreated { room_id, user_id } => {
                    info!("created room {room_id} as {user_id}");
                    return Ok(self.into_session(room_id, user_id, Vec::new(), pending));
                }
                ServerMessage::FailedCreate => return Err(ClientError::FailedCreate),
                other => pending.push(other),
            }
        }
    }

    pub async fn join_room(mut self, room_id: &str) -> Result<RoomSession, ClientError> {
        self.request(&ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
        })
        .await?;

        // Peers may start negotiating the moment they hear user-joining, so
        // anything that outruns the present-list is kept for the mesh.
        let mut pending = Vec::new();
        loop {
            match self.next_message().await? {
                ServerMessage::PresentList { list, user_id } => {
                    info!("joined room {room_id} as {user_id}, {} present", list.len());
                    let present = list.into_iter().map(|u| u.id).collect();
                    return Ok(self.into_session(room_id.to_string(), user_id, present, pending));
                }
                ServerMessage::FailedJoin => {
                    return Err(ClientError::FailedJoin(room_id.to_string()))
                }
                other => pending.push(other),
            }
        }
    }

    async fn request(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = serde_json::to_string(message)?;
        self.sink.send(Message::text(text)).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<ServerMessage, ClientError> {
        while let Some(frame) = self.stream.next().await {
            let frame = frame?;
            let Ok(text) = frame.to_text() else {
                continue;
            };
            match serde_json::from_str(text) {
                Ok(message) => return Ok(message),
                Err(e) => debug!("unparseable server frame: {e}"),
            }
        }
        Err(ClientError::ConnectionClosed)
    }

    fn into_session(
        self,
        room_id: String,
        user_id: String,
        present: Vec<String>,
        pending: Vec<ServerMessage>,
    ) -> RoomSession {
        let mesh_config = MeshConfig {
            room_id: room_id.clone(),
            local_id: user_id.clone(),
            key_identity: self.config.display_name.clone(),
            display_name: self.config.display_name.clone(),
            passphrase: self.config.passphrase.clone(),
            key_bits: self.config.key_bits,
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (manager, mesh) = PeerSessionManager::new(mesh_config, self.connector, outbound_tx);
        tokio::spawn(manager.run());

        let mut sink = self.sink;
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            error!("signaling send failed: {e}");
                            break;
                        }
                    }
                    Err(e) => error!("outbound message not serializable: {e}"),
                }
            }
        });

        for message in pending {
            dispatch(&mesh, message);
        }

        let mut stream = self.stream;
        let pump = mesh.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let Ok(frame) = frame else { break };
                let Ok(text) = frame.to_text() else { continue };
                let Ok(message) = serde_json::from_str::<ServerMessage>(text) else {
                    continue;
                };
                dispatch(&pump, message);
            }
            debug!("signaling stream ended");
        });

        RoomSession {
            room_id,
            user_id,
            present,
            mesh,
        }
    }
}

fn dispatch(mesh: &MeshHandle, message: ServerMessage) {
    match message {
        ServerMessage::UserJoining { guest_id } => mesh.peer_joining(&guest_id),
        ServerMessage::Offer {
            initiator,
            offer_from,
        } => mesh.offer_received(&offer_from, initiator),
        ServerMessage::Answer { answer, answer_from } => {
            mesh.answer_received(&answer_from, answer);
        }
        other => debug!("unexpected in-room message: {other:?}"),
    }
}

/// A live room membership: the mesh negotiates toward every other member
/// while this handle sends chat and reads the transcript.
pub struct RoomSession {
    pub room_id: String,
    pub user_id: String,
    /// Members that were present when we entered, by user id.
    pub present: Vec<String>,
    mesh: MeshHandle,
}

impl RoomSession {
    pub fn send_chat(&self, text: &str) {
        self.mesh.send_chat(text);
    }

    pub async fn transcript(&self) -> Vec<ChatEntry> {
        self.mesh.transcript().await
    }

    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        self.mesh.sessions().await
    }

    pub fn mesh(&self) -> &MeshHandle {
        &self.mesh
    }
}

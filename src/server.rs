use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use warp::ws::WebSocket;
use warp::Filter;

use crate::identity;
use crate::messages::{ClientMessage, PresentUser, ServerMessage};
use crate::registry::RoomRegistry;
use crate::router::{ConnectionMap, SignalingRouter};

#[derive(Clone)]
pub struct Server {
    registry: Arc<RoomRegistry>,
    connections: ConnectionMap,
    router: SignalingRouter,
}

impl Server {
    pub fn new() -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let connections: ConnectionMap = Arc::new(RwLock::new(HashMap::new()));
        let router = SignalingRouter::new(Arc::clone(&registry), Arc::clone(&connections));
        Server {
            registry,
            connections,
            router,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let conn_id = identity::new_connection_id();
        info!("signaling connection opened: {conn_id}");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(conn_id.clone(), tx);
        }

        let server = self.clone();
        let reader_conn_id = conn_id.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(msg) => {
                        let Ok(text) = msg.to_str() else {
                            // Binary frames and pings carry no signaling events.
                            continue;
                        };
                        match serde_json::from_str::<ClientMessage>(text) {
                            Ok(client_msg) => {
                                server.handle_client_message(client_msg, &reader_conn_id).await;
                            }
                            Err(e) => debug!("unparseable frame from {reader_conn_id}: {e}"),
                        }
                    }
                    Err(e) => {
                        error!("websocket error on {reader_conn_id}: {e}");
                        break;
                    }
                }
            }
            server.handle_disconnect(&reader_conn_id).await;
        });

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    error!("failed to send websocket message: {e}");
                    break;
                }
            }
        });
    }

    async fn handle_client_message(&self, message: ClientMessage, conn_id: &str) {
        match message {
            ClientMessage::CreateRoom { name } => {
                let created = self.registry.create_room(&name, conn_id).await;
                info!("room {} created by {}", created.room_id, created.user_id);
                self.router
                    .send_to_conn(
                        conn_id,
                        &ServerMessage::RoomCreated {
                            room_id: created.room_id,
                            user_id: created.user_id,
                        },
                    )
                    .await;
            }

            ClientMessage::JoinRoom { room_id } => match self.registry.join_room(&room_id, conn_id).await {
                Ok(joined) => {
                    info!("user {} joining room {room_id}", joined.user_id);
                    self.router.announce_join(&joined.present, &joined.user_id).await;

                    let list = joined
                        .present
                        .iter()
                        .map(|m| PresentUser {
                            id: m.user_id.clone(),
                        })
                        .collect();
                    self.router
                        .send_to_conn(
                            conn_id,
                            &ServerMessage::PresentList {
                                list,
                                user_id: joined.user_id,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    info!("join refused: {e}");
                    self.router.send_to_conn(conn_id, &ServerMessage::FailedJoin).await;
                }
            },

            ClientMessage::Offer {
                room_id,
                initiator,
                offer_from,
                offer_to,
            } => {
                self.router
                    .relay_offer(&room_id, &offer_from, &offer_to, initiator)
                    .await;
            }

            ClientMessage::Answer {
                room_id,
                answer,
                answer_from,
                answer_to,
            } => {
                self.router
                    .relay_answer(&room_id, &answer_from, &answer_to, answer)
                    .await;
            }
        }
    }

    /// Membership is intentionally left intact: rooms only ever grow, and
    /// relays addressed to a departed member drop like any missing target.
    async fn handle_disconnect(&self, conn_id: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(conn_id);
        info!("signaling connection closed: {conn_id}");
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// The `/ws` signaling endpoint as a warp filter, shared by the binary and
/// the integration tests.
pub fn ws_route(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = Arc::clone(&server);
            ws.on_upgrade(move |socket| {
                let server = Arc::clone(&server);
                async move {
                    server.handle_connection(socket).await;
                }
            })
        })
}

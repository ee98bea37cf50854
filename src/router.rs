use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use warp::ws::Message;

use crate::messages::ServerMessage;
use crate::registry::{Member, RoomRegistry};

pub type ConnectionMap = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>>;

/// Stateless relay between room members. Holds no session state beyond the
/// routing addresses in the registry and connection table; negotiation
/// payloads pass through untouched.
#[derive(Clone)]
pub struct SignalingRouter {
    registry: Arc<RoomRegistry>,
    connections: ConnectionMap,
}

impl SignalingRouter {
    pub fn new(registry: Arc<RoomRegistry>, connections: ConnectionMap) -> Self {
        SignalingRouter {
            registry,
            connections,
        }
    }

    /// One user-joining notification per member present before the join.
    pub async fn announce_join(&self, present: &[Member], guest_id: &str) {
        for member in present {
            self.send_to_conn(
                &member.conn_id,
                &ServerMessage::UserJoining {
                    guest_id: guest_id.to_string(),
                },
            )
            .await;
        }
    }

    pub async fn relay_offer(&self, room_id: &str, offer_from: &str, offer_to: &str, payload: Value) {
        match self.registry.member_conn(room_id, offer_to).await {
            Some(conn_id) => {
                self.send_to_conn(
                    &conn_id,
                    &ServerMessage::Offer {
                        initiator: payload,
                        offer_from: offer_from.to_string(),
                    },
                )
                .await;
            }
            None => warn!("dropping offer from {offer_from}: no member {offer_to} in room {room_id}"),
        }
    }

    pub async fn relay_answer(
        &self,
        room_id: &str,
        answer_from: &str,
        answer_to: &str,
        payload: Value,
    ) {
        match self.registry.member_conn(room_id, answer_to).await {
            Some(conn_id) => {
                self.send_to_conn(
                    &conn_id,
                    &ServerMessage::Answer {
                        answer: payload,
                        answer_from: answer_from.to_string(),
                    },
                )
                .await;
            }
            None => {
                warn!("dropping answer from {answer_from}: no member {answer_to} in room {room_id}");
            }
        }
    }

    /// Delivery is at-most-once: a missing or closed connection drops the
    /// message without retry.
    pub async fn send_to_conn(&self, conn_id: &str, message: &ServerMessage) {
        if let Ok(text) = serde_json::to_string(message) {
            let connections = self.connections.read().await;
            if let Some(sender) = connections.get(conn_id) {
                let _ = sender.send(Message::text(text));
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests a client may put on the signaling socket. Negotiation payloads
/// (`initiator`, `answer`) are opaque and relayed without inspection.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "create-room")]
    CreateRoom { name: String },
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom { room_id: String },
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer {
        room_id: String,
        initiator: Value,
        offer_from: String,
        offer_to: String,
    },
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer {
        room_id: String,
        answer: Value,
        answer_from: String,
        answer_to: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "room-created", rename_all = "camelCase")]
    RoomCreated { room_id: String, user_id: String },
    #[serde(rename = "present-list", rename_all = "camelCase")]
    PresentList {
        list: Vec<PresentUser>,
        user_id: String,
    },
    #[serde(rename = "failed-join")]
    FailedJoin,
    // Reserved: create-room cannot currently fail, but clients listen for it.
    #[serde(rename = "failed-create")]
    FailedCreate,
    #[serde(rename = "user-joining", rename_all = "camelCase")]
    UserJoining { guest_id: String },
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer { initiator: Value, offer_from: String },
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer { answer: Value, answer_from: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PresentUser {
    pub id: String,
}

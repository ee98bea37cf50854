//! Room-scoped signaling relay and encrypted peer-mesh chat.
//!
//! The server half (`registry`, `router`, `server`) lets participants find
//! each other through named rooms and exchange opaque connection-negotiation
//! payloads. The client half (`mesh`, `session`, `crypto`, `chat`) drives
//! one session per remote peer from negotiation through key exchange to
//! end-to-end encrypted chat.

pub mod chat;
pub mod client;
pub mod crypto;
pub mod identity;
pub mod mesh;
pub mod messages;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

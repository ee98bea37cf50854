use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer not linked yet")]
    NotLinked,
    #[error("connection closed")]
    Closed,
    #[error("signal rejected: {0}")]
    Signal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Both text and binary frames are treated as text on receipt; binary
    /// data is decoded lossily the way the browser client did.
    pub fn into_text(self) -> String {
        match self {
            Payload::Text(text) => text,
            Payload::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// Events surfaced by a peer connection. The receiver is handed out exactly
/// once, at creation, so a session can never end up with duplicate handlers.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Signal(Value),
    Connect,
    Data(Payload),
    Error(String),
}

/// One bilateral connection as exposed by the external negotiation library:
/// feed it remote signals, send it application payloads.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn signal(&self, data: Value) -> Result<(), TransportError>;
    async fn send(&self, payload: Payload) -> Result<(), TransportError>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(
        &self,
        initiator: bool,
    ) -> (Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>);
}

// ---- in-process implementation ----

/// Rendezvous shared by every `MemoryConnector` of one test or process.
/// Initiators publish an offer token; a responder's `signal` resolves it and
/// the answer token flows back to complete the link.
pub struct MemoryHub {
    endpoints: Mutex<HashMap<String, Weak<MemoryConnection>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryHub {
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    async fn register(&self, token: &str, conn: &Arc<MemoryConnection>) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints.insert(token.to_string(), Arc::downgrade(conn));
    }

    async fn resolve(&self, token: &str) -> Option<Arc<MemoryConnection>> {
        let endpoints = self.endpoints.lock().await;
        endpoints.get(token).and_then(Weak::upgrade)
    }
}

pub struct MemoryConnector {
    hub: Arc<MemoryHub>,
}

impl MemoryConnector {
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        MemoryConnector { hub }
    }
}

struct MemoryConnection {
    hub: Arc<MemoryHub>,
    initiator: bool,
    token: String,
    events: mpsc::UnboundedSender<PeerEvent>,
    link: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

#[async_trait]
impl PeerConnector for MemoryConnector {
    async fn create(
        &self,
        initiator: bool,
    ) -> (Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(MemoryConnection {
            hub: Arc::clone(&self.hub),
            initiator,
            token: Uuid::new_v4().to_string(),
            events: events_tx,
            link: Mutex::new(None),
        });
        self.hub.register(&conn.token, &conn).await;

        if initiator {
            // Mirrors non-trickle negotiation: the offer is produced as soon
            // as the connection exists.
            let _ = conn.events.send(PeerEvent::Signal(json!({
                "kind": "offer",
                "token": conn.token,
            })));
        }

        (conn as Arc<dyn PeerConnection>, events_rx)
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    async fn signal(&self, data: Value) -> Result<(), TransportError> {
        let token = data
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Signal("missing token".into()))?;
        let remote = self
            .hub
            .resolve(token)
            .await
            .ok_or_else(|| TransportError::Signal(format!("unknown endpoint {token}")))?;

        {
            let mut link = self.link.lock().await;
            *link = Some(remote.events.clone());
        }

        if self.initiator {
            // Answer accepted: both halves are wired now.
            let _ = self.events.send(PeerEvent::Connect);
            let _ = remote.events.send(PeerEvent::Connect);
        } else {
            let _ = self.events.send(PeerEvent::Signal(json!({
                "kind": "answer",
                "token": self.token,
            })));
        }
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        let link = self.link.lock().await;
        let remote = link.as_ref().ok_or(TransportError::NotLinked)?;
        remote
            .send(PeerEvent::Data(payload))
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn linked_pair() -> (
        Arc<dyn PeerConnection>,
        mpsc::UnboundedReceiver<PeerEvent>,
        Arc<dyn PeerConnection>,
        mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub);

        let (a, mut a_events) = connector.create(true).await;
        let (b, mut b_events) = connector.create(false).await;

        let offer = match a_events.recv().await {
            Some(PeerEvent::Signal(data)) => data,
            other => panic!("expected offer signal, got {other:?}"),
        };
        b.signal(offer).await.expect("offer accepted");

        let answer = match b_events.recv().await {
            Some(PeerEvent::Signal(data)) => data,
            other => panic!("expected answer signal, got {other:?}"),
        };
        a.signal(answer).await.expect("answer accepted");

        assert!(matches!(a_events.recv().await, Some(PeerEvent::Connect)));
        assert!(matches!(b_events.recv().await, Some(PeerEvent::Connect)));

        (a, a_events, b, b_events)
    }

    #[tokio::test]
    async fn pair_connects_and_exchanges_payloads() {
        let (a, mut a_events, b, mut b_events) = linked_pair().await;

        a.send(Payload::Text("ping".into())).await.expect("send");
        match b_events.recv().await {
            Some(PeerEvent::Data(payload)) => assert_eq!(payload.into_text(), "ping"),
            other => panic!("expected data, got {other:?}"),
        }

        b.send(Payload::Binary(b"pong".to_vec())).await.expect("send");
        match a_events.recv().await {
            Some(PeerEvent::Data(payload)) => assert_eq!(payload.into_text(), "pong"),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivery_is_ordered_per_connection() {
        let (a, _a_events, _b, mut b_events) = linked_pair().await;

        for i in 0..10 {
            a.send(Payload::Text(format!("m{i}"))).await.expect("send");
        }
        for i in 0..10 {
            match b_events.recv().await {
                Some(PeerEvent::Data(payload)) => assert_eq!(payload.into_text(), format!("m{i}")),
                other => panic!("expected data, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn send_before_link_is_rejected() {
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub);
        let (a, _events) = connector.create(true).await;
        assert!(matches!(
            a.send(Payload::Text("early".into())).await,
            Err(TransportError::NotLinked)
        ));
    }

    #[tokio::test]
    async fn signal_with_unknown_token_is_rejected() {
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub);
        let (b, _events) = connector.create(false).await;
        let result = b.signal(json!({"kind": "offer", "token": "missing"})).await;
        assert!(matches!(result, Err(TransportError::Signal(_))));
    }
}

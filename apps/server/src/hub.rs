//! Connected-client registry and named-event envelope.
//!
//! Every message on the dashboard socket is `{event, data}`; client
//! requests that expect a reply carry an `ack` id and get
//! `{event: "ack", id, data}` back. Socket writers are fed over bounded
//! channels; a slow client loses messages rather than stalling the server.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

pub const CLIENT_QUEUE_CAP: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

#[derive(Clone, Default)]
pub struct Hub {
    clients: Arc<Mutex<HashMap<Uuid, mpsc::Sender<Message>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, tx: mpsc::Sender<Message>) {
        self.clients.lock().insert(id, tx);
    }

    pub fn unregister(&self, id: Uuid) {
        self.clients.lock().remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn broadcast(&self, event: &str, data: serde_json::Value) {
        let message = envelope_message(event, data);
        for tx in self.clients.lock().values() {
            let _ = tx.try_send(message.clone());
        }
    }

    pub fn send_to(&self, id: Uuid, event: &str, data: serde_json::Value) {
        if let Some(tx) = self.clients.lock().get(&id) {
            let _ = tx.try_send(envelope_message(event, data));
        }
    }

    pub fn ack(&self, id: Uuid, ack_id: u64, data: serde_json::Value) {
        if let Some(tx) = self.clients.lock().get(&id) {
            let reply = serde_json::json!({"event": "ack", "id": ack_id, "data": data});
            let _ = tx.try_send(Message::Text(reply.to_string()));
        }
    }
}

fn envelope_message(event: &str, data: serde_json::Value) -> Message {
    let envelope = Envelope { event: event.to_string(), data: Some(data), ack: None };
    Message::Text(serde_json::to_string(&envelope).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_client_and_directed_send_one() {
        let hub = Hub::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        hub.register(a, tx_a);
        hub.register(b, tx_b);
        assert_eq!(hub.client_count(), 2);

        hub.broadcast("telemetry", serde_json::json!({"speedMps": 10.0}));
        for rx in [&mut rx_a, &mut rx_b] {
            let Message::Text(text) = rx.recv().await.unwrap() else { panic!("text expected") };
            let e: Envelope = serde_json::from_str(&text).unwrap();
            assert_eq!(e.event, "telemetry");
        }

        hub.send_to(a, "engineer:audio:out", serde_json::json!("UENN"));
        let Message::Text(text) = rx_a.recv().await.unwrap() else { panic!() };
        assert!(text.contains("engineer:audio:out"));
        assert!(rx_b.try_recv().is_err(), "directed send must not leak");

        hub.unregister(b);
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn ack_reply_shape() {
        let hub = Hub::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id = Uuid::new_v4();
        hub.register(id, tx);
        hub.ack(id, 7, serde_json::json!({"valid": true}));
        let Message::Text(text) = rx.recv().await.unwrap() else { panic!() };
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["event"], "ack");
        assert_eq!(v["id"], 7);
        assert_eq!(v["data"]["valid"], true);
    }

    #[test]
    fn envelope_parses_with_and_without_ack() {
        let e: Envelope =
            serde_json::from_str(r#"{"event":"config:testKey","ack":3}"#).unwrap();
        assert_eq!(e.event, "config:testKey");
        assert_eq!(e.ack, Some(3));
        assert!(e.data.is_none());

        let e: Envelope =
            serde_json::from_str(r#"{"event":"engineer:verbosity","data":{"level":3}}"#).unwrap();
        assert_eq!(e.data.unwrap()["level"], 3);
        assert!(e.ack.is_none());
    }
}

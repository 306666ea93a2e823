//! Dashboard WebSocket transport.
//!
//! One accept loop; each socket gets a registered outbound queue and a read
//! loop that turns envelopes into `ClientEvent`s for the control task.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use model::SessionConfig;

use crate::hub::{Envelope, Hub, CLIENT_QUEUE_CAP};

#[derive(Debug)]
pub enum ClientEvent {
    Connected(Uuid),
    Disconnected(Uuid),
    EngineerStart { client: Uuid, config: SessionConfig },
    EngineerStop { client: Uuid },
    AudioIn { client: Uuid, data: String },
    AudioEnd { client: Uuid },
    SetVerbosity { client: Uuid, level: u8 },
    SetApiKey { client: Uuid, ack: Option<u64>, api_key: String },
    TestKey { client: Uuid, ack: Option<u64> },
    DeleteKey { client: Uuid },
    SetEngineerEnabled { client: Uuid, enabled: bool },
}

pub async fn run(listener: TcpListener, hub: Hub, events: mpsc::Sender<ClientEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "socket accepted");
                tokio::spawn(handle_socket(stream, hub.clone(), events.clone()));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn handle_socket(stream: TcpStream, hub: Hub, events: mpsc::Sender<ClientEvent>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };
    let id = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(CLIENT_QUEUE_CAP);
    hub.register(id, out_tx);
    let _ = events.send(ClientEvent::Connected(id)).await;
    info!(client = %id, "dashboard client connected");

    let (mut sink, mut source) = ws.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_client_event(id, &text) {
                    let _ = events.send(event).await;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    hub.unregister(id);
    let _ = events.send(ClientEvent::Disconnected(id)).await;
    writer.abort();
    info!(client = %id, "dashboard client disconnected");
}

/// Envelope -> event mapping. Unknown events and malformed payloads are
/// dropped with a debug line; a misbehaving dashboard cannot hurt the
/// pipeline.
fn parse_client_event(client: Uuid, text: &str) -> Option<ClientEvent> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "unparseable client message");
            return None;
        }
    };
    let data = envelope.data.unwrap_or(serde_json::Value::Null);
    match envelope.event.as_str() {
        "engineer:start" => {
            let config: SessionConfig = serde_json::from_value(data).unwrap_or_default();
            Some(ClientEvent::EngineerStart { client, config })
        }
        "engineer:stop" => Some(ClientEvent::EngineerStop { client }),
        "engineer:audio:in" => {
            data.as_str().map(|chunk| ClientEvent::AudioIn { client, data: chunk.to_string() })
        }
        "engineer:audio:end" => Some(ClientEvent::AudioEnd { client }),
        "engineer:verbosity" => data
            .get("level")
            .and_then(|l| l.as_u64())
            .map(|level| ClientEvent::SetVerbosity { client, level: level as u8 }),
        "config:setApiKey" => data.get("apiKey").and_then(|k| k.as_str()).map(|key| {
            ClientEvent::SetApiKey { client, ack: envelope.ack, api_key: key.to_string() }
        }),
        "config:testKey" => Some(ClientEvent::TestKey { client, ack: envelope.ack }),
        "config:deleteKey" => Some(ClientEvent::DeleteKey { client }),
        "config:setEngineerEnabled" => data
            .get("enabled")
            .and_then(|e| e.as_bool())
            .map(|enabled| ClientEvent::SetEngineerEnabled { client, enabled }),
        other => {
            debug!(event = other, "unknown client event");
            None
        }
    }
}

//! One live bidirectional session against the Gemini Live API.
//!
//! The session couples four streams: model audio out, model text out,
//! driver audio in, and text control turns (callouts, context updates).
//! Teardown aborts the reader and writer tasks together; in-flight audio is
//! dropped by design.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use model::Personality;

pub const LIVE_MODEL: &str = "models/gemini-2.0-flash-live-001";
const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Driver audio arrives as 16 kHz 16-bit PCM chunks; the model returns
/// 24 kHz 16-bit PCM.
const INPUT_MIME: &str = "audio/pcm;rate=16000";
const EVENT_QUEUE_CAP: usize = 256;
const TURN_QUEUE_CAP: usize = 64;
const AUDIO_QUEUE_CAP: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineerError {
    #[error("engineer is not enabled")]
    Disabled,
    #[error("no API key configured")]
    NoApiKey,
    #[error("could not reach the voice model: {0}")]
    Connect(String),
    #[error("voice session setup failed: {0}")]
    Setup(String),
}

/// Events surfaced to the owning client.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Base64 PCM, 24 kHz 16-bit mono, passed through verbatim.
    Audio(String),
    Text { text: String, kind: &'static str },
    /// Terminal; emitted at most once per session.
    Closed { error: Option<String> },
}

enum Outbound {
    Turn { text: String, complete: bool },
}

enum AudioItem {
    Chunk(String),
    End,
}

/// Drop-oldest queue for driver audio: when the model connection falls
/// behind, the latest utterance wins.
struct AudioQueue {
    items: Mutex<VecDeque<AudioItem>>,
    notify: Notify,
}

impl AudioQueue {
    fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    fn push(&self, item: AudioItem) {
        let mut items = self.items.lock();
        if items.len() == AUDIO_QUEUE_CAP {
            items.pop_front();
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
    }

    async fn pop(&self) -> AudioItem {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

pub struct LiveSession {
    pub id: Uuid,
    pub owner: Uuid,
    pub personality: Personality,
    turn_tx: mpsc::Sender<Outbound>,
    audio: Arc<AudioQueue>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LiveSession {
    /// Connect, send setup, and wait for the model to acknowledge before
    /// reporting the session active.
    pub async fn connect(
        api_key: &str,
        instruction: &str,
        personality: &Personality,
        owner: Uuid,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), EngineerError> {
        let url = format!("{LIVE_ENDPOINT}?key={api_key}");
        let (mut ws, _) =
            connect_async(url.as_str()).await.map_err(|e| EngineerError::Connect(e.to_string()))?;

        let setup = json!({
            "setup": {
                "model": LIVE_MODEL,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": {"voiceName": personality.voice}
                        }
                    }
                },
                "systemInstruction": {"parts": [{"text": instruction}]}
            }
        });
        ws.send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| EngineerError::Connect(e.to_string()))?;

        // the first server message must acknowledge the setup
        let ack = timeout(SETUP_TIMEOUT, ws.next())
            .await
            .map_err(|_| EngineerError::Setup("timed out waiting for setup ack".into()))?;
        match ack {
            Some(Ok(msg)) => {
                let text = message_text(&msg)
                    .ok_or_else(|| EngineerError::Setup("unreadable setup ack".into()))?;
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| EngineerError::Setup(e.to_string()))?;
                if value.get("setupComplete").is_none() {
                    return Err(EngineerError::Setup(format!("unexpected setup reply: {value}")));
                }
            }
            Some(Err(e)) => return Err(EngineerError::Connect(e.to_string())),
            None => return Err(EngineerError::Connect("closed during setup".into())),
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAP);
        let (turn_tx, mut turn_rx) = mpsc::channel::<Outbound>(TURN_QUEUE_CAP);
        let audio = Arc::new(AudioQueue::new());
        let (mut sink, mut stream) = ws.split();

        let writer_audio = audio.clone();
        let writer = tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    biased;
                    turn = turn_rx.recv() => match turn {
                        Some(Outbound::Turn { text, complete }) => json!({
                            "clientContent": {
                                "turns": [{"role": "user", "parts": [{"text": text}]}],
                                "turnComplete": complete,
                            }
                        }),
                        None => break,
                    },
                    item = writer_audio.pop() => match item {
                        AudioItem::Chunk(data) => json!({
                            "realtimeInput": {
                                "audio": {"mimeType": INPUT_MIME, "data": data}
                            }
                        }),
                        AudioItem::End => json!({"realtimeInput": {"audioStreamEnd": true}}),
                    },
                };
                if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
                    warn!(error = %e, "voice session write failed");
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut closed = false;
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Close(_)) => {
                        let _ = events_tx.send(SessionEvent::Closed { error: None }).await;
                        closed = true;
                        break;
                    }
                    Ok(msg) => {
                        let Some(text) = message_text(&msg) else { continue };
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                            debug!("unparseable server message");
                            continue;
                        };
                        dispatch_server_message(&value, &events_tx).await;
                    }
                    Err(e) => {
                        let _ = events_tx
                            .send(SessionEvent::Closed { error: Some(e.to_string()) })
                            .await;
                        closed = true;
                        break;
                    }
                }
            }
            if !closed {
                let _ = events_tx.send(SessionEvent::Closed { error: None }).await;
            }
        });

        let session = Self {
            id: Uuid::new_v4(),
            owner,
            personality: personality.clone(),
            turn_tx,
            audio,
            reader,
            writer,
        };
        Ok((session, events_rx))
    }

    /// Text turns must not drop; the bound is far above healthy rates.
    pub async fn send_turn(&self, text: String, complete: bool) {
        let _ = self.turn_tx.send(Outbound::Turn { text, complete }).await;
    }

    pub fn push_audio(&self, chunk_b64: String) {
        self.audio.push(AudioItem::Chunk(chunk_b64));
    }

    pub fn end_audio(&self) {
        self.audio.push(AudioItem::End);
    }

    /// Single teardown path for every exit: normal stop, client disconnect,
    /// model error.
    pub fn teardown(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn message_text(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text.clone()),
        Message::Binary(bytes) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    }
}

async fn dispatch_server_message(
    value: &serde_json::Value,
    events: &mpsc::Sender<SessionEvent>,
) {
    if value.get("setupComplete").is_some() {
        return;
    }
    let Some(content) = value.get("serverContent") else { return };
    if let Some(parts) = content.pointer("/modelTurn/parts").and_then(|p| p.as_array()) {
        for part in parts {
            if let Some(data) = part.pointer("/inlineData/data").and_then(|d| d.as_str()) {
                let _ = events.send(SessionEvent::Audio(data.to_string())).await;
            }
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                let _ = events
                    .send(SessionEvent::Text { text: text.to_string(), kind: "response" })
                    .await;
            }
        }
    }
    if let Some(text) = content.pointer("/outputTranscription/text").and_then(|t| t.as_str()) {
        let _ = events
            .send(SessionEvent::Text { text: text.to_string(), kind: "transcript" })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audio_queue_preserves_order() {
        let q = AudioQueue::new();
        q.push(AudioItem::Chunk("a".into()));
        q.push(AudioItem::Chunk("b".into()));
        q.push(AudioItem::End);
        assert!(matches!(q.pop().await, AudioItem::Chunk(c) if c == "a"));
        assert!(matches!(q.pop().await, AudioItem::Chunk(c) if c == "b"));
        assert!(matches!(q.pop().await, AudioItem::End));
    }

    #[tokio::test]
    async fn audio_queue_drops_oldest_on_overflow() {
        let q = AudioQueue::new();
        for i in 0..AUDIO_QUEUE_CAP + 10 {
            q.push(AudioItem::Chunk(i.to_string()));
        }
        // the oldest ten were evicted, the newest survive
        assert!(matches!(q.pop().await, AudioItem::Chunk(c) if c == "10"));
    }

    #[tokio::test]
    async fn audio_queue_wakes_a_waiting_pop() {
        let q = Arc::new(AudioQueue::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(AudioItem::Chunk("late".into()));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(got, AudioItem::Chunk(c) if c == "late"));
    }

    #[tokio::test]
    async fn server_audio_and_text_are_dispatched() {
        let (tx, mut rx) = mpsc::channel(8);
        let value = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UENN"}},
                        {"text": "Copy that."}
                    ]
                },
                "outputTranscription": {"text": "box this lap"}
            }
        });
        dispatch_server_message(&value, &tx).await;
        assert!(matches!(rx.recv().await, Some(SessionEvent::Audio(d)) if d == "UENN"));
        assert!(
            matches!(rx.recv().await, Some(SessionEvent::Text { text, kind: "response" }) if text == "Copy that.")
        );
        assert!(
            matches!(rx.recv().await, Some(SessionEvent::Text { text, kind: "transcript" }) if text == "box this lap")
        );
    }

    #[tokio::test]
    async fn setup_ack_is_ignored_by_dispatch() {
        let (tx, mut rx) = mpsc::channel(8);
        dispatch_server_message(&json!({"setupComplete": {}}), &tx).await;
        assert!(rx.try_recv().is_err());
    }
}

//! Config and voice-session control plane.
//!
//! A single task owns every config mutation and the engineer lifecycle, so
//! concurrent client requests serialize here. Session events are forwarded
//! to the owning socket by a per-session task; when that stream ends the
//! owner always receives a final disconnected status.

use serde_json::json;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use analysis::now_ms;
use model::{EngineerStatus, SessionConfig, Verbosity};
use pitwall_engineer::{validate_key, Engineer, SessionEvent, StartOptions};
use pitwall_io::ConfigStore;

use crate::hub::Hub;
use crate::ws::ClientEvent;

pub struct Control {
    hub: Hub,
    store: Arc<ConfigStore>,
    engineer: Arc<Engineer>,
    verbosity: Arc<AtomicU8>,
    /// Result of the most recent key validation, echoed in `config:state`.
    api_key_valid: Option<bool>,
}

impl Control {
    pub fn new(
        hub: Hub,
        store: Arc<ConfigStore>,
        engineer: Arc<Engineer>,
        verbosity: Arc<AtomicU8>,
    ) -> Self {
        Self { hub, store, engineer, verbosity, api_key_valid: None }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected(client) => {
                self.send_config_state_to(client);
                let status = EngineerStatus {
                    connected: self.engineer.owner().await == Some(client),
                    personality: self.engineer.active_personality().await,
                };
                self.hub.send_to(client, "engineer:status", to_json(&status));
            }
            ClientEvent::Disconnected(client) => {
                if self.engineer.stop_if_owner(client).await {
                    info!(%client, "voice session owner disconnected");
                }
            }
            ClientEvent::EngineerStart { client, config } => {
                self.start_session(client, config).await;
            }
            ClientEvent::EngineerStop { client } => {
                if self.engineer.stop_if_owner(client).await {
                    self.hub.send_to(
                        client,
                        "engineer:status",
                        to_json(&EngineerStatus { connected: false, personality: None }),
                    );
                }
            }
            ClientEvent::AudioIn { client, data } => {
                self.engineer.send_audio(client, data).await;
            }
            ClientEvent::AudioEnd { client } => {
                self.engineer.end_audio(client).await;
            }
            ClientEvent::SetVerbosity { client: _, level } => {
                self.verbosity.store(Verbosity::new(level).level(), Ordering::Relaxed);
            }
            ClientEvent::SetApiKey { client, ack, api_key } => {
                let mut check = validate_key(&api_key).await;
                if check.valid {
                    if let Err(e) = self.store.set_api_key(&api_key) {
                        warn!(error = %e, "could not persist API key");
                        check.valid = false;
                    }
                }
                self.api_key_valid = Some(check.valid);
                if let Some(ack_id) = ack {
                    self.hub.ack(client, ack_id, to_json(&check));
                }
                self.broadcast_config_state();
            }
            ClientEvent::TestKey { client, ack } => {
                let key = self.store.api_key().unwrap_or_default();
                let check = validate_key(&key).await;
                self.api_key_valid = Some(check.valid);
                if let Some(ack_id) = ack {
                    self.hub.ack(client, ack_id, to_json(&check));
                }
                self.broadcast_config_state();
            }
            ClientEvent::DeleteKey { client: _ } => {
                if let Err(e) = self.store.delete_key() {
                    warn!(error = %e, "could not delete API key");
                }
                self.api_key_valid = None;
                self.broadcast_config_state();
            }
            ClientEvent::SetEngineerEnabled { client: _, enabled } => {
                if let Err(e) = self.store.set_engineer_enabled(enabled) {
                    warn!(error = %e, "could not persist engineer toggle");
                }
                if !enabled {
                    if let Some(owner) = self.engineer.stop().await {
                        self.hub.send_to(
                            owner,
                            "engineer:status",
                            to_json(&EngineerStatus { connected: false, personality: None }),
                        );
                    }
                }
                self.broadcast_config_state();
            }
        }
    }

    async fn start_session(&mut self, client: Uuid, config: SessionConfig) {
        if !self.store.engineer_enabled() {
            self.hub.send_to(
                client,
                "engineer:error",
                json!({"message": "Race engineer is disabled."}),
            );
            return;
        }
        let Some(api_key) = self.store.api_key() else {
            self.hub.send_to(
                client,
                "engineer:error",
                json!({"message": "No API key configured."}),
            );
            return;
        };
        if let Some(level) = config.verbosity {
            self.verbosity.store(Verbosity::new(level).level(), Ordering::Relaxed);
        }

        match self.engineer.start(StartOptions { api_key, owner: client, config }).await {
            Ok((session_id, personality, events)) => {
                self.hub.send_to(
                    client,
                    "engineer:status",
                    to_json(&EngineerStatus { connected: true, personality: Some(personality) }),
                );
                tokio::spawn(forward_session_events(
                    client,
                    session_id,
                    events,
                    self.hub.clone(),
                    self.engineer.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, %client, "voice session start failed");
                self.hub.send_to(client, "engineer:error", json!({"message": e.to_string()}));
                self.hub.send_to(
                    client,
                    "engineer:status",
                    to_json(&EngineerStatus { connected: false, personality: None }),
                );
            }
        }
    }

    fn send_config_state_to(&self, client: Uuid) {
        self.hub.send_to(client, "config:state", to_json(&self.store.state(self.api_key_valid)));
    }

    fn broadcast_config_state(&self) {
        self.hub.broadcast("config:state", to_json(&self.store.state(self.api_key_valid)));
    }
}

/// Pump one session's events to its owning socket. Ends when the session
/// closes for any reason; the owner always sees a final
/// `engineer:status {connected:false}`.
async fn forward_session_events(
    owner: Uuid,
    session_id: Uuid,
    mut events: mpsc::Receiver<SessionEvent>,
    hub: Hub,
    engineer: Arc<Engineer>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Audio(chunk) => {
                hub.send_to(owner, "engineer:audio:out", serde_json::Value::String(chunk));
            }
            SessionEvent::Text { text, kind } => {
                hub.send_to(
                    owner,
                    "engineer:text",
                    json!({"text": text, "type": kind, "timestamp": now_ms()}),
                );
            }
            SessionEvent::Closed { error } => {
                if let Some(message) = error {
                    hub.send_to(owner, "engineer:error", json!({"message": message}));
                }
                // terminal on the model side; release the slot unless a
                // newer session already replaced it
                engineer.clear_session(session_id).await;
                break;
            }
        }
    }
    hub.send_to(
        owner,
        "engineer:status",
        to_json(&EngineerStatus { connected: false, personality: None }),
    );
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

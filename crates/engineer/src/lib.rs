//! Voice-session orchestration.
//!
//! At most one live session exists at a time. Starting while a session is
//! active tears the old one down first; its owner learns about it through
//! the old event stream closing.

pub mod personality;
mod session;
mod validate;

pub use session::{EngineerError, LiveSession, SessionEvent, LIVE_MODEL};
pub use validate::{validate_key, KeyCheck, KeyErrorKind};

use tokio::sync::{mpsc, Mutex};
use tracing::info;
use uuid::Uuid;

use model::{Callout, Personality, SessionConfig, Snapshot};

pub struct StartOptions {
    pub api_key: String,
    pub owner: Uuid,
    pub config: SessionConfig,
}

#[derive(Default)]
pub struct Engineer {
    slot: Mutex<Option<LiveSession>>,
}

impl Engineer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `opts.owner`. A concurrent or existing session is
    /// torn down first; the last starter wins. Returns the session id so the
    /// caller can later clear exactly this session.
    pub async fn start(
        &self,
        opts: StartOptions,
    ) -> Result<(Uuid, Personality, mpsc::Receiver<SessionEvent>), EngineerError> {
        let chosen = personality::resolve(&opts.config);
        let instruction =
            personality::compose_instruction(&chosen, opts.config.custom_instructions.as_deref());

        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.take() {
            info!(owner = %old.owner, "tearing down previous voice session");
            old.teardown();
        }
        let (session, events) =
            LiveSession::connect(&opts.api_key, &instruction, &chosen, opts.owner).await?;
        let session_id = session.id;
        info!(owner = %opts.owner, personality = %chosen.id, "voice session active");
        *slot = Some(session);
        Ok((session_id, chosen, events))
    }

    /// Release the slot only if it still holds `session_id`; used when the
    /// model side terminates a session that may already have been replaced.
    pub async fn clear_session(&self, session_id: Uuid) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|s| s.id == session_id) {
            if let Some(session) = slot.take() {
                session.teardown();
            }
            true
        } else {
            false
        }
    }

    /// Stop whatever session is live. Returns its owner when one existed.
    pub async fn stop(&self) -> Option<Uuid> {
        let mut slot = self.slot.lock().await;
        slot.take().map(|session| {
            let owner = session.owner;
            session.teardown();
            info!(%owner, "voice session stopped");
            owner
        })
    }

    /// Stop only if `client` owns the live session (stop command, client
    /// disconnect).
    pub async fn stop_if_owner(&self, client: Uuid) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|s| s.owner == client) {
            if let Some(session) = slot.take() {
                session.teardown();
                info!(owner = %client, "voice session stopped");
            }
            true
        } else {
            false
        }
    }

    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn owner(&self) -> Option<Uuid> {
        self.slot.lock().await.as_ref().map(|s| s.owner)
    }

    pub async fn active_personality(&self) -> Option<Personality> {
        self.slot.lock().await.as_ref().map(|s| s.personality.clone())
    }

    /// Deliver callouts in order as complete user turns. Returns false when
    /// no session is live so the caller can fall back to text-only.
    pub async fn deliver_callouts(&self, callouts: &[Callout]) -> bool {
        let slot = self.slot.lock().await;
        let Some(session) = slot.as_ref() else {
            return false;
        };
        for callout in callouts {
            session.send_turn(personality::callout_turn(callout), true).await;
        }
        true
    }

    /// Background context turn; `turn_complete = false` so the model does
    /// not reply to it.
    pub async fn update_context(&self, snapshot: &Snapshot) {
        let slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            session.send_turn(personality::format_context(snapshot), false).await;
        }
    }

    /// Forward one driver-audio chunk, only from the owning client.
    pub async fn send_audio(&self, client: Uuid, chunk_b64: String) {
        let slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.owner == client {
                session.push_audio(chunk_b64);
            }
        }
    }

    /// End-of-utterance marker (push-to-talk release or mic close).
    pub async fn end_audio(&self, client: Uuid) {
        let slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.owner == client {
                session.end_audio();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_engineer_reports_inactive() {
        let engineer = Engineer::new();
        assert!(!engineer.is_active().await);
        assert!(engineer.owner().await.is_none());
        assert!(engineer.stop().await.is_none());
        assert!(!engineer.stop_if_owner(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn callouts_report_fallback_when_idle() {
        let engineer = Engineer::new();
        let delivered = engineer.deliver_callouts(&[]).await;
        assert!(!delivered, "no session means text fallback");
    }
}

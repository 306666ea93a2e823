use serde::{Deserialize, Serialize};

use crate::Verbosity;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    #[default]
    PushToTalk,
    AlwaysOpen,
}

/// A style bundle layered onto the fixed base instruction when a voice
/// session opens. `voice` is the provider's prebuilt voice name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub voice: String,
}

/// Client-supplied replacement for the built-in personalities. Style only;
/// the base instruction is never overridable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPersonality {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub voice: Option<String>,
}

/// Per-voice-session settings chosen by the client at start.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub personality_id: Option<String>,
    #[serde(default)]
    pub custom_personality: Option<CustomPersonality>,
    #[serde(default)]
    pub verbosity: Option<u8>,
    /// Free-text instructions appended after the personality prompt.
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub voice_mode: VoiceMode,
}

impl SessionConfig {
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity.map(Verbosity::new).unwrap_or_default()
    }
}

/// In-memory application configuration. Persisted encrypted at rest by the
/// config store; the key only ever exists in plaintext here.
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub engineer_enabled: bool,
}

/// `engineer:status` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineerStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality: Option<Personality>,
}

/// `config:state` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigState {
    pub api_key_hint: Option<String>,
    pub has_api_key: bool,
    pub engineer_enabled: bool,
    pub api_key_valid: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_defaults() {
        let cfg: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.verbosity().level(), 2);
        assert!(cfg.personality_id.is_none());
        assert_eq!(cfg.voice_mode, VoiceMode::PushToTalk);
    }

    #[test]
    fn session_config_parses_client_payload() {
        let cfg: SessionConfig = serde_json::from_value(serde_json::json!({
            "personalityId": "grace",
            "verbosity": 3,
            "customPersonality": {"name": "Bob", "prompt": "Gruff."}
        }))
        .unwrap();
        assert_eq!(cfg.personality_id.as_deref(), Some("grace"));
        assert_eq!(cfg.verbosity().level(), 3);
        assert_eq!(cfg.custom_personality.unwrap().name, "Bob");
    }

    #[test]
    fn config_state_wire_shape() {
        let s = ConfigState {
            api_key_hint: Some("AIza…abcd".into()),
            has_api_key: true,
            engineer_enabled: false,
            api_key_valid: None,
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["hasApiKey"], true);
        assert_eq!(v["engineerEnabled"], false);
        assert!(v["apiKeyValid"].is_null());
    }
}

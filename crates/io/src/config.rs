//! Persisted application configuration.
//!
//! One JSON file holding the engineer toggle and the voice-model API key.
//! The key is encrypted with AES-256-GCM under a key scrypt-derived from the
//! host identity, so a copied config file does not leak the credential. The
//! on-disk field is `iv:tag:ciphertext`, hex encoded.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use anyhow::anyhow;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use model::{AppConfig, ConfigState};

const SCRYPT_SALT: &[u8] = b"pitwall-config-v1";
const GCM_TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    engineer_enabled: bool,
}

struct Inner {
    config: AppConfig,
    /// Ciphertext as last persisted; an env-supplied key never touches it.
    stored_cipher: Option<String>,
}

/// Loaded once at startup; mutations are serialized by the config control
/// task and persisted immediately.
pub struct ConfigStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl ConfigStore {
    /// Never fails: an unreadable or corrupt file starts an empty config.
    pub fn load(path: PathBuf) -> Self {
        let mut config = AppConfig::default();
        let mut stored_cipher = None;
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<ConfigFile>(&text) {
                Ok(file) => {
                    config.engineer_enabled = file.engineer_enabled;
                    if let Some(cipher_text) = file.api_key {
                        match decrypt_value(&cipher_text) {
                            Ok(key) => {
                                config.api_key = Some(key);
                                stored_cipher = Some(cipher_text);
                            }
                            Err(e) => {
                                warn!(error = %e, "config key unreadable on this host, dropping it")
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, path = %path.display(), "corrupt config file, starting empty"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %path.display(), "config file unreadable, starting empty"),
        }
        Self { path, inner: Mutex::new(Inner { config, stored_cipher }) }
    }

    /// `GEMINI_API_KEY` overrides the stored key for this process only.
    pub fn apply_env_override(&self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                self.inner.lock().config.api_key = Some(key);
            }
        }
    }

    pub fn api_key(&self) -> Option<String> {
        self.inner.lock().config.api_key.clone()
    }

    pub fn engineer_enabled(&self) -> bool {
        self.inner.lock().config.engineer_enabled
    }

    pub fn set_api_key(&self, key: &str) -> Result<(), ConfigError> {
        let cipher_text = encrypt_value(key)?;
        let mut inner = self.inner.lock();
        inner.config.api_key = Some(key.to_string());
        inner.stored_cipher = Some(cipher_text);
        self.persist(&inner)
    }

    pub fn delete_key(&self) -> Result<(), ConfigError> {
        let mut inner = self.inner.lock();
        inner.config.api_key = None;
        inner.stored_cipher = None;
        self.persist(&inner)
    }

    pub fn set_engineer_enabled(&self, enabled: bool) -> Result<(), ConfigError> {
        let mut inner = self.inner.lock();
        inner.config.engineer_enabled = enabled;
        self.persist(&inner)
    }

    pub fn state(&self, api_key_valid: Option<bool>) -> ConfigState {
        let inner = self.inner.lock();
        ConfigState {
            api_key_hint: inner.config.api_key.as_deref().map(mask_key),
            has_api_key: inner.config.api_key.is_some(),
            engineer_enabled: inner.config.engineer_enabled,
            api_key_valid,
        }
    }

    fn persist(&self, inner: &Inner) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ConfigFile {
            api_key: inner.stored_cipher.clone(),
            engineer_enabled: inner.config.engineer_enabled,
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

/// First and last four characters, enough for the dashboard to recognize
/// the key without exposing it.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    } else {
        "••••".to_string()
    }
}

fn derive_key() -> Result<[u8; 32], ConfigError> {
    let material = format!(
        "{}:{}",
        whoami::fallible::hostname().unwrap_or_else(|_| "unknown-host".to_string()),
        whoami::username()
    );
    let params = scrypt::Params::new(14, 8, 1, 32).map_err(|e| ConfigError::Crypto(e.to_string()))?;
    let mut key = [0u8; 32];
    scrypt::scrypt(material.as_bytes(), SCRYPT_SALT, &params, &mut key)
        .map_err(|e| ConfigError::Crypto(e.to_string()))?;
    Ok(key)
}

fn encrypt_value(plain: &str) -> Result<String, ConfigError> {
    let key = derive_key()?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plain.as_bytes())
        .map_err(|_| ConfigError::Crypto("encryption failed".into()))?;
    let (body, tag) = sealed.split_at(sealed.len() - GCM_TAG_LEN);
    Ok(format!("{}:{}:{}", hex::encode(nonce), hex::encode(tag), hex::encode(body)))
}

fn decrypt_value(stored: &str) -> anyhow::Result<String> {
    let mut parts = stored.split(':');
    let (iv, tag, body) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(tag), Some(body), None) => (iv, tag, body),
        _ => return Err(anyhow!("expected iv:tag:ciphertext")),
    };
    let iv = hex::decode(iv)?;
    let tag = hex::decode(tag)?;
    if iv.len() != 12 || tag.len() != GCM_TAG_LEN {
        return Err(anyhow!("bad iv or tag length"));
    }
    let mut sealed = hex::decode(body)?;
    sealed.extend_from_slice(&tag);

    let key = derive_key().map_err(|e| anyhow!(e.to_string()))?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plain = cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
        .map_err(|_| anyhow!("integrity check failed or wrong host"))?;
    Ok(String::from_utf8(plain)?)
}

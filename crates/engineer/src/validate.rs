//! Cheap API-key validation against the provider's model listing.

use serde::Serialize;
use tokio::time::Duration;

const MODELS_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyErrorKind {
    Empty,
    Invalid,
    PermissionDenied,
    Quota,
    Network,
    Unknown,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct KeyCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<KeyErrorKind>,
}

impl KeyCheck {
    fn ok() -> Self {
        Self { valid: true, error: None }
    }

    fn fail(kind: KeyErrorKind) -> Self {
        Self { valid: false, error: Some(kind) }
    }
}

/// Lists one model: not billed, fails fast, and exercises the same auth
/// path the live session uses.
pub async fn validate_key(api_key: &str) -> KeyCheck {
    if api_key.trim().is_empty() {
        return KeyCheck::fail(KeyErrorKind::Empty);
    }
    let client = reqwest::Client::new();
    let response = client
        .get(MODELS_ENDPOINT)
        .query(&[("key", api_key), ("pageSize", "1")])
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await;
    match response {
        Ok(resp) => match resp.status().as_u16() {
            200 => KeyCheck::ok(),
            400 | 401 => KeyCheck::fail(KeyErrorKind::Invalid),
            403 => KeyCheck::fail(KeyErrorKind::PermissionDenied),
            429 => KeyCheck::fail(KeyErrorKind::Quota),
            _ => KeyCheck::fail(KeyErrorKind::Unknown),
        },
        Err(_) => KeyCheck::fail(KeyErrorKind::Network),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_key_fails_without_touching_the_network() {
        let check = validate_key("   ").await;
        assert!(!check.valid);
        assert_eq!(check.error, Some(KeyErrorKind::Empty));
    }

    #[test]
    fn error_kinds_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(KeyErrorKind::PermissionDenied).unwrap(),
            "permission_denied"
        );
        let check = KeyCheck::fail(KeyErrorKind::Quota);
        let v = serde_json::to_value(check).unwrap();
        assert_eq!(v["valid"], false);
        assert_eq!(v["error"], "quota");
    }

    #[test]
    fn valid_check_omits_error() {
        let v = serde_json::to_value(KeyCheck::ok()).unwrap();
        assert_eq!(v["valid"], true);
        assert!(v.get("error").is_none());
    }
}

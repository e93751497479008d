//! Webhook transport contract and the provided HTTP implementation.
//!
//! The [`RevocationEngine`](crate::revocation::RevocationEngine) builds the
//! signed payload; the notifier only moves it. Signing is HMAC-SHA256 over
//! `"{timestamp}.{body}"` with the configured secret, so receivers can
//! verify both integrity and freshness from the headers alone.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use opentrade_types::{OpentradeError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A webhook body plus the headers that authenticate it.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub body: String,
    /// RFC 3339 timestamp the signature covers.
    pub timestamp: String,
    /// Canonical hash of the payload, sent as `x-trade-payload-hash`.
    pub payload_hash: String,
    /// Hex HMAC-SHA256 over `"{timestamp}.{body}"`, when a secret is set.
    pub signature: Option<String>,
    pub api_key: Option<String>,
}

impl SignedPayload {
    /// Assemble and (optionally) sign a payload.
    #[must_use]
    pub fn new(
        body: String,
        timestamp: String,
        payload_hash: String,
        signing_secret: Option<&str>,
        api_key: Option<String>,
    ) -> Self {
        let signature = signing_secret.map(|secret| {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .expect("HMAC-SHA256 accepts keys of any length");
            mac.update(format!("{timestamp}.{body}").as_bytes());
            hex::encode(mac.finalize().into_bytes())
        });
        Self {
            body,
            timestamp,
            payload_hash,
            signature,
            api_key,
        }
    }
}

/// Outbound POST transport for revocation notifications.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// Deliver `payload` to `url` within `timeout`. Returns the HTTP status
    /// code; transport failures map to `E_TIMEOUT` / `E_UNAVAILABLE`.
    async fn post(&self, url: &str, payload: &SignedPayload, timeout: Duration) -> Result<u16>;
}

/// The stock `reqwest`-backed notifier.
pub struct HttpWebhookNotifier {
    client: reqwest::Client,
}

impl HttpWebhookNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn post(&self, url: &str, payload: &SignedPayload, timeout: Duration) -> Result<u16> {
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header("content-type", "application/json")
            .header("x-trade-timestamp", &payload.timestamp)
            .header("x-trade-payload-hash", &payload.payload_hash);
        if let Some(signature) = &payload.signature {
            request = request.header("x-trade-signature", signature);
        }
        if let Some(api_key) = &payload.api_key {
            request = request.header("x-trade-api-key", api_key);
        }

        let response = request
            .body(payload.body.clone())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    OpentradeError::Timeout {
                        reason: "webhook request timed out".to_string(),
                    }
                } else {
                    OpentradeError::Unavailable {
                        reason: format!("webhook endpoint unreachable: {err}"),
                    }
                }
            })?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_covers_timestamp_and_body() {
        let a = SignedPayload::new(
            "{\"k\":1}".into(),
            "2026-01-01T00:00:00Z".into(),
            "0xabc".into(),
            Some("secret"),
            None,
        );
        let b = SignedPayload::new(
            "{\"k\":1}".into(),
            "2026-01-01T00:00:01Z".into(),
            "0xabc".into(),
            Some("secret"),
            None,
        );
        assert_ne!(a.signature, b.signature);
        assert_eq!(a.signature.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn unsigned_without_secret() {
        let payload = SignedPayload::new(
            "{}".into(),
            "2026-01-01T00:00:00Z".into(),
            "0xabc".into(),
            None,
            Some("key-1".into()),
        );
        assert!(payload.signature.is_none());
        assert_eq!(payload.api_key.as_deref(), Some("key-1"));
    }
}

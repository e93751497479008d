//! Outbound message redaction.
//!
//! Error messages can carry file paths, URLs, env assignments, and key
//! material picked up from dependencies. Everything that leaves the engine
//! as an [`ErrorBody`] passes through [`redact_message`] first; callers see
//! the taxonomy code and a scrubbed message, never raw internals.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use opentrade_types::{ErrorKind, OpentradeError};

struct Patterns {
    unix_path: Regex,
    windows_path: Regex,
    url: Regex,
    env_assignment: Regex,
    long_hex: Regex,
    jwt: Regex,
    bearer: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        unix_path: Regex::new(r"/[A-Za-z0-9_\-./]{2,}").expect("static pattern"),
        windows_path: Regex::new(r"[A-Z]:\\[A-Za-z0-9_\-.\\]+").expect("static pattern"),
        url: Regex::new(r"https?://\S+").expect("static pattern"),
        env_assignment: Regex::new(r"[A-Z_]{3,}=\S+").expect("static pattern"),
        long_hex: Regex::new(r"0x[a-fA-F0-9]{40,}").expect("static pattern"),
        jwt: Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+")
            .expect("static pattern"),
        bearer: Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]+").expect("static pattern"),
    })
}

/// Strip paths, URLs, env assignments, long hex strings, JWTs, and bearer
/// tokens from a message before it leaves the engine.
#[must_use]
pub fn redact_message(message: &str) -> String {
    let p = patterns();
    let redacted = p.url.replace_all(message, "[URL]");
    let redacted = p.jwt.replace_all(&redacted, "[TOKEN]");
    let redacted = p.bearer.replace_all(&redacted, "[TOKEN]");
    let redacted = p.long_hex.replace_all(&redacted, "[ADDRESS]");
    let redacted = p.env_assignment.replace_all(&redacted, "[ENV]");
    let redacted = p.windows_path.replace_all(&redacted, "[PATH]");
    let redacted = p.unix_path.replace_all(&redacted, "[PATH]");
    redacted.into_owned()
}

/// The wire shape of a failed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    /// Classify and scrub an internal error for the caller.
    #[must_use]
    pub fn from_error(err: &OpentradeError) -> Self {
        Self {
            error: err.kind(),
            message: redact_message(&err.to_string()),
        }
    }
}

impl From<OpentradeError> for ErrorBody {
    fn from(err: OpentradeError) -> Self {
        Self::from_error(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_paths_and_urls() {
        let message = "open /var/lib/opentrade/offers.json failed while posting to https://hooks.example/revoke?key=abc";
        let redacted = redact_message(message);
        assert!(!redacted.contains("/var/lib"));
        assert!(!redacted.contains("hooks.example"));
        assert!(redacted.contains("[PATH]"));
        assert!(redacted.contains("[URL]"));
    }

    #[test]
    fn strips_hex_secrets_and_jwts() {
        let hex = format!("0x{}", "ab".repeat(32));
        let message = format!("signer {hex} rejected eyJhbGciOi.eyJzdWIiOi.c2lnbmF0dXJl");
        let redacted = redact_message(&message);
        assert!(!redacted.contains(&hex));
        assert!(redacted.contains("[ADDRESS]"));
        assert!(redacted.contains("[TOKEN]"));
    }

    #[test]
    fn strips_env_assignments() {
        let redacted = redact_message("spawn failed: RPC_URL=https://rpc.example API_KEY=s3cret");
        assert!(!redacted.contains("s3cret"));
        assert!(redacted.contains("[ENV]"));
    }

    #[test]
    fn short_hashes_survive() {
        // Entity hashes are 32 bytes (64 hex chars) and are redacted; short
        // ids in messages are not.
        let redacted = redact_message("offer abc123 not found");
        assert_eq!(redacted, "offer abc123 not found");
    }

    #[test]
    fn error_body_keeps_taxonomy_code() {
        let err = OpentradeError::Unavailable {
            reason: "rpc https://rpc.example:8545 down".to_string(),
        };
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.error, ErrorKind::Unavailable);
        assert!(body.message.starts_with("E_UNAVAILABLE"));
        assert!(!body.message.contains("rpc.example"));
    }
}

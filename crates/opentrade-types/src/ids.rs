//! Globally unique identifiers used throughout OpenTrade.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting.
//! `ActorId` is the exception: it is an opaque participant address whose
//! canonical form is the hex-encoded ed25519 public key of the actor.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUIDv7-backed entity identifier with the standard surface.
macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Extract the embedded timestamp (milliseconds since UNIX epoch).
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                let bytes = self.0.as_bytes();
                u64::from_be_bytes([
                    0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
                ])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if $prefix.is_empty() {
                    write!(f, "{}", self.0)
                } else {
                    write!(f, "{}:{}", $prefix, self.0)
                }
            }
        }
    };
}

entity_id!(
    /// Globally unique offer identifier.
    OfferId,
    ""
);
entity_id!(
    /// Globally unique order identifier.
    OrderId,
    ""
);
entity_id!(
    /// Consent record identifier (1:1 with an order).
    ConsentId,
    ""
);
entity_id!(
    /// Delivery record identifier.
    DeliveryId,
    ""
);
entity_id!(
    /// Escrow settlement identifier (1:1 with an order).
    SettlementId,
    ""
);
entity_id!(
    /// Dispute identifier.
    DisputeId,
    ""
);
entity_id!(
    /// Identifier of a single piece of dispute evidence.
    EvidenceId,
    ""
);
entity_id!(
    /// Published resource identifier.
    ResourceId,
    ""
);
entity_id!(
    /// Lease identifier.
    LeaseId,
    "lease"
);
entity_id!(
    /// Usage-ledger entry identifier.
    LedgerEntryId,
    ""
);
entity_id!(
    /// Reward grant identifier.
    RewardId,
    ""
);
entity_id!(
    /// Revocation job identifier.
    RevocationJobId,
    "job"
);
entity_id!(
    /// Audit event identifier.
    AuditEventId,
    ""
);

// ---------------------------------------------------------------------------
// ActorId
// ---------------------------------------------------------------------------

/// A marketplace participant address.
///
/// The canonical form is the lowercase hex encoding of the actor's ed25519
/// public key (64 hex chars). Opaque operator-assigned ids are also accepted;
/// those simply cannot pass signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive canonical form used for actor comparisons.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.0.trim().to_ascii_lowercase()
    }

    #[must_use]
    pub fn matches(&self, other: &ActorId) -> bool {
        self.normalized() == other.normalized()
    }

    /// Parse the address as an ed25519 verifying key, if it is one.
    #[must_use]
    pub fn verifying_key(&self) -> Option<ed25519_dalek::VerifyingKey> {
        let bytes = hex::decode(self.normalized().trim_start_matches("0x")).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes).ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for ActorId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for ActorId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actor id for events emitted by background components rather than callers.
#[must_use]
pub fn system_actor(component: &str) -> ActorId {
    ActorId::new(format!("system:{component}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_id_uniqueness() {
        let a = OfferId::new();
        let b = OfferId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn order_id_ordering() {
        let a = OrderId::new();
        let b = OrderId::new();
        assert!(a < b);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn id_timestamp_extraction() {
        let before = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let id = OrderId::new();
        let after = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let ts = id.timestamp_ms();
        assert!(
            ts >= before && ts <= after,
            "ts={ts}, before={before}, after={after}"
        );
    }

    #[test]
    fn lease_id_display_prefix() {
        let id = LeaseId::new();
        assert!(format!("{id}").starts_with("lease:"));
    }

    #[test]
    fn actor_id_normalization() {
        let a = ActorId::new("0xABCDEF");
        let b = ActorId::new(" 0xabcdef");
        assert!(a.matches(&b));
    }

    #[test]
    fn actor_id_rejects_non_key_material() {
        let a = ActorId::new("operator-7");
        assert!(a.verifying_key().is_none());
    }

    #[test]
    fn actor_id_parses_ed25519_key() {
        use ed25519_dalek::SigningKey;
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let hex_key = hex::encode(signing.verifying_key().as_bytes());
        let actor = ActorId::new(hex_key);
        assert!(actor.verifying_key().is_some());
    }

    #[test]
    fn system_actor_format() {
        assert_eq!(system_actor("reward-poller").as_str(), "system:reward-poller");
    }

    #[test]
    fn serde_roundtrips() {
        let oid = OfferId::new();
        let json = serde_json::to_string(&oid).unwrap();
        let back: OfferId = serde_json::from_str(&json).unwrap();
        assert_eq!(oid, back);

        let actor = ActorId::new("0xfeed");
        let json = serde_json::to_string(&actor).unwrap();
        let back: ActorId = serde_json::from_str(&json).unwrap();
        assert_eq!(actor, back);
    }
}

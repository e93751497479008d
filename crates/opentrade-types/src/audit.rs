//! Audit trail model: append-only, hash-carrying lifecycle events.
//!
//! Events are never mutated after being written; the log itself is the
//! tamper-evidence mechanism. Anchoring attaches an external-ledger receipt
//! to the event details when it succeeds and queues a [`PendingAnchor`]
//! when it does not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActorId, AuditEventId};

/// Every lifecycle moment the engine records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    OfferCreated,
    OfferPublished,
    OfferUpdated,
    OfferClosed,
    OrderCreated,
    OrderCancelled,
    PaymentLocked,
    ConsentGranted,
    ConsentRevoked,
    DeliveryIssued,
    DeliveryRevoked,
    DeliveryCompleted,
    SettlementReleased,
    SettlementRefunded,
    ResourcePublished,
    ResourceUnpublished,
    LeaseIssued,
    LeaseRevoked,
    LeaseExpired,
    LedgerAppended,
    DisputeOpened,
    DisputeEvidenceSubmitted,
    DisputeResolved,
    DisputeRejected,
    RewardCreated,
    RewardClaimIssued,
    RewardStatusUpdated,
    RewardCancelled,
    RevocationRetry,
    RevocationSucceeded,
    RevocationFailed,
    RepairRetry,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).expect("plain enum");
        write!(f, "{}", json.trim_matches('"'))
    }
}

/// One appended audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub kind: AuditKind,
    /// Id of the entity the event refers to (offer, order, job, ...).
    pub ref_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    /// True when the event's details carry an anchoring error.
    #[must_use]
    pub fn anchor_failed(&self) -> bool {
        self.details
            .as_ref()
            .and_then(|d| d.get("anchor_error"))
            .is_some_and(serde_json::Value::is_string)
    }
}

/// A hash whose external anchoring is still outstanding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAnchor {
    /// Idempotency key for the anchor attempt (e.g. `offer:<id>`).
    pub anchor_id: String,
    pub payload_hash: String,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&AuditKind::SettlementReleased).unwrap();
        assert_eq!(json, "\"settlement_released\"");
        assert_eq!(format!("{}", AuditKind::SettlementReleased), "settlement_released");
    }

    #[test]
    fn anchor_failed_detection() {
        let mut event = AuditEvent {
            id: AuditEventId::new(),
            kind: AuditKind::OfferCreated,
            ref_id: "o1".into(),
            hash: Some("0xabc".into()),
            actor: None,
            timestamp: Utc::now(),
            details: Some(json!({"anchor_error": "rpc down"})),
        };
        assert!(event.anchor_failed());
        event.details = Some(json!({"anchor": {"tx": "0x1", "network": "base"}}));
        assert!(!event.anchor_failed());
        event.details = None;
        assert!(!event.anchor_failed());
    }
}

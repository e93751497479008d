//! Dispute model: a contested order, its evidence, and its ruling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::{ActorId, DisputeId, EvidenceId, OrderId};

/// Lifecycle status of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Opened,
    EvidenceSubmitted,
    Resolved,
    Rejected,
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "OPENED"),
            Self::EvidenceSubmitted => write!(f, "EVIDENCE_SUBMITTED"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// The ruling attached to a resolved dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    /// Escrow released to the payees.
    Release,
    /// Escrow refunded to the payer.
    Refund,
    /// Split ruling: released, but to an adjusted payee set.
    Partial,
}

impl std::fmt::Display for DisputeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Release => write!(f, "RELEASE"),
            Self::Refund => write!(f, "REFUND"),
            Self::Partial => write!(f, "PARTIAL"),
        }
    }
}

/// Who arbitrates the dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitratorType {
    Platform,
    Community,
    Onchain,
}

/// One piece of submitted evidence. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeEvidence {
    pub evidence_id: EvidenceId,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub hash: String,
    pub submitted_at: DateTime<Utc>,
    pub actor: ActorId,
}

/// A contested order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub dispute_id: DisputeId,
    pub order_id: OrderId,
    pub initiator: ActorId,
    pub respondent: ActorId,
    pub arbitrator_type: ArbitratorType,
    pub reason: String,
    pub status: DisputeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<DisputeResolution>,
    pub evidence: Vec<DisputeEvidence>,
    pub dispute_hash: String,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct DisputeIdentity<'a> {
    dispute_id: &'a DisputeId,
    order_id: &'a OrderId,
    initiator: &'a ActorId,
    respondent: &'a ActorId,
    reason: &'a str,
    status: DisputeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<DisputeResolution>,
    opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Open a fresh dispute between two parties.
    #[must_use]
    pub fn open(
        order_id: OrderId,
        initiator: ActorId,
        respondent: ActorId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        let mut dispute = Self {
            dispute_id: DisputeId::new(),
            order_id,
            initiator,
            respondent,
            arbitrator_type: ArbitratorType::Platform,
            reason,
            status: DisputeStatus::Opened,
            resolution: None,
            evidence: Vec::new(),
            dispute_hash: String::new(),
            opened_at: now,
            resolved_at: None,
            updated_at: now,
        };
        dispute.refresh_hash();
        dispute
    }

    /// Recompute `dispute_hash` from the current ruling-relevant fields.
    pub fn refresh_hash(&mut self) {
        self.dispute_hash = hash_canonical(&DisputeIdentity {
            dispute_id: &self.dispute_id,
            order_id: &self.order_id,
            initiator: &self.initiator,
            respondent: &self.respondent,
            reason: &self.reason,
            status: self.status,
            resolution: self.resolution,
            opened_at: self.opened_at,
            resolved_at: self.resolved_at,
        });
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status,
            DisputeStatus::Resolved | DisputeStatus::Rejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_dispute() -> Dispute {
        Dispute::open(
            OrderId::new(),
            ActorId::new("buyer"),
            ActorId::new("seller"),
            "asset mismatch".into(),
            Utc::now(),
        )
    }

    #[test]
    fn open_starts_opened() {
        let dispute = make_dispute();
        assert_eq!(dispute.status, DisputeStatus::Opened);
        assert!(!dispute.is_closed());
        assert!(dispute.dispute_hash.starts_with("0x"));
    }

    #[test]
    fn hash_tracks_resolution() {
        let mut dispute = make_dispute();
        let before = dispute.dispute_hash.clone();
        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = Some(DisputeResolution::Refund);
        dispute.resolved_at = Some(Utc::now());
        dispute.refresh_hash();
        assert_ne!(dispute.dispute_hash, before);
        assert!(dispute.is_closed());
    }

    #[test]
    fn rejected_is_closed() {
        let mut dispute = make_dispute();
        dispute.status = DisputeStatus::Rejected;
        assert!(dispute.is_closed());
    }
}

//! Revocation job model: durable, at-least-once webhook delivery of an
//! access withdrawal.
//!
//! Jobs are born when a live revocation webhook fails and are retried by the
//! sweep with bounded attempts. Failed jobs stay in the store — they are the
//! operator's evidence and can be re-queued, never silently deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::{ConsentId, DeliveryId, OfferId, OrderId, RevocationJobId};

/// Lifecycle status of a revocation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationJobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RevocationJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A queued revocation notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationJob {
    pub job_id: RevocationJobId,
    pub delivery_id: DeliveryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<OfferId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<ConsentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub payload_hash: String,
    pub attempts: u32,
    pub status: RevocationJobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct JobIdentity<'a> {
    delivery_id: &'a DeliveryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<&'a OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offer_id: Option<&'a OfferId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consent_id: Option<&'a ConsentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl RevocationJob {
    /// Queue a fresh job after one failed live attempt.
    #[must_use]
    pub fn queue(
        delivery_id: DeliveryId,
        order_id: Option<OrderId>,
        offer_id: Option<OfferId>,
        consent_id: Option<ConsentId>,
        reason: Option<String>,
        error: Option<String>,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let payload_hash = hash_canonical(&JobIdentity {
            delivery_id: &delivery_id,
            order_id: order_id.as_ref(),
            offer_id: offer_id.as_ref(),
            consent_id: consent_id.as_ref(),
            reason: reason.as_deref(),
        });
        Self {
            job_id: RevocationJobId::new(),
            delivery_id,
            order_id,
            offer_id,
            consent_id,
            reason,
            payload_hash,
            attempts: 1,
            status: RevocationJobStatus::Pending,
            last_error: error,
            next_attempt_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RevocationJobStatus::Pending && self.next_attempt_at <= now
    }
}

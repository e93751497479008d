//! Consent model: the buyer's signed agreement to an order's usage scope.
//!
//! A consent is 1:1 with an order. The signature covers the canonical
//! consent message (order, offer, buyer, scope) and is verified against the
//! buyer's ed25519 key before the consent is accepted. Revocation is
//! one-way and triggers downstream delivery revocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{canonicalize, hash_canonical};
use crate::{ActorId, ConsentId, OfferId, OrderId};

/// Lifecycle status of a consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Granted,
    Revoked,
}

impl std::fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted => write!(f, "GRANTED"),
            Self::Revoked => write!(f, "REVOKED"),
        }
    }
}

/// The scope the buyer consented to; must fit inside the offer's
/// `usage_scope`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentScope {
    pub purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
}

/// The message a buyer signs when granting consent.
#[derive(Serialize)]
pub struct ConsentMessage<'a> {
    pub order_id: &'a OrderId,
    pub offer_id: &'a OfferId,
    pub buyer: &'a ActorId,
    pub scope: &'a ConsentScope,
}

impl ConsentMessage<'_> {
    /// Canonical byte string the signature is verified against.
    #[must_use]
    pub fn canonical(&self) -> String {
        canonicalize(self)
    }
}

/// A granted (or revoked) consent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consent {
    pub consent_id: ConsentId,
    pub order_id: OrderId,
    pub scope: ConsentScope,
    /// Hex-encoded ed25519 signature over the canonical consent message.
    pub signature: String,
    pub status: ConsentStatus,
    pub consent_hash: String,
    pub granted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_hash: Option<String>,
}

#[derive(Serialize)]
struct RevokePayload<'a> {
    consent_id: &'a ConsentId,
    revoked_at: DateTime<Utc>,
    scope: &'a ConsentScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl Consent {
    /// Mark this consent revoked and compute the revocation hash. The caller
    /// runs the transition check first.
    pub fn revoke(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        self.revoke_hash = Some(hash_canonical(&RevokePayload {
            consent_id: &self.consent_id,
            revoked_at: now,
            scope: &self.scope,
            reason: reason.as_deref(),
        }));
        self.status = ConsentStatus::Revoked;
        self.revoked_at = Some(now);
        self.revoke_reason = reason;
    }
}

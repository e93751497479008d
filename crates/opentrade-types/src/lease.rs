//! Lease model: a time-bounded access grant against a published resource.
//!
//! Leases move `active -> revoked | expired` and never back: a consumer who
//! needs access again gets a new lease, not a resurrected one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::delivery::PayloadRef;
use crate::resource::ResourceKind;
use crate::{ActorId, ConsentId, DeliveryId, LeaseId, OrderId, ResourceId};

/// Lifecycle status of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Revoked,
    Expired,
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Revoked => write!(f, "REVOKED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A granted access window on one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: LeaseId,
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub provider: ActorId,
    pub consumer: ActorId,
    /// The synthetic order written when the lease was issued.
    pub order_id: OrderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<ConsentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<DeliveryId>,
    /// `sha256:` digest of the bearer token; the raw token is returned to
    /// the caller exactly once and never persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_ref: Option<PayloadRef>,
    pub status: LeaseStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<Decimal>,
}

impl Lease {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Active and not past its expiry.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LeaseStatus::Active && !self.is_expired_at(now)
    }

    #[must_use]
    pub fn party(&self, actor: &ActorId) -> bool {
        actor.matches(&self.provider) || actor.matches(&self.consumer)
    }
}

/// Filter for lease listings.
#[derive(Debug, Clone, Default)]
pub struct LeaseFilter {
    pub resource_id: Option<ResourceId>,
    pub provider: Option<ActorId>,
    pub consumer: Option<ActorId>,
    pub status: Option<LeaseStatus>,
    pub limit: Option<usize>,
}

impl LeaseFilter {
    #[must_use]
    pub fn matches(&self, lease: &Lease) -> bool {
        if self.resource_id.is_some_and(|id| id != lease.resource_id) {
            return false;
        }
        if let Some(provider) = &self.provider {
            if !provider.matches(&lease.provider) {
                return false;
            }
        }
        if let Some(consumer) = &self.consumer {
            if !consumer.matches(&lease.consumer) {
                return false;
            }
        }
        if self.status.is_some_and(|s| s != lease.status) {
            return false;
        }
        true
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Lease {
    pub fn dummy(resource_id: ResourceId, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            lease_id: LeaseId::new(),
            resource_id,
            kind: ResourceKind::Model,
            provider: ActorId::new("provider-1"),
            consumer: ActorId::new("consumer-1"),
            order_id: OrderId::new(),
            consent_id: None,
            delivery_id: None,
            access_token_hash: None,
            access_ref: None,
            status: LeaseStatus::Active,
            issued_at: now,
            expires_at: now + ttl,
            revoked_at: None,
            max_cost: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn live_until_expiry() {
        let lease = Lease::dummy(ResourceId::new(), Duration::hours(1));
        assert!(lease.is_live_at(Utc::now()));
        assert!(!lease.is_live_at(Utc::now() + Duration::hours(2)));
    }

    #[test]
    fn revoked_lease_is_not_live() {
        let mut lease = Lease::dummy(ResourceId::new(), Duration::hours(1));
        lease.status = LeaseStatus::Revoked;
        assert!(!lease.is_live_at(Utc::now()));
    }

    #[test]
    fn party_matches_either_side() {
        let lease = Lease::dummy(ResourceId::new(), Duration::hours(1));
        assert!(lease.party(&ActorId::new("PROVIDER-1")));
        assert!(lease.party(&ActorId::new("consumer-1")));
        assert!(!lease.party(&ActorId::new("stranger")));
    }

    #[test]
    fn filter_by_status() {
        let lease = Lease::dummy(ResourceId::new(), Duration::hours(1));
        let active = LeaseFilter {
            status: Some(LeaseStatus::Active),
            ..LeaseFilter::default()
        };
        let expired = LeaseFilter {
            status: Some(LeaseStatus::Expired),
            ..LeaseFilter::default()
        };
        assert!(active.matches(&lease));
        assert!(!expired.matches(&lease));
    }
}

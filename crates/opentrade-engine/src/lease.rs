//! Lease operations: issue, revoke, get, list, expire sweep.
//!
//! Issuing a lease writes the whole synthetic trade spine — order, consent,
//! delivery, lease — in one transaction, mints a bearer token that is
//! returned exactly once, and persists only the token's digest.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_store::TradeStore;
use opentrade_types::canonical::{hash_access_token, hash_canonical};
use opentrade_types::{
    ensure_transition, ActorId, AuditKind, Consent, ConsentId, ConsentMessage, ConsentScope,
    ConsentStatus, Delivery, DeliveryId, DeliveryPayload, DeliveryStatus, DeliveryType, Lease,
    LeaseFilter, LeaseId, LeaseStatus, OpentradeError, Order, OrderId, OrderStatus, Result,
};

use crate::access::{assert_access, assert_actor_match, demand_actor, Action};
use crate::engine::MarketEngine;

const MIN_TTL_MS: i64 = 10_000;
const MAX_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;
const SWEEP_DEFAULT_LIMIT: usize = 200;
const SWEEP_MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseIssueParams {
    pub actor: Option<ActorId>,
    pub resource_id: opentrade_types::ResourceId,
    pub consumer: ActorId,
    pub ttl_ms: i64,
    pub max_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseRevokeParams {
    pub actor: Option<ActorId>,
    pub lease_id: LeaseId,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseGetParams {
    pub actor: Option<ActorId>,
    pub lease_id: LeaseId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaseExpireSweepParams {
    pub actor: Option<ActorId>,
    /// Sweep reference time; defaults to the wall clock.
    pub now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dry_run: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaseIssueReceipt {
    pub lease_id: LeaseId,
    pub order_id: OrderId,
    pub consent_id: ConsentId,
    pub delivery_id: DeliveryId,
    pub expires_at: DateTime<Utc>,
    /// The bearer token. Returned here once; only its digest is stored.
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaseRevokeReceipt {
    pub lease_id: LeaseId,
    pub status: LeaseStatus,
    pub revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpireSweepReport {
    pub processed: u32,
    pub expired: u32,
    pub errors: u32,
}

impl MarketEngine {
    /// `lease.issue`
    pub async fn lease_issue(&self, params: LeaseIssueParams) -> Result<LeaseIssueReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let actor = demand_actor(params.actor.as_ref())?.clone();

        if !(MIN_TTL_MS..=MAX_TTL_MS).contains(&params.ttl_ms) {
            return Err(OpentradeError::invalid(
                "ttl_ms must be between 10 seconds and 7 days",
            ));
        }
        if params.consumer.is_empty() {
            return Err(OpentradeError::invalid("consumer is required"));
        }
        if params.max_cost.is_some_and(|cost| cost < Decimal::ZERO) {
            return Err(OpentradeError::invalid("max_cost must not be negative"));
        }

        let resource = self.load_resource(params.resource_id)?;
        if !resource.is_published() {
            return Err(OpentradeError::conflict("resource is not published"));
        }
        let offer = self.load_offer(resource.offer_id)?;
        assert_actor_match(
            &self.config.access,
            Some(&actor),
            &params.consumer,
            "consumer",
        )?;

        let now = Utc::now();
        let expires_at = now + Duration::milliseconds(params.ttl_ms);

        // The synthetic order walks the normal graph up to delivery_ready.
        let mut order = Order::new(
            offer.offer_id,
            params.consumer.clone(),
            1,
            offer.price,
            &offer.currency,
            now,
        );
        for next in [
            OrderStatus::PaymentLocked,
            OrderStatus::ConsentGranted,
            OrderStatus::DeliveryReady,
        ] {
            ensure_transition(order.status, next)?;
            order.status = next;
        }
        order.updated_at = now;

        let scope = ConsentScope {
            purpose: offer.usage_scope.purpose.clone(),
            duration_days: offer.usage_scope.duration_days,
        };
        let consent_hash = hash_canonical(&ConsentMessage {
            order_id: &order.order_id,
            offer_id: &offer.offer_id,
            buyer: &params.consumer,
            scope: &scope,
        });
        let consent = Consent {
            consent_id: ConsentId::new(),
            order_id: order.order_id,
            scope,
            signature: "lease_issue".to_string(),
            status: ConsentStatus::Granted,
            consent_hash,
            granted_at: now,
            revoked_at: None,
            revoke_reason: None,
            revoke_hash: None,
        };

        let access_token = format!(
            "tok_{:032x}{:032x}",
            rand::random::<u128>(),
            rand::random::<u128>()
        );
        let access_token_hash = hash_access_token(&access_token);

        let payload = DeliveryPayload::Api {
            access_token: access_token.clone(),
            quota: None,
        };
        let (inline_payload, payload_ref) = match &self.blob {
            Some(blob) => {
                let key = format!("lease-{:032x}", rand::random::<u128>());
                let bytes = serde_json::to_vec(&payload)?;
                (None, Some(blob.put(&key, &bytes).await?))
            }
            None => (Some(payload), None),
        };
        let delivery = Delivery::issue(
            order.order_id,
            DeliveryType::Api,
            inline_payload,
            payload_ref.clone(),
            now,
        );

        let lease = Lease {
            lease_id: LeaseId::new(),
            resource_id: resource.resource_id,
            kind: resource.kind,
            provider: resource.provider.clone(),
            consumer: params.consumer,
            order_id: order.order_id,
            consent_id: Some(consent.consent_id),
            delivery_id: Some(delivery.delivery_id),
            access_token_hash: Some(access_token_hash.clone()),
            access_ref: payload_ref,
            status: LeaseStatus::Active,
            issued_at: now,
            expires_at,
            revoked_at: None,
            max_cost: params.max_cost,
        };

        // Atomic: the spine persists together or not at all.
        self.store.transaction(&mut || {
            self.store.save_order(&order)?;
            self.store.save_consent(&consent)?;
            self.store.save_delivery(&delivery)?;
            self.store.save_lease(&lease)
        })?;

        self.lease_cache
            .lock()
            .expect("lease cache poisoned")
            .insert(lease.clone(), now);

        self.audit
            .record_with_anchor(
                AuditKind::LeaseIssued,
                lease.lease_id.to_string(),
                &access_token_hash,
                &format!("lease:{}", lease.lease_id),
                Some(actor),
                Some(json!({
                    "resource_id": lease.resource_id,
                    "order_id": lease.order_id,
                    "delivery_id": lease.delivery_id,
                    "access_token_hash": &access_token_hash,
                })),
            )
            .await?;

        Ok(LeaseIssueReceipt {
            lease_id: lease.lease_id,
            order_id: order.order_id,
            consent_id: consent.consent_id,
            delivery_id: delivery.delivery_id,
            expires_at,
            access_token,
        })
    }

    /// `lease.revoke` — either party may revoke; the lease and its live
    /// delivery go down together, then the webhook path runs.
    pub async fn lease_revoke(&self, params: LeaseRevokeParams) -> Result<LeaseRevokeReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let actor = demand_actor(params.actor.as_ref())?.clone();

        let mut lease = self.load_lease(params.lease_id)?;
        if lease.status == LeaseStatus::Expired {
            return Err(OpentradeError::Expired {
                reason: "lease already expired".to_string(),
            });
        }
        if !lease.party(&actor) {
            return Err(OpentradeError::Forbidden {
                reason: "actor does not match provider or consumer".to_string(),
            });
        }
        ensure_transition(lease.status, LeaseStatus::Revoked)?;

        let now = Utc::now();
        let reason = params
            .reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or("lease_revoked")
            .to_string();
        lease.status = LeaseStatus::Revoked;
        lease.revoked_at = Some(now);

        let mut delivery = match lease.delivery_id {
            Some(id) => self.store.get_delivery(id)?,
            None => None,
        };
        if let Some(delivery) = &mut delivery {
            if delivery.is_live() {
                ensure_transition(delivery.status, DeliveryStatus::Revoked)?;
                delivery.revoke(reason.clone(), now);
            }
        }

        self.store.transaction(&mut || {
            self.store.save_lease(&lease)?;
            if let Some(delivery) = &delivery {
                self.store.save_delivery(delivery)?;
            }
            Ok(())
        })?;

        self.lease_cache
            .lock()
            .expect("lease cache poisoned")
            .invalidate(lease.lease_id);

        if let Some(delivery) = delivery
            .as_ref()
            .filter(|d| d.status == DeliveryStatus::Revoked)
        {
            let order = self.store.get_order(lease.order_id)?;
            let offer = match &order {
                Some(order) => self.store.get_offer(order.offer_id)?,
                None => None,
            };
            let consent = match lease.consent_id {
                Some(id) => self.store.get_consent(id)?,
                None => None,
            };
            self.notify_revocation(
                delivery,
                order.as_ref(),
                offer.as_ref(),
                consent.as_ref(),
                &reason,
            )
            .await?;
        }

        self.audit.record(
            AuditKind::LeaseRevoked,
            lease.lease_id.to_string(),
            lease.access_token_hash.clone(),
            Some(actor),
            Some(json!({ "resource_id": lease.resource_id, "reason": reason })),
        )?;

        Ok(LeaseRevokeReceipt {
            lease_id: lease.lease_id,
            status: lease.status,
            revoked_at: now,
        })
    }

    /// `lease.get` — parties only, when an actor is supplied.
    pub fn lease_get(&self, params: LeaseGetParams) -> Result<Option<Lease>> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Read)?;
        let Some(lease) = self.store.get_lease(params.lease_id)? else {
            return Ok(None);
        };
        if let Some(actor) = &params.actor {
            if !lease.party(actor) {
                return Err(OpentradeError::Forbidden {
                    reason: "actor does not match provider or consumer".to_string(),
                });
            }
        }
        Ok(Some(lease))
    }

    /// `lease.list`
    pub fn lease_list(&self, filter: &LeaseFilter) -> Result<Vec<Lease>> {
        self.store.list_leases(filter)
    }

    /// `lease.expireSweep` — expire due active leases. `dry_run` counts
    /// without mutating; `limit` bounds one pass.
    pub fn lease_expire_sweep(&self, params: LeaseExpireSweepParams) -> Result<ExpireSweepReport> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;

        let now = params.now.unwrap_or_else(Utc::now);
        let limit = params
            .limit
            .unwrap_or(SWEEP_DEFAULT_LIMIT)
            .min(SWEEP_MAX_LIMIT);

        let due: Vec<Lease> = self
            .store
            .list_leases(&LeaseFilter {
                status: Some(LeaseStatus::Active),
                ..LeaseFilter::default()
            })?
            .into_iter()
            .filter(|lease| lease.is_expired_at(now))
            .take(limit)
            .collect();

        let mut report = ExpireSweepReport::default();
        for mut lease in due {
            report.processed += 1;
            let result = (|| -> Result<()> {
                if !params.dry_run {
                    ensure_transition(lease.status, LeaseStatus::Expired)?;
                    lease.status = LeaseStatus::Expired;
                    self.store.save_lease(&lease)?;
                    self.lease_cache
                        .lock()
                        .expect("lease cache poisoned")
                        .invalidate(lease.lease_id);
                }
                self.audit.record(
                    AuditKind::LeaseExpired,
                    lease.lease_id.to_string(),
                    lease.access_token_hash.clone(),
                    None,
                    Some(json!({ "resource_id": lease.resource_id, "dry_run": params.dry_run })),
                )?;
                Ok(())
            })();
            match result {
                Ok(()) => report.expired += 1,
                Err(err) => {
                    tracing::warn!(target: "opentrade::lease", lease_id = %lease.lease_id, error = %err, "expire sweep entry failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}

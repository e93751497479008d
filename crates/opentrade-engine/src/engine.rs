//! The engine root: one [`MarketEngine`] owns the store, the outbound
//! plumbing, and the configuration every handler consults.
//!
//! Handler methods live in the sibling modules (one per entity), all
//! following the same spine: access check, input validation, load,
//! hash re-derivation where applicable, transition check, persist
//! (transactional when more than one entity is written), audit.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use ed25519_dalek::SigningKey;
use serde_json::json;

use opentrade_outbound::{
    AuditPipeline, ChainAdapter, EncryptedBlobStore, RevocationContext, RevocationEngine,
    RevocationOutcome, WebhookNotifier,
};
use opentrade_store::TradeStore;
use opentrade_types::{
    AuditKind, Consent, ConsentId, Delivery, DeliveryId, Dispute, EngineConfig, Lease, LeaseId,
    Offer, OfferId, OpentradeError, Order, OrderId, Resource, ResourceId, Result, RevocationJob,
    RewardGrant, RewardId, Settlement,
};

use crate::cache::LeaseCache;

/// Default capacity of the in-memory lease cache.
const LEASE_CACHE_SIZE: usize = 1024;

/// The marketplace transaction engine.
///
/// Owns `Arc<dyn TradeStore>` exclusively for the lifetime of a request;
/// handlers hold transient in-memory copies of entities only for the
/// duration of one operation.
pub struct MarketEngine {
    pub(crate) store: Arc<dyn TradeStore>,
    pub(crate) config: EngineConfig,
    pub(crate) audit: Arc<AuditPipeline>,
    pub(crate) revocation: Arc<RevocationEngine>,
    pub(crate) blob: Option<Arc<dyn EncryptedBlobStore>>,
    pub(crate) signing_key: Option<SigningKey>,
    pub(crate) lease_cache: Mutex<LeaseCache>,
}

impl MarketEngine {
    /// Wire up an engine from its collaborators. `chain`, `notifier`, and
    /// `blob` are optional: absent ones degrade the corresponding outbound
    /// path to local-only behavior.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TradeStore>,
        chain: Option<Arc<dyn ChainAdapter>>,
        notifier: Option<Arc<dyn WebhookNotifier>>,
        blob: Option<Arc<dyn EncryptedBlobStore>>,
    ) -> Result<Self> {
        let audit = Arc::new(AuditPipeline::new(Arc::clone(&store), chain));
        let revocation = Arc::new(RevocationEngine::new(
            Arc::clone(&store),
            Arc::clone(&audit),
            config.revocation.clone(),
            notifier,
            blob.clone(),
        ));
        let signing_key = match &config.rewards.claim_signing_key {
            None => None,
            Some(raw) => Some(parse_signing_key(raw)?),
        };
        Ok(Self {
            store,
            config,
            audit,
            revocation,
            blob,
            signing_key,
            lease_cache: Mutex::new(LeaseCache::new(LEASE_CACHE_SIZE)),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TradeStore> {
        &self.store
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<AuditPipeline> {
        &self.audit
    }

    #[must_use]
    pub fn revocation(&self) -> &Arc<RevocationEngine> {
        &self.revocation
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- entity loading ----

    pub(crate) fn load_offer(&self, id: OfferId) -> Result<Offer> {
        self.store
            .get_offer(id)?
            .ok_or_else(|| OpentradeError::not_found("offer", id))
    }

    pub(crate) fn load_order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get_order(id)?
            .ok_or_else(|| OpentradeError::not_found("order", id))
    }

    pub(crate) fn load_consent(&self, id: ConsentId) -> Result<Consent> {
        self.store
            .get_consent(id)?
            .ok_or_else(|| OpentradeError::not_found("consent", id))
    }

    pub(crate) fn load_delivery(&self, id: DeliveryId) -> Result<Delivery> {
        self.store
            .get_delivery(id)?
            .ok_or_else(|| OpentradeError::not_found("delivery", id))
    }

    pub(crate) fn load_settlement_by_order(&self, order_id: OrderId) -> Result<Settlement> {
        self.store
            .get_settlement_by_order(order_id)?
            .ok_or_else(|| OpentradeError::not_found("settlement for order", order_id))
    }

    pub(crate) fn load_resource(&self, id: ResourceId) -> Result<Resource> {
        self.store
            .get_resource(id)?
            .ok_or_else(|| OpentradeError::not_found("resource", id))
    }

    pub(crate) fn load_lease(&self, id: LeaseId) -> Result<Lease> {
        self.store
            .get_lease(id)?
            .ok_or_else(|| OpentradeError::not_found("lease", id))
    }

    pub(crate) fn load_reward(&self, id: RewardId) -> Result<RewardGrant> {
        self.store
            .get_reward(id)?
            .ok_or_else(|| OpentradeError::not_found("reward", id))
    }

    pub(crate) fn find_dispute(
        &self,
        dispute_id: Option<opentrade_types::DisputeId>,
        order_id: Option<OrderId>,
    ) -> Result<Dispute> {
        if let Some(id) = dispute_id {
            return self
                .store
                .get_dispute(id)?
                .ok_or_else(|| OpentradeError::not_found("dispute", id));
        }
        if let Some(order_id) = order_id {
            return self
                .store
                .get_dispute_by_order(order_id)?
                .ok_or_else(|| OpentradeError::not_found("dispute for order", order_id));
        }
        Err(OpentradeError::invalid(
            "dispute_id or order_id is required",
        ))
    }

    // ---- revocation fan-out ----

    /// Fire the revocation webhook for a freshly revoked delivery. A failed
    /// post becomes a durable [`RevocationJob`] and an audit record; the
    /// caller's operation succeeds regardless.
    pub(crate) async fn notify_revocation(
        &self,
        delivery: &Delivery,
        order: Option<&Order>,
        offer: Option<&Offer>,
        consent: Option<&Consent>,
        reason: &str,
    ) -> Result<RevocationOutcome> {
        let mut wire = delivery.clone();
        if let Some(payload) = self.revocation.resolve_payload(delivery).await {
            wire.payload = Some(payload);
            wire.payload_ref = None;
        }
        let outcome = self
            .revocation
            .execute(&RevocationContext {
                delivery: wire,
                order: order.cloned(),
                offer: offer.cloned(),
                consent: consent.cloned(),
                reason: Some(reason.to_string()),
            })
            .await;

        if !outcome.ok {
            let now = Utc::now();
            let job = RevocationJob::queue(
                delivery.delivery_id,
                order.map(|o| o.order_id).or(Some(delivery.order_id)),
                offer.map(|o| o.offer_id),
                consent.map(|c| c.consent_id),
                Some(reason.to_string()),
                outcome.error.clone(),
                self.revocation.next_attempt_at(now),
                now,
            );
            self.store.save_revocation(&job)?;
            self.audit.record(
                AuditKind::RevocationRetry,
                job.job_id.to_string(),
                Some(job.payload_hash.clone()),
                None,
                Some(json!({
                    "delivery_id": delivery.delivery_id,
                    "attempts": job.attempts,
                    "next_attempt_at": job.next_attempt_at,
                })),
            )?;
        }
        Ok(outcome)
    }
}

fn parse_signing_key(raw: &str) -> Result<SigningKey> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x")).map_err(|_| {
        OpentradeError::invalid("rewards.claim_signing_key must be hex")
    })?;
    let seed: [u8; 32] = bytes.try_into().map_err(|_| {
        OpentradeError::invalid("rewards.claim_signing_key must be a 32-byte seed")
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

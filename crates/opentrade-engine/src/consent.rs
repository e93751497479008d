//! Consent operations: grant, revoke.
//!
//! Granting verifies the buyer's ed25519 signature over the canonical
//! consent message; revoking cascades into every live delivery of the
//! order and fires the revocation webhook per delivery.

use chrono::Utc;
use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_store::TradeStore;
use opentrade_types::canonical::hash_canonical;
use opentrade_types::{
    ensure_transition, ActorId, AuditKind, Consent, ConsentId, ConsentMessage, ConsentScope,
    ConsentStatus, Delivery, DeliveryStatus, OpentradeError, OrderId, OrderStatus, Result,
};

use crate::access::{assert_access, assert_actor_match, require_actor, Action};
use crate::engine::MarketEngine;

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentGrantParams {
    pub actor: Option<ActorId>,
    pub order_id: OrderId,
    /// Hex ed25519 signature over the canonical consent message.
    pub signature: String,
    pub scope: ConsentScope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsentRevokeParams {
    pub actor: Option<ActorId>,
    pub consent_id: ConsentId,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentReceipt {
    pub consent_id: ConsentId,
    pub consent_hash: String,
    pub status: ConsentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentRevokeReceipt {
    pub consent_id: ConsentId,
    pub revoke_hash: String,
    pub revoked_deliveries: Vec<opentrade_types::DeliveryId>,
}

impl MarketEngine {
    /// `consent.grant`
    pub async fn consent_grant(&self, params: ConsentGrantParams) -> Result<ConsentReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        if params.scope.purpose.trim().is_empty() {
            return Err(OpentradeError::invalid("scope.purpose is required"));
        }

        let mut order = self.load_order(params.order_id)?;
        ensure_transition(order.status, OrderStatus::ConsentGranted)?;

        let offer = self.load_offer(order.offer_id)?;
        if offer.usage_scope.purpose != params.scope.purpose {
            return Err(OpentradeError::invalid(
                "scope.purpose must match the offer's usage scope",
            ));
        }
        if let (Some(max), Some(requested)) =
            (offer.usage_scope.duration_days, params.scope.duration_days)
        {
            if requested > max {
                return Err(OpentradeError::invalid(
                    "scope.duration_days exceeds the offer's usage scope",
                ));
            }
        }
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &order.buyer,
            "order.buyer",
        )?;

        let message = ConsentMessage {
            order_id: &order.order_id,
            offer_id: &order.offer_id,
            buyer: &order.buyer,
            scope: &params.scope,
        };
        verify_consent_signature(&order.buyer, &message, &params.signature)?;

        let now = Utc::now();
        let consent = Consent {
            consent_id: ConsentId::new(),
            order_id: order.order_id,
            scope: params.scope,
            signature: params.signature,
            status: ConsentStatus::Granted,
            consent_hash: hash_canonical(&message),
            granted_at: now,
            revoked_at: None,
            revoke_reason: None,
            revoke_hash: None,
        };

        order.status = OrderStatus::ConsentGranted;
        order.updated_at = now;

        self.store.transaction(&mut || {
            self.store.save_consent(&consent)?;
            self.store.save_order(&order)
        })?;

        self.audit
            .record_with_anchor(
                AuditKind::ConsentGranted,
                consent.consent_id.to_string(),
                &consent.consent_hash,
                &format!("consent:{}", consent.consent_id),
                Some(order.buyer.clone()),
                Some(json!({ "scope": consent.scope })),
            )
            .await?;

        Ok(ConsentReceipt {
            consent_id: consent.consent_id,
            consent_hash: consent.consent_hash,
            status: consent.status,
        })
    }

    /// `consent.revoke` — one-way; also revokes every live delivery of the
    /// order and notifies the outside world per delivery.
    pub async fn consent_revoke(
        &self,
        params: ConsentRevokeParams,
    ) -> Result<ConsentRevokeReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut consent = self.load_consent(params.consent_id)?;
        ensure_transition(consent.status, ConsentStatus::Revoked)?;

        let mut order = self.store.get_order(consent.order_id)?;
        if let Some(order) = &order {
            assert_actor_match(
                &self.config.access,
                params.actor.as_ref(),
                &order.buyer,
                "order.buyer",
            )?;
        }

        let now = Utc::now();
        let reason = params
            .reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(str::to_string);
        let revoke_reason = reason.clone().unwrap_or_else(|| "consent_revoked".to_string());

        consent.revoke(reason.clone(), now);
        if let Some(order) = &mut order {
            ensure_transition(order.status, OrderStatus::ConsentRevoked)?;
            order.status = OrderStatus::ConsentRevoked;
            order.updated_at = now;
        }

        // Every live delivery of the order goes down with the consent.
        let mut revoked: Vec<Delivery> = Vec::new();
        for mut delivery in self.store.list_deliveries()? {
            if delivery.order_id != consent.order_id || !delivery.is_live() {
                continue;
            }
            ensure_transition(delivery.status, DeliveryStatus::Revoked)?;
            delivery.revoke(revoke_reason.clone(), now);
            revoked.push(delivery);
        }

        self.store.transaction(&mut || {
            self.store.save_consent(&consent)?;
            if let Some(order) = &order {
                self.store.save_order(order)?;
            }
            for delivery in &revoked {
                self.store.save_delivery(delivery)?;
            }
            Ok(())
        })?;

        let offer = match &order {
            Some(order) => self.store.get_offer(order.offer_id)?,
            None => None,
        };
        let actor = params
            .actor
            .clone()
            .or_else(|| order.as_ref().map(|o| o.buyer.clone()));
        for delivery in &revoked {
            let outcome = self
                .notify_revocation(
                    delivery,
                    order.as_ref(),
                    offer.as_ref(),
                    Some(&consent),
                    &revoke_reason,
                )
                .await?;
            self.audit.record(
                AuditKind::DeliveryRevoked,
                delivery.delivery_id.to_string(),
                delivery.revoke_hash.clone(),
                actor.clone(),
                Some(json!({
                    "delivery_hash": &delivery.delivery_hash,
                    "revoke_reason": &revoke_reason,
                    "revoke_ok": outcome.ok,
                    "revoke_status": outcome.status,
                    "revoke_error": outcome.error,
                })),
            )?;
        }

        let revoke_hash = consent
            .revoke_hash
            .clone()
            .unwrap_or_else(|| consent.consent_hash.clone());
        self.audit
            .record_with_anchor(
                AuditKind::ConsentRevoked,
                consent.consent_id.to_string(),
                &revoke_hash,
                &format!("revoke:{}", consent.consent_id),
                actor,
                reason.map(|reason| json!({ "reason": reason })),
            )
            .await?;

        Ok(ConsentRevokeReceipt {
            consent_id: consent.consent_id,
            revoke_hash,
            revoked_deliveries: revoked.iter().map(|d| d.delivery_id).collect(),
        })
    }
}

fn verify_consent_signature(
    buyer: &ActorId,
    message: &ConsentMessage<'_>,
    signature_hex: &str,
) -> Result<()> {
    let Some(verifying_key) = buyer.verifying_key() else {
        return Err(OpentradeError::invalid(
            "buyer address is not an ed25519 verifying key",
        ));
    };
    let raw = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|_| OpentradeError::invalid("consent signature must be hex"))?;
    let signature = Signature::from_slice(&raw)
        .map_err(|_| OpentradeError::invalid("consent signature must be 64 bytes"))?;
    verifying_key
        .verify(message.canonical().as_bytes(), &signature)
        .map_err(|_| OpentradeError::invalid("consent signature invalid"))
}

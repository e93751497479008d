//! Delivery operations: issue, revoke, complete.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_store::TradeStore;
use opentrade_types::{
    ensure_transition, ActorId, AuditKind, Delivery, DeliveryId, DeliveryPayload, DeliveryStatus,
    OpentradeError, OrderId, OrderStatus, Result,
};

use crate::access::{assert_access, assert_actor_match, require_actor, Action};
use crate::engine::MarketEngine;

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryIssueParams {
    pub actor: Option<ActorId>,
    pub order_id: OrderId,
    pub payload: DeliveryPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryRevokeParams {
    pub actor: Option<ActorId>,
    pub delivery_id: DeliveryId,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryCompleteParams {
    pub actor: Option<ActorId>,
    pub delivery_id: DeliveryId,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryIssueReceipt {
    pub delivery_id: DeliveryId,
    pub delivery_hash: String,
    pub status: DeliveryStatus,
    /// Returned to the caller once; persisted only when no blob store is
    /// configured.
    pub payload: DeliveryPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub delivery_id: DeliveryId,
    pub status: DeliveryStatus,
}

impl MarketEngine {
    /// `delivery.issue` — hands the asset to the buyer. With a blob store
    /// configured, the secret payload is externalized and only the opaque
    /// reference is persisted.
    pub async fn delivery_issue(&self, params: DeliveryIssueParams) -> Result<DeliveryIssueReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut order = self.load_order(params.order_id)?;
        ensure_transition(order.status, OrderStatus::DeliveryReady)?;

        let offer = self.load_offer(order.offer_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &offer.seller,
            "offer.seller",
        )?;
        if !params.payload.matches(offer.delivery_type) {
            return Err(OpentradeError::invalid(
                "payload shape does not match the offer's delivery type",
            ));
        }

        let now = Utc::now();
        let delivery = match &self.blob {
            Some(blob) => {
                let bytes = serde_json::to_vec(&params.payload)?;
                let key = format!("dlv-{:032x}", rand::random::<u128>());
                let payload_ref = blob.put(&key, &bytes).await?;
                Delivery::issue(order.order_id, offer.delivery_type, None, Some(payload_ref), now)
            }
            None => Delivery::issue(
                order.order_id,
                offer.delivery_type,
                Some(params.payload.clone()),
                None,
                now,
            ),
        };

        order.status = OrderStatus::DeliveryReady;
        order.updated_at = now;

        self.store.transaction(&mut || {
            self.store.save_delivery(&delivery)?;
            self.store.save_order(&order)
        })?;

        let actor = params.actor.clone().unwrap_or_else(|| offer.seller.clone());
        self.audit
            .record_with_anchor(
                AuditKind::DeliveryIssued,
                delivery.delivery_id.to_string(),
                &delivery.delivery_hash,
                &format!("delivery:{}", delivery.delivery_id),
                Some(actor),
                Some(json!({
                    "delivery_type": delivery.delivery_type,
                    "payload_ref": delivery.payload_ref.as_ref().map(|r| r.r#ref.clone()),
                })),
            )
            .await?;

        Ok(DeliveryIssueReceipt {
            delivery_id: delivery.delivery_id,
            delivery_hash: delivery.delivery_hash,
            status: delivery.status,
            payload: params.payload,
        })
    }

    /// `delivery.revoke`
    pub async fn delivery_revoke(&self, params: DeliveryRevokeParams) -> Result<DeliveryReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut delivery = self.load_delivery(params.delivery_id)?;
        ensure_transition(delivery.status, DeliveryStatus::Revoked)?;

        let order = self.store.get_order(delivery.order_id)?;
        let offer = match &order {
            Some(order) => self.store.get_offer(order.offer_id)?,
            None => None,
        };
        if let Some(offer) = &offer {
            assert_actor_match(
                &self.config.access,
                params.actor.as_ref(),
                &offer.seller,
                "offer.seller",
            )?;
        }

        let reason = params
            .reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or("manual_revoke")
            .to_string();
        delivery.revoke(reason.clone(), Utc::now());
        self.store.save_delivery(&delivery)?;

        let outcome = self
            .notify_revocation(&delivery, order.as_ref(), offer.as_ref(), None, &reason)
            .await?;

        let actor = params
            .actor
            .clone()
            .or_else(|| offer.as_ref().map(|o| o.seller.clone()));
        let revoke_hash = delivery
            .revoke_hash
            .clone()
            .unwrap_or_else(|| delivery.delivery_hash.clone());
        self.audit
            .record_with_anchor(
                AuditKind::DeliveryRevoked,
                delivery.delivery_id.to_string(),
                &revoke_hash,
                &format!("revoke:{}", delivery.delivery_id),
                actor,
                Some(json!({
                    "delivery_hash": delivery.delivery_hash,
                    "revoke_reason": reason,
                    "revoke_ok": outcome.ok,
                    "revoke_status": outcome.status,
                    "revoke_error": outcome.error,
                })),
            )
            .await?;

        Ok(DeliveryReceipt {
            delivery_id: delivery.delivery_id,
            status: delivery.status,
        })
    }

    /// `delivery.complete` — the buyer acknowledges receipt; the order
    /// advances with the delivery.
    pub async fn delivery_complete(
        &self,
        params: DeliveryCompleteParams,
    ) -> Result<DeliveryReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut delivery = self.load_delivery(params.delivery_id)?;
        ensure_transition(delivery.status, DeliveryStatus::Completed)?;

        let mut order = self.store.get_order(delivery.order_id)?;
        if let Some(order) = &mut order {
            ensure_transition(order.status, OrderStatus::DeliveryCompleted)?;
            order.status = OrderStatus::DeliveryCompleted;
            order.updated_at = Utc::now();
        }
        delivery.status = DeliveryStatus::Completed;

        self.store.transaction(&mut || {
            self.store.save_delivery(&delivery)?;
            if let Some(order) = &order {
                self.store.save_order(order)?;
            }
            Ok(())
        })?;

        self.audit.record(
            AuditKind::DeliveryCompleted,
            delivery.delivery_id.to_string(),
            Some(delivery.delivery_hash.clone()),
            params.actor,
            None,
        )?;

        Ok(DeliveryReceipt {
            delivery_id: delivery.delivery_id,
            status: delivery.status,
        })
    }
}

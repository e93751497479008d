//! Settlement operations: lock, release, refund, status.
//!
//! The settlement record is the escrow ledger for one order. `released`
//! and `refunded` are terminal; the validator refusing to leave them is
//! the guarantee that an escrow pays out at most once. Chain RPC stays
//! outside the engine: callers supply external transaction references and
//! the engine records them verbatim.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_store::TradeStore;
use opentrade_types::{
    ensure_transition, ActorId, AuditKind, OpentradeError, OrderId, OrderStatus, Payee, Result,
    Settlement, SettlementId, SettlementStatus,
};

use crate::access::{assert_access, assert_actor_match, require_actor, Action};
use crate::engine::MarketEngine;

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementLockParams {
    pub actor: Option<ActorId>,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub payer: ActorId,
    pub tx_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementReleaseParams {
    pub actor: Option<ActorId>,
    pub order_id: OrderId,
    pub payees: Vec<Payee>,
    pub tx_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementRefundParams {
    pub actor: Option<ActorId>,
    pub order_id: OrderId,
    pub payer: ActorId,
    pub reason: Option<String>,
    pub tx_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementStatusParams {
    pub actor: Option<ActorId>,
    pub order_id: Option<OrderId>,
    pub settlement_id: Option<SettlementId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub settlement_id: SettlementId,
    pub order_id: OrderId,
    pub order_status: OrderStatus,
    pub status: SettlementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_hash: Option<String>,
}

/// Joined order + settlement view for `settlement.status`.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementStatusView {
    pub settlement_id: SettlementId,
    pub order_id: OrderId,
    pub order_status: Option<OrderStatus>,
    pub status: SettlementStatus,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl MarketEngine {
    /// `settlement.lock` — escrow the order's payment.
    pub async fn settlement_lock(&self, params: SettlementLockParams) -> Result<SettlementReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        if params.amount <= Decimal::ZERO {
            return Err(OpentradeError::invalid("amount must be greater than 0"));
        }
        let mut order = self.load_order(params.order_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &params.payer,
            "payer",
        )?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &order.buyer,
            "order.buyer",
        )?;
        ensure_transition(order.status, OrderStatus::PaymentLocked)?;

        // A refunded settlement may be superseded by a fresh lock; anything
        // else is a duplicate.
        let existing = self.store.get_settlement_by_order(order.order_id)?;
        if let Some(existing) = &existing {
            if existing.status != SettlementStatus::Refunded {
                return Err(OpentradeError::conflict("settlement already exists for order"));
            }
        }

        let now = Utc::now();
        order.status = OrderStatus::PaymentLocked;
        order.updated_at = now;
        order.payment_tx_ref = params.tx_ref.clone();

        let mut settlement = Settlement::lock(
            order.order_id,
            params.amount,
            self.config.settlement.token_address.clone(),
            params.tx_ref.clone(),
            now,
        );
        if let Some(existing) = existing {
            settlement.settlement_id = existing.settlement_id;
        }

        self.store.transaction(&mut || {
            self.store.save_order(&order)?;
            self.store.save_settlement(&settlement)
        })?;

        let actor = params.actor.clone().unwrap_or_else(|| params.payer.clone());
        self.audit.record(
            AuditKind::PaymentLocked,
            order.order_id.to_string(),
            Some(order.order_hash.clone()),
            Some(actor),
            Some(json!({ "amount": params.amount, "tx_ref": params.tx_ref })),
        )?;

        Ok(SettlementReceipt {
            settlement_id: settlement.settlement_id,
            order_id: order.order_id,
            order_status: order.status,
            status: settlement.status,
            settlement_hash: settlement.settlement_hash,
        })
    }

    /// `settlement.release` — pay the escrow out to `payees`, completing
    /// the order. One audit event is recorded per payee, all carrying the
    /// same settlement hash.
    pub async fn settlement_release(
        &self,
        params: SettlementReleaseParams,
    ) -> Result<SettlementReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        if params.payees.is_empty() {
            return Err(OpentradeError::invalid("payees is required"));
        }
        if params.payees.iter().any(|p| p.amount <= Decimal::ZERO) {
            return Err(OpentradeError::invalid("payee amounts must be greater than 0"));
        }

        let mut order = self.load_order(params.order_id)?;
        let offer = self.load_offer(order.offer_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &offer.seller,
            "offer.seller",
        )?;
        ensure_transition(order.status, OrderStatus::SettlementCompleted)?;

        let mut settlement = self.load_settlement_by_order(order.order_id)?;
        ensure_transition(settlement.status, SettlementStatus::Released)?;

        let now = Utc::now();
        order.status = OrderStatus::SettlementCompleted;
        order.updated_at = now;
        settlement.release(&params.payees, params.tx_ref.clone(), now);

        self.store.transaction(&mut || {
            self.store.save_order(&order)?;
            self.store.save_settlement(&settlement)
        })?;

        let settlement_hash = settlement
            .settlement_hash
            .clone()
            .unwrap_or_default();
        let actor = params.actor.clone().unwrap_or_else(|| offer.seller.clone());
        for payee in &params.payees {
            self.audit
                .record_with_anchor(
                    AuditKind::SettlementReleased,
                    settlement.settlement_id.to_string(),
                    &settlement_hash,
                    &format!("settlement:{}", settlement.settlement_id),
                    Some(actor.clone()),
                    Some(json!({
                        "payee": &payee.address,
                        "amount": payee.amount,
                        "tx_ref": &params.tx_ref,
                    })),
                )
                .await?;
        }

        Ok(SettlementReceipt {
            settlement_id: settlement.settlement_id,
            order_id: order.order_id,
            order_status: order.status,
            status: settlement.status,
            settlement_hash: settlement.settlement_hash,
        })
    }

    /// `settlement.refund` — return the escrow to the payer, cancelling
    /// the order's settlement.
    pub async fn settlement_refund(
        &self,
        params: SettlementRefundParams,
    ) -> Result<SettlementReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut order = self.load_order(params.order_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &params.payer,
            "payer",
        )?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &order.buyer,
            "order.buyer",
        )?;
        ensure_transition(order.status, OrderStatus::SettlementCancelled)?;

        let mut settlement = self.load_settlement_by_order(order.order_id)?;
        ensure_transition(settlement.status, SettlementStatus::Refunded)?;

        let now = Utc::now();
        let reason = params
            .reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(str::to_string);
        order.status = OrderStatus::SettlementCancelled;
        order.updated_at = now;
        settlement.refund(&params.payer, reason.clone(), params.tx_ref.clone(), now);

        self.store.transaction(&mut || {
            self.store.save_order(&order)?;
            self.store.save_settlement(&settlement)
        })?;

        let settlement_hash = settlement
            .settlement_hash
            .clone()
            .unwrap_or_default();
        let actor = params.actor.clone().unwrap_or_else(|| params.payer.clone());
        self.audit
            .record_with_anchor(
                AuditKind::SettlementRefunded,
                settlement.settlement_id.to_string(),
                &settlement_hash,
                &format!("settlement:{}", settlement.settlement_id),
                Some(actor),
                Some(json!({
                    "payer": params.payer,
                    "tx_ref": params.tx_ref,
                    "reason": reason,
                })),
            )
            .await?;

        Ok(SettlementReceipt {
            settlement_id: settlement.settlement_id,
            order_id: order.order_id,
            order_status: order.status,
            status: settlement.status,
            settlement_hash: settlement.settlement_hash,
        })
    }

    /// `settlement.status` — joined order + settlement view, visible to
    /// the order's buyer and the offer's seller.
    pub fn settlement_status(&self, params: SettlementStatusParams) -> Result<SettlementStatusView> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Read)?;

        let settlement = match (params.settlement_id, params.order_id) {
            (Some(settlement_id), _) => self
                .store
                .get_settlement(settlement_id)?
                .ok_or_else(|| OpentradeError::not_found("settlement", settlement_id))?,
            (None, Some(order_id)) => self.load_settlement_by_order(order_id)?,
            (None, None) => {
                return Err(OpentradeError::invalid(
                    "order_id or settlement_id is required",
                ));
            }
        };

        let order = self.store.get_order(settlement.order_id)?;
        if let (Some(actor), Some(order)) = (&params.actor, &order) {
            let offer = self.store.get_offer(order.offer_id)?;
            let buyer_match = actor.matches(&order.buyer);
            let seller_match = offer.is_some_and(|o| actor.matches(&o.seller));
            if !buyer_match && !seller_match {
                return Err(OpentradeError::Forbidden {
                    reason: "actor does not match buyer or seller".to_string(),
                });
            }
        }

        Ok(SettlementStatusView {
            settlement_id: settlement.settlement_id,
            order_id: settlement.order_id,
            order_status: order.map(|o| o.status),
            status: settlement.status,
            amount: settlement.amount,
            token_address: settlement.token_address,
            lock_tx_ref: settlement.lock_tx_ref,
            release_tx_ref: settlement.release_tx_ref,
            refund_tx_ref: settlement.refund_tx_ref,
            locked_at: settlement.locked_at,
            released_at: settlement.released_at,
            refunded_at: settlement.refunded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::engine_rig;
    use opentrade_types::ErrorKind;

    #[tokio::test]
    async fn duplicate_lock_is_a_conflict() {
        let rig = engine_rig();
        let (order_id, _) = rig.locked_order_with_key().await;
        let err = rig
            .engine
            .settlement_lock(SettlementLockParams {
                actor: None,
                order_id,
                amount: Decimal::new(100, 0),
                payer: ActorId::new("buyer-1"),
                tx_ref: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn release_before_delivery_completion_is_rejected() {
        let rig = engine_rig();
        let (order_id, _) = rig.locked_order_with_key().await;
        let err = rig
            .engine
            .settlement_release(SettlementReleaseParams {
                actor: None,
                order_id,
                payees: vec![Payee {
                    address: ActorId::new("seller-1"),
                    amount: Decimal::new(100, 0),
                }],
                tx_ref: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn refund_cancels_order_and_is_terminal() {
        let rig = engine_rig();
        let (order_id, _) = rig.locked_order_with_key().await;
        let buyer = rig.store.get_order(order_id).unwrap().unwrap().buyer;

        let refunded = rig
            .engine
            .settlement_refund(SettlementRefundParams {
                actor: None,
                order_id,
                payer: buyer,
                reason: Some("buyer backed out".into()),
                tx_ref: Some("0xrefund".into()),
            })
            .await
            .unwrap();
        assert_eq!(refunded.status, SettlementStatus::Refunded);
        assert_eq!(refunded.order_status, OrderStatus::SettlementCancelled);

        // Terminal settlement: a second refund fails in the validator.
        let buyer = rig.store.get_order(order_id).unwrap().unwrap().buyer;
        let err = rig
            .engine
            .settlement_refund(SettlementRefundParams {
                actor: None,
                order_id,
                payer: buyer,
                reason: None,
                tx_ref: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn status_joins_order_and_settlement() {
        let rig = engine_rig();
        let (order_id, _) = rig.locked_order_with_key().await;
        let view = rig
            .engine
            .settlement_status(SettlementStatusParams {
                actor: None,
                order_id: Some(order_id),
                settlement_id: None,
            })
            .unwrap();
        assert_eq!(view.order_id, order_id);
        assert_eq!(view.status, SettlementStatus::Locked);
        assert_eq!(view.order_status, Some(OrderStatus::PaymentLocked));
        assert!(view.locked_at.is_some());
    }

    #[tokio::test]
    async fn status_requires_a_party_actor() {
        let rig = engine_rig();
        let (order_id, _) = rig.locked_order_with_key().await;
        let err = rig
            .engine
            .settlement_status(SettlementStatusParams {
                actor: Some(ActorId::new("stranger")),
                order_id: Some(order_id),
                settlement_id: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}

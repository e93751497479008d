//! Order operations: create, cancel.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use opentrade_store::TradeStore;
use opentrade_types::{
    ensure_transition, ActorId, AuditKind, OfferId, OpentradeError, Order, OrderId, OrderStatus,
    Result,
};

use crate::access::{assert_access, assert_actor_match, require_actor, Action};
use crate::engine::MarketEngine;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderCreateParams {
    pub actor: Option<ActorId>,
    pub offer_id: OfferId,
    pub buyer: ActorId,
    /// Defaults to 1.
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderCancelParams {
    pub actor: Option<ActorId>,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub order_hash: String,
    pub status: OrderStatus,
}

impl MarketEngine {
    /// `order.create` — a buyer commits against one published offer. The
    /// order hash folds in the offer's price and currency so a later offer
    /// edit cannot silently reprice the commitment.
    pub async fn order_create(&self, params: OrderCreateParams) -> Result<OrderReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let offer = self.load_offer(params.offer_id)?;
        if !offer.is_published() {
            return Err(OpentradeError::conflict("offer is not published"));
        }
        if params.buyer.is_empty() {
            return Err(OpentradeError::invalid("buyer is required"));
        }
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &params.buyer,
            "buyer",
        )?;
        let quantity = params.quantity.unwrap_or(1);
        if quantity == 0 {
            return Err(OpentradeError::invalid("quantity must be at least 1"));
        }

        let order = Order::new(
            offer.offer_id,
            params.buyer.clone(),
            quantity,
            offer.price,
            &offer.currency,
            Utc::now(),
        );
        self.store.save_order(&order)?;

        self.audit
            .record_with_anchor(
                AuditKind::OrderCreated,
                order.order_id.to_string(),
                &order.order_hash,
                &format!("order:{}", order.order_id),
                Some(params.buyer),
                None,
            )
            .await?;

        Ok(OrderReceipt {
            order_id: order.order_id,
            order_hash: order.order_hash,
            status: order.status,
        })
    }

    /// `order.cancel` — only reachable before payment is locked.
    pub async fn order_cancel(&self, params: OrderCancelParams) -> Result<OrderReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut order = self.load_order(params.order_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &order.buyer,
            "order.buyer",
        )?;
        ensure_transition(order.status, OrderStatus::OrderCancelled)?;
        order.status = OrderStatus::OrderCancelled;
        order.updated_at = Utc::now();
        self.store.save_order(&order)?;

        let actor = params.actor.unwrap_or_else(|| order.buyer.clone());
        self.audit.record(
            AuditKind::OrderCancelled,
            order.order_id.to_string(),
            Some(order.order_hash.clone()),
            Some(actor),
            None,
        )?;

        Ok(OrderReceipt {
            order_id: order.order_id,
            order_hash: order.order_hash,
            status: order.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::engine_rig;
    use opentrade_types::ErrorKind;

    #[tokio::test]
    async fn create_requires_published_offer() {
        let rig = engine_rig();
        let offer = rig.unpublished_offer("seller-1").await;
        let err = rig
            .engine
            .order_create(OrderCreateParams {
                actor: None,
                offer_id: offer,
                buyer: ActorId::new("buyer-1"),
                quantity: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn create_and_cancel() {
        let rig = engine_rig();
        let offer_id = rig.published_offer("seller-1").await;
        let receipt = rig
            .engine
            .order_create(OrderCreateParams {
                actor: None,
                offer_id,
                buyer: ActorId::new("buyer-1"),
                quantity: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(receipt.status, OrderStatus::Created);

        let cancelled = rig
            .engine
            .order_cancel(OrderCancelParams {
                actor: None,
                order_id: receipt.order_id,
            })
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::OrderCancelled);

        // Terminal: a second cancel is a conflict naming the pair.
        let err = rig
            .engine
            .order_cancel(OrderCancelParams {
                actor: None,
                order_id: receipt.order_id,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("ORDER_CANCELLED"));
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let rig = engine_rig();
        let offer_id = rig.published_offer("seller-1").await;
        let err = rig
            .engine
            .order_create(OrderCreateParams {
                actor: None,
                offer_id,
                buyer: ActorId::new("buyer-1"),
                quantity: Some(0),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

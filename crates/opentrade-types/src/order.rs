//! Order model: a buyer's commitment against one published offer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::{ActorId, OfferId, OrderId};

/// Lifecycle status of an order.
///
/// The order is the spine of the trade: payment, consent, delivery, and
/// settlement each advance it. Three statuses are terminal
/// (`SettlementCompleted`, `OrderCancelled`, `SettlementCancelled`);
/// `ConsentRevoked` can only fall through to `SettlementCancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    PaymentLocked,
    ConsentGranted,
    DeliveryReady,
    DeliveryCompleted,
    SettlementCompleted,
    OrderCancelled,
    SettlementCancelled,
    ConsentRevoked,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::PaymentLocked => write!(f, "PAYMENT_LOCKED"),
            Self::ConsentGranted => write!(f, "CONSENT_GRANTED"),
            Self::DeliveryReady => write!(f, "DELIVERY_READY"),
            Self::DeliveryCompleted => write!(f, "DELIVERY_COMPLETED"),
            Self::SettlementCompleted => write!(f, "SETTLEMENT_COMPLETED"),
            Self::OrderCancelled => write!(f, "ORDER_CANCELLED"),
            Self::SettlementCancelled => write!(f, "SETTLEMENT_CANCELLED"),
            Self::ConsentRevoked => write!(f, "CONSENT_REVOKED"),
        }
    }
}

/// A buyer's commitment against one offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub offer_id: OfferId,
    pub buyer: ActorId,
    pub quantity: u32,
    pub status: OrderStatus,
    pub order_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_tx_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields the order hash commits to.
#[derive(Serialize)]
struct OrderIdentity<'a> {
    order_id: &'a OrderId,
    offer_id: &'a OfferId,
    buyer: &'a ActorId,
    quantity: u32,
    price: Decimal,
    currency: &'a str,
}

impl Order {
    /// Build a fresh order against `offer_id`, hashing in the offer's
    /// price/currency so later offer edits cannot silently reprice it.
    #[must_use]
    pub fn new(
        offer_id: OfferId,
        buyer: ActorId,
        quantity: u32,
        price: Decimal,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let order_id = OrderId::new();
        let order_hash = hash_canonical(&OrderIdentity {
            order_id: &order_id,
            offer_id: &offer_id,
            buyer: &buyer,
            quantity,
            price,
            currency,
        });
        Self {
            order_id,
            offer_id,
            buyer,
            quantity,
            status: OrderStatus::Created,
            order_hash,
            payment_tx_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::SettlementCompleted
                | OrderStatus::OrderCancelled
                | OrderStatus::SettlementCancelled
        )
    }
}

//! Delivery model: how the purchased asset actually reaches the buyer.
//!
//! A delivery carries either an inline payload (the secret itself) or an
//! opaque reference into the encrypted blob store — never both. Keeping the
//! two representations mutually exclusive means a serialized delivery can
//! never leak the raw secret alongside its externalized form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::offer::DeliveryType;
use crate::{DeliveryId, OrderId};

/// Lifecycle status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Ready,
    Completed,
    Revoked,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Revoked => write!(f, "REVOKED"),
        }
    }
}

/// The secret material handed to the buyer, shaped by the delivery type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryPayload {
    Download {
        download_url: String,
    },
    Api {
        access_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quota: Option<u64>,
    },
    Service {
        #[serde(skip_serializing_if = "Option::is_none")]
        service_quota: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ticket_id: Option<String>,
    },
}

impl DeliveryPayload {
    /// Whether this payload shape matches the offer's delivery type.
    #[must_use]
    pub fn matches(&self, delivery_type: DeliveryType) -> bool {
        matches!(
            (self, delivery_type),
            (Self::Download { .. }, DeliveryType::Download)
                | (Self::Api { .. }, DeliveryType::Api)
                | (Self::Service { .. }, DeliveryType::Service)
        )
    }
}

/// Opaque pointer to an externally stored (encrypted) payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    pub store: String,
    pub r#ref: String,
}

impl PayloadRef {
    #[must_use]
    pub fn credentials(r#ref: impl Into<String>) -> Self {
        Self {
            store: "credentials".to_string(),
            r#ref: r#ref.into(),
        }
    }
}

/// A delivery record tied to one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_id: DeliveryId,
    pub order_id: OrderId,
    pub delivery_type: DeliveryType,
    pub status: DeliveryStatus,
    pub delivery_hash: String,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<DeliveryPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<PayloadRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_hash: Option<String>,
}

#[derive(Serialize)]
struct DeliveryIdentity<'a> {
    delivery_id: &'a DeliveryId,
    order_id: &'a OrderId,
    delivery_type: DeliveryType,
    issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a DeliveryPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_ref: Option<&'a str>,
}

#[derive(Serialize)]
struct RevokePayload<'a> {
    delivery_id: &'a DeliveryId,
    order_id: &'a OrderId,
    revoked_at: DateTime<Utc>,
    reason: &'a str,
}

impl Delivery {
    /// Build a ready delivery with either an inline payload or a blob ref.
    /// Exactly one of `payload` / `payload_ref` must be provided.
    #[must_use]
    pub fn issue(
        order_id: OrderId,
        delivery_type: DeliveryType,
        payload: Option<DeliveryPayload>,
        payload_ref: Option<PayloadRef>,
        now: DateTime<Utc>,
    ) -> Self {
        debug_assert!(
            payload.is_some() != payload_ref.is_some(),
            "delivery carries an inline payload xor a payload ref"
        );
        let delivery_id = DeliveryId::new();
        let delivery_hash = hash_canonical(&DeliveryIdentity {
            delivery_id: &delivery_id,
            order_id: &order_id,
            delivery_type,
            issued_at: now,
            payload: payload.as_ref(),
            payload_ref: payload_ref.as_ref().map(|r| r.r#ref.as_str()),
        });
        Self {
            delivery_id,
            order_id,
            delivery_type,
            status: DeliveryStatus::Ready,
            delivery_hash,
            issued_at: now,
            payload,
            payload_ref,
            revoked_at: None,
            revoke_reason: None,
            revoke_hash: None,
        }
    }

    /// Mark revoked and compute the revocation hash. The caller runs the
    /// transition check first.
    pub fn revoke(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        self.revoke_hash = Some(hash_canonical(&RevokePayload {
            delivery_id: &self.delivery_id,
            order_id: &self.order_id,
            revoked_at: now,
            reason: &reason,
        }));
        self.status = DeliveryStatus::Revoked;
        self.revoked_at = Some(now);
        self.revoke_reason = Some(reason);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status == DeliveryStatus::Ready
    }
}

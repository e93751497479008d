//! Offer model: a seller's published terms for one asset.
//!
//! The `offer_hash` commits to the economic identity of the offer (seller,
//! asset, price, scope, delivery) and is recomputed on every field mutation.
//! Status and timestamps are deliberately excluded so the hash is stable
//! across lifecycle transitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::{ActorId, OfferId};

/// What category of asset the offer sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Data,
    Api,
    Service,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "DATA"),
            Self::Api => write!(f, "API"),
            Self::Service => write!(f, "SERVICE"),
        }
    }
}

/// How the asset reaches the buyer once delivery is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Download,
    Api,
    Service,
}

impl std::fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "DOWNLOAD"),
            Self::Api => write!(f, "API"),
            Self::Service => write!(f, "SERVICE"),
        }
    }
}

/// Lifecycle status of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Created,
    Published,
    Closed,
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Published => write!(f, "PUBLISHED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// What the buyer may do with the asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageScope {
    pub purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transferable: Option<bool>,
}

/// Free-form descriptive metadata for the asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
}

/// A seller's terms for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: OfferId,
    pub seller: ActorId,
    pub asset_id: String,
    pub asset_type: AssetType,
    pub asset_meta: AssetMeta,
    pub price: Decimal,
    pub currency: String,
    pub usage_scope: UsageScope,
    pub delivery_type: DeliveryType,
    pub status: OfferStatus,
    pub offer_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields the offer hash commits to.
#[derive(Serialize)]
struct OfferIdentity<'a> {
    offer_id: &'a OfferId,
    seller: &'a ActorId,
    asset_id: &'a str,
    asset_type: AssetType,
    asset_meta: &'a AssetMeta,
    price: Decimal,
    currency: &'a str,
    usage_scope: &'a UsageScope,
    delivery_type: DeliveryType,
}

impl Offer {
    /// Hash of the current identity fields.
    #[must_use]
    pub fn identity_hash(&self) -> String {
        hash_canonical(&OfferIdentity {
            offer_id: &self.offer_id,
            seller: &self.seller,
            asset_id: &self.asset_id,
            asset_type: self.asset_type,
            asset_meta: &self.asset_meta,
            price: self.price,
            currency: &self.currency,
            usage_scope: &self.usage_scope,
            delivery_type: self.delivery_type,
        })
    }

    /// Recompute `offer_hash` and bump `updated_at`. Call after any field
    /// mutation.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.offer_hash = self.identity_hash();
        self.updated_at = now;
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.status == OfferStatus::Published
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Offer {
    pub fn dummy(seller: ActorId, price: Decimal) -> Self {
        let now = Utc::now();
        let mut offer = Self {
            offer_id: OfferId::new(),
            seller,
            asset_id: "asset-1".to_string(),
            asset_type: AssetType::Data,
            asset_meta: AssetMeta::default(),
            price,
            currency: "USDC".to_string(),
            usage_scope: UsageScope {
                purpose: "analytics".to_string(),
                ..UsageScope::default()
            },
            delivery_type: DeliveryType::Download,
            status: OfferStatus::Created,
            offer_hash: String::new(),
            created_at: now,
            updated_at: now,
        };
        offer.refresh(now);
        offer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_status_changes() {
        let mut offer = Offer::dummy(ActorId::new("seller-1"), Decimal::new(100, 0));
        let before = offer.offer_hash.clone();
        offer.status = OfferStatus::Published;
        assert_eq!(offer.identity_hash(), before);
    }

    #[test]
    fn hash_changes_with_price() {
        let mut offer = Offer::dummy(ActorId::new("seller-1"), Decimal::new(100, 0));
        let before = offer.offer_hash.clone();
        offer.price = Decimal::new(250, 0);
        offer.refresh(Utc::now());
        assert_ne!(offer.offer_hash, before);
    }

    #[test]
    fn refresh_bumps_updated_at() {
        let mut offer = Offer::dummy(ActorId::new("seller-1"), Decimal::ONE);
        let later = offer.updated_at + chrono::Duration::seconds(5);
        offer.refresh(later);
        assert_eq!(offer.updated_at, later);
    }

    #[test]
    fn serde_roundtrip() {
        let offer = Offer::dummy(ActorId::new("seller-1"), Decimal::new(42, 0));
        let json = serde_json::to_string(&offer).unwrap();
        let back: Offer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.offer_id, offer.offer_id);
        assert_eq!(back.price, offer.price);
        assert_eq!(back.offer_hash, offer.offer_hash);
    }
}

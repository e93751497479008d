//! Offer operations: create, publish, update, close.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use opentrade_store::TradeStore;
use opentrade_types::{
    ensure_transition, ActorId, AssetMeta, AssetType, AuditKind, DeliveryType, Offer, OfferId,
    OfferStatus, OpentradeError, Result, UsageScope,
};

use crate::access::{assert_access, assert_actor_match, require_actor, Action};
use crate::engine::MarketEngine;

#[derive(Debug, Clone, Deserialize)]
pub struct OfferCreateParams {
    pub actor: Option<ActorId>,
    /// Defaults to the acting party.
    pub seller: Option<ActorId>,
    pub asset_id: String,
    pub asset_type: AssetType,
    #[serde(default)]
    pub asset_meta: AssetMeta,
    pub price: Decimal,
    pub currency: String,
    pub usage_scope: UsageScope,
    pub delivery_type: DeliveryType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferRefParams {
    pub actor: Option<ActorId>,
    pub offer_id: OfferId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfferUpdateParams {
    pub actor: Option<ActorId>,
    pub offer_id: OfferId,
    pub price: Option<Decimal>,
    pub usage_scope: Option<UsageScope>,
    pub delivery_type: Option<DeliveryType>,
    pub asset_meta: Option<AssetMeta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferReceipt {
    pub offer_id: OfferId,
    pub offer_hash: String,
    pub status: OfferStatus,
}

impl MarketEngine {
    /// `offer.create`
    pub async fn offer_create(&self, params: OfferCreateParams) -> Result<OfferReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let seller = params
            .seller
            .or_else(|| params.actor.clone())
            .ok_or_else(|| OpentradeError::invalid("seller is required"))?;
        if let Some(actor) = &params.actor {
            assert_actor_match(&self.config.access, Some(actor), &seller, "seller")?;
        }
        if params.price <= Decimal::ZERO {
            return Err(OpentradeError::invalid("price must be greater than 0"));
        }
        if params.currency.trim().is_empty() {
            return Err(OpentradeError::invalid("currency is required"));
        }
        if params.asset_id.trim().is_empty() {
            return Err(OpentradeError::invalid("asset_id is required"));
        }
        if params.usage_scope.purpose.trim().is_empty() {
            return Err(OpentradeError::invalid("usage_scope.purpose is required"));
        }

        let now = Utc::now();
        let mut offer = Offer {
            offer_id: OfferId::new(),
            seller,
            asset_id: params.asset_id,
            asset_type: params.asset_type,
            asset_meta: params.asset_meta,
            price: params.price,
            currency: params.currency,
            usage_scope: params.usage_scope,
            delivery_type: params.delivery_type,
            status: OfferStatus::Created,
            offer_hash: String::new(),
            created_at: now,
            updated_at: now,
        };
        offer.refresh(now);
        self.store.save_offer(&offer)?;

        let actor = params.actor.clone().unwrap_or_else(|| offer.seller.clone());
        self.audit
            .record_with_anchor(
                AuditKind::OfferCreated,
                offer.offer_id.to_string(),
                &offer.offer_hash,
                &format!("offer:{}", offer.offer_id),
                Some(actor),
                None,
            )
            .await?;

        Ok(OfferReceipt {
            offer_id: offer.offer_id,
            offer_hash: offer.offer_hash,
            status: offer.status,
        })
    }

    /// `offer.publish`
    pub async fn offer_publish(&self, params: OfferRefParams) -> Result<OfferReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut offer = self.load_offer(params.offer_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &offer.seller,
            "offer.seller",
        )?;
        ensure_transition(offer.status, OfferStatus::Published)?;
        offer.status = OfferStatus::Published;
        offer.updated_at = Utc::now();
        self.store.save_offer(&offer)?;

        self.audit.record(
            AuditKind::OfferPublished,
            offer.offer_id.to_string(),
            Some(offer.offer_hash.clone()),
            params.actor,
            None,
        )?;

        Ok(OfferReceipt {
            offer_id: offer.offer_id,
            offer_hash: offer.offer_hash,
            status: offer.status,
        })
    }

    /// `offer.update` — mutates identity fields, recomputes the content
    /// hash, and re-anchors it.
    pub async fn offer_update(&self, params: OfferUpdateParams) -> Result<OfferReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut offer = self.load_offer(params.offer_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &offer.seller,
            "offer.seller",
        )?;
        if offer.status == OfferStatus::Closed {
            return Err(OpentradeError::conflict("offer is closed"));
        }

        if let Some(price) = params.price {
            if price <= Decimal::ZERO {
                return Err(OpentradeError::invalid("price must be greater than 0"));
            }
            offer.price = price;
        }
        if let Some(usage_scope) = params.usage_scope {
            if usage_scope.purpose.trim().is_empty() {
                return Err(OpentradeError::invalid("usage_scope.purpose is required"));
            }
            offer.usage_scope = usage_scope;
        }
        if let Some(delivery_type) = params.delivery_type {
            offer.delivery_type = delivery_type;
        }
        if let Some(asset_meta) = params.asset_meta {
            offer.asset_meta = asset_meta;
        }
        offer.refresh(Utc::now());
        self.store.save_offer(&offer)?;

        self.audit
            .record_with_anchor(
                AuditKind::OfferUpdated,
                offer.offer_id.to_string(),
                &offer.offer_hash,
                &format!("offer:{}", offer.offer_id),
                params.actor,
                None,
            )
            .await?;

        Ok(OfferReceipt {
            offer_id: offer.offer_id,
            offer_hash: offer.offer_hash,
            status: offer.status,
        })
    }

    /// `offer.close`
    pub async fn offer_close(&self, params: OfferRefParams) -> Result<OfferReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut offer = self.load_offer(params.offer_id)?;
        assert_actor_match(
            &self.config.access,
            params.actor.as_ref(),
            &offer.seller,
            "offer.seller",
        )?;
        ensure_transition(offer.status, OfferStatus::Closed)?;
        offer.status = OfferStatus::Closed;
        offer.updated_at = Utc::now();
        self.store.save_offer(&offer)?;

        self.audit.record(
            AuditKind::OfferClosed,
            offer.offer_id.to_string(),
            Some(offer.offer_hash.clone()),
            params.actor,
            None,
        )?;

        Ok(OfferReceipt {
            offer_id: offer.offer_id,
            offer_hash: offer.offer_hash,
            status: offer.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::engine_rig;
    use opentrade_types::ErrorKind;

    fn create_params(seller: &str) -> OfferCreateParams {
        OfferCreateParams {
            actor: Some(ActorId::new(seller)),
            seller: None,
            asset_id: "dataset-7".into(),
            asset_type: AssetType::Data,
            asset_meta: AssetMeta::default(),
            price: Decimal::new(100, 0),
            currency: "USDC".into(),
            usage_scope: UsageScope {
                purpose: "analytics".into(),
                ..UsageScope::default()
            },
            delivery_type: DeliveryType::Download,
        }
    }

    #[tokio::test]
    async fn create_publish_close_cycle() {
        let rig = engine_rig();
        let receipt = rig.engine.offer_create(create_params("seller-1")).await.unwrap();
        assert_eq!(receipt.status, OfferStatus::Created);
        assert!(receipt.offer_hash.starts_with("0x"));

        let published = rig
            .engine
            .offer_publish(OfferRefParams {
                actor: Some(ActorId::new("seller-1")),
                offer_id: receipt.offer_id,
            })
            .await
            .unwrap();
        assert_eq!(published.status, OfferStatus::Published);

        let closed = rig
            .engine
            .offer_close(OfferRefParams {
                actor: Some(ActorId::new("seller-1")),
                offer_id: receipt.offer_id,
            })
            .await
            .unwrap();
        assert_eq!(closed.status, OfferStatus::Closed);

        // Closed is terminal.
        let again = rig
            .engine
            .offer_publish(OfferRefParams {
                actor: Some(ActorId::new("seller-1")),
                offer_id: receipt.offer_id,
            })
            .await;
        assert_eq!(again.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn zero_price_is_rejected() {
        let rig = engine_rig();
        let mut params = create_params("seller-1");
        params.price = Decimal::ZERO;
        let err = rig.engine.offer_create(params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn update_recomputes_hash_and_rejects_closed() {
        let rig = engine_rig();
        let receipt = rig.engine.offer_create(create_params("seller-1")).await.unwrap();

        let updated = rig
            .engine
            .offer_update(OfferUpdateParams {
                actor: Some(ActorId::new("seller-1")),
                offer_id: receipt.offer_id,
                price: Some(Decimal::new(250, 0)),
                ..OfferUpdateParams::default()
            })
            .await
            .unwrap();
        assert_ne!(updated.offer_hash, receipt.offer_hash);

        rig.engine
            .offer_close(OfferRefParams {
                actor: Some(ActorId::new("seller-1")),
                offer_id: receipt.offer_id,
            })
            .await
            .unwrap();
        let err = rig
            .engine
            .offer_update(OfferUpdateParams {
                actor: Some(ActorId::new("seller-1")),
                offer_id: receipt.offer_id,
                price: Some(Decimal::ONE),
                ..OfferUpdateParams::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn audit_trail_records_lifecycle() {
        let rig = engine_rig();
        let receipt = rig.engine.offer_create(create_params("seller-1")).await.unwrap();
        rig.engine
            .offer_publish(OfferRefParams {
                actor: Some(ActorId::new("seller-1")),
                offer_id: receipt.offer_id,
            })
            .await
            .unwrap();

        let events = rig.store.read_audit_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditKind::OfferCreated);
        assert_eq!(events[1].kind, AuditKind::OfferPublished);
        assert_eq!(events[0].hash.as_deref(), Some(receipt.offer_hash.as_str()));
    }
}

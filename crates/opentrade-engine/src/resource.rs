//! Resource operations: publish, unpublish, get, list.
//!
//! A resource is a published reusable capability backed by its own offer.
//! Republishing a *published* resource in place bumps its version; an
//! unpublished resource is retired for good and access is reissued under a
//! fresh id.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use opentrade_store::TradeStore;
use opentrade_types::canonical::hash_canonical;
use opentrade_types::{
    ensure_transition, ActorId, AssetMeta, AssetType, AuditKind, DeliveryType, Offer, OfferId,
    OfferStatus, OpentradeError, Resource, ResourceFilter, ResourceId, ResourceKind,
    ResourcePolicy, ResourcePrice, ResourceStatus, Result, UsageScope,
};

use crate::access::{assert_access, assert_actor_match, demand_actor, Action};
use crate::engine::MarketEngine;

const MAX_LABEL_LEN: usize = 80;
const MAX_DESCRIPTION_LEN: usize = 400;
const MAX_TAGS: usize = 12;
const MAX_TAG_LEN: usize = 32;

/// The offer terms backing a published resource.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceOfferParams {
    pub asset_id: String,
    pub asset_type: AssetType,
    #[serde(default)]
    pub asset_meta: AssetMeta,
    pub usage_scope: UsageScope,
    pub delivery_type: DeliveryType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourcePublishParams {
    pub actor: Option<ActorId>,
    /// Present when republishing an existing resource in place.
    pub resource_id: Option<ResourceId>,
    pub kind: ResourceKind,
    pub label: String,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub price: ResourcePrice,
    pub policy: Option<ResourcePolicy>,
    pub offer: ResourceOfferParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRefParams {
    pub actor: Option<ActorId>,
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReceipt {
    pub resource_id: ResourceId,
    pub offer_id: OfferId,
    pub offer_hash: String,
    pub status: ResourceStatus,
    pub version: u32,
}

impl MarketEngine {
    /// `resource.publish` — create or version a resource plus its backing
    /// offer in one transaction.
    pub async fn resource_publish(&self, params: ResourcePublishParams) -> Result<ResourceReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let actor = demand_actor(params.actor.as_ref())?.clone();

        let label = params.label.trim().to_string();
        if label.is_empty() {
            return Err(OpentradeError::invalid("label is required"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(OpentradeError::invalid("label too long"));
        }
        let description = params
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
            return Err(OpentradeError::invalid("description too long"));
        }
        if let Some(tags) = &params.tags {
            if tags.len() > MAX_TAGS {
                return Err(OpentradeError::invalid("too many tags"));
            }
            if tags.iter().any(|t| t.is_empty() || t.len() > MAX_TAG_LEN) {
                return Err(OpentradeError::invalid("tag length out of bounds"));
            }
            let mut unique = tags.clone();
            unique.sort();
            unique.dedup();
            if unique.len() != tags.len() {
                return Err(OpentradeError::invalid("tags must be unique"));
            }
        }
        if !params.price.unit.valid_for(params.kind) {
            return Err(OpentradeError::invalid(format!(
                "price unit {} is not valid for {} resources",
                params.price.unit, params.kind
            )));
        }
        if params.price.amount <= Decimal::ZERO {
            return Err(OpentradeError::invalid("price.amount must be greater than 0"));
        }
        if params.offer.usage_scope.purpose.trim().is_empty() {
            return Err(OpentradeError::invalid("usage_scope.purpose is required"));
        }

        let existing = match params.resource_id {
            Some(id) => self.store.get_resource(id)?,
            None => None,
        };
        if let Some(existing) = &existing {
            assert_actor_match(
                &self.config.access,
                Some(&actor),
                &existing.provider,
                "resource.provider",
            )?;
            // Draft -> published goes through the validator; an in-place
            // update of a published resource is not a status change; an
            // unpublished id is terminal and cannot come back.
            if existing.status != ResourceStatus::Published {
                ensure_transition(existing.status, ResourceStatus::Published)?;
            }
        }

        let now = Utc::now();
        let offer_id = existing.as_ref().map(|r| r.offer_id);
        let existing_offer = match offer_id {
            Some(id) => self.store.get_offer(id)?,
            None => None,
        };
        if existing_offer.as_ref().is_some_and(|o| o.status == OfferStatus::Closed) {
            return Err(OpentradeError::conflict("backing offer is closed"));
        }

        let mut offer = Offer {
            offer_id: offer_id.unwrap_or_else(OfferId::new),
            seller: actor.clone(),
            asset_id: params.offer.asset_id,
            asset_type: params.offer.asset_type,
            asset_meta: params.offer.asset_meta,
            price: params.price.amount,
            currency: params.price.currency.clone(),
            usage_scope: params.offer.usage_scope,
            delivery_type: params.offer.delivery_type,
            status: OfferStatus::Published,
            offer_hash: String::new(),
            created_at: existing_offer.as_ref().map_or(now, |o| o.created_at),
            updated_at: now,
        };
        offer.refresh(now);

        let resource = Resource {
            resource_id: existing
                .as_ref()
                .map_or_else(ResourceId::new, |r| r.resource_id),
            kind: params.kind,
            status: ResourceStatus::Published,
            provider: actor.clone(),
            offer_id: offer.offer_id,
            offer_hash: Some(offer.offer_hash.clone()),
            label,
            description,
            tags: params.tags,
            price: params.price,
            policy: params.policy,
            version: existing.as_ref().map_or(1, |r| r.version + 1),
            created_at: existing.as_ref().map_or(now, |r| r.created_at),
            updated_at: now,
        };

        self.store.transaction(&mut || {
            self.store.save_offer(&offer)?;
            self.store.save_resource(&resource)
        })?;

        let resource_hash = hash_canonical(&resource);
        self.audit
            .record_with_anchor(
                AuditKind::ResourcePublished,
                resource.resource_id.to_string(),
                &resource_hash,
                &format!("resource:{}", resource.resource_id),
                Some(actor),
                None,
            )
            .await?;

        Ok(ResourceReceipt {
            resource_id: resource.resource_id,
            offer_id: offer.offer_id,
            offer_hash: offer.offer_hash,
            status: resource.status,
            version: resource.version,
        })
    }

    /// `resource.unpublish` — retire a resource and close its backing
    /// offer. Terminal: republish requires a fresh id.
    pub async fn resource_unpublish(&self, params: ResourceRefParams) -> Result<ResourceReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let actor = demand_actor(params.actor.as_ref())?.clone();

        let mut resource = self.load_resource(params.resource_id)?;
        assert_actor_match(
            &self.config.access,
            Some(&actor),
            &resource.provider,
            "resource.provider",
        )?;
        ensure_transition(resource.status, ResourceStatus::Unpublished)?;

        let now = Utc::now();
        resource.status = ResourceStatus::Unpublished;
        resource.updated_at = now;

        let mut offer = self.store.get_offer(resource.offer_id)?;
        if let Some(offer) = &mut offer {
            if offer.status != OfferStatus::Closed {
                ensure_transition(offer.status, OfferStatus::Closed)?;
                offer.status = OfferStatus::Closed;
                offer.updated_at = now;
            }
        }

        self.store.transaction(&mut || {
            self.store.save_resource(&resource)?;
            if let Some(offer) = &offer {
                self.store.save_offer(offer)?;
            }
            Ok(())
        })?;

        self.audit.record(
            AuditKind::ResourceUnpublished,
            resource.resource_id.to_string(),
            resource.offer_hash.clone(),
            Some(actor),
            None,
        )?;

        Ok(ResourceReceipt {
            resource_id: resource.resource_id,
            offer_id: resource.offer_id,
            offer_hash: resource.offer_hash.unwrap_or_default(),
            status: resource.status,
            version: resource.version,
        })
    }

    /// `resource.get`
    pub fn resource_get(&self, resource_id: ResourceId) -> Result<Option<Resource>> {
        self.store.get_resource(resource_id)
    }

    /// `resource.list`
    pub fn resource_list(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        self.store.list_resources(filter)
    }
}

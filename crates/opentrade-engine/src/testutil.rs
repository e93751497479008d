//! Shared fixtures for the handler unit tests.

use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use rust_decimal::Decimal;

use opentrade_outbound::testing::{MemoryBlobStore, RecordingNotifier, StaticChain};
use opentrade_outbound::{ChainAdapter, EncryptedBlobStore, WebhookNotifier};
use opentrade_store::{FileStore, TradeStore};
use opentrade_types::{
    ActorId, AssetMeta, AssetType, ConsentMessage, ConsentScope, DeliveryPayload, DeliveryType,
    EngineConfig, OfferId, Order, OrderId, PriceUnit, ResourceKind, ResourcePrice, UsageScope,
};

use crate::consent::ConsentGrantParams;
use crate::delivery::DeliveryIssueParams;
use crate::engine::MarketEngine;
use crate::offer::{OfferCreateParams, OfferRefParams};
use crate::order::OrderCreateParams;
use crate::resource::{ResourceOfferParams, ResourcePublishParams};
use crate::settlement::SettlementLockParams;

pub struct EngineRig {
    pub engine: MarketEngine,
    pub store: Arc<dyn TradeStore>,
    _dir: tempfile::TempDir,
}

fn build(config: EngineConfig, with_chain: bool, with_blob: bool) -> EngineRig {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TradeStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let engine = MarketEngine::new(
        config,
        Arc::clone(&store),
        with_chain.then(|| Arc::new(StaticChain::new()) as Arc<dyn ChainAdapter>),
        Some(Arc::new(RecordingNotifier::new()) as Arc<dyn WebhookNotifier>),
        with_blob.then(|| Arc::new(MemoryBlobStore::new()) as Arc<dyn EncryptedBlobStore>),
    )
    .unwrap();
    EngineRig {
        engine,
        store,
        _dir: dir,
    }
}

/// Default config, no chain adapter, no blob store.
pub fn engine_rig() -> EngineRig {
    build(EngineConfig::default(), false, false)
}

/// Custom config, chain adapter wired.
pub fn engine_rig_with(config: EngineConfig) -> EngineRig {
    build(config, true, false)
}

/// Default config plus an in-memory blob store.
pub fn engine_rig_with_blob() -> EngineRig {
    build(EngineConfig::default(), false, true)
}

/// Deterministic buyer keypair: the actor id is the hex verifying key.
pub fn buyer_keypair(seed: u8) -> (SigningKey, ActorId) {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let actor = ActorId::new(hex::encode(key.verifying_key().as_bytes()));
    (key, actor)
}

/// Sign the canonical consent message for `order` with `key`.
pub fn sign_consent(key: &SigningKey, order: &Order, scope: &ConsentScope) -> String {
    let message = ConsentMessage {
        order_id: &order.order_id,
        offer_id: &order.offer_id,
        buyer: &order.buyer,
        scope,
    };
    hex::encode(key.sign(message.canonical().as_bytes()).to_bytes())
}

/// A valid `resource.publish` parameter set for a model resource.
pub fn model_resource_params(provider: &str) -> ResourcePublishParams {
    ResourcePublishParams {
        actor: Some(ActorId::new(provider)),
        resource_id: None,
        kind: ResourceKind::Model,
        label: "gpt-ish".into(),
        description: Some("general text model".into()),
        tags: Some(vec!["nlp".into()]),
        price: ResourcePrice {
            unit: PriceUnit::Token,
            amount: Decimal::new(1, 4),
            currency: "USDC".into(),
            token_address: None,
        },
        policy: None,
        offer: ResourceOfferParams {
            asset_id: "model-gpt-ish".into(),
            asset_type: AssetType::Api,
            asset_meta: AssetMeta::default(),
            usage_scope: UsageScope {
                purpose: "inference".into(),
                ..UsageScope::default()
            },
            delivery_type: DeliveryType::Api,
        },
    }
}

impl EngineRig {
    /// A created (not yet published) offer from `seller`.
    pub async fn unpublished_offer(&self, seller: &str) -> OfferId {
        self.engine
            .offer_create(OfferCreateParams {
                actor: Some(ActorId::new(seller)),
                seller: None,
                asset_id: "dataset-7".into(),
                asset_type: AssetType::Data,
                asset_meta: AssetMeta::default(),
                price: Decimal::new(100, 0),
                currency: "USDC".into(),
                usage_scope: UsageScope {
                    purpose: "analytics".into(),
                    duration_days: Some(90),
                    ..UsageScope::default()
                },
                delivery_type: DeliveryType::Download,
            })
            .await
            .unwrap()
            .offer_id
    }

    /// A published offer from `seller` (price 100 USDC, download).
    pub async fn published_offer(&self, seller: &str) -> OfferId {
        let offer_id = self.unpublished_offer(seller).await;
        self.engine
            .offer_publish(OfferRefParams {
                actor: Some(ActorId::new(seller)),
                offer_id,
            })
            .await
            .unwrap();
        offer_id
    }

    /// Offer published, order created, settlement locked. The buyer is an
    /// ed25519 actor whose signing key is returned.
    pub async fn locked_order_with_key(&self) -> (OrderId, SigningKey) {
        let offer_id = self.published_offer("seller-1").await;
        let (key, buyer) = buyer_keypair(9);
        let order = self
            .engine
            .order_create(OrderCreateParams {
                actor: None,
                offer_id,
                buyer: buyer.clone(),
                quantity: None,
            })
            .await
            .unwrap();
        self.engine
            .settlement_lock(SettlementLockParams {
                actor: None,
                order_id: order.order_id,
                amount: Decimal::new(100, 0),
                payer: buyer,
                tx_ref: None,
            })
            .await
            .unwrap();
        (order.order_id, key)
    }

    /// Locked order with a granted consent.
    pub async fn consented_order(&self) -> (OrderId, opentrade_types::ConsentId, SigningKey) {
        let (order_id, key) = self.locked_order_with_key().await;
        let order = self.store.get_order(order_id).unwrap().unwrap();
        let scope = ConsentScope {
            purpose: "analytics".into(),
            duration_days: Some(30),
        };
        let signature = sign_consent(&key, &order, &scope);
        let consent = self
            .engine
            .consent_grant(ConsentGrantParams {
                actor: None,
                order_id,
                signature,
                scope,
            })
            .await
            .unwrap();
        (order_id, consent.consent_id, key)
    }

    /// Issue a download delivery for a consented order.
    pub async fn issued_delivery(&self, order_id: OrderId) -> opentrade_types::DeliveryId {
        self.engine
            .delivery_issue(DeliveryIssueParams {
                actor: None,
                order_id,
                payload: DeliveryPayload::Download {
                    download_url: "https://assets.example/pack".into(),
                },
            })
            .await
            .unwrap()
            .delivery_id
    }
}

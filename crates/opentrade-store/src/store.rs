//! The storage contract every backend implements.
//!
//! Handlers are storage-agnostic: they see typed get/list/save per entity,
//! two append-only logs (usage ledger, audit trail), and a multi-write
//! [`TradeStore::transaction`] primitive. The store exclusively owns
//! persisted state; handlers hold transient in-memory copies only for the
//! duration of one operation.

use std::sync::Arc;

use opentrade_types::{
    AuditEvent, Consent, ConsentId, Delivery, DeliveryId, Dispute, DisputeId, LeaseFilter,
    LedgerEntry, LedgerFilter, LedgerSummary, Lease, LeaseId, Offer, OfferId, Order, OrderId,
    PendingAnchor, Resource, ResourceFilter, ResourceId, Result, RevocationJob, RevocationJobId,
    RewardGrant, RewardId, RewardNonceRecord, Settlement, SettlementId, StoreBackend, StoreConfig,
};

use crate::file::FileStore;
use crate::sqlite::SqliteStore;

/// Persistence contract for the transaction engine.
///
/// `transaction` executes the closure atomically with respect to every
/// `save_*`/`append_*` it performs: on error all writes are rolled back
/// (backend-specific mechanics), on success they are kept. Nested calls run
/// in place inside the outer transaction, which is the true atomicity unit.
pub trait TradeStore: Send + Sync {
    // ---- offers ----
    fn list_offers(&self) -> Result<Vec<Offer>>;
    fn get_offer(&self, id: OfferId) -> Result<Option<Offer>>;
    fn save_offer(&self, offer: &Offer) -> Result<()>;

    // ---- resources ----
    fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>>;
    fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>>;
    fn save_resource(&self, resource: &Resource) -> Result<()>;

    // ---- orders ----
    fn list_orders(&self) -> Result<Vec<Order>>;
    fn get_order(&self, id: OrderId) -> Result<Option<Order>>;
    fn save_order(&self, order: &Order) -> Result<()>;

    // ---- consents ----
    fn list_consents(&self) -> Result<Vec<Consent>>;
    fn get_consent(&self, id: ConsentId) -> Result<Option<Consent>>;
    fn save_consent(&self, consent: &Consent) -> Result<()>;

    // ---- deliveries ----
    fn list_deliveries(&self) -> Result<Vec<Delivery>>;
    fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>>;
    fn save_delivery(&self, delivery: &Delivery) -> Result<()>;

    // ---- settlements ----
    fn list_settlements(&self) -> Result<Vec<Settlement>>;
    fn get_settlement(&self, id: SettlementId) -> Result<Option<Settlement>>;
    fn get_settlement_by_order(&self, order_id: OrderId) -> Result<Option<Settlement>>;
    fn save_settlement(&self, settlement: &Settlement) -> Result<()>;

    // ---- disputes ----
    fn list_disputes(&self) -> Result<Vec<Dispute>>;
    fn get_dispute(&self, id: DisputeId) -> Result<Option<Dispute>>;
    fn get_dispute_by_order(&self, order_id: OrderId) -> Result<Option<Dispute>>;
    fn save_dispute(&self, dispute: &Dispute) -> Result<()>;

    // ---- leases ----
    fn list_leases(&self, filter: &LeaseFilter) -> Result<Vec<Lease>>;
    fn get_lease(&self, id: LeaseId) -> Result<Option<Lease>>;
    fn save_lease(&self, lease: &Lease) -> Result<()>;

    // ---- usage ledger (append-only) ----
    fn append_ledger(&self, entry: &LedgerEntry) -> Result<()>;
    fn list_ledger(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>>;
    fn summarize_ledger(&self, filter: &LedgerFilter) -> Result<LedgerSummary>;

    // ---- revocation jobs ----
    fn list_revocations(&self) -> Result<Vec<RevocationJob>>;
    fn get_revocation(&self, id: RevocationJobId) -> Result<Option<RevocationJob>>;
    fn save_revocation(&self, job: &RevocationJob) -> Result<()>;

    // ---- rewards ----
    fn list_rewards(&self) -> Result<Vec<RewardGrant>>;
    fn get_reward(&self, id: RewardId) -> Result<Option<RewardGrant>>;
    fn save_reward(&self, reward: &RewardGrant) -> Result<()>;
    fn get_reward_nonce(&self, nonce_id: &str) -> Result<Option<RewardNonceRecord>>;
    fn save_reward_nonce(&self, record: &RewardNonceRecord) -> Result<()>;

    // ---- pending anchors ----
    fn list_pending_anchors(&self) -> Result<Vec<PendingAnchor>>;
    fn save_pending_anchor(&self, anchor: &PendingAnchor) -> Result<()>;
    fn remove_pending_anchor(&self, anchor_id: &str) -> Result<()>;

    // ---- audit trail (append-only) ----
    fn append_audit_event(&self, event: &AuditEvent) -> Result<()>;
    fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>>;

    // ---- transactions ----
    fn transaction(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Whether any collection holds data (drives file → SQLite migration).
    fn has_any_data(&self) -> Result<bool>;
}

/// Construct the backend selected by `config`.
///
/// Backend choice is a construction-time decision; callers only ever hold
/// `Arc<dyn TradeStore>`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn TradeStore>> {
    match config.backend {
        StoreBackend::File => Ok(Arc::new(FileStore::open(&config.dir)?)),
        StoreBackend::Sqlite => {
            let db_path = config
                .db_path
                .clone()
                .unwrap_or_else(|| config.dir.join("trade.db"));
            Ok(Arc::new(SqliteStore::open(
                &db_path,
                &config.dir,
                config.migrate_from_file,
            )?))
        }
    }
}

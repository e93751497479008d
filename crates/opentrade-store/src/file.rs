//! Directory-snapshot file backend.
//!
//! Each collection is one JSON map file (`offers.json`, `orders.json`, ...);
//! the usage ledger and audit trail are append-only line-delimited JSON.
//! `transaction` serializes writers through the directory lock, snapshots
//! every regular file into memory, and restores the directory wholesale if
//! the closure fails.
//!
//! This backend is crash-only/best-effort, not ACID: a concurrent reader is
//! not blocked until commit and may observe a partially-written directory.
//! That weaker guarantee is accepted; the SQLite backend exists for
//! deployments that need real isolation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use opentrade_types::{
    AuditEvent, Consent, ConsentId, Delivery, DeliveryId, Dispute, DisputeId, LeaseFilter,
    LedgerEntry, LedgerFilter, LedgerSummary, Lease, LeaseId, Offer, OfferId, Order, OrderId,
    PendingAnchor, Resource, ResourceFilter, ResourceId, Result, RevocationJob, RevocationJobId,
    RewardGrant, RewardId, RewardNonceRecord, Settlement, SettlementId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::lock::{DirLock, LockOptions, TxnSlot};
use crate::store::TradeStore;

const OFFERS: &str = "offers.json";
const RESOURCES: &str = "resources.json";
const ORDERS: &str = "orders.json";
const CONSENTS: &str = "consents.json";
const DELIVERIES: &str = "deliveries.json";
const SETTLEMENTS: &str = "settlements.json";
const DISPUTES: &str = "disputes.json";
const LEASES: &str = "leases.json";
const REWARDS: &str = "rewards.json";
const REWARD_NONCES: &str = "reward-nonces.json";
const REVOCATIONS: &str = "revocations.json";
const PENDING_ANCHORS: &str = "pending-anchors.json";
const LEDGER_LOG: &str = "ledger.jsonl";
const AUDIT_LOG: &str = "audit-log.jsonl";

/// Nesting slots shared by every `FileStore` in this process, keyed by the
/// canonical lock path so two stores on the same directory share one slot.
fn slot_for(dir: &Path) -> Arc<TxnSlot> {
    static SLOTS: OnceLock<Mutex<HashMap<PathBuf, Arc<TxnSlot>>>> = OnceLock::new();
    let key = DirLock::lock_path(dir);
    let mut slots = SLOTS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .expect("slot registry poisoned");
    Arc::clone(slots.entry(key).or_default())
}

/// In-memory copy of every regular file in the store directory.
struct DirSnapshot {
    files: HashMap<std::ffi::OsString, Vec<u8>>,
}

/// JSON-file-per-collection store.
pub struct FileStore {
    dir: PathBuf,
    lock_options: LockOptions,
}

impl FileStore {
    /// Open (and create) the store directory.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock_options: LockOptions::default(),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn read_map<T: DeserializeOwned>(&self, file: &str) -> Result<BTreeMap<String, T>> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_map<T: Serialize>(&self, file: &str, map: &BTreeMap<String, T>) -> Result<()> {
        let raw = serde_json::to_string_pretty(map)?;
        fs::write(self.path(file), raw)?;
        Ok(())
    }

    fn get_from<T: DeserializeOwned>(&self, file: &str, id: &str) -> Result<Option<T>> {
        let mut map = self.read_map::<T>(file)?;
        Ok(map.remove(id))
    }

    fn save_to<T: Serialize + DeserializeOwned>(
        &self,
        file: &str,
        id: String,
        value: &T,
    ) -> Result<()> {
        let mut map = self.read_map::<serde_json::Value>(file)?;
        map.insert(id, serde_json::to_value(value)?);
        self.write_map(file, &map)
    }

    fn remove_from(&self, file: &str, id: &str) -> Result<()> {
        let mut map = self.read_map::<serde_json::Value>(file)?;
        map.remove(id);
        self.write_map(file, &map)
    }

    fn list_from<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        Ok(self.read_map::<T>(file)?.into_values().collect())
    }

    fn append_line<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let mut handle = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(file))?;
        writeln!(handle, "{}", serde_json::to_string(value)?)?;
        Ok(())
    }

    fn read_lines<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        // Skip lines torn by a crash mid-append rather than failing the read.
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    fn is_lock_file(name: &std::ffi::OsStr) -> bool {
        name.to_string_lossy().contains(".lock")
    }

    fn snapshot(&self) -> Result<DirSnapshot> {
        let mut files = HashMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if Self::is_lock_file(&entry.file_name()) {
                continue;
            }
            files.insert(entry.file_name(), fs::read(entry.path())?);
        }
        Ok(DirSnapshot { files })
    }

    fn restore(&self, snapshot: &DirSnapshot) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if Self::is_lock_file(&entry.file_name()) {
                continue;
            }
            if !snapshot.files.contains_key(&entry.file_name()) {
                fs::remove_file(entry.path())?;
            }
        }
        for (name, data) in &snapshot.files {
            fs::write(self.dir.join(name), data)?;
        }
        Ok(())
    }
}

impl TradeStore for FileStore {
    fn list_offers(&self) -> Result<Vec<Offer>> {
        self.list_from(OFFERS)
    }

    fn get_offer(&self, id: OfferId) -> Result<Option<Offer>> {
        self.get_from(OFFERS, &id.0.to_string())
    }

    fn save_offer(&self, offer: &Offer) -> Result<()> {
        self.save_to(OFFERS, offer.offer_id.0.to_string(), offer)
    }

    fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        let mut resources: Vec<Resource> = self
            .list_from::<Resource>(RESOURCES)?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        if let Some(limit) = filter.limit {
            resources.truncate(limit);
        }
        Ok(resources)
    }

    fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
        self.get_from(RESOURCES, &id.0.to_string())
    }

    fn save_resource(&self, resource: &Resource) -> Result<()> {
        self.save_to(RESOURCES, resource.resource_id.0.to_string(), resource)
    }

    fn list_orders(&self) -> Result<Vec<Order>> {
        self.list_from(ORDERS)
    }

    fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_from(ORDERS, &id.0.to_string())
    }

    fn save_order(&self, order: &Order) -> Result<()> {
        self.save_to(ORDERS, order.order_id.0.to_string(), order)
    }

    fn list_consents(&self) -> Result<Vec<Consent>> {
        self.list_from(CONSENTS)
    }

    fn get_consent(&self, id: ConsentId) -> Result<Option<Consent>> {
        self.get_from(CONSENTS, &id.0.to_string())
    }

    fn save_consent(&self, consent: &Consent) -> Result<()> {
        self.save_to(CONSENTS, consent.consent_id.0.to_string(), consent)
    }

    fn list_deliveries(&self) -> Result<Vec<Delivery>> {
        self.list_from(DELIVERIES)
    }

    fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        self.get_from(DELIVERIES, &id.0.to_string())
    }

    fn save_delivery(&self, delivery: &Delivery) -> Result<()> {
        self.save_to(DELIVERIES, delivery.delivery_id.0.to_string(), delivery)
    }

    fn list_settlements(&self) -> Result<Vec<Settlement>> {
        self.list_from(SETTLEMENTS)
    }

    fn get_settlement(&self, id: SettlementId) -> Result<Option<Settlement>> {
        self.get_from(SETTLEMENTS, &id.0.to_string())
    }

    fn get_settlement_by_order(&self, order_id: OrderId) -> Result<Option<Settlement>> {
        Ok(self
            .list_settlements()?
            .into_iter()
            .find(|s| s.order_id == order_id))
    }

    fn save_settlement(&self, settlement: &Settlement) -> Result<()> {
        self.save_to(SETTLEMENTS, settlement.settlement_id.0.to_string(), settlement)
    }

    fn list_disputes(&self) -> Result<Vec<Dispute>> {
        self.list_from(DISPUTES)
    }

    fn get_dispute(&self, id: DisputeId) -> Result<Option<Dispute>> {
        self.get_from(DISPUTES, &id.0.to_string())
    }

    fn get_dispute_by_order(&self, order_id: OrderId) -> Result<Option<Dispute>> {
        Ok(self
            .list_disputes()?
            .into_iter()
            .find(|d| d.order_id == order_id))
    }

    fn save_dispute(&self, dispute: &Dispute) -> Result<()> {
        self.save_to(DISPUTES, dispute.dispute_id.0.to_string(), dispute)
    }

    fn list_leases(&self, filter: &LeaseFilter) -> Result<Vec<Lease>> {
        let mut leases: Vec<Lease> = self
            .list_from::<Lease>(LEASES)?
            .into_iter()
            .filter(|l| filter.matches(l))
            .collect();
        if let Some(limit) = filter.limit {
            leases.truncate(limit);
        }
        Ok(leases)
    }

    fn get_lease(&self, id: LeaseId) -> Result<Option<Lease>> {
        self.get_from(LEASES, &id.0.to_string())
    }

    fn save_lease(&self, lease: &Lease) -> Result<()> {
        self.save_to(LEASES, lease.lease_id.0.to_string(), lease)
    }

    fn append_ledger(&self, entry: &LedgerEntry) -> Result<()> {
        self.append_line(LEDGER_LOG, entry)
    }

    fn list_ledger(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .read_lines::<LedgerEntry>(LEDGER_LOG)?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        if let Some(limit) = filter.limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }

    fn summarize_ledger(&self, filter: &LedgerFilter) -> Result<LedgerSummary> {
        let unlimited = LedgerFilter {
            limit: None,
            ..filter.clone()
        };
        Ok(LedgerSummary::aggregate(&self.list_ledger(&unlimited)?))
    }

    fn list_revocations(&self) -> Result<Vec<RevocationJob>> {
        self.list_from(REVOCATIONS)
    }

    fn get_revocation(&self, id: RevocationJobId) -> Result<Option<RevocationJob>> {
        self.get_from(REVOCATIONS, &id.0.to_string())
    }

    fn save_revocation(&self, job: &RevocationJob) -> Result<()> {
        self.save_to(REVOCATIONS, job.job_id.0.to_string(), job)
    }

    fn list_rewards(&self) -> Result<Vec<RewardGrant>> {
        self.list_from(REWARDS)
    }

    fn get_reward(&self, id: RewardId) -> Result<Option<RewardGrant>> {
        self.get_from(REWARDS, &id.0.to_string())
    }

    fn save_reward(&self, reward: &RewardGrant) -> Result<()> {
        self.save_to(REWARDS, reward.reward_id.0.to_string(), reward)
    }

    fn get_reward_nonce(&self, nonce_id: &str) -> Result<Option<RewardNonceRecord>> {
        self.get_from(REWARD_NONCES, nonce_id)
    }

    fn save_reward_nonce(&self, record: &RewardNonceRecord) -> Result<()> {
        self.save_to(REWARD_NONCES, record.nonce_id.clone(), record)
    }

    fn list_pending_anchors(&self) -> Result<Vec<PendingAnchor>> {
        self.list_from(PENDING_ANCHORS)
    }

    fn save_pending_anchor(&self, anchor: &PendingAnchor) -> Result<()> {
        self.save_to(PENDING_ANCHORS, anchor.anchor_id.clone(), anchor)
    }

    fn remove_pending_anchor(&self, anchor_id: &str) -> Result<()> {
        self.remove_from(PENDING_ANCHORS, anchor_id)
    }

    fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        self.append_line(AUDIT_LOG, event)
    }

    fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let mut events = self.read_lines::<AuditEvent>(AUDIT_LOG)?;
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
        Ok(events)
    }

    fn transaction(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let slot = slot_for(&self.dir);
        let outer = slot.enter(&self.lock_options)?;
        let result = if outer {
            // Outermost frame: take the directory lock, snapshot, run,
            // restore on failure.
            (|| {
                let _lock = DirLock::acquire(&self.dir, &self.lock_options)?;
                let snapshot = self.snapshot()?;
                match f() {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        tracing::warn!(target: "opentrade::store", error = %err,
                            "file transaction failed, restoring snapshot");
                        self.restore(&snapshot)?;
                        Err(err)
                    }
                }
            })()
        } else {
            // Nested frame: run in place. A failure here propagates out and
            // rolls back at the outer snapshot, not independently.
            f()
        };
        slot.exit();
        result
    }

    fn has_any_data(&self) -> Result<bool> {
        Ok(!self.list_offers()?.is_empty()
            || !self.list_resources(&ResourceFilter::default())?.is_empty()
            || !self.list_orders()?.is_empty()
            || !self.list_consents()?.is_empty()
            || !self.list_deliveries()?.is_empty()
            || !self.list_settlements()?.is_empty()
            || !self.list_disputes()?.is_empty()
            || !self.list_leases(&LeaseFilter::default())?.is_empty()
            || !self.list_revocations()?.is_empty()
            || !self.list_rewards()?.is_empty()
            || !self.list_pending_anchors()?.is_empty()
            || !self.list_ledger(&LedgerFilter::default())?.is_empty()
            || !self.read_audit_events(1)?.is_empty())
    }
}

//! SQLite backend.
//!
//! One table per collection storing the serialized document under its id,
//! WAL journaling, and native BEGIN IMMEDIATE/COMMIT/ROLLBACK transactions.
//! Filtering happens in Rust on the deserialized documents so both backends
//! share one observable behavior.

use std::path::Path;
use std::sync::{Arc, Mutex};

use opentrade_types::{
    AuditEvent, Consent, ConsentId, Delivery, DeliveryId, Dispute, DisputeId, LeaseFilter,
    LedgerEntry, LedgerFilter, LedgerSummary, Lease, LeaseId, Offer, OfferId, OpentradeError,
    Order, OrderId, PendingAnchor, Resource, ResourceFilter, ResourceId, Result, RevocationJob,
    RevocationJobId, RewardGrant, RewardId, RewardNonceRecord, Settlement, SettlementId,
};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::file::FileStore;
use crate::lock::{LockOptions, TxnSlot};
use crate::migrate::copy_all;
use crate::store::TradeStore;

const DOC_TABLES: &[&str] = &[
    "offers",
    "resources",
    "orders",
    "consents",
    "deliveries",
    "settlements",
    "disputes",
    "leases",
    "revocations",
    "rewards",
    "reward_nonces",
    "pending_anchors",
];

fn db_err(err: rusqlite::Error) -> OpentradeError {
    OpentradeError::Storage(err.to_string())
}

/// Relational store over one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    slot: Arc<TxnSlot>,
    lock_options: LockOptions,
}

impl SqliteStore {
    /// Open the database, create the schema, and migrate a non-empty file
    /// store at `file_dir` into a fresh database when asked to.
    pub fn open(db_path: &Path, file_dir: &Path, migrate_from_file: bool) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "busy_timeout", 5000).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
            slot: Arc::new(TxnSlot::default()),
            lock_options: LockOptions::default(),
        };
        store.ensure_schema()?;
        if migrate_from_file && !store.has_any_data()? {
            let file_store = FileStore::open(file_dir)?;
            if file_store.has_any_data()? {
                tracing::info!(target: "opentrade::store", db = %db_path.display(),
                    "migrating file store into sqlite");
                copy_all(&file_store, &store)?;
            }
        }
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let mut schema = String::new();
        for table in DOC_TABLES {
            schema.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, data TEXT NOT NULL);"
            ));
        }
        schema.push_str(
            "CREATE TABLE IF NOT EXISTS ledger (id TEXT PRIMARY KEY, timestamp TEXT NOT NULL, data TEXT NOT NULL);\
             CREATE TABLE IF NOT EXISTS audit (id TEXT PRIMARY KEY, timestamp TEXT NOT NULL, data TEXT NOT NULL);\
             CREATE INDEX IF NOT EXISTS ledger_ts ON ledger(timestamp);\
             CREATE INDEX IF NOT EXISTS audit_ts ON audit(timestamp);",
        );
        self.conn
            .lock()
            .expect("connection poisoned")
            .execute_batch(&schema)
            .map_err(db_err)
    }

    fn save_doc<T: Serialize>(&self, table: &str, id: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string(value)?;
        self.conn
            .lock()
            .expect("connection poisoned")
            .execute(
                &format!("INSERT OR REPLACE INTO {table} (id, data) VALUES (?1, ?2)"),
                rusqlite::params![id, data],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_doc<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<Option<T>> {
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(&format!("SELECT data FROM {table} WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt.query([id]).map_err(db_err)?;
        match rows.next().map_err(db_err)? {
            Some(row) => {
                let data: String = row.get(0).map_err(db_err)?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    fn list_docs<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(&format!("SELECT data FROM {table} ORDER BY id"))
            .map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let data: String = row.get(0).map_err(db_err)?;
            out.push(serde_json::from_str(&data)?);
        }
        Ok(out)
    }

    fn remove_doc(&self, table: &str, id: &str) -> Result<()> {
        self.conn
            .lock()
            .expect("connection poisoned")
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])
            .map(|_| ())
            .map_err(db_err)
    }

    fn append_log<T: Serialize>(
        &self,
        table: &str,
        id: &str,
        timestamp: &str,
        value: &T,
    ) -> Result<()> {
        let data = serde_json::to_string(value)?;
        self.conn
            .lock()
            .expect("connection poisoned")
            .execute(
                &format!("INSERT INTO {table} (id, timestamp, data) VALUES (?1, ?2, ?3)"),
                rusqlite::params![id, timestamp, data],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn read_log<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let conn = self.conn.lock().expect("connection poisoned");
        let mut stmt = conn
            .prepare(&format!("SELECT data FROM {table} ORDER BY timestamp, id"))
            .map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let data: String = row.get(0).map_err(db_err)?;
            out.push(serde_json::from_str(&data)?);
        }
        Ok(out)
    }

    fn exec(&self, sql: &str) -> Result<()> {
        self.conn
            .lock()
            .expect("connection poisoned")
            .execute_batch(sql)
            .map_err(db_err)
    }
}

impl TradeStore for SqliteStore {
    fn list_offers(&self) -> Result<Vec<Offer>> {
        self.list_docs("offers")
    }

    fn get_offer(&self, id: OfferId) -> Result<Option<Offer>> {
        self.get_doc("offers", &id.0.to_string())
    }

    fn save_offer(&self, offer: &Offer) -> Result<()> {
        self.save_doc("offers", &offer.offer_id.0.to_string(), offer)
    }

    fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        let mut resources: Vec<Resource> = self
            .list_docs::<Resource>("resources")?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        if let Some(limit) = filter.limit {
            resources.truncate(limit);
        }
        Ok(resources)
    }

    fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
        self.get_doc("resources", &id.0.to_string())
    }

    fn save_resource(&self, resource: &Resource) -> Result<()> {
        self.save_doc("resources", &resource.resource_id.0.to_string(), resource)
    }

    fn list_orders(&self) -> Result<Vec<Order>> {
        self.list_docs("orders")
    }

    fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_doc("orders", &id.0.to_string())
    }

    fn save_order(&self, order: &Order) -> Result<()> {
        self.save_doc("orders", &order.order_id.0.to_string(), order)
    }

    fn list_consents(&self) -> Result<Vec<Consent>> {
        self.list_docs("consents")
    }

    fn get_consent(&self, id: ConsentId) -> Result<Option<Consent>> {
        self.get_doc("consents", &id.0.to_string())
    }

    fn save_consent(&self, consent: &Consent) -> Result<()> {
        self.save_doc("consents", &consent.consent_id.0.to_string(), consent)
    }

    fn list_deliveries(&self) -> Result<Vec<Delivery>> {
        self.list_docs("deliveries")
    }

    fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        self.get_doc("deliveries", &id.0.to_string())
    }

    fn save_delivery(&self, delivery: &Delivery) -> Result<()> {
        self.save_doc("deliveries", &delivery.delivery_id.0.to_string(), delivery)
    }

    fn list_settlements(&self) -> Result<Vec<Settlement>> {
        self.list_docs("settlements")
    }

    fn get_settlement(&self, id: SettlementId) -> Result<Option<Settlement>> {
        self.get_doc("settlements", &id.0.to_string())
    }

    fn get_settlement_by_order(&self, order_id: OrderId) -> Result<Option<Settlement>> {
        Ok(self
            .list_settlements()?
            .into_iter()
            .find(|s| s.order_id == order_id))
    }

    fn save_settlement(&self, settlement: &Settlement) -> Result<()> {
        self.save_doc(
            "settlements",
            &settlement.settlement_id.0.to_string(),
            settlement,
        )
    }

    fn list_disputes(&self) -> Result<Vec<Dispute>> {
        self.list_docs("disputes")
    }

    fn get_dispute(&self, id: DisputeId) -> Result<Option<Dispute>> {
        self.get_doc("disputes", &id.0.to_string())
    }

    fn get_dispute_by_order(&self, order_id: OrderId) -> Result<Option<Dispute>> {
        Ok(self
            .list_disputes()?
            .into_iter()
            .find(|d| d.order_id == order_id))
    }

    fn save_dispute(&self, dispute: &Dispute) -> Result<()> {
        self.save_doc("disputes", &dispute.dispute_id.0.to_string(), dispute)
    }

    fn list_leases(&self, filter: &LeaseFilter) -> Result<Vec<Lease>> {
        let mut leases: Vec<Lease> = self
            .list_docs::<Lease>("leases")?
            .into_iter()
            .filter(|l| filter.matches(l))
            .collect();
        if let Some(limit) = filter.limit {
            leases.truncate(limit);
        }
        Ok(leases)
    }

    fn get_lease(&self, id: LeaseId) -> Result<Option<Lease>> {
        self.get_doc("leases", &id.0.to_string())
    }

    fn save_lease(&self, lease: &Lease) -> Result<()> {
        self.save_doc("leases", &lease.lease_id.0.to_string(), lease)
    }

    fn append_ledger(&self, entry: &LedgerEntry) -> Result<()> {
        self.append_log(
            "ledger",
            &entry.ledger_id.0.to_string(),
            &entry.timestamp.to_rfc3339(),
            entry,
        )
    }

    fn list_ledger(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .read_log::<LedgerEntry>("ledger")?
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
        self.list_docs("revocations")
    }

    fn get_revocation(&self, id: RevocationJobId) -> Result<Option<RevocationJob>> {
        self.get_doc("revocations", &id.0.to_string())
    }

    fn save_revocation(&self, job: &RevocationJob) -> Result<()> {
        self.save_doc("revocations", &job.job_id.0.to_string(), job)
    }

    fn list_rewards(&self) -> Result<Vec<RewardGrant>> {
        self.list_docs("rewards")
    }

    fn get_reward(&self, id: RewardId) -> Result<Option<RewardGrant>> {
        self.get_doc("rewards", &id.0.to_string())
    }

    fn save_reward(&self, reward: &RewardGrant) -> Result<()> {
        self.save_doc("rewards", &reward.reward_id.0.to_string(), reward)
    }

    fn get_reward_nonce(&self, nonce_id: &str) -> Result<Option<RewardNonceRecord>> {
        self.get_doc("reward_nonces", nonce_id)
    }

    fn save_reward_nonce(&self, record: &RewardNonceRecord) -> Result<()> {
        self.save_doc("reward_nonces", &record.nonce_id, record)
    }

    fn list_pending_anchors(&self) -> Result<Vec<PendingAnchor>> {
        self.list_docs("pending_anchors")
    }

    fn save_pending_anchor(&self, anchor: &PendingAnchor) -> Result<()> {
        self.save_doc("pending_anchors", &anchor.anchor_id, anchor)
    }

    fn remove_pending_anchor(&self, anchor_id: &str) -> Result<()> {
        self.remove_doc("pending_anchors", anchor_id)
    }

    fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        self.append_log(
            "audit",
            &event.id.0.to_string(),
            &event.timestamp.to_rfc3339(),
            event,
        )
    }

    fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let mut events = self.read_log::<AuditEvent>("audit")?;
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
        Ok(events)
    }

    fn transaction(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let slot = Arc::clone(&self.slot);
        let outer = slot.enter(&self.lock_options)?;
        let result = if outer {
            // Outermost frame drives the engine's native transaction; the
            // engine rolls back every write since BEGIN on failure.
            (|| {
                self.exec("BEGIN IMMEDIATE;")?;
                match f() {
                    Ok(()) => self.exec("COMMIT;"),
                    Err(err) => {
                        tracing::warn!(target: "opentrade::store", error = %err,
                            "sqlite transaction failed, rolling back");
                        self.exec("ROLLBACK;")?;
                        Err(err)
                    }
                }
            })()
        } else {
            f()
        };
        slot.exit();
        result
    }

    fn has_any_data(&self) -> Result<bool> {
        let conn = self.conn.lock().expect("connection poisoned");
        for table in DOC_TABLES.iter().chain(&["ledger", "audit"]) {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(1) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(db_err)?;
            if count > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentrade_types::ActorId;
    use rust_decimal::Decimal;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("trade.db"), dir.path(), false).unwrap();
        (dir, store)
    }

    #[test]
    fn save_and_get_offer() {
        let (_dir, store) = store();
        let offer = Offer::dummy(ActorId::new("seller-1"), Decimal::new(10, 0));
        store.save_offer(&offer).unwrap();
        let loaded = store.get_offer(offer.offer_id).unwrap().unwrap();
        assert_eq!(loaded.offer_hash, offer.offer_hash);
    }

    #[test]
    fn transaction_is_all_or_nothing() {
        let (_dir, store) = store();
        let a = Offer::dummy(ActorId::new("s1"), Decimal::new(1, 0));
        let b = Offer::dummy(ActorId::new("s2"), Decimal::new(2, 0));
        let result = store.transaction(&mut || {
            store.save_offer(&a)?;
            store.save_offer(&b)?;
            Err(opentrade_types::OpentradeError::conflict("late failure"))
        });
        assert!(result.is_err());
        assert!(store.get_offer(a.offer_id).unwrap().is_none());
        assert!(store.get_offer(b.offer_id).unwrap().is_none());
    }

    #[test]
    fn nested_transaction_does_not_commit_independently() {
        let (_dir, store) = store();
        let a = Offer::dummy(ActorId::new("s1"), Decimal::new(1, 0));
        let result = store.transaction(&mut || {
            store.transaction(&mut || store.save_offer(&a))?;
            Err(opentrade_types::OpentradeError::conflict("outer fails"))
        });
        assert!(result.is_err());
        assert!(store.get_offer(a.offer_id).unwrap().is_none());
    }

    #[test]
    fn migrates_file_store_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let file_store = FileStore::open(dir.path()).unwrap();
        let offer = Offer::dummy(ActorId::new("seller-1"), Decimal::new(10, 0));
        file_store.save_offer(&offer).unwrap();

        let sqlite = SqliteStore::open(&dir.path().join("trade.db"), dir.path(), true).unwrap();
        let loaded = sqlite.get_offer(offer.offer_id).unwrap().unwrap();
        assert_eq!(loaded.offer_hash, offer.offer_hash);
    }
}

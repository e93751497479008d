//! Usage ledger: append-only metering entries recorded against leases.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::resource::ResourceKind;
use crate::{ActorId, LeaseId, LedgerEntryId, ResourceId};

/// The unit a ledger entry is metered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerUnit {
    Token,
    Call,
    Query,
    Byte,
}

impl std::fmt::Display for LedgerUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Call => write!(f, "call"),
            Self::Query => write!(f, "query"),
            Self::Byte => write!(f, "byte"),
        }
    }
}

/// One metered usage record. Never mutated after being appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ledger_id: LedgerEntryId,
    pub timestamp: DateTime<Utc>,
    pub lease_id: LeaseId,
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub provider: ActorId,
    pub consumer: ActorId,
    pub unit: LedgerUnit,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub entry_hash: String,
}

#[derive(Serialize)]
struct EntryIdentity<'a> {
    lease_id: &'a LeaseId,
    resource_id: &'a ResourceId,
    kind: ResourceKind,
    provider: &'a ActorId,
    consumer: &'a ActorId,
    unit: LedgerUnit,
    quantity: Decimal,
    cost: Decimal,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
    timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Hash of the entry's metering identity.
    #[must_use]
    pub fn identity_hash(&self) -> String {
        hash_canonical(&EntryIdentity {
            lease_id: &self.lease_id,
            resource_id: &self.resource_id,
            kind: self.kind,
            provider: &self.provider,
            consumer: &self.consumer,
            unit: self.unit,
            quantity: self.quantity,
            cost: self.cost,
            currency: &self.currency,
            session_id: self.session_id.as_deref(),
            run_id: self.run_id.as_deref(),
            timestamp: self.timestamp,
        })
    }
}

/// Filter for ledger queries.
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub lease_id: Option<LeaseId>,
    pub resource_id: Option<ResourceId>,
    pub provider: Option<ActorId>,
    pub consumer: Option<ActorId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LedgerFilter {
    #[must_use]
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if self.lease_id.is_some_and(|id| id != entry.lease_id) {
            return false;
        }
        if self.resource_id.is_some_and(|id| id != entry.resource_id) {
            return false;
        }
        if let Some(provider) = &self.provider {
            if !provider.matches(&entry.provider) {
                return false;
            }
        }
        if let Some(consumer) = &self.consumer {
            if !consumer.matches(&entry.consumer) {
                return false;
            }
        }
        if self.since.is_some_and(|since| entry.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.timestamp > until) {
            return false;
        }
        true
    }
}

/// Per-unit totals for one ledger slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTotals {
    pub quantity: Decimal,
    pub cost: Decimal,
}

/// Aggregated view of a ledger slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub by_unit: BTreeMap<LedgerUnit, UnitTotals>,
    pub total_cost: Decimal,
    pub currency: String,
}

impl LedgerSummary {
    /// Fold `entries` into per-unit and total cost buckets. The currency is
    /// taken from the first entry; mixed-currency slices keep the first.
    #[must_use]
    pub fn aggregate<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            if summary.currency.is_empty() {
                summary.currency.clone_from(&entry.currency);
            }
            let bucket = summary.by_unit.entry(entry.unit).or_default();
            bucket.quantity += entry.quantity;
            bucket.cost += entry.cost;
            summary.total_cost += entry.cost;
        }
        summary
    }
}

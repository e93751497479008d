//! Usage ledger operations: append, list, summary.
//!
//! Metering runs on the provider's word, but every entry is validated
//! against the live lease before it is accepted: status, expiry, resource,
//! and both actor bindings must all line up.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_store::TradeStore;
use opentrade_types::{
    ActorId, AuditKind, Lease, LeaseId, LedgerEntry, LedgerEntryId, LedgerFilter, LedgerSummary,
    LedgerUnit, OpentradeError, ResourceKind, Result,
};

use crate::access::{assert_access, demand_actor, Action};
use crate::engine::MarketEngine;

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerAppendParams {
    pub actor: Option<ActorId>,
    pub lease_id: LeaseId,
    pub resource_id: opentrade_types::ResourceId,
    pub kind: ResourceKind,
    pub provider: ActorId,
    pub consumer: ActorId,
    pub unit: LedgerUnit,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub currency: String,
    pub token_address: Option<String>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerAppendReceipt {
    pub ledger_id: LedgerEntryId,
    pub entry_hash: String,
}

impl MarketEngine {
    /// `ledger.append`
    pub fn ledger_append(&self, params: LedgerAppendParams) -> Result<LedgerAppendReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let actor = demand_actor(params.actor.as_ref())?.clone();

        if !actor.matches(&params.provider) {
            return Err(OpentradeError::Forbidden {
                reason: "actor must match provider".to_string(),
            });
        }
        if params.quantity < Decimal::ZERO || params.cost < Decimal::ZERO {
            return Err(OpentradeError::invalid(
                "quantity and cost must not be negative",
            ));
        }
        if params.currency.trim().is_empty() {
            return Err(OpentradeError::invalid("currency is required"));
        }

        let now = Utc::now();
        let lease = self.live_lease(params.lease_id, now)?;
        if lease.resource_id != params.resource_id || lease.kind != params.kind {
            return Err(OpentradeError::conflict("lease/resource mismatch"));
        }
        if !lease.provider.matches(&params.provider) || !lease.consumer.matches(&params.consumer) {
            return Err(OpentradeError::conflict("lease actor mismatch"));
        }
        let resource = self.load_resource(params.resource_id)?;
        if !resource.is_published() {
            return Err(OpentradeError::conflict("resource is not published"));
        }

        let mut entry = LedgerEntry {
            ledger_id: LedgerEntryId::new(),
            timestamp: now,
            lease_id: params.lease_id,
            resource_id: params.resource_id,
            kind: params.kind,
            provider: params.provider,
            consumer: params.consumer,
            unit: params.unit,
            quantity: params.quantity,
            cost: params.cost,
            currency: params.currency,
            token_address: params.token_address,
            session_id: params.session_id,
            run_id: params.run_id,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.identity_hash();
        self.store.append_ledger(&entry)?;

        self.audit.record(
            AuditKind::LedgerAppended,
            entry.ledger_id.to_string(),
            Some(entry.entry_hash.clone()),
            Some(actor),
            Some(json!({
                "lease_id": entry.lease_id,
                "resource_id": entry.resource_id,
                "unit": entry.unit,
                "quantity": entry.quantity,
                "cost": entry.cost,
                "currency": entry.currency,
            })),
        )?;

        Ok(LedgerAppendReceipt {
            ledger_id: entry.ledger_id,
            entry_hash: entry.entry_hash,
        })
    }

    /// `ledger.list`
    pub fn ledger_list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        validate_window(filter)?;
        self.store.list_ledger(filter)
    }

    /// `ledger.summary`
    pub fn ledger_summary(&self, filter: &LedgerFilter) -> Result<LedgerSummary> {
        validate_window(filter)?;
        self.store.summarize_ledger(filter)
    }

    /// Cache-assisted lease liveness check for the metering hot path.
    fn live_lease(&self, lease_id: LeaseId, now: DateTime<Utc>) -> Result<Lease> {
        if let Some(lease) = self
            .lease_cache
            .lock()
            .expect("lease cache poisoned")
            .get_live(lease_id, now)
        {
            return Ok(lease);
        }
        let lease = self.load_lease(lease_id)?;
        if lease.status != opentrade_types::LeaseStatus::Active {
            return Err(OpentradeError::Revoked {
                reason: "lease is not active".to_string(),
            });
        }
        if lease.is_expired_at(now) {
            return Err(OpentradeError::Expired {
                reason: "lease expired".to_string(),
            });
        }
        self.lease_cache
            .lock()
            .expect("lease cache poisoned")
            .insert(lease.clone(), now);
        Ok(lease)
    }
}

fn validate_window(filter: &LedgerFilter) -> Result<()> {
    if let (Some(since), Some(until)) = (filter.since, filter.until) {
        if since > until {
            return Err(OpentradeError::invalid("since must not be after until"));
        }
    }
    Ok(())
}

//! Audit & anchoring pipeline.
//!
//! Every lifecycle moment is appended to the audit log; hashes that matter
//! are additionally anchored on the external ledger when a chain adapter is
//! configured. The local append must never block on, or be rolled back by,
//! anchoring: a failed anchor merges the error into the event details and
//! lands in the persisted pending-anchor queue for a later flush.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use opentrade_store::TradeStore;
use opentrade_types::{
    ActorId, AuditEvent, AuditEventId, AuditKind, PendingAnchor, Result,
};

use crate::chain::{AnchorReceipt, ChainAdapter};

/// Outcome of one [`AuditPipeline::flush_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnchorFlushReport {
    pub processed: u32,
    pub anchored: u32,
    pub failed: u32,
}

/// Appends audit events and opportunistically anchors their hashes.
pub struct AuditPipeline {
    store: Arc<dyn TradeStore>,
    chain: Option<Arc<dyn ChainAdapter>>,
}

impl AuditPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn TradeStore>, chain: Option<Arc<dyn ChainAdapter>>) -> Self {
        Self { store, chain }
    }

    /// Append one event to the audit log.
    pub fn record(
        &self,
        kind: AuditKind,
        ref_id: impl Into<String>,
        hash: Option<String>,
        actor: Option<ActorId>,
        details: Option<Value>,
    ) -> Result<AuditEvent> {
        let event = AuditEvent {
            id: AuditEventId::new(),
            kind,
            ref_id: ref_id.into(),
            hash,
            actor,
            timestamp: Utc::now(),
            details,
        };
        self.store.append_audit_event(&event)?;
        Ok(event)
    }

    /// Append one event and attempt to anchor `hash` under `anchor_id`.
    ///
    /// A successful anchor merges the receipt into the event details; a
    /// failed one merges the error string and queues a [`PendingAnchor`].
    /// The event is recorded locally either way.
    pub async fn record_with_anchor(
        &self,
        kind: AuditKind,
        ref_id: impl Into<String>,
        hash: &str,
        anchor_id: &str,
        actor: Option<ActorId>,
        details: Option<Value>,
    ) -> Result<AuditEvent> {
        let mut merged: Map<String, Value> = match details {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("detail".to_string(), other);
                map
            }
            None => Map::new(),
        };

        match self.try_anchor(anchor_id, hash).await {
            Ok(Some(receipt)) => {
                merged.insert(
                    "anchor".to_string(),
                    serde_json::to_value(&receipt).unwrap_or(Value::Null),
                );
            }
            Ok(None) => {}
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(target: "opentrade::audit", anchor_id, error = %message, "anchoring failed, queueing");
                merged.insert("anchor_error".to_string(), Value::String(message.clone()));
                self.queue_pending(anchor_id, hash, message);
            }
        }

        let details = if merged.is_empty() {
            None
        } else {
            Some(Value::Object(merged))
        };
        self.record(kind, ref_id, Some(hash.to_string()), actor, details)
    }

    async fn try_anchor(&self, anchor_id: &str, hash: &str) -> Result<Option<AnchorReceipt>> {
        match &self.chain {
            None => Ok(None),
            Some(chain) => chain.anchor_hash(anchor_id, hash).await.map(Some),
        }
    }

    /// Best effort: a pending-anchor write failure must not fail the caller,
    /// whose own audit append is the operation that matters.
    fn queue_pending(&self, anchor_id: &str, payload_hash: &str, error: String) {
        let pending = PendingAnchor {
            anchor_id: anchor_id.to_string(),
            payload_hash: payload_hash.to_string(),
            created_at: Utc::now(),
            attempts: 1,
            last_error: Some(error),
        };
        if let Err(err) = self.store.save_pending_anchor(&pending) {
            tracing::error!(target: "opentrade::audit", anchor_id, error = %err, "failed to queue pending anchor");
        }
    }

    /// Retry every queued anchor once; successes leave the queue.
    pub async fn flush_pending(&self) -> Result<AnchorFlushReport> {
        let Some(chain) = &self.chain else {
            return Ok(AnchorFlushReport::default());
        };

        let mut report = AnchorFlushReport::default();
        for mut pending in self.store.list_pending_anchors()? {
            report.processed += 1;
            match chain
                .anchor_hash(&pending.anchor_id, &pending.payload_hash)
                .await
            {
                Ok(receipt) => {
                    self.store.remove_pending_anchor(&pending.anchor_id)?;
                    tracing::info!(target: "opentrade::audit", anchor_id = %pending.anchor_id, tx = %receipt.tx, "pending anchor flushed");
                    report.anchored += 1;
                }
                Err(err) => {
                    pending.attempts += 1;
                    pending.last_error = Some(err.to_string());
                    self.store.save_pending_anchor(&pending)?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

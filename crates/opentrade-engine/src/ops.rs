//! Operational surface: status summary, audit query, transparency views,
//! repair and revocation retries, metrics snapshot.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_outbound::SweepReport;
use opentrade_store::TradeStore;
use opentrade_types::{
    ensure_transition, ActorId, AuditEvent, AuditKind, Consent, Delivery, DeliveryStatus,
    DisputeStatus, LeaseStatus, Offer, OfferId, Order, OrderId, Result, RevocationJobStatus,
    Settlement, SettlementId, SettlementStatus,
};

use crate::access::{assert_access, Action};
use crate::engine::MarketEngine;

const AUDIT_DEFAULT_LIMIT: usize = 100;
const TRANSPARENCY_DEFAULT_LIMIT: usize = 200;
const TRACE_DEFAULT_LIMIT: usize = 300;
const REPAIR_DEFAULT_LIMIT: usize = 200;
const REPAIR_MAX_LIMIT: usize = 1000;
const METRICS_AUDIT_WINDOW: usize = 1000;

type StatusCounts = BTreeMap<String, usize>;

fn count_by_status<T, S: Serialize>(items: &[T], status: impl Fn(&T) -> S) -> StatusCounts {
    let mut counts = StatusCounts::new();
    for item in items {
        let key = serde_json::to_value(status(item))
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        *counts.entry(key).or_default() += 1;
    }
    counts
}

fn safe_rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            numerator as f64 / denominator as f64
        }
    }
}

/// `status.summary` response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub offers: StatusCounts,
    pub orders: StatusCounts,
    pub deliveries: StatusCounts,
    pub settlements: StatusCounts,
    pub totals: BTreeMap<String, usize>,
}

/// `transparency.summary` response.
#[derive(Debug, Clone, Serialize)]
pub struct TransparencySummary {
    pub totals: BTreeMap<String, usize>,
    pub statuses: BTreeMap<String, StatusCounts>,
    pub revocation: RevocationCounts,
    /// Offer count per usage purpose.
    pub purposes: BTreeMap<String, usize>,
    /// Offer count per asset id.
    pub assets: BTreeMap<String, usize>,
    pub audit: AuditWindow,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevocationCounts {
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditWindow {
    pub events: Vec<AuditEvent>,
    pub count: usize,
    pub revoke_failures: usize,
    pub anchor_failures: usize,
}

/// `transparency.trace` filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceParams {
    pub offer_id: Option<OfferId>,
    pub order_id: Option<OrderId>,
    pub buyer: Option<ActorId>,
    pub asset_id: Option<String>,
    pub settlement_id: Option<SettlementId>,
    pub limit: Option<usize>,
}

/// `transparency.trace` response: every entity on the trade spine that
/// matches, plus the audit events referring to them.
#[derive(Debug, Clone, Serialize)]
pub struct TraceView {
    pub offers: Vec<Offer>,
    pub orders: Vec<Order>,
    pub consents: Vec<Consent>,
    pub deliveries: Vec<Delivery>,
    pub settlements: Vec<Settlement>,
    pub audit: Vec<AuditEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepairRetryParams {
    pub actor: Option<ActorId>,
    #[serde(default)]
    pub dry_run: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevocationRetryParams {
    pub actor: Option<ActorId>,
    /// Also re-queue exhausted (`failed`) jobs before sweeping.
    #[serde(default)]
    pub include_failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevocationRetryReport {
    pub requeued: u32,
    #[serde(flatten)]
    pub sweep: SweepReport,
}

/// One alert rule evaluation in the metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub rule: &'static str,
    pub severity: &'static str,
    pub triggered: bool,
    pub value: f64,
}

/// `metrics.snapshot` response.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub offers: StatusCounts,
    pub orders: StatusCounts,
    pub settlements: StatusCounts,
    pub settlement_failure_rate: f64,
    pub leases: StatusCounts,
    pub disputes: StatusCounts,
    pub open_disputes: usize,
    pub revocations: RevocationCounts,
    pub pending_anchors: usize,
    pub alerts: Vec<Alert>,
}

impl MarketEngine {
    /// `status.summary`
    pub fn status_summary(&self, actor: Option<&ActorId>) -> Result<StatusSummary> {
        assert_access(&self.config.access, actor, Action::Read)?;
        let offers = self.store.list_offers()?;
        let orders = self.store.list_orders()?;
        let deliveries = self.store.list_deliveries()?;
        let settlements = self.store.list_settlements()?;

        let mut totals = BTreeMap::new();
        totals.insert("offers".to_string(), offers.len());
        totals.insert("orders".to_string(), orders.len());
        totals.insert("deliveries".to_string(), deliveries.len());
        totals.insert("settlements".to_string(), settlements.len());

        Ok(StatusSummary {
            offers: count_by_status(&offers, |o| o.status),
            orders: count_by_status(&orders, |o| o.status),
            deliveries: count_by_status(&deliveries, |d| d.status),
            settlements: count_by_status(&settlements, |s| s.status),
            totals,
        })
    }

    /// `audit.query` — the most recent `limit` events.
    pub fn audit_query(
        &self,
        actor: Option<&ActorId>,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEvent>> {
        assert_access(&self.config.access, actor, Action::Read)?;
        self.store
            .read_audit_events(limit.unwrap_or(AUDIT_DEFAULT_LIMIT))
    }

    /// `transparency.summary`
    pub fn transparency_summary(
        &self,
        actor: Option<&ActorId>,
        limit: Option<usize>,
    ) -> Result<TransparencySummary> {
        assert_access(&self.config.access, actor, Action::Read)?;
        let limit = limit.unwrap_or(TRANSPARENCY_DEFAULT_LIMIT);

        let offers = self.store.list_offers()?;
        let orders = self.store.list_orders()?;
        let consents = self.store.list_consents()?;
        let deliveries = self.store.list_deliveries()?;
        let settlements = self.store.list_settlements()?;
        let revocations = self.store.list_revocations()?;
        let events = self.store.read_audit_events(limit)?;

        let mut totals = BTreeMap::new();
        totals.insert("offers".to_string(), offers.len());
        totals.insert("orders".to_string(), orders.len());
        totals.insert("consents".to_string(), consents.len());
        totals.insert("deliveries".to_string(), deliveries.len());
        totals.insert("settlements".to_string(), settlements.len());
        totals.insert("revocations".to_string(), revocations.len());

        let mut statuses = BTreeMap::new();
        statuses.insert("offers".to_string(), count_by_status(&offers, |o| o.status));
        statuses.insert("orders".to_string(), count_by_status(&orders, |o| o.status));
        statuses.insert(
            "consents".to_string(),
            count_by_status(&consents, |c| c.status),
        );
        statuses.insert(
            "deliveries".to_string(),
            count_by_status(&deliveries, |d| d.status),
        );
        statuses.insert(
            "settlements".to_string(),
            count_by_status(&settlements, |s| s.status),
        );

        let mut purposes: BTreeMap<String, usize> = BTreeMap::new();
        let mut assets: BTreeMap<String, usize> = BTreeMap::new();
        for offer in &offers {
            *purposes
                .entry(offer.usage_scope.purpose.clone())
                .or_default() += 1;
            *assets.entry(offer.asset_id.clone()).or_default() += 1;
        }

        let revoke_failures = events
            .iter()
            .filter(|event| {
                event.kind == AuditKind::DeliveryRevoked
                    && event
                        .details
                        .as_ref()
                        .and_then(|d| d.get("revoke_ok"))
                        .is_some_and(|v| v == &json!(false))
            })
            .count();
        let anchor_failures = events.iter().filter(|e| e.anchor_failed()).count();

        Ok(TransparencySummary {
            totals,
            statuses,
            revocation: RevocationCounts {
                pending: revocations
                    .iter()
                    .filter(|j| j.status == RevocationJobStatus::Pending)
                    .count(),
                failed: revocations
                    .iter()
                    .filter(|j| j.status == RevocationJobStatus::Failed)
                    .count(),
            },
            purposes,
            assets,
            audit: AuditWindow {
                count: events.len(),
                revoke_failures,
                anchor_failures,
                events,
            },
        })
    }

    /// `transparency.trace` — cross-entity trace of one trade (or a slice
    /// of the market) plus its audit trail.
    pub fn transparency_trace(
        &self,
        actor: Option<&ActorId>,
        params: &TraceParams,
    ) -> Result<TraceView> {
        assert_access(&self.config.access, actor, Action::Read)?;

        let offers: Vec<Offer> = self
            .store
            .list_offers()?
            .into_iter()
            .filter(|offer| {
                params.offer_id.is_none_or(|id| offer.offer_id == id)
                    && params
                        .asset_id
                        .as_deref()
                        .is_none_or(|asset| offer.asset_id == asset)
            })
            .collect();

        let orders: Vec<Order> = self
            .store
            .list_orders()?
            .into_iter()
            .filter(|order| {
                params.order_id.is_none_or(|id| order.order_id == id)
                    && params.offer_id.is_none_or(|id| order.offer_id == id)
                    && params
                        .buyer
                        .as_ref()
                        .is_none_or(|buyer| buyer.matches(&order.buyer))
                    && (params.asset_id.is_none()
                        || offers.iter().any(|offer| offer.offer_id == order.offer_id))
            })
            .collect();

        let order_matches =
            |order_id: OrderId| orders.iter().any(|order| order.order_id == order_id);

        let consents: Vec<Consent> = self
            .store
            .list_consents()?
            .into_iter()
            .filter(|consent| order_matches(consent.order_id))
            .collect();
        let deliveries: Vec<Delivery> = self
            .store
            .list_deliveries()?
            .into_iter()
            .filter(|delivery| order_matches(delivery.order_id))
            .collect();
        let settlements: Vec<Settlement> = self
            .store
            .list_settlements()?
            .into_iter()
            .filter(|settlement| {
                params
                    .settlement_id
                    .is_none_or(|id| settlement.settlement_id == id)
                    && order_matches(settlement.order_id)
            })
            .collect();

        let mut ref_ids: Vec<String> = Vec::new();
        ref_ids.extend(offers.iter().map(|o| o.offer_id.to_string()));
        ref_ids.extend(orders.iter().map(|o| o.order_id.to_string()));
        ref_ids.extend(consents.iter().map(|c| c.consent_id.to_string()));
        ref_ids.extend(deliveries.iter().map(|d| d.delivery_id.to_string()));
        ref_ids.extend(settlements.iter().map(|s| s.settlement_id.to_string()));

        let audit = self
            .store
            .read_audit_events(params.limit.unwrap_or(TRACE_DEFAULT_LIMIT))?
            .into_iter()
            .filter(|event| ref_ids.iter().any(|id| *id == event.ref_id))
            .collect();

        Ok(TraceView {
            offers,
            orders,
            consents,
            deliveries,
            settlements,
            audit,
        })
    }

    /// `repair.retry` — close out orphaned and overdue leases: expired
    /// active leases are expired, leases whose resource/order/delivery is
    /// gone are revoked, and dangling live deliveries go down with them.
    pub fn repair_retry(&self, params: &RepairRetryParams) -> Result<RepairReport> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let limit = params
            .limit
            .unwrap_or(REPAIR_DEFAULT_LIMIT)
            .min(REPAIR_MAX_LIMIT);
        let now = Utc::now();

        let mut candidates = Vec::new();
        for lease in self.store.list_leases(&opentrade_types::LeaseFilter::default())? {
            let resource = self.store.get_resource(lease.resource_id)?;
            let order = self.store.get_order(lease.order_id)?;
            let delivery = match lease.delivery_id {
                Some(id) => self.store.get_delivery(id)?,
                None => None,
            };
            let expired = lease.status == LeaseStatus::Active && lease.is_expired_at(now);
            let orphan = resource.is_none()
                || order.is_none()
                || (lease.delivery_id.is_some() && delivery.is_none());
            if expired || orphan {
                candidates.push((lease, delivery, expired, orphan));
            }
        }

        let total = candidates.len();
        let mut report = RepairReport::default();
        for (mut lease, delivery, expired, orphan) in candidates.into_iter().take(limit) {
            report.processed += 1;
            let result = (|| -> Result<()> {
                if !params.dry_run {
                    if expired && lease.status == LeaseStatus::Active {
                        ensure_transition(lease.status, LeaseStatus::Expired)?;
                        lease.status = LeaseStatus::Expired;
                        self.store.save_lease(&lease)?;
                    } else if orphan && lease.status == LeaseStatus::Active {
                        ensure_transition(lease.status, LeaseStatus::Revoked)?;
                        lease.status = LeaseStatus::Revoked;
                        lease.revoked_at = Some(now);
                        self.store.save_lease(&lease)?;
                    }
                    self.lease_cache
                        .lock()
                        .expect("lease cache poisoned")
                        .invalidate(lease.lease_id);

                    if let Some(mut delivery) = delivery.filter(Delivery::is_live) {
                        ensure_transition(delivery.status, DeliveryStatus::Revoked)?;
                        delivery.revoke("repair_orphan", now);
                        self.store.save_delivery(&delivery)?;
                    }
                }
                self.audit.record(
                    AuditKind::RepairRetry,
                    lease.lease_id.to_string(),
                    lease.access_token_hash.clone(),
                    None,
                    Some(json!({
                        "resource_id": lease.resource_id,
                        "order_id": lease.order_id,
                        "delivery_id": lease.delivery_id,
                        "expired": expired,
                        "orphan": orphan,
                        "dry_run": params.dry_run,
                    })),
                )?;
                Ok(())
            })();
            match result {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    tracing::warn!(target: "opentrade::repair", lease_id = %lease.lease_id, error = %err, "repair entry failed");
                    report.failed += 1;
                }
            }
        }
        report.pending = u32::try_from(total.saturating_sub(limit)).unwrap_or(u32::MAX);
        Ok(report)
    }

    /// `revocation.retry` — run the revocation sweep now; with
    /// `include_failed`, exhausted jobs are re-queued first.
    pub async fn revocation_retry(
        &self,
        params: &RevocationRetryParams,
    ) -> Result<RevocationRetryReport> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let now = Utc::now();
        let requeued = if params.include_failed {
            self.revocation.requeue_failed(now)?
        } else {
            0
        };
        let sweep = self.revocation.sweep_due(now).await?;
        Ok(RevocationRetryReport { requeued, sweep })
    }

    /// `metrics.snapshot` — status counts, failure rates, queue depths,
    /// and the alert rules evaluated over them.
    pub fn metrics_snapshot(&self, actor: Option<&ActorId>) -> Result<MetricsSnapshot> {
        assert_access(&self.config.access, actor, Action::Read)?;

        let offers = self.store.list_offers()?;
        let orders = self.store.list_orders()?;
        let settlements = self.store.list_settlements()?;
        let leases = self
            .store
            .list_leases(&opentrade_types::LeaseFilter::default())?;
        let disputes = self.store.list_disputes()?;
        let revocations = self.store.list_revocations()?;
        let pending_anchors = self.store.list_pending_anchors()?.len();
        let events = self.store.read_audit_events(METRICS_AUDIT_WINDOW)?;

        let released = settlements
            .iter()
            .filter(|s| s.status == SettlementStatus::Released)
            .count();
        let refunded = settlements
            .iter()
            .filter(|s| s.status == SettlementStatus::Refunded)
            .count();
        let settlement_failure_rate = safe_rate(refunded, released + refunded);

        let revocation_pending = revocations
            .iter()
            .filter(|j| j.status == RevocationJobStatus::Pending)
            .count();
        let revocation_failed = revocations
            .iter()
            .filter(|j| j.status == RevocationJobStatus::Failed)
            .count();

        let now = Utc::now();
        let open_disputes: Vec<_> = disputes
            .iter()
            .filter(|d| {
                matches!(
                    d.status,
                    DisputeStatus::Opened | DisputeStatus::EvidenceSubmitted
                )
            })
            .collect();
        let disputes_over_24h = open_disputes
            .iter()
            .filter(|d| now - d.opened_at > Duration::hours(24))
            .count();
        let anchor_errors_in_window = events.iter().filter(|e| e.anchor_failed()).count();

        #[allow(clippy::cast_precision_loss)]
        let alerts = vec![
            Alert {
                rule: "settlement_failure_rate",
                severity: "p0",
                triggered: settlement_failure_rate > 0.05,
                value: settlement_failure_rate,
            },
            Alert {
                rule: "anchor_pending",
                severity: "p0",
                triggered: pending_anchors > 100,
                value: pending_anchors as f64,
            },
            Alert {
                rule: "dispute_unresolved_24h",
                severity: "p0",
                triggered: disputes_over_24h > 0,
                value: disputes_over_24h as f64,
            },
            Alert {
                rule: "revocation_failed",
                severity: "p1",
                triggered: revocation_failed > 0,
                value: revocation_failed as f64,
            },
            Alert {
                rule: "revocation_pending",
                severity: "p1",
                triggered: revocation_pending > 20,
                value: revocation_pending as f64,
            },
            Alert {
                rule: "anchor_errors_in_audit_window",
                severity: "p1",
                triggered: anchor_errors_in_window > 100,
                value: anchor_errors_in_window as f64,
            },
        ];

        Ok(MetricsSnapshot {
            offers: count_by_status(&offers, |o| o.status),
            orders: count_by_status(&orders, |o| o.status),
            settlements: count_by_status(&settlements, |s| s.status),
            settlement_failure_rate,
            leases: count_by_status(&leases, |l| l.status),
            disputes: count_by_status(&disputes, |d| d.status),
            open_disputes: open_disputes.len(),
            revocations: RevocationCounts {
                pending: revocation_pending,
                failed: revocation_failed,
            },
            pending_anchors,
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::{LeaseExpireSweepParams, LeaseIssueParams};
    use crate::testutil::{engine_rig, model_resource_params};

    #[tokio::test]
    async fn status_summary_counts_by_status() {
        let rig = engine_rig();
        rig.published_offer("seller-1").await;
        rig.unpublished_offer("seller-2").await;

        let summary = rig.engine.status_summary(None).unwrap();
        assert_eq!(summary.totals["offers"], 2);
        assert_eq!(summary.offers["published"], 1);
        assert_eq!(summary.offers["created"], 1);
        assert_eq!(summary.totals["orders"], 0);
    }

    #[tokio::test]
    async fn trace_follows_one_order_spine() {
        let rig = engine_rig();
        let (order_id, _, _) = rig.consented_order().await;
        rig.issued_delivery(order_id).await;

        // A second, unrelated trade that the trace must not pick up.
        let (other_order, _) = rig.locked_order_with_key().await;

        let trace = rig
            .engine
            .transparency_trace(
                None,
                &TraceParams {
                    order_id: Some(order_id),
                    ..TraceParams::default()
                },
            )
            .unwrap();
        assert_eq!(trace.orders.len(), 1);
        assert_eq!(trace.consents.len(), 1);
        assert_eq!(trace.deliveries.len(), 1);
        assert_eq!(trace.settlements.len(), 1);
        assert!(trace.orders.iter().all(|o| o.order_id != other_order));
        assert!(!trace.audit.is_empty());
        assert!(trace
            .audit
            .iter()
            .all(|e| e.ref_id != other_order.to_string()));
    }

    #[tokio::test]
    async fn repair_expires_overdue_leases_and_honors_dry_run() {
        let rig = engine_rig();
        let resource = rig
            .engine
            .resource_publish(model_resource_params("provider-1"))
            .await
            .unwrap();
        let lease = rig
            .engine
            .lease_issue(LeaseIssueParams {
                actor: Some(opentrade_types::ActorId::new("consumer-1")),
                resource_id: resource.resource_id,
                consumer: opentrade_types::ActorId::new("consumer-1"),
                ttl_ms: 10_000,
                max_cost: None,
            })
            .await
            .unwrap();

        // Force the lease overdue.
        let mut stored = rig.store.get_lease(lease.lease_id).unwrap().unwrap();
        stored.expires_at = Utc::now() - Duration::minutes(1);
        rig.store.save_lease(&stored).unwrap();

        let dry = rig
            .engine
            .repair_retry(&RepairRetryParams {
                dry_run: true,
                ..RepairRetryParams::default()
            })
            .unwrap();
        assert_eq!(dry.processed, 1);
        assert_eq!(
            rig.store.get_lease(lease.lease_id).unwrap().unwrap().status,
            LeaseStatus::Active
        );

        let real = rig.engine.repair_retry(&RepairRetryParams::default()).unwrap();
        assert_eq!(real.succeeded, 1);
        assert_eq!(
            rig.store.get_lease(lease.lease_id).unwrap().unwrap().status,
            LeaseStatus::Expired
        );
        // The lease's live delivery went down with it.
        let delivery_id = rig
            .store
            .get_lease(lease.lease_id)
            .unwrap()
            .unwrap()
            .delivery_id
            .unwrap();
        assert_eq!(
            rig.store.get_delivery(delivery_id).unwrap().unwrap().status,
            DeliveryStatus::Revoked
        );
    }

    #[tokio::test]
    async fn metrics_snapshot_counts_and_alerts() {
        let rig = engine_rig();
        let (order_id, _) = rig.locked_order_with_key().await;
        let buyer = rig.store.get_order(order_id).unwrap().unwrap().buyer;
        rig.engine
            .settlement_refund(crate::settlement::SettlementRefundParams {
                actor: None,
                order_id,
                payer: buyer,
                reason: None,
                tx_ref: None,
            })
            .await
            .unwrap();

        let snapshot = rig.engine.metrics_snapshot(None).unwrap();
        assert_eq!(snapshot.settlements["refunded"], 1);
        // One refund out of one settled: rate 1.0 trips the p0 rule.
        let alert = snapshot
            .alerts
            .iter()
            .find(|a| a.rule == "settlement_failure_rate")
            .unwrap();
        assert!(alert.triggered);
        assert_eq!(alert.severity, "p0");
    }

    #[tokio::test]
    async fn expire_sweep_then_metrics_sees_expired_lease() {
        let rig = engine_rig();
        let resource = rig
            .engine
            .resource_publish(model_resource_params("provider-1"))
            .await
            .unwrap();
        rig.engine
            .lease_issue(LeaseIssueParams {
                actor: Some(opentrade_types::ActorId::new("consumer-1")),
                resource_id: resource.resource_id,
                consumer: opentrade_types::ActorId::new("consumer-1"),
                ttl_ms: 10_000,
                max_cost: None,
            })
            .await
            .unwrap();
        rig.engine
            .lease_expire_sweep(LeaseExpireSweepParams {
                now: Some(Utc::now() + Duration::hours(1)),
                ..LeaseExpireSweepParams::default()
            })
            .unwrap();

        let snapshot = rig.engine.metrics_snapshot(None).unwrap();
        assert_eq!(snapshot.leases["expired"], 1);
    }
}

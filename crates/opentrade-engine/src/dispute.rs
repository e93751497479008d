//! Dispute operations: open, submit evidence, resolve, reject, get, list.
//!
//! Resolution settles the escrow in the same transaction that closes the
//! dispute: `release`/`partial` pay the payees out, `refund` returns the
//! escrow to the payer.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_store::TradeStore;
use opentrade_types::canonical::hash_canonical;
use opentrade_types::{
    ensure_transition, ActorId, AuditKind, Dispute, DisputeEvidence, DisputeId, DisputeResolution,
    DisputeStatus, EvidenceId, OpentradeError, OrderId, OrderStatus, Payee, Result,
    SettlementStatus,
};

use crate::access::{assert_access, demand_actor, require_actor, Action};
use crate::engine::MarketEngine;

const LIST_DEFAULT_LIMIT: usize = 50;
const LIST_MAX_LIMIT: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct DisputeOpenParams {
    pub actor: Option<ActorId>,
    pub order_id: OrderId,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisputeEvidenceParams {
    pub actor: Option<ActorId>,
    pub dispute_id: Option<DisputeId>,
    pub order_id: Option<OrderId>,
    pub summary: String,
    pub cid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisputeResolveParams {
    pub actor: Option<ActorId>,
    pub dispute_id: Option<DisputeId>,
    pub order_id: Option<OrderId>,
    pub resolution: DisputeResolution,
    /// Required for `release`/`partial` rulings.
    pub payees: Option<Vec<Payee>>,
    /// Required for `refund` rulings.
    pub payer: Option<ActorId>,
    pub tx_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisputeRejectParams {
    pub actor: Option<ActorId>,
    pub dispute_id: Option<DisputeId>,
    pub order_id: Option<OrderId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisputeListParams {
    pub order_id: Option<OrderId>,
    pub status: Option<DisputeStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisputeReceipt {
    pub dispute_id: DisputeId,
    pub status: DisputeStatus,
    pub dispute_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisputeResolveReceipt {
    pub dispute_id: DisputeId,
    pub status: DisputeStatus,
    pub resolution: DisputeResolution,
    pub settlement_id: opentrade_types::SettlementId,
}

impl MarketEngine {
    /// `dispute.open` — buyer or seller contests an order.
    pub async fn dispute_open(&self, params: DisputeOpenParams) -> Result<DisputeReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let actor = demand_actor(params.actor.as_ref())?.clone();

        let reason = params.reason.trim().to_string();
        if reason.is_empty() {
            return Err(OpentradeError::invalid("reason is required"));
        }

        let order = self.load_order(params.order_id)?;
        let offer = self.load_offer(order.offer_id)?;
        let is_buyer = actor.matches(&order.buyer);
        let is_seller = actor.matches(&offer.seller);
        if !is_buyer && !is_seller {
            return Err(OpentradeError::Forbidden {
                reason: "actor must match buyer or seller".to_string(),
            });
        }

        if let Some(existing) = self.store.get_dispute_by_order(params.order_id)? {
            if !existing.is_closed() {
                return Err(OpentradeError::conflict("dispute already exists for order"));
            }
        }

        let respondent = if is_buyer {
            offer.seller.clone()
        } else {
            order.buyer.clone()
        };
        let dispute = Dispute::open(params.order_id, actor.clone(), respondent, reason, Utc::now());
        self.store.save_dispute(&dispute)?;

        self.audit
            .record_with_anchor(
                AuditKind::DisputeOpened,
                dispute.dispute_id.to_string(),
                &dispute.dispute_hash,
                &format!("dispute:{}", dispute.dispute_id),
                Some(actor),
                Some(json!({
                    "order_id": dispute.order_id,
                    "reason": dispute.reason,
                    "respondent": dispute.respondent,
                })),
            )
            .await?;

        Ok(DisputeReceipt {
            dispute_id: dispute.dispute_id,
            status: dispute.status,
            dispute_hash: dispute.dispute_hash,
        })
    }

    /// `dispute.submitEvidence` — either party appends immutable evidence;
    /// the first submission advances the dispute.
    pub async fn dispute_submit_evidence(
        &self,
        params: DisputeEvidenceParams,
    ) -> Result<DisputeReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        let actor = demand_actor(params.actor.as_ref())?.clone();

        let summary = params.summary.trim().to_string();
        if summary.is_empty() {
            return Err(OpentradeError::invalid("evidence summary is required"));
        }

        let mut dispute = self.find_dispute(params.dispute_id, params.order_id)?;
        if !actor.matches(&dispute.initiator) && !actor.matches(&dispute.respondent) {
            return Err(OpentradeError::Forbidden {
                reason: "actor must match a dispute party".to_string(),
            });
        }
        if dispute.is_closed() {
            return Err(OpentradeError::conflict("dispute already closed"));
        }

        let now = Utc::now();
        let cid = params
            .cid
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let evidence_hash = hash_canonical(&json!({
            "dispute_id": dispute.dispute_id,
            "actor": actor,
            "summary": summary,
            "cid": cid,
            "submitted_at": now,
        }));
        let evidence = DisputeEvidence {
            evidence_id: EvidenceId::new(),
            summary,
            cid,
            hash: evidence_hash.clone(),
            submitted_at: now,
            actor: actor.clone(),
        };

        if dispute.status == DisputeStatus::Opened {
            ensure_transition(dispute.status, DisputeStatus::EvidenceSubmitted)?;
            dispute.status = DisputeStatus::EvidenceSubmitted;
        }
        dispute.evidence.push(evidence);
        dispute.updated_at = now;
        dispute.refresh_hash();
        self.store.save_dispute(&dispute)?;

        self.audit
            .record_with_anchor(
                AuditKind::DisputeEvidenceSubmitted,
                dispute.dispute_id.to_string(),
                &evidence_hash,
                &format!("dispute:{}", dispute.dispute_id),
                Some(actor),
                None,
            )
            .await?;

        Ok(DisputeReceipt {
            dispute_id: dispute.dispute_id,
            status: dispute.status,
            dispute_hash: dispute.dispute_hash,
        })
    }

    /// `dispute.resolve` — terminal ruling. Settles the escrow and closes
    /// the dispute in one transaction.
    pub async fn dispute_resolve(
        &self,
        params: DisputeResolveParams,
    ) -> Result<DisputeResolveReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut dispute = self.find_dispute(params.dispute_id, params.order_id)?;
        if dispute.is_closed() {
            return Err(OpentradeError::conflict("dispute already closed"));
        }
        let mut order = self.load_order(dispute.order_id)?;
        let mut settlement = self.load_settlement_by_order(order.order_id)?;
        let now = Utc::now();

        match params.resolution {
            DisputeResolution::Refund => {
                let payer = params
                    .payer
                    .clone()
                    .ok_or_else(|| OpentradeError::invalid("payer is required for refund"))?;
                ensure_transition(order.status, OrderStatus::SettlementCancelled)?;
                ensure_transition(settlement.status, SettlementStatus::Refunded)?;
                order.status = OrderStatus::SettlementCancelled;
                settlement.refund(
                    &payer,
                    Some(format!("dispute:{}", dispute.dispute_id)),
                    params.tx_ref.clone(),
                    now,
                );
            }
            DisputeResolution::Release | DisputeResolution::Partial => {
                let payees = params
                    .payees
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| OpentradeError::invalid("payees is required"))?;
                if payees.iter().any(|p| p.amount <= Decimal::ZERO) {
                    return Err(OpentradeError::invalid(
                        "payee amounts must be greater than 0",
                    ));
                }
                ensure_transition(order.status, OrderStatus::SettlementCompleted)?;
                ensure_transition(settlement.status, SettlementStatus::Released)?;
                order.status = OrderStatus::SettlementCompleted;
                settlement.release(payees, params.tx_ref.clone(), now);
            }
        }
        order.updated_at = now;

        ensure_transition(dispute.status, DisputeStatus::Resolved)?;
        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = Some(params.resolution);
        dispute.resolved_at = Some(now);
        dispute.updated_at = now;
        dispute.refresh_hash();

        self.store.transaction(&mut || {
            self.store.save_order(&order)?;
            self.store.save_settlement(&settlement)?;
            self.store.save_dispute(&dispute)
        })?;

        self.audit
            .record_with_anchor(
                AuditKind::DisputeResolved,
                dispute.dispute_id.to_string(),
                &dispute.dispute_hash,
                &format!("dispute:{}", dispute.dispute_id),
                params.actor,
                Some(json!({
                    "resolution": params.resolution,
                    "settlement_id": settlement.settlement_id,
                    "tx_ref": params.tx_ref,
                })),
            )
            .await?;

        Ok(DisputeResolveReceipt {
            dispute_id: dispute.dispute_id,
            status: dispute.status,
            resolution: params.resolution,
            settlement_id: settlement.settlement_id,
        })
    }

    /// `dispute.reject` — terminal ruling without touching the escrow.
    pub async fn dispute_reject(&self, params: DisputeRejectParams) -> Result<DisputeReceipt> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut dispute = self.find_dispute(params.dispute_id, params.order_id)?;
        if dispute.is_closed() {
            return Err(OpentradeError::conflict("dispute already closed"));
        }
        ensure_transition(dispute.status, DisputeStatus::Rejected)?;
        let now = Utc::now();
        dispute.status = DisputeStatus::Rejected;
        dispute.resolved_at = Some(now);
        dispute.updated_at = now;
        dispute.refresh_hash();
        self.store.save_dispute(&dispute)?;

        self.audit
            .record_with_anchor(
                AuditKind::DisputeRejected,
                dispute.dispute_id.to_string(),
                &dispute.dispute_hash,
                &format!("dispute:{}", dispute.dispute_id),
                params.actor,
                Some(json!({ "order_id": dispute.order_id })),
            )
            .await?;

        Ok(DisputeReceipt {
            dispute_id: dispute.dispute_id,
            status: dispute.status,
            dispute_hash: dispute.dispute_hash,
        })
    }

    /// `dispute.get`
    pub fn dispute_get(
        &self,
        dispute_id: Option<DisputeId>,
        order_id: Option<OrderId>,
    ) -> Result<Dispute> {
        self.find_dispute(dispute_id, order_id)
    }

    /// `dispute.list`
    pub fn dispute_list(&self, params: &DisputeListParams) -> Result<Vec<Dispute>> {
        let limit = params.limit.unwrap_or(LIST_DEFAULT_LIMIT).min(LIST_MAX_LIMIT);
        let mut disputes = self.store.list_disputes()?;
        if let Some(order_id) = params.order_id {
            disputes.retain(|d| d.order_id == order_id);
        }
        if let Some(status) = params.status {
            disputes.retain(|d| d.status == status);
        }
        disputes.truncate(limit);
        Ok(disputes)
    }
}

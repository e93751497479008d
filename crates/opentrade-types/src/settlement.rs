//! Settlement model: the escrow lock/release/refund record for one order.
//!
//! Exactly one settlement record exists per order (a refunded settlement may
//! be superseded by a fresh lock). `Released` and `Refunded` are terminal;
//! the validator rejecting any transition out of them is what prevents the
//! same escrow from being paid out twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::{ActorId, OrderId, SettlementId};

/// Lifecycle status of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Locked,
    Released,
    Refunded,
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "LOCKED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

/// One recipient of a settlement release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub address: ActorId,
    pub amount: Decimal,
}

/// The escrow record for one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub settlement_id: SettlementId,
    pub order_id: OrderId,
    pub status: SettlementStatus,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_hash: Option<String>,
}

#[derive(Serialize)]
struct ReleasePayload<'a> {
    order_id: &'a OrderId,
    payees: &'a [Payee],
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_ref: Option<&'a str>,
}

#[derive(Serialize)]
struct RefundPayload<'a> {
    order_id: &'a OrderId,
    payer: &'a ActorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_ref: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl Settlement {
    /// A fresh lock record.
    #[must_use]
    pub fn lock(
        order_id: OrderId,
        amount: Decimal,
        token_address: Option<String>,
        tx_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            settlement_id: SettlementId::new(),
            order_id,
            status: SettlementStatus::Locked,
            amount,
            token_address,
            locked_at: Some(now),
            released_at: None,
            refunded_at: None,
            refund_reason: None,
            lock_tx_ref: tx_ref,
            release_tx_ref: None,
            refund_tx_ref: None,
            settlement_hash: None,
        }
    }

    /// Mark released to `payees`, recording the payout hash. The caller
    /// runs the transition check first.
    pub fn release(&mut self, payees: &[Payee], tx_ref: Option<String>, now: DateTime<Utc>) {
        self.settlement_hash = Some(hash_canonical(&ReleasePayload {
            order_id: &self.order_id,
            payees,
            tx_ref: tx_ref.as_deref(),
        }));
        self.amount = payees.iter().map(|p| p.amount).sum();
        self.status = SettlementStatus::Released;
        self.released_at = Some(now);
        self.release_tx_ref = tx_ref;
    }

    /// Mark refunded to `payer`. The caller runs the transition check first.
    pub fn refund(
        &mut self,
        payer: &ActorId,
        reason: Option<String>,
        tx_ref: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.settlement_hash = Some(hash_canonical(&RefundPayload {
            order_id: &self.order_id,
            payer,
            tx_ref: tx_ref.as_deref(),
            reason: reason.as_deref(),
        }));
        self.status = SettlementStatus::Refunded;
        self.refunded_at = Some(now);
        self.refund_reason = reason;
        self.refund_tx_ref = tx_ref;
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SettlementStatus::Released | SettlementStatus::Refunded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payees() -> Vec<Payee> {
        vec![
            Payee {
                address: ActorId::new("seller"),
                amount: Decimal::new(60, 0),
            },
            Payee {
                address: ActorId::new("platform"),
                amount: Decimal::new(40, 0),
            },
        ]
    }

    #[test]
    fn lock_starts_locked() {
        let settlement = Settlement::lock(
            OrderId::new(),
            Decimal::new(100, 0),
            None,
            Some("0xlock".into()),
            Utc::now(),
        );
        assert_eq!(settlement.status, SettlementStatus::Locked);
        assert!(!settlement.is_terminal());
        assert_eq!(settlement.lock_tx_ref.as_deref(), Some("0xlock"));
    }

    #[test]
    fn release_sums_payees() {
        let mut settlement =
            Settlement::lock(OrderId::new(), Decimal::new(100, 0), None, None, Utc::now());
        settlement.release(&payees(), None, Utc::now());
        assert_eq!(settlement.status, SettlementStatus::Released);
        assert_eq!(settlement.amount, Decimal::new(100, 0));
        assert!(settlement.is_terminal());
        assert!(settlement.settlement_hash.as_deref().unwrap().starts_with("0x"));
    }

    #[test]
    fn refund_records_reason() {
        let mut settlement =
            Settlement::lock(OrderId::new(), Decimal::new(100, 0), None, None, Utc::now());
        settlement.refund(
            &ActorId::new("buyer"),
            Some("dispute".into()),
            None,
            Utc::now(),
        );
        assert_eq!(settlement.status, SettlementStatus::Refunded);
        assert_eq!(settlement.refund_reason.as_deref(), Some("dispute"));
        assert!(settlement.is_terminal());
    }

    #[test]
    fn release_hash_depends_on_split() {
        let order_id = OrderId::new();
        let now = Utc::now();
        let mut a = Settlement::lock(order_id, Decimal::new(100, 0), None, None, now);
        let mut b = a.clone();
        a.release(&payees(), None, now);
        let mut flipped = payees();
        flipped[0].amount = Decimal::new(40, 0);
        flipped[1].amount = Decimal::new(60, 0);
        b.release(&flipped, None, now);
        assert_ne!(a.settlement_hash, b.settlement_hash);
    }
}

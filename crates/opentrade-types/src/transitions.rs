//! Transition validator: the static status graph for every entity type.
//!
//! Each graph is total over its reachable statuses and has at least one
//! terminal status (empty outgoing set). [`ensure_transition`] is the single
//! gate handlers call before every status mutation; anything outside the
//! graph fails with a Conflict error naming the attempted pair. The
//! validator never triggers a transition itself.

use crate::consent::ConsentStatus;
use crate::delivery::DeliveryStatus;
use crate::dispute::DisputeStatus;
use crate::error::{OpentradeError, Result};
use crate::lease::LeaseStatus;
use crate::offer::OfferStatus;
use crate::order::OrderStatus;
use crate::resource::ResourceStatus;
use crate::revocation::RevocationJobStatus;
use crate::reward::RewardStatus;
use crate::settlement::SettlementStatus;

/// A status enum with a fixed directed transition graph.
pub trait StatusGraph: Copy + PartialEq + std::fmt::Display {
    /// The entity name used in error messages.
    const ENTITY: &'static str;

    /// The statuses this one may move to.
    fn allowed(self) -> &'static [Self];

    /// No outgoing edges.
    fn is_terminal(self) -> bool {
        self.allowed().is_empty()
    }

    fn can_transition_to(self, target: Self) -> bool {
        self.allowed().contains(&target)
    }
}

/// Check `from -> to` against the graph, or fail with Conflict.
pub fn ensure_transition<S: StatusGraph>(from: S, to: S) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(OpentradeError::InvalidTransition {
            entity: S::ENTITY,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl StatusGraph for OfferStatus {
    const ENTITY: &'static str = "offer";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Published, Self::Closed],
            Self::Published => &[Self::Closed],
            Self::Closed => &[],
        }
    }
}

impl StatusGraph for OrderStatus {
    const ENTITY: &'static str = "order";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::PaymentLocked, Self::OrderCancelled],
            Self::PaymentLocked => &[Self::ConsentGranted, Self::SettlementCancelled],
            Self::ConsentGranted => &[Self::DeliveryReady, Self::ConsentRevoked],
            Self::DeliveryReady => &[Self::DeliveryCompleted, Self::ConsentRevoked],
            Self::DeliveryCompleted => &[Self::SettlementCompleted],
            Self::ConsentRevoked => &[Self::SettlementCancelled],
            Self::SettlementCompleted | Self::OrderCancelled | Self::SettlementCancelled => &[],
        }
    }
}

impl StatusGraph for ConsentStatus {
    const ENTITY: &'static str = "consent";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Granted => &[Self::Revoked],
            Self::Revoked => &[],
        }
    }
}

impl StatusGraph for DeliveryStatus {
    const ENTITY: &'static str = "delivery";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Ready => &[Self::Completed, Self::Revoked],
            Self::Completed | Self::Revoked => &[],
        }
    }
}

impl StatusGraph for SettlementStatus {
    const ENTITY: &'static str = "settlement";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Locked => &[Self::Released, Self::Refunded],
            Self::Released | Self::Refunded => &[],
        }
    }
}

impl StatusGraph for ResourceStatus {
    const ENTITY: &'static str = "resource";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Published],
            Self::Published => &[Self::Unpublished],
            // An unpublished resource stays retired; access is reissued
            // under a fresh resource id.
            Self::Unpublished => &[],
        }
    }
}

impl StatusGraph for LeaseStatus {
    const ENTITY: &'static str = "lease";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Active => &[Self::Revoked, Self::Expired],
            Self::Revoked | Self::Expired => &[],
        }
    }
}

impl StatusGraph for DisputeStatus {
    const ENTITY: &'static str = "dispute";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Opened => &[Self::EvidenceSubmitted, Self::Resolved, Self::Rejected],
            Self::EvidenceSubmitted => &[Self::Resolved, Self::Rejected],
            Self::Resolved | Self::Rejected => &[],
        }
    }
}

impl StatusGraph for RewardStatus {
    const ENTITY: &'static str = "reward";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::ClaimIssued, Self::Cancelled],
            Self::ClaimIssued => &[Self::Submitted, Self::Cancelled],
            Self::Submitted => &[Self::Confirmed, Self::Failed],
            // A failed claim may be re-issued.
            Self::Failed => &[Self::ClaimIssued, Self::Cancelled],
            Self::Confirmed | Self::Cancelled => &[],
        }
    }
}

impl StatusGraph for RevocationJobStatus {
    const ENTITY: &'static str = "revocation_job";

    fn allowed(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Succeeded, Self::Failed],
            // Operator retry re-queues an exhausted job.
            Self::Failed => &[Self::Pending],
            Self::Succeeded => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `transition(from, to)` succeeds iff `to ∈ allowed(from)`; every other
    /// pair raises Conflict naming the pair.
    fn assert_graph_total<S: StatusGraph + std::fmt::Debug>(all: &[S]) {
        let mut terminals = 0;
        for &from in all {
            if from.is_terminal() {
                terminals += 1;
            }
            for &to in all {
                let allowed = from.allowed().contains(&to);
                let result = ensure_transition(from, to);
                assert_eq!(
                    result.is_ok(),
                    allowed,
                    "{} {from:?} -> {to:?}: expected allowed={allowed}",
                    S::ENTITY
                );
                if let Err(err) = result {
                    let msg = format!("{err}");
                    assert!(msg.starts_with("E_CONFLICT"), "Got: {msg}");
                    assert!(
                        msg.contains(&format!("{from}")) && msg.contains(&format!("{to}")),
                        "error must name the pair: {msg}"
                    );
                }
            }
        }
        assert!(terminals > 0, "{} graph has no terminal status", S::ENTITY);
    }

    #[test]
    fn offer_graph() {
        assert_graph_total(&[
            OfferStatus::Created,
            OfferStatus::Published,
            OfferStatus::Closed,
        ]);
        assert!(OfferStatus::Created.can_transition_to(OfferStatus::Published));
        assert!(!OfferStatus::Closed.can_transition_to(OfferStatus::Published));
    }

    #[test]
    fn order_graph() {
        assert_graph_total(&[
            OrderStatus::Created,
            OrderStatus::PaymentLocked,
            OrderStatus::ConsentGranted,
            OrderStatus::DeliveryReady,
            OrderStatus::DeliveryCompleted,
            OrderStatus::SettlementCompleted,
            OrderStatus::OrderCancelled,
            OrderStatus::SettlementCancelled,
            OrderStatus::ConsentRevoked,
        ]);
        // The revoked branch can still settle-cancel, nothing else.
        assert!(OrderStatus::ConsentRevoked.can_transition_to(OrderStatus::SettlementCancelled));
        assert!(!OrderStatus::ConsentRevoked.can_transition_to(OrderStatus::DeliveryReady));
    }

    #[test]
    fn consent_graph() {
        assert_graph_total(&[ConsentStatus::Granted, ConsentStatus::Revoked]);
    }

    #[test]
    fn delivery_graph() {
        assert_graph_total(&[
            DeliveryStatus::Ready,
            DeliveryStatus::Completed,
            DeliveryStatus::Revoked,
        ]);
    }

    #[test]
    fn settlement_graph() {
        assert_graph_total(&[
            SettlementStatus::Locked,
            SettlementStatus::Released,
            SettlementStatus::Refunded,
        ]);
        // Terminal once released/refunded: the double-payout guard.
        assert!(SettlementStatus::Released.is_terminal());
        assert!(SettlementStatus::Refunded.is_terminal());
    }

    #[test]
    fn resource_graph() {
        assert_graph_total(&[
            ResourceStatus::Draft,
            ResourceStatus::Published,
            ResourceStatus::Unpublished,
        ]);
    }

    #[test]
    fn lease_graph() {
        assert_graph_total(&[
            LeaseStatus::Active,
            LeaseStatus::Revoked,
            LeaseStatus::Expired,
        ]);
        // Leases are reissued, not resurrected.
        assert!(!LeaseStatus::Expired.can_transition_to(LeaseStatus::Active));
        assert!(!LeaseStatus::Revoked.can_transition_to(LeaseStatus::Active));
    }

    #[test]
    fn dispute_graph() {
        assert_graph_total(&[
            DisputeStatus::Opened,
            DisputeStatus::EvidenceSubmitted,
            DisputeStatus::Resolved,
            DisputeStatus::Rejected,
        ]);
    }

    #[test]
    fn reward_graph() {
        assert_graph_total(&[
            RewardStatus::Created,
            RewardStatus::ClaimIssued,
            RewardStatus::Submitted,
            RewardStatus::Confirmed,
            RewardStatus::Failed,
            RewardStatus::Cancelled,
        ]);
        // A confirmed grant can never fail afterwards, and vice versa: this
        // is what keeps a duplicate receipt from flipping a terminal state.
        assert!(ensure_transition(RewardStatus::Confirmed, RewardStatus::Failed).is_err());
        assert!(ensure_transition(RewardStatus::Failed, RewardStatus::Confirmed).is_err());
        assert!(RewardStatus::Failed.can_transition_to(RewardStatus::ClaimIssued));
    }

    #[test]
    fn revocation_job_graph() {
        assert_graph_total(&[
            RevocationJobStatus::Pending,
            RevocationJobStatus::Succeeded,
            RevocationJobStatus::Failed,
        ]);
        assert!(RevocationJobStatus::Failed.can_transition_to(RevocationJobStatus::Pending));
    }
}

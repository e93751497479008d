//! Reward model: off-chain-issued, on-chain-claimable payouts.
//!
//! A grant is minted server-side, guarded by a deadline (claims past it are
//! rejected) and a nonce index (replay protection), then walks
//! `created -> claim_issued -> submitted -> confirmed | failed`. A failed
//! grant may be re-issued; `confirmed` and `cancelled` are terminal, which
//! is what stops one chain receipt from producing two payouts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::{ActorId, RewardId};

/// Lifecycle status of a reward grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    Created,
    ClaimIssued,
    Submitted,
    Confirmed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::ClaimIssued => write!(f, "CLAIM_ISSUED"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// The payout asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAsset {
    pub token_address: String,
}

/// A signed claim handed to the recipient for on-chain redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    /// Chain-agnostic claim payload the signature covers.
    pub payload: serde_json::Value,
    /// Hex-encoded ed25519 signature by the engine key.
    pub signature: String,
    pub issued_at: DateTime<Utc>,
}

/// On-chain submission evidence for a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainEvidence {
    pub tx_ref: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Backend-authoritative reward grant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardGrant {
    pub reward_id: RewardId,
    /// Chain/network identifier (e.g. "base", "sepolia").
    pub network: String,
    pub recipient: ActorId,
    pub amount: Decimal,
    pub asset: RewardAsset,
    /// Server-side nonce, also embedded in the on-chain claim.
    pub nonce: String,
    /// Claims are rejected after this moment.
    pub deadline: DateTime<Utc>,
    /// Hash of the business event that earned this grant.
    pub event_hash: String,
    pub status: RewardStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<RewardClaim>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain: Option<OnchainEvidence>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RewardIdentity<'a> {
    domain: &'static str,
    reward_id: &'a RewardId,
    network: &'a str,
    recipient: &'a ActorId,
    amount: Decimal,
    asset: &'a RewardAsset,
    nonce: &'a str,
    deadline: DateTime<Utc>,
    event_hash: &'a str,
}

impl RewardGrant {
    /// Domain-separated hash of the grant's economic identity. Stable across
    /// status transitions, so the same grant anchors to the same digest.
    #[must_use]
    pub fn canonical_hash(&self) -> String {
        hash_canonical(&RewardIdentity {
            domain: "reward",
            reward_id: &self.reward_id,
            network: &self.network,
            recipient: &self.recipient,
            amount: self.amount,
            asset: &self.asset,
            nonce: &self.nonce,
            deadline: self.deadline,
            event_hash: &self.event_hash,
        })
    }

    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }

    /// Stable key for the nonce replay index.
    #[must_use]
    pub fn nonce_id(&self) -> String {
        nonce_id(&self.network, &self.recipient, &self.nonce)
    }
}

/// `{network}:{recipient}:{nonce}` — the replay-protection index key.
#[must_use]
pub fn nonce_id(network: &str, recipient: &ActorId, nonce: &str) -> String {
    format!("{network}:{}:{nonce}", recipient.normalized())
}

/// Used-nonce index record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardNonceRecord {
    pub nonce_id: String,
    pub reward_id: RewardId,
    pub network: String,
    pub recipient: ActorId,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl RewardGrant {
    pub fn dummy(recipient: ActorId, deadline: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            reward_id: RewardId::new(),
            network: "base".to_string(),
            recipient,
            amount: Decimal::new(500, 0),
            asset: RewardAsset {
                token_address: "0x00000000000000000000000000000000000000aa".to_string(),
            },
            nonce: format!("{:032x}", rand::random::<u128>()),
            deadline,
            event_hash: "0xevent".to_string(),
            status: RewardStatus::Created,
            claim: None,
            onchain: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn canonical_hash_stable_across_status() {
        let mut grant = RewardGrant::dummy(ActorId::new("alice"), Utc::now() + Duration::hours(1));
        let before = grant.canonical_hash();
        grant.status = RewardStatus::Submitted;
        grant.attempts = 3;
        grant.last_error = Some("transient".into());
        assert_eq!(grant.canonical_hash(), before);
    }

    #[test]
    fn deadline_check() {
        let grant = RewardGrant::dummy(ActorId::new("alice"), Utc::now() - Duration::minutes(1));
        assert!(grant.is_past_deadline(Utc::now()));
    }

    #[test]
    fn nonce_id_normalizes_recipient() {
        let a = nonce_id("base", &ActorId::new("0xAbC"), "n1");
        let b = nonce_id("base", &ActorId::new("0xabc"), "n1");
        assert_eq!(a, b);
        assert_eq!(a, "base:0xabc:n1");
    }

    #[test]
    fn serde_roundtrip() {
        let grant = RewardGrant::dummy(ActorId::new("alice"), Utc::now() + Duration::hours(1));
        let json = serde_json::to_string(&grant).unwrap();
        let back: RewardGrant = serde_json::from_str(&json).unwrap();
        assert_eq!(back.reward_id, grant.reward_id);
        assert_eq!(back.amount, grant.amount);
        assert_eq!(back.status, grant.status);
    }
}

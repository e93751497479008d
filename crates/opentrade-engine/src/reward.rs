//! Reward operations: create, issue claim, update status, get, list.
//!
//! A grant is minted off-chain and redeemed on-chain. Creation is
//! idempotent by reward id and replay-protected by a nonce index; claim
//! issuance is guarded by the deadline and signed with the engine key.

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::Signer;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use opentrade_store::TradeStore;
use opentrade_types::canonical::canonicalize;
use opentrade_types::{
    ensure_transition, nonce_id, ActorId, AuditKind, OnchainEvidence, OpentradeError, Result,
    RewardAsset, RewardClaim, RewardGrant, RewardId, RewardNonceRecord, RewardStatus,
};

use crate::access::{assert_access, require_actor, Action};
use crate::engine::MarketEngine;

const LIST_DEFAULT_LIMIT: usize = 50;
const LIST_MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct RewardCreateParams {
    pub actor: Option<ActorId>,
    /// Supply to make creation idempotent; generated otherwise.
    pub reward_id: Option<RewardId>,
    /// Defaults to the configured chain network.
    pub network: Option<String>,
    pub recipient: ActorId,
    pub amount: Decimal,
    pub asset: RewardAsset,
    /// Server-generated when absent.
    pub nonce: Option<String>,
    /// Defaults to now + `rewards.default_deadline_mins`.
    pub deadline: Option<DateTime<Utc>>,
    /// Hash of the business event that earned the grant.
    pub event_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardRefParams {
    pub actor: Option<ActorId>,
    pub reward_id: RewardId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardUpdateStatusParams {
    pub actor: Option<ActorId>,
    pub reward_id: RewardId,
    pub status: RewardStatus,
    pub tx_ref: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewardListParams {
    pub recipient: Option<ActorId>,
    pub status: Option<RewardStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RewardListPage {
    pub rewards: Vec<RewardGrant>,
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

impl MarketEngine {
    /// `reward.create` — idempotent by reward id; the nonce index rejects
    /// replays across ids.
    pub async fn reward_create(&self, params: RewardCreateParams) -> Result<RewardGrant> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;
        self.assert_rewards_enabled()?;

        if params.amount <= Decimal::ZERO {
            return Err(OpentradeError::invalid("amount must be greater than 0"));
        }
        if params.recipient.is_empty() {
            return Err(OpentradeError::invalid("recipient is required"));
        }
        if params.event_hash.trim().is_empty() {
            return Err(OpentradeError::invalid("event_hash is required"));
        }
        if params.asset.token_address.trim().is_empty() {
            return Err(OpentradeError::invalid("asset.token_address is required"));
        }

        let reward_id = params.reward_id.unwrap_or_default();
        if let Some(existing) = self.store.get_reward(reward_id)? {
            return Ok(existing);
        }

        let now = Utc::now();
        let network = params
            .network
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.config.chain.network)
            .to_string();
        let nonce = params
            .nonce
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| format!("{:032x}", rand::random::<u128>()), str::to_string);
        let deadline = params.deadline.unwrap_or_else(|| {
            now + Duration::minutes(i64::from(self.config.rewards.default_deadline_mins))
        });

        let nonce_key = nonce_id(&network, &params.recipient, &nonce);
        if self.store.get_reward_nonce(&nonce_key)?.is_some() {
            return Err(OpentradeError::conflict("nonce already used"));
        }

        let grant = RewardGrant {
            reward_id,
            network: network.clone(),
            recipient: params.recipient.clone(),
            amount: params.amount,
            asset: params.asset,
            nonce: nonce.clone(),
            deadline,
            event_hash: params.event_hash,
            status: RewardStatus::Created,
            claim: None,
            onchain: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let nonce_record = RewardNonceRecord {
            nonce_id: nonce_key,
            reward_id,
            network,
            recipient: params.recipient,
            nonce,
            expires_at: deadline,
            created_at: now,
        };

        self.store.transaction(&mut || {
            self.store.save_reward(&grant)?;
            self.store.save_reward_nonce(&nonce_record)
        })?;

        self.audit
            .record_with_anchor(
                AuditKind::RewardCreated,
                grant.reward_id.to_string(),
                &grant.canonical_hash(),
                &format!("reward:{}", grant.reward_id),
                params.actor,
                Some(json!({
                    "reward_id": grant.reward_id,
                    "network": &grant.network,
                    "recipient": &grant.recipient,
                    "amount": grant.amount,
                    "deadline": grant.deadline,
                })),
            )
            .await?;

        Ok(grant)
    }

    /// `reward.issueClaim` — deadline-guarded; allowed from `created` and
    /// `failed`. The claim payload is signed with the engine key.
    pub async fn reward_issue_claim(&self, params: RewardRefParams) -> Result<RewardGrant> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;
        self.assert_rewards_enabled()?;

        let mut grant = self.load_reward(params.reward_id)?;
        let now = Utc::now();
        if grant.is_past_deadline(now) {
            return Err(OpentradeError::Expired {
                reason: format!("reward deadline {} has passed", grant.deadline),
            });
        }
        ensure_transition(grant.status, RewardStatus::ClaimIssued)?;

        let Some(signing_key) = &self.signing_key else {
            return Err(OpentradeError::Unavailable {
                reason: "rewards.claim_signing_key is not configured".to_string(),
            });
        };

        let payload = json!({
            "reward_id": grant.reward_id,
            "network": grant.network,
            "recipient": grant.recipient,
            "amount": grant.amount,
            "asset": grant.asset,
            "nonce": grant.nonce,
            "deadline": grant.deadline,
            "event_hash": grant.event_hash,
        });
        let signature = signing_key.sign(canonicalize(&payload).as_bytes());

        grant.status = RewardStatus::ClaimIssued;
        grant.claim = Some(RewardClaim {
            payload,
            signature: hex::encode(signature.to_bytes()),
            issued_at: now,
        });
        grant.attempts += 1;
        grant.last_error = None;
        grant.updated_at = now;
        self.store.save_reward(&grant)?;

        self.audit
            .record_with_anchor(
                AuditKind::RewardClaimIssued,
                grant.reward_id.to_string(),
                &grant.canonical_hash(),
                &format!("reward-claim:{}", grant.reward_id),
                params.actor,
                Some(json!({
                    "reward_id": grant.reward_id,
                    "status": grant.status,
                    "network": &grant.network,
                })),
            )
            .await?;

        Ok(grant)
    }

    /// `reward.updateStatus` — validator-guarded lifecycle closure driven
    /// by the claim submitter; records on-chain evidence as it appears.
    pub async fn reward_update_status(
        &self,
        params: RewardUpdateStatusParams,
    ) -> Result<RewardGrant> {
        assert_access(&self.config.access, params.actor.as_ref(), Action::Write)?;
        require_actor(&self.config.access, params.actor.as_ref())?;

        let mut grant = self.load_reward(params.reward_id)?;
        let prev_status = grant.status;
        ensure_transition(grant.status, params.status)?;

        let now = Utc::now();
        let tx_ref = params
            .tx_ref
            .clone()
            .or_else(|| grant.onchain.as_ref().map(|o| o.tx_ref.clone()));
        if let Some(tx_ref) = tx_ref {
            let submitted_at = if params.status == RewardStatus::Submitted {
                now
            } else {
                grant.onchain.as_ref().map_or(now, |o| o.submitted_at)
            };
            let confirmed_at = if params.status == RewardStatus::Confirmed {
                Some(now)
            } else {
                grant.onchain.as_ref().and_then(|o| o.confirmed_at)
            };
            grant.onchain = Some(OnchainEvidence {
                tx_ref,
                submitted_at,
                confirmed_at,
            });
        }
        grant.status = params.status;
        grant.last_error = params.error.clone().or_else(|| {
            (params.status == RewardStatus::Failed).then(|| "transaction failed".to_string())
        });
        grant.updated_at = now;
        self.store.save_reward(&grant)?;

        let kind = if params.status == RewardStatus::Cancelled {
            AuditKind::RewardCancelled
        } else {
            AuditKind::RewardStatusUpdated
        };
        self.audit
            .record_with_anchor(
                kind,
                grant.reward_id.to_string(),
                &grant.canonical_hash(),
                &format!("reward:{}", grant.reward_id),
                params.actor,
                Some(json!({
                    "reward_id": grant.reward_id,
                    "prev_status": prev_status,
                    "new_status": grant.status,
                    "tx_ref": grant.onchain.as_ref().map(|o| o.tx_ref.clone()),
                    "error": &grant.last_error,
                })),
            )
            .await?;

        Ok(grant)
    }

    /// `reward.get`
    pub fn reward_get(&self, reward_id: RewardId) -> Result<RewardGrant> {
        self.load_reward(reward_id)
    }

    /// `reward.list` — newest first, filterable, paginated.
    pub fn reward_list(&self, params: &RewardListParams) -> Result<RewardListPage> {
        let limit = params
            .limit
            .unwrap_or(LIST_DEFAULT_LIMIT)
            .clamp(1, LIST_MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);

        let mut rewards = self.store.list_rewards()?;
        if let Some(recipient) = &params.recipient {
            rewards.retain(|r| r.recipient.matches(recipient));
        }
        if let Some(status) = params.status {
            rewards.retain(|r| r.status == status);
        }
        rewards.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total_count = rewards.len();
        let page: Vec<RewardGrant> = rewards.into_iter().skip(offset).take(limit).collect();
        Ok(RewardListPage {
            rewards: page,
            total_count,
            limit,
            offset,
        })
    }

    fn assert_rewards_enabled(&self) -> Result<()> {
        if self.config.rewards.enabled {
            Ok(())
        } else {
            Err(OpentradeError::Unavailable {
                reason: "rewards are disabled".to_string(),
            })
        }
    }
}

//! Reward settlement poller: periodic receipt reconciliation.
//!
//! Scans `submitted` grants and asks the chain adapter for each one's
//! receipt. Success confirms the grant, a revert fails it, no receipt
//! leaves it for the next sweep. One grant's error never blocks the rest,
//! and the validator rejecting transitions out of `confirmed`/`cancelled`
//! is what keeps a replayed receipt from paying out twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use opentrade_store::TradeStore;
use opentrade_types::{
    ensure_transition, system_actor, AuditKind, EngineConfig, Result, RewardGrant, RewardStatus,
};

use crate::audit::AuditPipeline;
use crate::chain::{ChainAdapter, TxStatus};

/// Outcome of one [`RewardPoller::poll_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub scanned: u32,
    pub confirmed: u32,
    pub failed: u32,
    pub still_pending: u32,
}

/// Advances submitted reward grants from chain receipts.
pub struct RewardPoller {
    store: Arc<dyn TradeStore>,
    chain: Arc<dyn ChainAdapter>,
    audit: Arc<AuditPipeline>,
    enabled: bool,
    interval: Duration,
}

impl RewardPoller {
    #[must_use]
    pub fn new(
        store: Arc<dyn TradeStore>,
        chain: Arc<dyn ChainAdapter>,
        audit: Arc<AuditPipeline>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            chain,
            audit,
            enabled: config.rewards.enabled,
            interval: Duration::from_secs(config.poller.interval_secs),
        }
    }

    /// One reconciliation sweep: best effort, one receipt query per grant.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let mut report = PollReport::default();
        if !self.enabled {
            return Ok(report);
        }

        let submitted: Vec<RewardGrant> = self
            .store
            .list_rewards()?
            .into_iter()
            .filter(|grant| grant.status == RewardStatus::Submitted)
            .collect();

        for grant in submitted {
            report.scanned += 1;
            match self.advance(&grant).await {
                Ok(Some(RewardStatus::Confirmed)) => report.confirmed += 1,
                Ok(Some(_)) => report.failed += 1,
                Ok(None) => report.still_pending += 1,
                Err(err) => {
                    warn!(
                        target: "opentrade::poller",
                        reward_id = %grant.reward_id,
                        error = %err,
                        "receipt check failed, leaving for next sweep"
                    );
                    report.still_pending += 1;
                }
            }
        }
        Ok(report)
    }

    /// Query one grant's receipt and apply the resulting transition, if any.
    async fn advance(&self, grant: &RewardGrant) -> Result<Option<RewardStatus>> {
        let Some(onchain) = &grant.onchain else {
            // Submitted without a tx ref cannot be reconciled; skip.
            return Ok(None);
        };
        let Some(receipt) = self.chain.get_receipt(&onchain.tx_ref).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let mut updated = grant.clone();
        let new_status = match receipt.status {
            TxStatus::Success => {
                ensure_transition(grant.status, RewardStatus::Confirmed)?;
                updated.status = RewardStatus::Confirmed;
                if let Some(evidence) = &mut updated.onchain {
                    evidence.confirmed_at = Some(now);
                }
                RewardStatus::Confirmed
            }
            TxStatus::Reverted => {
                ensure_transition(grant.status, RewardStatus::Failed)?;
                updated.status = RewardStatus::Failed;
                updated.last_error = Some("transaction reverted".to_string());
                RewardStatus::Failed
            }
        };
        updated.updated_at = now;

        self.store.transaction(&mut || self.store.save_reward(&updated))?;

        self.audit
            .record_with_anchor(
                AuditKind::RewardStatusUpdated,
                updated.reward_id.to_string(),
                &updated.canonical_hash(),
                &format!("reward:{}", updated.reward_id),
                Some(system_actor("reward-poller")),
                Some(json!({
                    "reward_id": updated.reward_id,
                    "prev_status": grant.status,
                    "new_status": new_status,
                    "tx_ref": &onchain.tx_ref,
                    "receipt": { "status": receipt.status, "block_number": receipt.block_number },
                })),
            )
            .await?;

        info!(
            target: "opentrade::poller",
            reward_id = %updated.reward_id,
            status = %new_status,
            "reward grant reconciled"
        );
        Ok(Some(new_status))
    }

    /// Poll on a fixed cadence until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(report) if report.scanned > 0 => {
                    info!(target: "opentrade::poller", ?report, "reward poll finished");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "opentrade::poller", error = %err, "reward poll failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TxReceipt;
    use crate::testing::StaticChain;
    use chrono::Duration as ChronoDuration;
    use opentrade_store::FileStore;
    use opentrade_types::{ActorId, OnchainEvidence};

    struct Rig {
        _dir: tempfile::TempDir,
        store: Arc<dyn TradeStore>,
        chain: Arc<StaticChain>,
        poller: RewardPoller,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TradeStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let audit = Arc::new(AuditPipeline::new(Arc::clone(&store), None));
        let chain = Arc::new(StaticChain::new());
        let poller = RewardPoller::new(
            Arc::clone(&store),
            Arc::clone(&chain) as Arc<dyn ChainAdapter>,
            audit,
            &EngineConfig::default(),
        );
        Rig {
            _dir: dir,
            store,
            chain,
            poller,
        }
    }

    fn submitted_grant(store: &Arc<dyn TradeStore>, tx_ref: &str) -> RewardGrant {
        let mut grant = RewardGrant::dummy(
            ActorId::new("alice"),
            Utc::now() + ChronoDuration::hours(1),
        );
        grant.status = RewardStatus::Submitted;
        grant.onchain = Some(OnchainEvidence {
            tx_ref: tx_ref.to_string(),
            submitted_at: Utc::now(),
            confirmed_at: None,
        });
        store.save_reward(&grant).unwrap();
        grant
    }

    #[tokio::test]
    async fn successful_receipt_confirms() {
        let rig = rig();
        let grant = submitted_grant(&rig.store, "0xtx1");
        rig.chain.seed_receipt(
            "0xtx1",
            TxReceipt {
                status: TxStatus::Success,
                block_number: Some(42),
            },
        );

        let report = rig.poller.poll_once().await.unwrap();
        assert_eq!(report.confirmed, 1);

        let stored = rig.store.get_reward(grant.reward_id).unwrap().unwrap();
        assert_eq!(stored.status, RewardStatus::Confirmed);
        assert!(stored.onchain.unwrap().confirmed_at.is_some());

        // Audited with prev/new status and the receipt detail.
        let events = rig.store.read_audit_events(10).unwrap();
        assert_eq!(events.len(), 1);
        let details = events[0].details.as_ref().unwrap();
        assert_eq!(details["prev_status"], "submitted");
        assert_eq!(details["new_status"], "confirmed");
        assert_eq!(details["receipt"]["block_number"], 42);
    }

    #[tokio::test]
    async fn reverted_receipt_fails_with_error() {
        let rig = rig();
        let grant = submitted_grant(&rig.store, "0xtx2");
        rig.chain.seed_receipt(
            "0xtx2",
            TxReceipt {
                status: TxStatus::Reverted,
                block_number: Some(43),
            },
        );

        let report = rig.poller.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = rig.store.get_reward(grant.reward_id).unwrap().unwrap();
        assert_eq!(stored.status, RewardStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("transaction reverted"));
    }

    #[tokio::test]
    async fn missing_receipt_leaves_grant_untouched() {
        let rig = rig();
        let grant = submitted_grant(&rig.store, "0xtx3");

        let report = rig.poller.poll_once().await.unwrap();
        assert_eq!(report.still_pending, 1);

        let stored = rig.store.get_reward(grant.reward_id).unwrap().unwrap();
        assert_eq!(stored.status, RewardStatus::Submitted);
        assert!(rig.store.read_audit_events(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_confirmed_grant_cannot_be_flipped_by_a_second_receipt() {
        let rig = rig();
        let grant = submitted_grant(&rig.store, "0xtx4");
        rig.chain.seed_receipt(
            "0xtx4",
            TxReceipt {
                status: TxStatus::Success,
                block_number: None,
            },
        );
        rig.poller.poll_once().await.unwrap();

        // A later sweep sees a reverted receipt for the same tx. The grant
        // is no longer `submitted`, so it is not even scanned.
        rig.chain.seed_receipt(
            "0xtx4",
            TxReceipt {
                status: TxStatus::Reverted,
                block_number: None,
            },
        );
        let report = rig.poller.poll_once().await.unwrap();
        assert_eq!(report.scanned, 0);
        let stored = rig.store.get_reward(grant.reward_id).unwrap().unwrap();
        assert_eq!(stored.status, RewardStatus::Confirmed);
    }

    #[tokio::test]
    async fn disabled_rewards_skip_polling() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TradeStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let audit = Arc::new(AuditPipeline::new(Arc::clone(&store), None));
        let chain = Arc::new(StaticChain::new());
        let mut config = EngineConfig::default();
        config.rewards.enabled = false;
        let poller = RewardPoller::new(Arc::clone(&store), chain, audit, &config);

        submitted_grant(&store, "0xtx5");
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report, PollReport::default());
    }
}

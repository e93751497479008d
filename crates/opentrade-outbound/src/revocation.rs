//! Revocation retry engine: at-least-once webhook delivery of access
//! withdrawals.
//!
//! A live revocation is attempted inline by the operation handler; when the
//! webhook fails, the context becomes a durable [`RevocationJob`] and the
//! periodic sweep takes over. Attempts are bounded; exhausted jobs move to
//! `failed` and stay in the store where an operator can inspect and
//! re-queue them.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use opentrade_store::TradeStore;
use opentrade_types::canonical::hash_canonical;
use opentrade_types::{
    ensure_transition, AuditKind, Consent, Delivery, DeliveryPayload, Offer, Order, Result,
    RevocationConfig, RevocationJob, RevocationJobStatus, RevocationMode,
};

use crate::audit::AuditPipeline;
use crate::blob::EncryptedBlobStore;
use crate::webhook::{SignedPayload, WebhookNotifier};

/// Everything the receiving system needs to tear down access.
#[derive(Debug, Clone, Serialize)]
pub struct RevocationContext {
    pub delivery: Delivery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<Offer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<Consent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of one delivery attempt. Not an error: a failed webhook becomes
/// queue state, never a failed operation.
#[derive(Debug, Clone)]
pub struct RevocationOutcome {
    pub ok: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl RevocationOutcome {
    fn success(status: Option<u16>) -> Self {
        Self {
            ok: true,
            status,
            error: None,
        }
    }

    fn failure(status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one [`RevocationEngine::sweep_due`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub rescheduled: u32,
}

/// Delivers revocation notifications with bounded, durable retries.
pub struct RevocationEngine {
    store: Arc<dyn TradeStore>,
    audit: Arc<AuditPipeline>,
    config: RevocationConfig,
    notifier: Option<Arc<dyn WebhookNotifier>>,
    blob: Option<Arc<dyn EncryptedBlobStore>>,
}

impl RevocationEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn TradeStore>,
        audit: Arc<AuditPipeline>,
        config: RevocationConfig,
        notifier: Option<Arc<dyn WebhookNotifier>>,
        blob: Option<Arc<dyn EncryptedBlobStore>>,
    ) -> Self {
        Self {
            store,
            audit,
            config,
            notifier,
            blob,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RevocationConfig {
        &self.config
    }

    /// When a freshly failed attempt should be retried.
    #[must_use]
    pub fn next_attempt_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::milliseconds(i64::try_from(self.config.retry_delay_ms).unwrap_or(60_000))
    }

    /// POST the signed, timestamped context to the configured endpoint.
    /// A no-op success when revocation mode is `none`.
    pub async fn execute(&self, context: &RevocationContext) -> RevocationOutcome {
        if self.config.mode != RevocationMode::Webhook {
            return RevocationOutcome::success(None);
        }
        let Some(endpoint) = self.config.endpoint.as_deref() else {
            return RevocationOutcome::failure(None, "revocation endpoint is not configured");
        };
        let Some(notifier) = &self.notifier else {
            return RevocationOutcome::failure(None, "webhook notifier is not configured");
        };

        let body = match serde_json::to_string(context) {
            Ok(body) => body,
            Err(err) => return RevocationOutcome::failure(None, err.to_string()),
        };
        let payload = SignedPayload::new(
            body,
            Utc::now().to_rfc3339(),
            hash_canonical(context),
            self.config.signing_secret.as_deref(),
            self.config.api_key.clone(),
        );
        let timeout = StdDuration::from_millis(self.config.timeout_ms);

        match notifier.post(endpoint, &payload, timeout).await {
            Ok(status) if (200..300).contains(&status) => {
                RevocationOutcome::success(Some(status))
            }
            Ok(status) => RevocationOutcome::failure(
                Some(status),
                format!("revocation endpoint returned {status}"),
            ),
            Err(err) => RevocationOutcome::failure(None, err.to_string()),
        }
    }

    /// Reconstruct the payload for a retried delivery: inline when present,
    /// otherwise resolved through the blob store.
    pub async fn resolve_payload(&self, delivery: &Delivery) -> Option<DeliveryPayload> {
        if let Some(payload) = &delivery.payload {
            return Some(payload.clone());
        }
        let payload_ref = delivery.payload_ref.as_ref()?;
        let blob = self.blob.as_ref()?;
        match blob.get(payload_ref).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(target: "opentrade::revocation", error = %err, "payload resolution failed");
                None
            }
        }
    }

    /// Process every pending job whose `next_attempt_at` is due.
    pub async fn sweep_due(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let due: Vec<RevocationJob> = self
            .store
            .list_revocations()?
            .into_iter()
            .filter(|job| job.is_due_at(now))
            .collect();

        for mut job in due {
            report.processed += 1;

            let Some(delivery) = self.store.get_delivery(job.delivery_id)? else {
                self.mark_failed(&mut job, "delivery not found", now)?;
                report.failed += 1;
                continue;
            };

            let order = match job.order_id {
                Some(order_id) => self.store.get_order(order_id)?,
                None => self.store.get_order(delivery.order_id)?,
            };
            let offer = match &order {
                Some(order) => self.store.get_offer(order.offer_id)?,
                None => None,
            };
            let consent = match job.consent_id {
                Some(consent_id) => self.store.get_consent(consent_id)?,
                None => None,
            };

            let mut wire_delivery = delivery.clone();
            if let Some(payload) = self.resolve_payload(&delivery).await {
                wire_delivery.payload = Some(payload);
                wire_delivery.payload_ref = None;
            }
            let outcome = self
                .execute(&RevocationContext {
                    delivery: wire_delivery,
                    order,
                    offer,
                    consent,
                    reason: job.reason.clone().or_else(|| Some("retry".to_string())),
                })
                .await;

            if outcome.ok {
                ensure_transition(job.status, RevocationJobStatus::Succeeded)?;
                job.status = RevocationJobStatus::Succeeded;
                job.last_error = None;
                job.updated_at = now;
                self.store.save_revocation(&job)?;
                self.audit.record(
                    AuditKind::RevocationSucceeded,
                    job.job_id.to_string(),
                    Some(job.payload_hash.clone()),
                    None,
                    Some(json!({ "delivery_id": delivery.delivery_id, "attempts": job.attempts })),
                )?;
                info!(target: "opentrade::revocation", job_id = %job.job_id, "revocation delivered");
                report.succeeded += 1;
                continue;
            }

            job.attempts += 1;
            job.last_error = outcome.error.clone();
            job.updated_at = now;
            if job.attempts >= self.config.max_attempts {
                self.mark_failed_in_place(&mut job)?;
                report.failed += 1;
                continue;
            }

            job.next_attempt_at = self.next_attempt_at(now);
            self.store.save_revocation(&job)?;
            self.audit.record(
                AuditKind::RevocationRetry,
                job.job_id.to_string(),
                Some(job.payload_hash.clone()),
                None,
                Some(json!({
                    "attempts": job.attempts,
                    "next_attempt_at": job.next_attempt_at,
                    "last_error": job.last_error,
                })),
            )?;
            report.rescheduled += 1;
        }

        Ok(report)
    }

    /// Re-queue exhausted jobs for another round of attempts.
    pub fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u32> {
        let mut requeued = 0;
        for mut job in self.store.list_revocations()? {
            if job.status != RevocationJobStatus::Failed {
                continue;
            }
            ensure_transition(job.status, RevocationJobStatus::Pending)?;
            job.status = RevocationJobStatus::Pending;
            job.next_attempt_at = now;
            job.updated_at = now;
            self.store.save_revocation(&job)?;
            self.audit.record(
                AuditKind::RevocationRetry,
                job.job_id.to_string(),
                Some(job.payload_hash.clone()),
                None,
                Some(json!({ "requeued": true, "attempts": job.attempts })),
            )?;
            requeued += 1;
        }
        Ok(requeued)
    }

    /// Run the sweep on a fixed cadence until the task is dropped.
    pub async fn run(self: Arc<Self>, interval: StdDuration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep_due(Utc::now()).await {
                Ok(report) if report.processed > 0 => {
                    info!(target: "opentrade::revocation", ?report, "revocation sweep finished");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "opentrade::revocation", error = %err, "revocation sweep failed");
                }
            }
        }
    }

    fn mark_failed(
        &self,
        job: &mut RevocationJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        self.mark_failed_in_place(job)
    }

    fn mark_failed_in_place(&self, job: &mut RevocationJob) -> Result<()> {
        ensure_transition(job.status, RevocationJobStatus::Failed)?;
        job.status = RevocationJobStatus::Failed;
        self.store.save_revocation(job)?;
        self.audit.record(
            AuditKind::RevocationFailed,
            job.job_id.to_string(),
            Some(job.payload_hash.clone()),
            None,
            Some(json!({ "attempts": job.attempts, "last_error": &job.last_error })),
        )?;
        warn!(target: "opentrade::revocation", job_id = %job.job_id, attempts = job.attempts, "revocation job failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBlobStore, RecordingNotifier};
    use opentrade_store::FileStore;
    use opentrade_types::{DeliveryId, DeliveryType, OrderId};

    fn webhook_config() -> RevocationConfig {
        RevocationConfig {
            mode: RevocationMode::Webhook,
            endpoint: Some("https://hooks.example/revoke".to_string()),
            api_key: Some("key-1".to_string()),
            signing_secret: Some("secret".to_string()),
            timeout_ms: 1_000,
            max_attempts: 3,
            retry_delay_ms: 60_000,
        }
    }

    struct Rig {
        _dir: tempfile::TempDir,
        store: Arc<dyn TradeStore>,
        notifier: Arc<RecordingNotifier>,
        engine: RevocationEngine,
    }

    fn rig(config: RevocationConfig) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TradeStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let audit = Arc::new(AuditPipeline::new(Arc::clone(&store), None));
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = RevocationEngine::new(
            Arc::clone(&store),
            audit,
            config,
            Some(Arc::clone(&notifier) as Arc<dyn WebhookNotifier>),
            None,
        );
        Rig {
            _dir: dir,
            store,
            notifier,
            engine,
        }
    }

    fn seed_job(store: &Arc<dyn TradeStore>, due_at: DateTime<Utc>) -> RevocationJob {
        let now = Utc::now();
        let delivery = Delivery::issue(
            OrderId::new(),
            DeliveryType::Api,
            Some(DeliveryPayload::Api {
                access_token: "tok_seed".into(),
                quota: None,
            }),
            None,
            now,
        );
        store.save_delivery(&delivery).unwrap();
        let job = RevocationJob::queue(
            delivery.delivery_id,
            Some(delivery.order_id),
            None,
            None,
            Some("consent_revoked".into()),
            Some("connection refused".into()),
            due_at,
            now,
        );
        store.save_revocation(&job).unwrap();
        job
    }

    fn context(delivery: Delivery) -> RevocationContext {
        RevocationContext {
            delivery,
            order: None,
            offer: None,
            consent: None,
            reason: Some("test".into()),
        }
    }

    #[tokio::test]
    async fn none_mode_is_noop_success() {
        let rig = rig(RevocationConfig::default());
        let delivery = Delivery::issue(
            OrderId::new(),
            DeliveryType::Download,
            Some(DeliveryPayload::Download {
                download_url: "https://example/file".into(),
            }),
            None,
            Utc::now(),
        );
        let outcome = rig.engine.execute(&context(delivery)).await;
        assert!(outcome.ok);
        assert_eq!(rig.notifier.post_count(), 0);
    }

    #[tokio::test]
    async fn webhook_mode_without_endpoint_reports_failure() {
        let config = RevocationConfig {
            endpoint: None,
            ..webhook_config()
        };
        let rig = rig(config);
        let delivery = Delivery::issue(
            OrderId::new(),
            DeliveryType::Download,
            Some(DeliveryPayload::Download {
                download_url: "https://example/file".into(),
            }),
            None,
            Utc::now(),
        );
        let outcome = rig.engine.execute(&context(delivery)).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("endpoint"));
    }

    #[tokio::test]
    async fn execute_signs_and_posts() {
        let rig = rig(webhook_config());
        let delivery = Delivery::issue(
            OrderId::new(),
            DeliveryType::Api,
            Some(DeliveryPayload::Api {
                access_token: "tok_live".into(),
                quota: None,
            }),
            None,
            Utc::now(),
        );
        let outcome = rig.engine.execute(&context(delivery)).await;
        assert!(outcome.ok);
        assert_eq!(outcome.status, Some(200));

        let posts = rig.notifier.posts();
        assert_eq!(posts.len(), 1);
        let (url, payload) = &posts[0];
        assert_eq!(url, "https://hooks.example/revoke");
        assert!(payload.signature.is_some());
        assert!(payload.payload_hash.starts_with("0x"));
        assert_eq!(payload.api_key.as_deref(), Some("key-1"));
    }

    #[tokio::test]
    async fn sweep_marks_succeeded_and_retains_job() {
        let rig = rig(webhook_config());
        let now = Utc::now();
        let job = seed_job(&rig.store, now - Duration::seconds(1));

        let report = rig.engine.sweep_due(now).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let stored = rig.store.get_revocation(job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, RevocationJobStatus::Succeeded);
    }

    #[tokio::test]
    async fn sweep_exhausts_into_failed_and_keeps_job_queryable() {
        let rig = rig(webhook_config());
        rig.notifier.go_down();
        let now = Utc::now();
        let job = seed_job(&rig.store, now - Duration::seconds(1));

        // Attempt 2 of 3: rescheduled.
        let report = rig.engine.sweep_due(now).await.unwrap();
        assert_eq!(report.rescheduled, 1);
        let stored = rig.store.get_revocation(job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, RevocationJobStatus::Pending);
        assert_eq!(stored.attempts, 2);
        assert!(stored.next_attempt_at > now);

        // Attempt 3 of 3: exhausted.
        let later = stored.next_attempt_at + Duration::seconds(1);
        let report = rig.engine.sweep_due(later).await.unwrap();
        assert_eq!(report.failed, 1);
        let stored = rig.store.get_revocation(job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, RevocationJobStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert!(stored.last_error.is_some());

        // Failed jobs are never auto-deleted and never picked up again.
        let report = rig
            .engine
            .sweep_due(later + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.processed, 0);
        assert!(rig.store.get_revocation(job.job_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_fails_job_whose_delivery_is_gone() {
        let rig = rig(webhook_config());
        let now = Utc::now();
        let job = RevocationJob::queue(
            DeliveryId::new(),
            None,
            None,
            None,
            None,
            None,
            now - Duration::seconds(1),
            now,
        );
        rig.store.save_revocation(&job).unwrap();

        let report = rig.engine.sweep_due(now).await.unwrap();
        assert_eq!(report.failed, 1);
        let stored = rig.store.get_revocation(job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, RevocationJobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("delivery not found"));
    }

    #[tokio::test]
    async fn requeue_failed_goes_through_the_validator() {
        let rig = rig(webhook_config());
        rig.notifier.go_down();
        let now = Utc::now();
        let job = seed_job(&rig.store, now - Duration::seconds(1));

        // Exhaust the job.
        rig.engine.sweep_due(now).await.unwrap();
        rig.engine
            .sweep_due(now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            rig.store.get_revocation(job.job_id).unwrap().unwrap().status,
            RevocationJobStatus::Failed
        );

        let requeue_at = now + Duration::hours(2);
        let requeued = rig.engine.requeue_failed(requeue_at).unwrap();
        assert_eq!(requeued, 1);
        let stored = rig.store.get_revocation(job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, RevocationJobStatus::Pending);
        assert_eq!(stored.next_attempt_at, requeue_at);

        // With the endpoint back, the re-queued job drains.
        rig.notifier.come_up();
        let report = rig.engine.sweep_due(requeue_at).await.unwrap();
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn sweep_resolves_externalized_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TradeStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let audit = Arc::new(AuditPipeline::new(Arc::clone(&store), None));
        let notifier = Arc::new(RecordingNotifier::new());
        let blob = Arc::new(MemoryBlobStore::new());

        let payload = DeliveryPayload::Api {
            access_token: "tok_vaulted".into(),
            quota: Some(100),
        };
        let payload_ref = blob
            .put("d1", &serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();
        let delivery = Delivery::issue(
            OrderId::new(),
            DeliveryType::Api,
            None,
            Some(payload_ref),
            Utc::now(),
        );
        store.save_delivery(&delivery).unwrap();

        let now = Utc::now();
        let job = RevocationJob::queue(
            delivery.delivery_id,
            Some(delivery.order_id),
            None,
            None,
            Some("lease_revoked".into()),
            None,
            now - Duration::seconds(1),
            now,
        );
        store.save_revocation(&job).unwrap();

        let engine = RevocationEngine::new(
            Arc::clone(&store),
            audit,
            webhook_config(),
            Some(Arc::clone(&notifier) as Arc<dyn WebhookNotifier>),
            Some(blob),
        );
        let report = engine.sweep_due(now).await.unwrap();
        assert_eq!(report.succeeded, 1);

        // The webhook body carries the resolved secret, not the blob ref.
        let posts = notifier.posts();
        let body: serde_json::Value = serde_json::from_str(&posts[0].1.body).unwrap();
        assert_eq!(body["delivery"]["payload"]["access_token"], "tok_vaulted");
        assert!(body["delivery"].get("payload_ref").is_none());
    }
}

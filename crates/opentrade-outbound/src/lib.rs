//! # opentrade-outbound
//!
//! **Outbound Plane**: everything that leaves the engine on a wire that can
//! fail, wrapped so the primary operation never does.
//!
//! ## Components
//!
//! 1. **`chain`**: the [`ChainAdapter`] contract for external-ledger
//!    anchoring and receipt polling
//! 2. **`webhook`**: the [`WebhookNotifier`] contract plus the provided
//!    HTTP implementation
//! 3. **`blob`**: the [`EncryptedBlobStore`] contract for delivery payload
//!    externalization
//! 4. **`audit`**: [`AuditPipeline`] — append locally, anchor
//!    opportunistically, queue what could not be anchored
//! 5. **`revocation`**: [`RevocationEngine`] — signed webhook delivery with
//!    a durable, bounded retry queue
//! 6. **`poller`**: [`RewardPoller`] — periodic receipt reconciliation of
//!    submitted reward grants
//!
//! ## Failure model
//!
//! Anchoring and webhook failures degrade to persisted queue state
//! ([`opentrade_types::PendingAnchor`], [`opentrade_types::RevocationJob`]);
//! only the primary entity's own write failing is fatal to a request. Every
//! background sweep is idempotent: the transition validator rejecting any
//! move out of a terminal status is what makes a replayed receipt or a
//! duplicate webhook harmless.

pub mod audit;
pub mod blob;
pub mod chain;
pub mod poller;
pub mod revocation;
pub mod webhook;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use audit::{AnchorFlushReport, AuditPipeline};
pub use blob::EncryptedBlobStore;
pub use chain::{AnchorReceipt, ChainAdapter, TxReceipt, TxStatus};
pub use poller::{PollReport, RewardPoller};
pub use revocation::{RevocationContext, RevocationEngine, RevocationOutcome, SweepReport};
pub use webhook::{HttpWebhookNotifier, SignedPayload, WebhookNotifier};

//! External-ledger adapter contract.
//!
//! The engine never talks to a chain directly: anchoring and receipt
//! polling go through [`ChainAdapter`], injected at construction. Hosts
//! bring their own RPC implementation; everything here is the narrow
//! surface the transaction engine actually needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use opentrade_types::Result;

/// Proof that a payload hash was written to the external ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Transaction reference on the external ledger.
    pub tx: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

/// Terminal outcome of an external transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Success,
    Reverted,
}

/// Receipt for a submitted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// The chain operations the engine consumes.
///
/// `anchor_hash` attests to a data hash without storing the data itself;
/// `anchor_id` is the caller's idempotency key (e.g. `offer:<id>`).
/// `get_receipt` returns `None` while the transaction is still pending.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn anchor_hash(&self, anchor_id: &str, payload_hash: &str) -> Result<AnchorReceipt>;

    async fn get_receipt(&self, tx_ref: &str) -> Result<Option<TxReceipt>>;
}

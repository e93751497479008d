//! Encrypted blob storage contract for delivery payload externalization.
//!
//! When a blob store is configured, the engine never persists delivery
//! secrets inline: the payload goes into the store and only the opaque
//! [`PayloadRef`] lands in the delivery record. Encryption is the store's
//! concern, not the engine's.

use async_trait::async_trait;

use opentrade_types::{PayloadRef, Result};

/// Externalized payload storage.
#[async_trait]
pub trait EncryptedBlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the reference to persist.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PayloadRef>;

    /// Fetch previously stored bytes; `None` when the reference is unknown.
    async fn get(&self, payload_ref: &PayloadRef) -> Result<Option<Vec<u8>>>;
}

//! In-memory collaborator doubles for tests and embedding.
//!
//! Available under the `test-helpers` feature (and to this crate's own
//! tests). None of these talk to a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use opentrade_types::{OpentradeError, PayloadRef, Result};

use crate::blob::EncryptedBlobStore;
use crate::chain::{AnchorReceipt, ChainAdapter, TxReceipt};
use crate::webhook::{SignedPayload, WebhookNotifier};

/// Scriptable chain adapter: anchoring can be toggled down, receipts are
/// seeded per transaction reference.
pub struct StaticChain {
    anchor_down: AtomicBool,
    anchor_seq: AtomicU64,
    anchors: Mutex<Vec<(String, String)>>,
    receipts: Mutex<HashMap<String, TxReceipt>>,
}

impl StaticChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor_down: AtomicBool::new(false),
            anchor_seq: AtomicU64::new(0),
            anchors: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_anchoring(&self) {
        self.anchor_down.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.anchor_down.store(false, Ordering::SeqCst);
    }

    pub fn seed_receipt(&self, tx_ref: &str, receipt: TxReceipt) {
        self.receipts
            .lock()
            .expect("receipt map poisoned")
            .insert(tx_ref.to_string(), receipt);
    }

    /// `(anchor_id, payload_hash)` pairs anchored so far.
    pub fn anchored(&self) -> Vec<(String, String)> {
        self.anchors.lock().expect("anchor log poisoned").clone()
    }
}

impl Default for StaticChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainAdapter for StaticChain {
    async fn anchor_hash(&self, anchor_id: &str, payload_hash: &str) -> Result<AnchorReceipt> {
        if self.anchor_down.load(Ordering::SeqCst) {
            return Err(OpentradeError::Unavailable {
                reason: "anchor rpc unreachable".to_string(),
            });
        }
        let seq = self.anchor_seq.fetch_add(1, Ordering::SeqCst);
        self.anchors
            .lock()
            .expect("anchor log poisoned")
            .push((anchor_id.to_string(), payload_hash.to_string()));
        Ok(AnchorReceipt {
            tx: format!("0xanchor{seq:04x}"),
            network: "test".to_string(),
            block: Some(seq + 1),
        })
    }

    async fn get_receipt(&self, tx_ref: &str) -> Result<Option<TxReceipt>> {
        Ok(self
            .receipts
            .lock()
            .expect("receipt map poisoned")
            .get(tx_ref)
            .cloned())
    }
}

/// Notifier that records every post and can be switched to fail.
pub struct RecordingNotifier {
    down: AtomicBool,
    status: AtomicU64,
    posts: Mutex<Vec<(String, SignedPayload)>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            down: AtomicBool::new(false),
            status: AtomicU64::new(200),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn come_up(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    pub fn respond_with(&self, status: u16) {
        self.status.store(u64::from(status), Ordering::SeqCst);
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().expect("post log poisoned").len()
    }

    pub fn posts(&self) -> Vec<(String, SignedPayload)> {
        self.posts.lock().expect("post log poisoned").clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookNotifier for RecordingNotifier {
    async fn post(&self, url: &str, payload: &SignedPayload, _timeout: Duration) -> Result<u16> {
        if self.down.load(Ordering::SeqCst) {
            return Err(OpentradeError::Unavailable {
                reason: "connection refused".to_string(),
            });
        }
        self.posts
            .lock()
            .expect("post log poisoned")
            .push((url.to_string(), payload.clone()));
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.status.load(Ordering::SeqCst) as u16)
    }
}

/// Blob store over a plain map. Stands in for the real encrypted store.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EncryptedBlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PayloadRef> {
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(PayloadRef::credentials(key))
    }

    async fn get(&self, payload_ref: &PayloadRef) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .expect("blob map poisoned")
            .get(&payload_ref.r#ref)
            .cloned())
    }
}

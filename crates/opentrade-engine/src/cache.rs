//! Bounded lease cache for the metering hot path.
//!
//! `ledger.append` validates lease liveness on every call; the cache keeps
//! recently seen live leases so the common case skips the store read.
//! Expiry is checked on every lookup, entries for dead leases are dropped
//! eagerly, and a bounded insertion-order queue keeps memory predictable.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use opentrade_types::{Lease, LeaseId};

/// Bounded map of live leases with insertion-order eviction.
pub struct LeaseCache {
    leases: HashMap<LeaseId, Lease>,
    order: VecDeque<LeaseId>,
    max_size: usize,
}

impl LeaseCache {
    /// # Panics
    /// Panics if `max_size` is zero.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "LeaseCache max_size must be > 0");
        Self {
            leases: HashMap::with_capacity(max_size),
            order: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// A cached lease, but only while it is still live at `now`.
    pub fn get_live(&mut self, lease_id: LeaseId, now: DateTime<Utc>) -> Option<Lease> {
        let live = self
            .leases
            .get(&lease_id)
            .is_some_and(|lease| lease.is_live_at(now));
        if !live {
            self.invalidate(lease_id);
            return None;
        }
        self.leases.get(&lease_id).cloned()
    }

    /// Cache a lease; dead leases are not worth a slot.
    pub fn insert(&mut self, lease: Lease, now: DateTime<Utc>) {
        if !lease.is_live_at(now) {
            return;
        }
        if self.leases.contains_key(&lease.lease_id) {
            self.leases.insert(lease.lease_id, lease);
            return;
        }
        if self.leases.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.leases.remove(&oldest);
            }
        }
        self.order.push_back(lease.lease_id);
        self.leases.insert(lease.lease_id, lease);
    }

    /// Drop a lease after revocation or expiry.
    pub fn invalidate(&mut self, lease_id: LeaseId) {
        if self.leases.remove(&lease_id).is_some() {
            self.order.retain(|id| *id != lease_id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

//! # opentrade-store
//!
//! **Persistence Plane**: the [`TradeStore`] contract and its two
//! interchangeable backends.
//!
//! ## Architecture
//!
//! 1. **`store`**: the backend-agnostic trait handlers program against
//! 2. **`file`**: directory-snapshot JSON store with an advisory directory
//!    lock (crash-only/best-effort)
//! 3. **`sqlite`**: relational store with native ACID transactions
//! 4. **`migrate`**: bulk read-then-write between backends
//! 5. **`lock`**: the directory lock and the transaction-nesting slot
//!
//! ## Transaction model
//!
//! ```text
//! handler -> store.transaction(|| { save(a); save(b); ... })
//!            file:   dir lock -> snapshot -> run -> restore on error
//!            sqlite: BEGIN IMMEDIATE -> run -> COMMIT | ROLLBACK
//! ```
//!
//! Nested transactions run in place, tracked by an explicit depth counter
//! keyed to the lock identity; the outer frame is the atomicity unit.

pub mod file;
pub mod lock;
pub mod migrate;
pub mod sqlite;
pub mod store;

pub use file::FileStore;
pub use lock::{DirLock, LockOptions, TxnSlot};
pub use migrate::copy_all;
pub use sqlite::SqliteStore;
pub use store::{open_store, TradeStore};

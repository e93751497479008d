//! # opentrade-types
//!
//! Shared types, errors, and configuration for the **OpenTrade** marketplace
//! transaction engine.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OfferId`], [`OrderId`], [`ConsentId`], [`DeliveryId`],
//!   [`SettlementId`], [`DisputeId`], [`ResourceId`], [`LeaseId`],
//!   [`RewardId`], [`RevocationJobId`], [`AuditEventId`], [`ActorId`]
//! - **Trade entities**: [`Offer`], [`Order`], [`Consent`], [`Delivery`],
//!   [`Settlement`], [`Dispute`]
//! - **Leasing entities**: [`Resource`], [`Lease`], [`LedgerEntry`]
//! - **Background entities**: [`RewardGrant`], [`RevocationJob`],
//!   [`AuditEvent`], [`PendingAnchor`]
//! - **Transition validator**: [`StatusGraph`] and [`ensure_transition`]
//! - **Canonical hashing**: [`canonical::hash_canonical`] with key sorting
//!   and sensitive-field redaction
//! - **Errors**: [`OpentradeError`] with stable `E_*` taxonomy codes
//! - **Configuration**: [`EngineConfig`] and its sections

pub mod audit;
pub mod canonical;
pub mod config;
pub mod consent;
pub mod delivery;
pub mod dispute;
pub mod error;
pub mod ids;
pub mod lease;
pub mod ledger;
pub mod offer;
pub mod order;
pub mod resource;
pub mod revocation;
pub mod reward;
pub mod settlement;
pub mod transitions;

// Re-export all primary types at crate root for ergonomic imports:
//   use opentrade_types::{Offer, Order, Settlement, ensure_transition, ...};

pub use audit::*;
pub use config::*;
pub use consent::*;
pub use delivery::*;
pub use dispute::*;
pub use error::*;
pub use ids::*;
pub use lease::*;
pub use ledger::*;
pub use offer::*;
pub use order::*;
pub use resource::*;
pub use revocation::*;
pub use reward::*;
pub use settlement::*;
pub use transitions::{ensure_transition, StatusGraph};

// Canonicalization helpers are accessed via `opentrade_types::canonical::*`
// (not re-exported to keep hashing call sites explicit).

//! # opentrade-engine
//!
//! **Operation Handlers**: the typed request surface of the OpenTrade
//! marketplace transaction engine.
//!
//! One [`MarketEngine`] owns the store, the audit/anchoring pipeline, the
//! revocation engine, and the configuration. Every operation follows the
//! same spine:
//!
//! 1. access check ([`access`])
//! 2. input validation
//! 3. load referenced entities
//! 4. re-derive and compare content hashes where applicable
//! 5. **transition check** ([`opentrade_types::ensure_transition`] — never
//!    bypassed)
//! 6. persist (one `transaction` when more than one entity is written)
//! 7. audit (with opportunistic anchoring)
//!
//! Failures surface as [`opentrade_types::OpentradeError`]; the wire shape
//! is [`ErrorBody`], whose message is pattern-redacted ([`redact`]) before
//! it leaves the engine.

pub mod access;
pub mod cache;
pub mod consent;
pub mod delivery;
pub mod dispute;
pub mod engine;
pub mod lease;
pub mod ledger;
pub mod offer;
pub mod ops;
pub mod order;
pub mod redact;
pub mod resource;
pub mod reward;
pub mod settlement;

#[cfg(test)]
mod testutil;

pub use engine::MarketEngine;
pub use redact::{redact_message, ErrorBody};

pub use consent::*;
pub use delivery::*;
pub use dispute::*;
pub use lease::*;
pub use ledger::*;
pub use offer::*;
pub use ops::*;
pub use order::*;
pub use resource::*;
pub use reward::*;
pub use settlement::*;

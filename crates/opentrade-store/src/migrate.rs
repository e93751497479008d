//! Backend migration: bulk read-then-write of every collection.

use opentrade_types::{LeaseFilter, LedgerFilter, ResourceFilter, Result};

use crate::store::TradeStore;

/// Copy every collection from `src` into `dst` inside one destination
/// transaction. Intended for file → SQLite upgrades of an existing state
/// directory, but works across any backend pair.
pub fn copy_all(src: &dyn TradeStore, dst: &dyn TradeStore) -> Result<()> {
    let offers = src.list_offers()?;
    let resources = src.list_resources(&ResourceFilter::default())?;
    let orders = src.list_orders()?;
    let consents = src.list_consents()?;
    let deliveries = src.list_deliveries()?;
    let settlements = src.list_settlements()?;
    let disputes = src.list_disputes()?;
    let leases = src.list_leases(&LeaseFilter::default())?;
    let revocations = src.list_revocations()?;
    let rewards = src.list_rewards()?;
    let pending_anchors = src.list_pending_anchors()?;
    let ledger = src.list_ledger(&LedgerFilter::default())?;
    let audit = src.read_audit_events(usize::MAX)?;
    let nonces: Vec<_> = rewards
        .iter()
        .filter_map(|r| src.get_reward_nonce(&r.nonce_id()).transpose())
        .collect::<Result<_>>()?;

    dst.transaction(&mut || {
        for offer in &offers {
            dst.save_offer(offer)?;
        }
        for resource in &resources {
            dst.save_resource(resource)?;
        }
        for order in &orders {
            dst.save_order(order)?;
        }
        for consent in &consents {
            dst.save_consent(consent)?;
        }
        for delivery in &deliveries {
            dst.save_delivery(delivery)?;
        }
        for settlement in &settlements {
            dst.save_settlement(settlement)?;
        }
        for dispute in &disputes {
            dst.save_dispute(dispute)?;
        }
        for lease in &leases {
            dst.save_lease(lease)?;
        }
        for job in &revocations {
            dst.save_revocation(job)?;
        }
        for reward in &rewards {
            dst.save_reward(reward)?;
        }
        for nonce in &nonces {
            dst.save_reward_nonce(nonce)?;
        }
        for anchor in &pending_anchors {
            dst.save_pending_anchor(anchor)?;
        }
        for entry in &ledger {
            dst.append_ledger(entry)?;
        }
        for event in &audit {
            dst.append_audit_event(event)?;
        }
        Ok(())
    })
}

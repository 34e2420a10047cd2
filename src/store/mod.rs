//! Durable per-turn state.
//!
//! Two tables keyed by turn id: the acceptor's highest proposal and the
//! learnt (decided) value. The backend is chosen at startup from the
//! configuration; everything else talks to the [`Store`] trait.

mod disk;
mod memory;

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use disk::DiskStore;
use error_stack::Report;
pub use memory::MemoryStore;

use crate::config::{Settings, StoreKind};
use crate::messages::{LearntWithTurn, ProposalWithTurn};
use crate::proposal::Proposal;

#[derive(Debug)]
pub struct StoreError;

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("store operation failed")
    }
}

impl core::error::Error for StoreError {}

/// Storage interface shared by every role on the node.
///
/// Implementations MUST apply [`Store::set_proposal`] atomically: the
/// prepare path keeps a stored non-empty value while updating the number,
/// and a concurrent accept must not race that read-modify-write. An empty
/// value never overwrites a stored one.
pub trait Store: Send + Sync + 'static {
    fn proposal(&self, turn_id: u64) -> Result<Option<Proposal>, Report<StoreError>>;

    /// Upsert the proposal row for `turn_id`.
    ///
    /// With `overwrite_value` (the accept path) the whole row is replaced;
    /// without it (the prepare path) only the number is updated and a
    /// stored non-empty value is preserved.
    fn set_proposal(
        &self,
        turn_id: u64,
        proposal: &Proposal,
        overwrite_value: bool,
    ) -> Result<(), Report<StoreError>>;

    fn reset_proposal(&self, turn_id: u64) -> Result<(), Report<StoreError>>;

    fn reset_all_proposals(&self) -> Result<(), Report<StoreError>>;

    fn all_proposals(&self) -> Result<Vec<ProposalWithTurn>, Report<StoreError>>;

    fn proposal_turn_ids(&self) -> Result<BTreeSet<u64>, Report<StoreError>>;

    /// Proposals whose turn has no learnt value yet.
    fn dangling_proposals(&self) -> Result<BTreeMap<u64, Proposal>, Report<StoreError>>;

    fn learnt_value(&self, turn_id: u64) -> Result<Option<String>, Report<StoreError>>;

    /// Upsert the learnt value. Overwrites are allowed here; the learner
    /// and seeker enforce write-once on top of this.
    fn set_learnt_value(&self, turn_id: u64, value: &str) -> Result<(), Report<StoreError>>;

    fn reset_learnt_value(&self, turn_id: u64) -> Result<(), Report<StoreError>>;

    fn reset_all_learnt_values(&self) -> Result<(), Report<StoreError>>;

    fn all_learnt_values(&self) -> Result<Vec<LearntWithTurn>, Report<StoreError>>;

    fn learnt_turn_ids(&self) -> Result<BTreeSet<u64>, Report<StoreError>>;

    /// Highest turn id with a learnt value, 0 when none.
    fn last_turn_id(&self) -> Result<u64, Report<StoreError>>;
}

/// Open the backend named by the configuration.
///
/// # Errors
///
/// Returns [`StoreError`] if the disk backend cannot be opened.
pub fn open(settings: &Settings) -> Result<Arc<dyn Store>, Report<StoreError>> {
    match settings.db_type {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Disk => Ok(Arc::new(DiskStore::open(&settings.db_path)?)),
    }
}

/// Merge an incoming proposal over the stored row.
///
/// Shared by both backends so they agree on the prepare-path semantics.
fn merge_proposal(stored: Option<Proposal>, incoming: &Proposal, overwrite_value: bool) -> Proposal {
    let mut row = stored.unwrap_or_default();
    row.pid = incoming.pid;
    row.seq = incoming.seq;
    if incoming.has_value() && (overwrite_value || !row.has_value()) {
        row.v = incoming.v.clone();
    }
    row
}

//! In-memory store backend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use error_stack::Report;

use super::{Store, StoreError, merge_proposal};
use crate::messages::{LearntWithTurn, ProposalWithTurn};
use crate::proposal::Proposal;

#[derive(Default)]
struct Tables {
    proposals: BTreeMap<u64, Proposal>,
    learnt: BTreeMap<u64, String>,
}

/// Volatile backend. One lock over both tables gives the prepare-path
/// read-modify-write its atomicity.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn proposal(&self, turn_id: u64) -> Result<Option<Proposal>, Report<StoreError>> {
        Ok(self.tables.lock().unwrap().proposals.get(&turn_id).cloned())
    }

    fn set_proposal(
        &self,
        turn_id: u64,
        proposal: &Proposal,
        overwrite_value: bool,
    ) -> Result<(), Report<StoreError>> {
        let mut tables = self.tables.lock().unwrap();
        let merged = merge_proposal(tables.proposals.get(&turn_id).cloned(), proposal, overwrite_value);
        tables.proposals.insert(turn_id, merged);
        Ok(())
    }

    fn reset_proposal(&self, turn_id: u64) -> Result<(), Report<StoreError>> {
        self.tables.lock().unwrap().proposals.remove(&turn_id);
        Ok(())
    }

    fn reset_all_proposals(&self) -> Result<(), Report<StoreError>> {
        self.tables.lock().unwrap().proposals.clear();
        Ok(())
    }

    fn all_proposals(&self) -> Result<Vec<ProposalWithTurn>, Report<StoreError>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .proposals
            .iter()
            .map(|(&turn_id, proposal)| ProposalWithTurn {
                turn_id,
                proposal: proposal.clone(),
            })
            .collect())
    }

    fn proposal_turn_ids(&self) -> Result<BTreeSet<u64>, Report<StoreError>> {
        Ok(self.tables.lock().unwrap().proposals.keys().copied().collect())
    }

    fn dangling_proposals(&self) -> Result<BTreeMap<u64, Proposal>, Report<StoreError>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .proposals
            .iter()
            .filter(|(turn_id, _)| !tables.learnt.contains_key(turn_id))
            .map(|(&turn_id, proposal)| (turn_id, proposal.clone()))
            .collect())
    }

    fn learnt_value(&self, turn_id: u64) -> Result<Option<String>, Report<StoreError>> {
        Ok(self.tables.lock().unwrap().learnt.get(&turn_id).cloned())
    }

    fn set_learnt_value(&self, turn_id: u64, value: &str) -> Result<(), Report<StoreError>> {
        self.tables
            .lock()
            .unwrap()
            .learnt
            .insert(turn_id, value.to_owned());
        Ok(())
    }

    fn reset_learnt_value(&self, turn_id: u64) -> Result<(), Report<StoreError>> {
        self.tables.lock().unwrap().learnt.remove(&turn_id);
        Ok(())
    }

    fn reset_all_learnt_values(&self) -> Result<(), Report<StoreError>> {
        self.tables.lock().unwrap().learnt.clear();
        Ok(())
    }

    fn all_learnt_values(&self) -> Result<Vec<LearntWithTurn>, Report<StoreError>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .learnt
            .iter()
            .map(|(&turn_id, learnt)| LearntWithTurn {
                turn_id,
                learnt: learnt.clone(),
            })
            .collect())
    }

    fn learnt_turn_ids(&self) -> Result<BTreeSet<u64>, Report<StoreError>> {
        Ok(self.tables.lock().unwrap().learnt.keys().copied().collect())
    }

    fn last_turn_id(&self) -> Result<u64, Report<StoreError>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .learnt
            .last_key_value()
            .map_or(0, |(&turn_id, _)| turn_id))
    }
}

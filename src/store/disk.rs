//! Persistent store backend using fjall.
//!
//! Two keyspaces keyed by the big-endian turn id: `proposal` holds
//! postcard-encoded proposal rows, `learnt` the decided value bytes.
//! Writes are synced before reporting success so accepted proposals and
//! learnt values survive a crash-restart.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use error_stack::{Report, ResultExt};
use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};

use super::{Store, StoreError, merge_proposal};
use crate::messages::{LearntWithTurn, ProposalWithTurn};
use crate::proposal::Proposal;

pub struct DiskStore {
    db: Database,
    proposals: Keyspace,
    learnt: Keyspace,
    /// Serializes read-modify-write on the proposal table so a concurrent
    /// prepare and accept on the same turn cannot lose the accepted value.
    write_lock: Mutex<()>,
}

impl DiskStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database or a keyspace cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Report<StoreError>> {
        let db = Database::builder(path.as_ref())
            .open()
            .change_context(StoreError)?;
        let proposals = db
            .keyspace("proposal", KeyspaceCreateOptions::default)
            .change_context(StoreError)?;
        let learnt = db
            .keyspace("learnt", KeyspaceCreateOptions::default)
            .change_context(StoreError)?;
        Ok(Self {
            db,
            proposals,
            learnt,
            write_lock: Mutex::new(()),
        })
    }

    fn persist(&self) -> Result<(), Report<StoreError>> {
        self.db
            .persist(PersistMode::SyncAll)
            .change_context(StoreError)
    }

    fn turn_key(turn_id: u64) -> [u8; 8] {
        turn_id.to_be_bytes()
    }

    fn parse_turn_key(key: &[u8]) -> Option<u64> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    fn encode_proposal(proposal: &Proposal) -> Vec<u8> {
        postcard::to_allocvec(proposal).expect("serialization should not fail")
    }

    fn decode_proposal(bytes: &[u8]) -> Option<Proposal> {
        postcard::from_bytes(bytes).ok()
    }

    fn clear_keyspace(&self, keyspace: &Keyspace) -> Result<(), Report<StoreError>> {
        let mut keys = Vec::new();
        for guard in keyspace.iter() {
            let (key, _) = guard.into_inner().change_context(StoreError)?;
            keys.push(key.to_vec());
        }
        for key in keys {
            keyspace.remove(&key).change_context(StoreError)?;
        }
        self.persist()
    }
}

impl Store for DiskStore {
    fn proposal(&self, turn_id: u64) -> Result<Option<Proposal>, Report<StoreError>> {
        Ok(self
            .proposals
            .get(Self::turn_key(turn_id))
            .change_context(StoreError)?
            .and_then(|bytes| Self::decode_proposal(&bytes)))
    }

    fn set_proposal(
        &self,
        turn_id: u64,
        proposal: &Proposal,
        overwrite_value: bool,
    ) -> Result<(), Report<StoreError>> {
        let _guard = self.write_lock.lock().unwrap();
        let stored = self
            .proposals
            .get(Self::turn_key(turn_id))
            .change_context(StoreError)?
            .and_then(|bytes| Self::decode_proposal(&bytes));
        let merged = merge_proposal(stored, proposal, overwrite_value);
        self.proposals
            .insert(Self::turn_key(turn_id), &Self::encode_proposal(&merged))
            .change_context(StoreError)?;
        self.persist()
    }

    fn reset_proposal(&self, turn_id: u64) -> Result<(), Report<StoreError>> {
        self.proposals
            .remove(Self::turn_key(turn_id))
            .change_context(StoreError)?;
        self.persist()
    }

    fn reset_all_proposals(&self) -> Result<(), Report<StoreError>> {
        self.clear_keyspace(&self.proposals)
    }

    fn all_proposals(&self) -> Result<Vec<ProposalWithTurn>, Report<StoreError>> {
        let mut rows = Vec::new();
        for guard in self.proposals.iter() {
            let (key, value) = guard.into_inner().change_context(StoreError)?;
            let Some(turn_id) = Self::parse_turn_key(&key) else {
                continue;
            };
            let Some(proposal) = Self::decode_proposal(&value) else {
                continue;
            };
            rows.push(ProposalWithTurn { turn_id, proposal });
        }
        Ok(rows)
    }

    fn proposal_turn_ids(&self) -> Result<BTreeSet<u64>, Report<StoreError>> {
        let mut ids = BTreeSet::new();
        for guard in self.proposals.iter() {
            let (key, _) = guard.into_inner().change_context(StoreError)?;
            if let Some(turn_id) = Self::parse_turn_key(&key) {
                ids.insert(turn_id);
            }
        }
        Ok(ids)
    }

    fn dangling_proposals(&self) -> Result<BTreeMap<u64, Proposal>, Report<StoreError>> {
        let learnt_ids = self.learnt_turn_ids()?;
        let mut dangling = BTreeMap::new();
        for row in self.all_proposals()? {
            if !learnt_ids.contains(&row.turn_id) {
                dangling.insert(row.turn_id, row.proposal);
            }
        }
        Ok(dangling)
    }

    fn learnt_value(&self, turn_id: u64) -> Result<Option<String>, Report<StoreError>> {
        Ok(self
            .learnt
            .get(Self::turn_key(turn_id))
            .change_context(StoreError)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn set_learnt_value(&self, turn_id: u64, value: &str) -> Result<(), Report<StoreError>> {
        self.learnt
            .insert(Self::turn_key(turn_id), value.as_bytes())
            .change_context(StoreError)?;
        self.persist()
    }

    fn reset_learnt_value(&self, turn_id: u64) -> Result<(), Report<StoreError>> {
        self.learnt
            .remove(Self::turn_key(turn_id))
            .change_context(StoreError)?;
        self.persist()
    }

    fn reset_all_learnt_values(&self) -> Result<(), Report<StoreError>> {
        self.clear_keyspace(&self.learnt)
    }

    fn all_learnt_values(&self) -> Result<Vec<LearntWithTurn>, Report<StoreError>> {
        let mut rows = Vec::new();
        for guard in self.learnt.iter() {
            let (key, value) = guard.into_inner().change_context(StoreError)?;
            let Some(turn_id) = Self::parse_turn_key(&key) else {
                continue;
            };
            rows.push(LearntWithTurn {
                turn_id,
                learnt: String::from_utf8_lossy(&value).into_owned(),
            });
        }
        Ok(rows)
    }

    fn learnt_turn_ids(&self) -> Result<BTreeSet<u64>, Report<StoreError>> {
        let mut ids = BTreeSet::new();
        for guard in self.learnt.iter() {
            let (key, _) = guard.into_inner().change_context(StoreError)?;
            if let Some(turn_id) = Self::parse_turn_key(&key) {
                ids.insert(turn_id);
            }
        }
        Ok(ids)
    }

    fn last_turn_id(&self) -> Result<u64, Report<StoreError>> {
        for guard in self.learnt.iter().rev() {
            let (key, _) = guard.into_inner().change_context(StoreError)?;
            if let Some(turn_id) = Self::parse_turn_key(&key) {
                return Ok(turn_id);
            }
        }
        Ok(0)
    }
}

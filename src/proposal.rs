//! Proposals and their ordering.

use serde::{Deserialize, Serialize};

/// A numbered proposal for one turn.
///
/// The number is the `(seq, pid)` pair; `v` is the value being proposed.
/// An empty `v` means no value has been bound yet, and `(0, 0)` is the null
/// number — neither is ever produced by a well-behaved proposer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default)]
    pub pid: u64,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub v: String,
}

impl Proposal {
    #[must_use]
    pub fn new(pid: u64, seq: u64, v: impl Into<String>) -> Self {
        Self {
            pid,
            seq,
            v: v.into(),
        }
    }

    /// The ordering key of this proposal.
    #[must_use]
    pub fn num(&self) -> ProposalNum {
        ProposalNum {
            seq: self.seq,
            pid: self.pid,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.num() == ProposalNum::NULL
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        !self.v.is_empty()
    }
}

/// Proposal number, ordered lexicographically on `(seq, pid)`.
///
/// Pids are unique per node, so they break ties between proposals issued
/// with the same sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProposalNum {
    pub seq: u64,
    pub pid: u64,
}

impl ProposalNum {
    pub const NULL: Self = Self { seq: 0, pid: 0 };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_seq_first() {
        let low = Proposal::new(9, 1, "a");
        let high = Proposal::new(1, 2, "b");
        assert!(high.num() > low.num());
    }

    #[test]
    fn pid_breaks_ties() {
        let left = Proposal::new(1, 3, "");
        let right = Proposal::new(2, 3, "");
        assert!(right.num() > left.num());
        assert!(left.num() < right.num());
    }

    #[test]
    fn equal_numbers_compare_equal() {
        assert_eq!(Proposal::new(2, 5, "x").num(), Proposal::new(2, 5, "y").num());
    }

    #[test]
    fn null_proposal() {
        assert!(Proposal::default().is_null());
        assert!(!Proposal::new(1, 0, "").is_null());
        assert!(Proposal::new(1, 1, "x").num() > ProposalNum::NULL);
    }
}

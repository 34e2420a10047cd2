//! The acceptor role: per-turn safety.
//!
//! Purely reactive. Each handler loads the stored proposal for the turn,
//! applies one of the [`decision`] rules, stores the winner, and answers
//! with the previous proposal so the proposer can observe any value that
//! was already accepted and adopt it.

use tracing::{debug, error};

use crate::messages::{Envelope, ReplyKind};
use crate::node::Node;
use crate::proposal::Proposal;

/// Both handlers answer with this type tag; peers dispatch on the body's
/// `message` field, not on it.
const RESPONSE_KIND: &str = "accept_response";

/// Pure decision rules, separate from storage and transport.
pub mod decision {
    use crate::proposal::ProposalNum;

    /// A prepare is promised only for a strictly higher number.
    #[must_use]
    pub fn should_promise(incoming: ProposalNum, current: Option<ProposalNum>) -> bool {
        current.is_none_or(|current| incoming > current)
    }

    /// An accept carrying the number the acceptor promised to must not be
    /// declined, hence greater-or-equal.
    #[must_use]
    pub fn should_accept(incoming: ProposalNum, current: Option<ProposalNum>) -> bool {
        current.is_none_or(|current| incoming >= current)
    }
}

/// Handle a prepare request: promise on a strictly higher number, retry
/// otherwise. A turn that is already decided short-circuits immediately.
pub fn receive_prepare(node: &Node, request: &Envelope) -> Envelope {
    let turn_id = request.turn_id;
    let incoming = &request.body.proposal;
    debug!(
        turn_id,
        pid = incoming.pid,
        seq = incoming.seq,
        v = %incoming.v,
        "prepare request received"
    );

    if let Some(learnt) = known_value(node, turn_id) {
        debug!(turn_id, %learnt, "turn already decided, telling the proposer");
        return already_learnt(turn_id, &learnt);
    }

    let stored = stored_proposal(node, turn_id);
    let reply = if decision::should_promise(incoming.num(), stored.as_ref().map(Proposal::num)) {
        // Prepare path: update the number, keep any accepted value.
        match node.store.set_proposal(turn_id, incoming, false) {
            Ok(()) => {
                debug!(turn_id, seq = incoming.seq, pid = incoming.pid, "promised");
                ReplyKind::Promise
            }
            Err(report) => {
                error!(turn_id, ?report, "could not store the proposal, refusing the prepare");
                ReplyKind::Retry
            }
        }
    } else {
        debug!(
            turn_id,
            seq = incoming.seq,
            pid = incoming.pid,
            "not strictly higher than the stored proposal, sending a retry"
        );
        ReplyKind::Retry
    };

    Envelope::response(
        turn_id,
        RESPONSE_KIND,
        reply.as_wire(),
        stored.unwrap_or_default(),
        "",
    )
}

/// Handle an accept request: accept on a greater-or-equal number and
/// overwrite the stored row, decline otherwise.
pub fn receive_accept(node: &Node, request: &Envelope) -> Envelope {
    let turn_id = request.turn_id;
    let incoming = &request.body.proposal;
    debug!(
        turn_id,
        pid = incoming.pid,
        seq = incoming.seq,
        v = %incoming.v,
        "accept request received"
    );

    if let Some(learnt) = known_value(node, turn_id) {
        debug!(turn_id, %learnt, "turn already decided, telling the proposer");
        return already_learnt(turn_id, &learnt);
    }

    let stored = stored_proposal(node, turn_id);
    let reply = if decision::should_accept(incoming.num(), stored.as_ref().map(Proposal::num)) {
        match node.store.set_proposal(turn_id, incoming, true) {
            Ok(()) => {
                debug!(turn_id, seq = incoming.seq, pid = incoming.pid, "accepted");
                ReplyKind::Accept
            }
            Err(report) => {
                error!(turn_id, ?report, "could not store the proposal, declining the accept");
                ReplyKind::Decline
            }
        }
    } else {
        debug!(
            turn_id,
            seq = incoming.seq,
            pid = incoming.pid,
            "below the stored proposal, declining"
        );
        ReplyKind::Decline
    };

    Envelope::response(
        turn_id,
        RESPONSE_KIND,
        reply.as_wire(),
        stored.unwrap_or_default(),
        "",
    )
}

fn already_learnt(turn_id: u64, learnt: &str) -> Envelope {
    Envelope::response(
        turn_id,
        RESPONSE_KIND,
        ReplyKind::AlreadyLearnt.as_wire(),
        Proposal::default(),
        learnt,
    )
}

fn known_value(node: &Node, turn_id: u64) -> Option<String> {
    match node.store.learnt_value(turn_id) {
        Ok(value) => value,
        Err(report) => {
            tracing::warn!(turn_id, ?report, "learnt lookup failed, continuing without it");
            None
        }
    }
}

fn stored_proposal(node: &Node, turn_id: u64) -> Option<Proposal> {
    match node.store.proposal(turn_id) {
        // A null-numbered row carries no information; treat it as absent.
        Ok(found) => found.filter(|proposal| !proposal.is_null()),
        Err(report) => {
            tracing::warn!(turn_id, ?report, "proposal lookup failed, continuing without it");
            None
        }
    }
}

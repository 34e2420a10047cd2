//! The learner role: recording decided values.
//!
//! The learnt table is write-once per turn. A fresh value is stored and
//! gossiped to every peer; an equal value is a no-op; a conflicting value
//! is refused and logged, never written.

use tracing::{debug, error, info, warn};

use crate::messages::Envelope;
use crate::node::Node;
use crate::proposal::Proposal;

/// Handle a learn request.
pub fn receive_learn(node: &Node, request: &Envelope) -> Envelope {
    let turn_id = request.turn_id;
    let proposed = &request.body.proposal.v;
    debug!(turn_id, v = %proposed, "learn request received");

    let current = match node.store.learnt_value(turn_id) {
        Ok(current) => current,
        Err(report) => {
            warn!(turn_id, ?report, "learnt lookup failed, treating the turn as undecided");
            None
        }
    };

    let mut response = Envelope::response(turn_id, "learn_response", "", Proposal::default(), "");
    match current {
        Some(current) if current != *proposed => {
            warn!(
                turn_id,
                have = %current,
                offered = %proposed,
                "refusing to overwrite a learnt value"
            );
            response.body.message =
                "Trying to learn a different value, please respect the algorithm.".to_owned();
        }
        Some(_) => {
            debug!(turn_id, "value already learnt, nothing to do");
        }
        None if proposed.is_empty() => {
            debug!(turn_id, "empty learn request, nothing to store");
        }
        None => match node.store.set_learnt_value(turn_id, proposed) {
            Ok(()) => {
                info!(turn_id, v = %proposed, "learning and propagating");
                response.body.message = "value stored".to_owned();
                response.body.learnt = proposed.clone();
                gossip(node, turn_id, proposed);
            }
            Err(report) => {
                error!(turn_id, ?report, "could not store the learnt value");
                response.body.message = format!("Fail: {report}");
            }
        },
    }
    response
}

/// Look up the learnt value for a turn, packaged for the read routes.
#[must_use]
pub fn learnt_value_message(node: &Node, turn_id: u64) -> Envelope {
    let value = match node.store.learnt_value(turn_id) {
        Ok(value) => value.unwrap_or_default(),
        Err(report) => {
            warn!(turn_id, ?report, "learnt lookup failed");
            String::new()
        }
    };
    Envelope::response(
        turn_id,
        "get_learnt_response",
        "Value is in 'learnt' field; if empty consider it as NULL.",
        Proposal::default(),
        &value,
    )
}

/// Spread a freshly learnt value to every peer.
///
/// Goes through the shared broadcast primitive rather than the proposer's
/// learn phase, so the learner stays ignorant of the proposer role.
fn gossip(node: &Node, turn_id: u64, value: &str) {
    let message = Envelope::request(
        turn_id,
        "learn_flood",
        "",
        Proposal::new(0, 0, value.to_owned()),
    );
    node.peers
        .flood(&node.settings.nodes, "/learner/receive_learn", message);
}

//! Anti-entropy: the seeker.
//!
//! The proposer alone cannot guarantee convergence: learn floods get lost,
//! proposers crash mid-phase, nodes restart behind the ensemble. The seeker
//! periodically revives negotiations that never finished ("dangling"
//! proposals) and pulls decisions this node has not seen. Both
//! sub-procedures sample probabilistically so N nodes seeking each other
//! do not produce quadratic traffic; the periodic repetition still drives
//! every value home eventually.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::messages::{SeekRequest, SeekResponse};
use crate::node::Node;
use crate::proposer::spawn_prepare;
use crate::transport::PeerReply;

/// Gap between the two sub-procedures of one pass.
const PASS_GAP: Duration = Duration::from_secs(2);

/// Periodic seek loop. Runs until the process exits.
pub async fn run(node: Node) {
    let interval = node.settings.seek_interval();
    info!(interval_secs = interval.as_secs(), "seek loop running");
    loop {
        tokio::time::sleep(interval).await;
        send_seek(&node).await;
    }
}

/// One full seek pass.
pub async fn send_seek(node: &Node) {
    debug!("seek pass starting");
    revive_dangling(node);
    tokio::time::sleep(PASS_GAP).await;
    pull_new_values(node).await;
    debug!("seek pass finished");
}

/// Restart the negotiation of proposals that never got decided.
///
/// Each dangling proposal is kept with probability `pr_proposals`; every
/// node runs this, so the thinning keeps the total load bounded.
fn revive_dangling(node: &Node) {
    let dangling = match node.store.dangling_proposals() {
        Ok(dangling) => dangling,
        Err(report) => {
            warn!(?report, "could not enumerate dangling proposals");
            return;
        }
    };

    let kept = keep_with_probability(dangling, node.settings.pr_proposals, &mut rand::rng());
    if kept.is_empty() {
        debug!("no dangling proposals extracted this round");
        return;
    }

    for (turn_id, proposal) in kept {
        info!(turn_id, seq = proposal.seq, "reviving dangling proposal");
        spawn_prepare(node.clone(), turn_id, proposal.seq, proposal.v);
    }
}

/// Ask a random subset of peers for decisions beyond our horizon.
async fn pull_new_values(node: &Node) {
    let targets = keep_with_probability(
        node.settings.nodes.clone(),
        node.settings.pr_nodes,
        &mut rand::rng(),
    );
    debug!(targets = targets.len(), "peers selected for this seek round");
    if targets.is_empty() {
        return;
    }

    let request = build_seek_request(node);
    let replies: Vec<PeerReply<SeekResponse>> = node
        .peers
        .broadcast(&targets, "/seeker/receive_seek", &request)
        .await;

    let mut merged = BTreeMap::new();
    for reply in replies {
        match reply {
            // Later replies overwrite earlier ones; decided values for the
            // same turn are equal across honest peers anyway.
            PeerReply::Reply(response) => merged.extend(response.to_learn),
            PeerReply::Invalid => warn!("undecodable seek response, skipping it"),
            PeerReply::Silent => {}
        }
    }

    if merged.is_empty() {
        debug!("no new values learned from the other nodes");
        return;
    }
    info!(count = merged.len(), "adopting values from merged seek responses");
    adopt_merged(node, &merged);
}

/// Build the request for one seek round.
///
/// Turns tracked by neither table got lost before this node ever saw a
/// prepare for them; those are revived on the spot. The wire `missing`
/// list stays empty: current peers rely on `last` alone, while
/// [`compute_seek_response`] still honors the list from older senders.
pub(crate) fn build_seek_request(node: &Node) -> SeekRequest {
    let last = node.store.last_turn_id().unwrap_or_else(|report| {
        warn!(?report, "could not read the last turn id, assuming 0");
        0
    });
    let learnt_ids = node.store.learnt_turn_ids().unwrap_or_default();
    let proposal_ids = node.store.proposal_turn_ids().unwrap_or_default();

    for turn_id in 1..=last {
        if !learnt_ids.contains(&turn_id) && !proposal_ids.contains(&turn_id) {
            info!(turn_id, "turn absent from both tables, reviving it");
            spawn_prepare(node.clone(), turn_id, 1, String::new());
        }
    }

    SeekRequest {
        missing: Vec::new(),
        last,
    }
}

/// Answer a peer's seek request with every decided value it is missing.
#[must_use]
pub fn compute_seek_response(node: &Node, request: &SeekRequest) -> SeekResponse {
    let mut to_learn = BTreeMap::new();
    let my_last = node.store.last_turn_id().unwrap_or_else(|report| {
        warn!(?report, "could not read the last turn id, assuming 0");
        0
    });

    if my_last > request.last {
        debug!(my_last, requester_last = request.last, "ahead of the requester");
        for entry in node.store.all_learnt_values().unwrap_or_default() {
            if entry.turn_id > request.last {
                to_learn.insert(entry.turn_id, entry.learnt);
            }
        }
    }

    // Legacy path: a requester starting from zero already got everything
    // above, so the missing list only matters for a non-zero watermark.
    if request.last != 0 {
        for &turn_id in &request.missing {
            if turn_id <= my_last
                && let Ok(Some(value)) = node.store.learnt_value(turn_id)
            {
                to_learn.insert(turn_id, value);
            }
        }
    }

    debug!(count = to_learn.len(), "seek response computed");
    SeekResponse { to_learn }
}

/// Write the merged values, keeping the learnt table write-once.
fn adopt_merged(node: &Node, merged: &BTreeMap<u64, String>) {
    for (&turn_id, value) in merged {
        let current = match node.store.learnt_value(turn_id) {
            Ok(current) => current,
            Err(report) => {
                warn!(turn_id, ?report, "learnt lookup failed, skipping this turn");
                continue;
            }
        };
        match current {
            Some(current) if current != *value && !value.is_empty() => {
                warn!(
                    turn_id,
                    have = %current,
                    offered = %value,
                    "seek response conflicts with a decided value, keeping ours"
                );
            }
            None if !value.is_empty() => {
                if let Err(report) = node.store.set_learnt_value(turn_id, value) {
                    warn!(turn_id, ?report, "could not store the pulled value");
                }
            }
            _ => {}
        }
    }
}

/// Keep each element independently with probability `pr`.
fn keep_with_probability<C>(items: C, pr: f64, rng: &mut impl Rng) -> C
where
    C: IntoIterator + FromIterator<<C as IntoIterator>::Item>,
{
    items
        .into_iter()
        .filter(|_| rng.random::<f64>() < pr)
        .collect()
}

//! The proposer role: driving the prepare/accept/learn phases.
//!
//! Each phase broadcasts to every node, waits for one reply per peer, and
//! tallies. The tallies are pure functions over the gathered replies; the
//! async drivers around them only do I/O, delays, and (in automatic mode)
//! spawn the follow-up phase. A reply carrying an already-decided value
//! short-circuits whatever phase observed it.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, trace, warn};

use crate::messages::{Envelope, ReplyKind};
use crate::node::Node;
use crate::proposal::Proposal;
use crate::transport::PeerReply;

/// Outcome of tallying the prepare-phase replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PrepareTally {
    /// Some peer already knows the decision; adopt it and stop.
    AlreadyLearnt { value: String },
    /// A peer answered with garbage; nothing can be trusted this round.
    Malformed,
    /// A majority promised. `value` is what the accept phase must carry:
    /// the highest promised value if any was reported, the caller's value,
    /// or the configured default.
    Quorum { agreements: usize, value: String },
    /// No quorum, but a majority is alive and someone is ahead of us.
    Retry { agreements: usize, next_seq: u64 },
    /// Not enough live peers to make progress.
    Stalled { agreements: usize, responders: usize },
}

pub(crate) fn tally_prepare(
    replies: &[PeerReply<Envelope>],
    quorum: usize,
    proposed: &str,
    v_default: &str,
) -> PrepareTally {
    let mut agreements = 0;
    let mut responders = 0;
    // Null proposals never beat these starting points, so `pid == 0` still
    // means "never updated" afterwards.
    let mut highest_promise = Proposal::default();
    let mut highest_retry = Proposal::default();

    for reply in replies {
        let envelope = match reply {
            PeerReply::Silent => continue,
            PeerReply::Invalid => return PrepareTally::Malformed,
            PeerReply::Reply(envelope) => envelope,
        };
        responders += 1;

        if envelope.has_learnt_value() {
            return PrepareTally::AlreadyLearnt {
                value: envelope.body.learnt.clone(),
            };
        }

        match envelope.reply_kind() {
            ReplyKind::Promise => {
                agreements += 1;
                // Only promises that actually carry a value can bind ours.
                let proposal = &envelope.body.proposal;
                if proposal.has_value() && proposal.num() > highest_promise.num() {
                    highest_promise = proposal.clone();
                }
            }
            ReplyKind::Retry => {
                let proposal = &envelope.body.proposal;
                if proposal.num() > highest_retry.num() {
                    highest_retry = proposal.clone();
                }
            }
            _ => trace!(message = %envelope.body.message, "uncounted reply"),
        }
    }

    if agreements >= quorum {
        let value = if highest_promise.has_value() {
            highest_promise.v
        } else if proposed.is_empty() {
            v_default.to_owned()
        } else {
            proposed.to_owned()
        };
        PrepareTally::Quorum { agreements, value }
    } else if highest_retry.pid != 0 && responders >= quorum {
        PrepareTally::Retry {
            agreements,
            next_seq: highest_retry.seq + 1,
        }
    } else {
        PrepareTally::Stalled {
            agreements,
            responders,
        }
    }
}

/// Outcome of tallying the accept-phase replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AcceptTally {
    AlreadyLearnt { value: String },
    Malformed,
    Quorum { approvals: usize },
    /// Declined by someone ahead of us; restart the prepare phase there.
    Retry { approvals: usize, next_seq: u64 },
    Stalled { approvals: usize, responders: usize },
}

pub(crate) fn tally_accept(replies: &[PeerReply<Envelope>], quorum: usize) -> AcceptTally {
    let mut approvals = 0;
    let mut responders = 0;
    let mut highest_decline = Proposal::default();

    for reply in replies {
        let envelope = match reply {
            PeerReply::Silent => continue,
            PeerReply::Invalid => return AcceptTally::Malformed,
            PeerReply::Reply(envelope) => envelope,
        };
        responders += 1;

        if envelope.has_learnt_value() {
            return AcceptTally::AlreadyLearnt {
                value: envelope.body.learnt.clone(),
            };
        }

        match envelope.reply_kind() {
            ReplyKind::Accept => approvals += 1,
            ReplyKind::Decline => {
                let proposal = &envelope.body.proposal;
                if proposal.num() > highest_decline.num() {
                    highest_decline = proposal.clone();
                }
            }
            _ => trace!(message = %envelope.body.message, "uncounted reply"),
        }
    }

    if approvals >= quorum {
        AcceptTally::Quorum { approvals }
    } else if highest_decline.pid != 0 && responders >= quorum {
        AcceptTally::Retry {
            approvals,
            next_seq: highest_decline.seq + 1,
        }
    } else {
        AcceptTally::Stalled {
            approvals,
            responders,
        }
    }
}

/// Broadcast a prepare request for `turn_id` and act on the tally.
pub async fn send_prepare(node: Node, turn_id: u64, seq: u64, v: String) -> String {
    info!(turn_id, seq, v = %v, "starting prepare request");

    if let Some(current) = known_value(&node, turn_id) {
        info!(turn_id, %current, "value already learnt, dropping the prepare request");
        return format!(
            "Value for turn_id {turn_id} is already known: {current}. Dropping prepare request."
        );
    }

    let request = Envelope::request(
        turn_id,
        "prepare_request",
        "sending prepare request",
        Proposal::new(node.settings.pid, seq, v.clone()),
    );
    let replies: Vec<PeerReply<Envelope>> = node
        .peers
        .broadcast(&node.settings.nodes, "/acceptor/receive_prepare", &request)
        .await;

    let total = node.settings.nodes.len();
    match tally_prepare(&replies, node.settings.quorum, &v, &node.settings.v_default) {
        PrepareTally::AlreadyLearnt { value } => {
            info!(turn_id, %value, "a reply already knows the decision, adopting it");
            learn_and_flood(&node, turn_id, &value);
            "One of the responses has a learnt value. Learning and flooding.".to_owned()
        }
        PrepareTally::Malformed => {
            warn!(turn_id, "malformed reply during the prepare tally");
            "A response could not be decoded; someone is not respecting the protocol.".to_owned()
        }
        PrepareTally::Quorum { agreements, value } => {
            info!(turn_id, agreements, total, "prepare quorum reached");
            let mut message = format!(
                "Quorum has been reached ({agreements}/{total}) for prepare request with \
                 proposal {{turn_id: {turn_id}, seq: {seq}, v: {value}}}."
            );
            if node.settings.manual_mode {
                message.push_str(&format!(
                    " Please send an accept request as follows: \
                     /proposer/send_accept?turn_id={turn_id}&seq={seq}&v={value}"
                ));
            } else {
                tokio::time::sleep(node.settings.phase_delay()).await;
                debug!(turn_id, "sending accept request");
                message.push_str(" Sending accept request.");
                spawn_accept(node.clone(), turn_id, seq, value);
            }
            message
        }
        PrepareTally::Retry { agreements, next_seq } => {
            info!(
                turn_id,
                agreements, total, next_seq, "no prepare quorum, but a majority is alive; retrying"
            );
            let mut message = format!(
                "Quorum has NOT been reached ({agreements}/{total}) for prepare request with \
                 proposal {{turn_id: {turn_id}, seq: {seq}, v: {v}}}."
            );
            if node.settings.manual_mode {
                message.push_str(&format!(
                    " Please retry with a higher prepare request as follows: \
                     /proposer/send_prepare?turn_id={turn_id}&seq={next_seq}&v={v}"
                ));
            } else {
                tokio::time::sleep(retry_backoff()).await;
                debug!(turn_id, next_seq, "retrying with an incremented prepare request");
                message.push_str(" Retrying with an incremented prepare request.");
                spawn_prepare(node.clone(), turn_id, next_seq, v);
            }
            message
        }
        PrepareTally::Stalled { agreements, responders } => {
            warn!(turn_id, agreements, responders, total, "no progress possible");
            format!(
                "Quorum has NOT been reached ({agreements}/{total}) for prepare request with \
                 proposal {{turn_id: {turn_id}, seq: {seq}, v: {v}}}. Only {responders} responded \
                 but {} are needed for progress.",
                node.settings.quorum
            )
        }
    }
}

/// Broadcast an accept request for `turn_id` and act on the tally.
///
/// Only meaningful after a prepare quorum for the same `(turn_id, seq)`;
/// calling it out of order does not keep the ensemble safe.
pub async fn send_accept(node: Node, turn_id: u64, seq: u64, v: String) -> String {
    info!(turn_id, seq, v = %v, "starting accept request");

    if let Some(current) = known_value(&node, turn_id) {
        info!(turn_id, %current, "value already learnt, dropping the accept request");
        return format!(
            "Value for turn_id {turn_id} is already known: {current}. Dropping accept request."
        );
    }

    let request = Envelope::request(
        turn_id,
        "accept_request",
        "sending accept request",
        Proposal::new(node.settings.pid, seq, v.clone()),
    );
    let replies: Vec<PeerReply<Envelope>> = node
        .peers
        .broadcast(&node.settings.nodes, "/acceptor/receive_accept", &request)
        .await;

    let total = node.settings.nodes.len();
    match tally_accept(&replies, node.settings.quorum) {
        AcceptTally::AlreadyLearnt { value } => {
            info!(turn_id, %value, "a reply already knows the decision, adopting it");
            learn_and_flood(&node, turn_id, &value);
            "One of the responses has a learnt value. Learning and flooding.".to_owned()
        }
        AcceptTally::Malformed => {
            warn!(turn_id, "malformed reply during the accept tally");
            "A response could not be decoded; someone is not respecting the protocol.".to_owned()
        }
        AcceptTally::Quorum { approvals } => {
            info!(turn_id, approvals, total, "accept quorum reached");
            let mut message =
                format!("Quorum has been reached for accept request ({approvals}/{total}).");
            if node.settings.manual_mode {
                message.push_str(&format!(
                    " Please send a learn request as follows: \
                     /proposer/send_learn?turn_id={turn_id}&v={v}"
                ));
            } else {
                tokio::time::sleep(node.settings.phase_delay()).await;
                debug!(turn_id, "sending learn request");
                message.push_str(" Sending learn request.");
                let _ = send_learn(&node, turn_id, &v);
            }
            message
        }
        AcceptTally::Retry { approvals, next_seq } => {
            // A majority saw our promises, so any higher proposal carries
            // this value; restarting the prepare with the same v is safe.
            info!(
                turn_id,
                approvals, total, next_seq, "accept declined by someone ahead; restarting prepare"
            );
            let mut message =
                format!("Quorum has NOT been reached for accept request ({approvals}/{total}).");
            if node.settings.manual_mode {
                message.push_str(&format!(
                    " Please retry with a higher prepare request as follows: \
                     /proposer/send_prepare?turn_id={turn_id}&seq={next_seq}&v={v}"
                ));
            } else {
                tokio::time::sleep(retry_backoff()).await;
                debug!(turn_id, next_seq, "retrying with an incremented prepare request");
                message.push_str(" Retrying with an incremented prepare request.");
                spawn_prepare(node.clone(), turn_id, next_seq, v);
            }
            message
        }
        AcceptTally::Stalled { approvals, responders } => {
            warn!(turn_id, approvals, responders, total, "no progress possible");
            format!(
                "Quorum has NOT been reached for accept request ({approvals}/{total}). Only \
                 {responders} responded but {} are needed for progress.",
                node.settings.quorum
            )
        }
    }
}

/// Flood a learn request to every node, ignoring the responses.
pub fn send_learn(node: &Node, turn_id: u64, v: &str) -> String {
    info!(turn_id, v = %v, "starting learn request");

    if let Some(current) = known_value(node, turn_id)
        && current != v
    {
        info!(turn_id, %current, "value already learnt, dropping the learn request");
        return format!(
            "Value for turn_id {turn_id} is already known: {current}. Dropping learn request."
        );
    }

    let request = Envelope::request(
        turn_id,
        "learn_request",
        "sending learn request",
        Proposal::new(0, 0, v.to_owned()),
    );
    node.peers
        .flood(&node.settings.nodes, "/learner/receive_learn", request);
    "Sending learn requests; ignoring responses.".to_owned()
}

/// Adopt a decided value observed in a reply and flood it.
///
/// Never overwrites a conflicting local value; that would break the
/// write-once rule, so it is only logged as a protocol violation.
fn learn_and_flood(node: &Node, turn_id: u64, value: &str) {
    let current = known_value(node, turn_id);
    match current {
        None => match node.store.set_learnt_value(turn_id, value) {
            Ok(()) => {
                info!(turn_id, %value, "flooding the freshly adopted value");
                let _ = send_learn(node, turn_id, value);
            }
            Err(report) => warn!(turn_id, ?report, "could not store the adopted value"),
        },
        Some(current) if current == value => {}
        Some(current) => {
            error!(
                turn_id,
                have = %current,
                offered = %value,
                "asked to learn a value different from the one already decided"
            );
        }
    }
}

fn known_value(node: &Node, turn_id: u64) -> Option<String> {
    match node.store.learnt_value(turn_id) {
        Ok(value) => value,
        Err(report) => {
            warn!(turn_id, ?report, "learnt lookup failed, continuing without it");
            None
        }
    }
}

/// Uniform random delay before a retry, so competing proposers interleave
/// instead of livelocking.
fn retry_backoff() -> Duration {
    Duration::from_secs_f64(rand::rng().random_range(0.0..5.0))
}

/// Run a prepare phase in the background.
pub(crate) fn spawn_prepare(node: Node, turn_id: u64, seq: u64, v: String) {
    tokio::spawn(async move {
        let outcome = send_prepare(node, turn_id, seq, v).await;
        trace!(turn_id, %outcome, "background prepare finished");
    });
}

fn spawn_accept(node: Node, turn_id: u64, seq: u64, v: String) {
    tokio::spawn(async move {
        let outcome = send_accept(node, turn_id, seq, v).await;
        trace!(turn_id, %outcome, "background accept finished");
    });
}

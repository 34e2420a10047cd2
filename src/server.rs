//! HTTP surface of the node.
//!
//! Thin adapter: decode the request, call the owning role, encode the
//! response. Peer-to-peer traffic uses POSTed JSON envelopes; client
//! triggers and the operational routes are GETs with query parameters.
//! Paths are fixed by the wire protocol, so peers written in other
//! languages keep working.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use error_stack::Report;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::messages::{Envelope, SeekRequest};
use crate::node::Node;
use crate::proposal::Proposal;
use crate::store::StoreError;
use crate::{acceptor, learner, proposer, seeker};

#[must_use]
pub fn router(node: Node) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/info", get(info_route))
        // Proposal rows.
        .route("/node/get_proposal", get(get_proposal))
        .route("/node/get_all_proposals", get(get_all_proposals))
        .route("/node/set_proposal", get(set_proposal))
        .route("/node/reset_proposal", get(reset_proposal))
        .route("/node/reset_all_proposals", get(reset_all_proposals))
        // Learnt rows.
        .route("/node/get_learnt_value", get(get_learnt_value))
        .route("/node/get_all_learnt_values", get(get_all_learnt_values))
        .route("/node/set_learnt_value", get(set_learnt_value))
        .route("/node/reset_learnt_value", get(reset_learnt_value))
        .route("/node/reset_all_learnt_values", get(reset_all_learnt_values))
        // Proposer triggers.
        .route("/proposer/send_prepare", get(send_prepare))
        .route("/proposer/send_accept", get(send_accept))
        .route("/proposer/send_learn", get(send_learn))
        // Seeker.
        .route("/seeker/send_seek", get(send_seek))
        .route("/seeker/start_seeking_forever", get(start_seeking_forever))
        .route("/seeker/receive_seek", post(receive_seek))
        // Acceptor.
        .route("/acceptor/receive_prepare", post(receive_prepare))
        .route("/acceptor/receive_accept", post(receive_accept))
        // Learner.
        .route("/learner/receive_learn", post(receive_learn))
        .route("/learner/get_learnt_value", get(get_learnt_value))
        .route("/learner/get_all_learnt_values", get(get_all_learnt_values))
        .fallback(welcome)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(node)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TurnQuery {
    turn_id: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PhaseQuery {
    turn_id: u64,
    seq: u64,
    v: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LearnQuery {
    turn_id: u64,
    v: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProposalQuery {
    turn_id: u64,
    pid: u64,
    seq: u64,
    v: String,
}

fn message(text: impl Into<String>) -> Json<Value> {
    Json(json!({ "message": text.into() }))
}

fn store_failure(report: &Report<StoreError>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": format!("{report:?}") })),
    )
        .into_response()
}

fn outcome(result: Result<(), Report<StoreError>>, done: &str) -> Response {
    match result {
        Ok(()) => message(done).into_response(),
        Err(report) => store_failure(&report),
    }
}

async fn welcome() -> Json<Value> {
    message("Rust implementation of the Paxos algorithm.")
}

async fn info_route(State(node): State<Node>) -> Json<Value> {
    message(format!(
        "rust@{}@{}",
        node.settings.mode(),
        node.settings.pid
    ))
}

async fn get_proposal(State(node): State<Node>, Query(query): Query<TurnQuery>) -> Response {
    match node.store.proposal(query.turn_id) {
        Ok(found) => Json(found.unwrap_or_default()).into_response(),
        Err(report) => store_failure(&report),
    }
}

async fn get_all_proposals(State(node): State<Node>) -> Response {
    match node.store.all_proposals() {
        Ok(rows) => Json(rows).into_response(),
        Err(report) => store_failure(&report),
    }
}

async fn set_proposal(State(node): State<Node>, Query(query): Query<ProposalQuery>) -> Response {
    let proposal = Proposal::new(query.pid, query.seq, query.v);
    // Accept-path semantics so the value is forced in.
    outcome(
        node.store.set_proposal(query.turn_id, &proposal, true),
        "set",
    )
}

async fn reset_proposal(State(node): State<Node>, Query(query): Query<TurnQuery>) -> Response {
    outcome(node.store.reset_proposal(query.turn_id), "reset")
}

async fn reset_all_proposals(State(node): State<Node>) -> Response {
    outcome(node.store.reset_all_proposals(), "reset")
}

async fn get_learnt_value(State(node): State<Node>, Query(query): Query<TurnQuery>) -> Json<Envelope> {
    Json(learner::learnt_value_message(&node, query.turn_id))
}

async fn get_all_learnt_values(State(node): State<Node>) -> Response {
    match node.store.all_learnt_values() {
        Ok(rows) => Json(rows).into_response(),
        Err(report) => store_failure(&report),
    }
}

async fn set_learnt_value(State(node): State<Node>, Query(query): Query<LearnQuery>) -> Response {
    outcome(node.store.set_learnt_value(query.turn_id, &query.v), "set")
}

async fn reset_learnt_value(State(node): State<Node>, Query(query): Query<TurnQuery>) -> Response {
    outcome(node.store.reset_learnt_value(query.turn_id), "reset")
}

async fn reset_all_learnt_values(State(node): State<Node>) -> Response {
    outcome(node.store.reset_all_learnt_values(), "reset")
}

async fn send_prepare(State(node): State<Node>, Query(query): Query<PhaseQuery>) -> Json<Value> {
    let reply = proposer::send_prepare(node, query.turn_id, query.seq, query.v).await;
    message(reply)
}

async fn send_accept(State(node): State<Node>, Query(query): Query<PhaseQuery>) -> Json<Value> {
    let reply = proposer::send_accept(node, query.turn_id, query.seq, query.v).await;
    message(reply)
}

async fn send_learn(State(node): State<Node>, Query(query): Query<LearnQuery>) -> Json<Value> {
    message(proposer::send_learn(&node, query.turn_id, &query.v))
}

async fn send_seek(State(node): State<Node>) -> Json<Value> {
    seeker::send_seek(&node).await;
    message("ok")
}

async fn start_seeking_forever(State(node): State<Node>) -> Json<Value> {
    if node.begin_seeking() {
        info!("seek loop started by request");
        tokio::spawn(seeker::run(node.clone()));
        message("seeking started")
    } else {
        message("already seeking")
    }
}

async fn receive_prepare(State(node): State<Node>, Json(request): Json<Envelope>) -> Json<Envelope> {
    Json(acceptor::receive_prepare(&node, &request))
}

async fn receive_accept(State(node): State<Node>, Json(request): Json<Envelope>) -> Json<Envelope> {
    Json(acceptor::receive_accept(&node, &request))
}

async fn receive_learn(State(node): State<Node>, Json(request): Json<Envelope>) -> Json<Envelope> {
    Json(learner::receive_learn(&node, &request))
}

async fn receive_seek(
    State(node): State<Node>,
    Json(request): Json<SeekRequest>,
) -> Json<crate::messages::SeekResponse> {
    Json(seeker::compute_seek_response(&node, &request))
}

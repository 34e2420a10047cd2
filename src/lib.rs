//! Replicated log over per-turn Paxos.
//!
//! A fixed set of peer nodes agrees, per integer turn id, on a single
//! immutable string value by running one single-decree Paxos instance per
//! turn. Turns are independent of each other; once a value is decided for
//! a turn, every node eventually learns it and never observes another.
//!
//! # Architecture
//!
//! - [`acceptor`]: per-turn safety — promises and accepted proposals
//! - [`proposer`]: drives the prepare/accept/learn phases and tallies quorums
//! - [`learner`]: records decided values and gossips fresh ones
//! - [`seeker`]: background anti-entropy toward eventual convergence
//! - [`store`]: durable per-turn state behind a pluggable backend
//! - [`server`] / [`transport`]: the JSON-over-HTTP wire on both sides
//!
//! Every role shares one [`node::Node`] context built at startup; nothing
//! else is shared mutable state between requests.

#![warn(clippy::pedantic)]

pub mod acceptor;
pub mod config;
pub mod learner;
pub mod messages;
pub mod node;
pub mod proposal;
pub mod proposer;
pub mod seeker;
pub mod server;
pub mod store;
pub mod transport;

pub use config::Settings;
pub use node::Node;
pub use proposal::Proposal;

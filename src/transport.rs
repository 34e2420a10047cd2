//! Outbound peer communication.
//!
//! Every phase of the protocol fans one JSON POST out to the whole node
//! list and tallies the replies afterwards. [`PeerClient::broadcast`]
//! gathers exactly one [`PeerReply`] per peer; unreachable peers become
//! [`PeerReply::Silent`] rather than failing the phase.

use core::fmt;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct TransportError;

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("peer transport failed")
    }
}

impl core::error::Error for TransportError {}

/// What came back from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerReply<T> {
    /// Timed out or unreachable.
    Silent,
    /// Answered, but the body did not decode.
    Invalid,
    Reply(T),
}

/// Shared HTTP client used by the proposer, the learner's gossip, and the
/// seeker. Built once at startup with the configured per-request timeout.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    /// # Errors
    ///
    /// Returns [`TransportError`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, Report<TransportError>> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(TransportError)?;
        Ok(Self { http })
    }

    /// POST `body` to `path` on every peer concurrently and gather one
    /// reply per peer, in peer-list order.
    pub async fn broadcast<T>(
        &self,
        peers: &[String],
        path: &str,
        body: &impl Serialize,
    ) -> Vec<PeerReply<T>>
    where
        T: DeserializeOwned,
    {
        let requests = peers.iter().map(|peer| self.exchange(peer_url(peer, path), body));
        future::join_all(requests).await
    }

    async fn exchange<T>(&self, url: String, body: &impl Serialize) -> PeerReply<T>
    where
        T: DeserializeOwned,
    {
        let response = match self.http.post(&url).json(body).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!(%url, %error, "peer not reachable, recording a silent reply");
                return PeerReply::Silent;
            }
        };
        match response.json::<T>().await {
            Ok(decoded) => PeerReply::Reply(decoded),
            Err(error) => {
                warn!(%url, %error, "peer answered with an undecodable body");
                PeerReply::Invalid
            }
        }
    }

    /// Fire-and-forget broadcast: the requests run in the background and
    /// every reply is dropped.
    pub fn flood<B>(&self, peers: &[String], path: &str, body: B)
    where
        B: Serialize + Send + Sync + 'static,
    {
        let client = self.clone();
        let peers = peers.to_vec();
        let path = path.to_owned();
        tokio::spawn(async move {
            let replies: Vec<PeerReply<serde_json::Value>> =
                client.broadcast(&peers, &path, &body).await;
            debug!(sent = replies.len(), %path, "flood finished");
        });
    }
}

fn peer_url(peer: &str, path: &str) -> String {
    format!("{}{path}", peer.trim_end_matches('/'))
}

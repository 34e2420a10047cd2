//! Per-process node context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use error_stack::Report;

use crate::config::Settings;
use crate::store::Store;
use crate::transport::{PeerClient, TransportError};

/// Everything a request handler needs: configuration, the store, and the
/// peer client. Built once at startup and cloned into each task; there is
/// no other shared mutable state between requests.
#[derive(Clone)]
pub struct Node {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn Store>,
    pub peers: PeerClient,
    seeking: Arc<AtomicBool>,
}

impl Node {
    /// # Errors
    ///
    /// Returns [`TransportError`] if the peer client cannot be built.
    pub fn new(settings: Settings, store: Arc<dyn Store>) -> Result<Self, Report<TransportError>> {
        let peers = PeerClient::new(settings.rpc_timeout())?;
        Ok(Self {
            settings: Arc::new(settings),
            store,
            peers,
            seeking: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Claim the seek loop. Returns true only for the first caller; the
    /// loop must run at most once per process.
    pub fn begin_seeking(&self) -> bool {
        !self.seeking.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) fn test_node(settings: Settings) -> Node {
    Node::new(settings, Arc::new(crate::store::MemoryStore::new())).expect("peer client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_loop_claimed_once() {
        let node = test_node(Settings::default());
        assert!(node.begin_seeking());
        assert!(!node.begin_seeking());
        assert!(!node.clone().begin_seeking());
    }
}

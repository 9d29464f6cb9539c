//! Peer connection cache.
//!
//! The broker owns every live peer connection, keyed by content hash.
//! Locating and opening a connection is left to a [`PeerConnector`]; the
//! broker only caches the result and forgets it on request.

use crate::error::SyncError;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, info, warn};

/// A live connection to a peer session.
pub trait PeerLink: Send + Sync + 'static {
    /// Navigate the peer to an image-relative address.
    fn jumpto(&self, address: u64) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Discovery: turns a content hash into a live [`PeerLink`].
pub trait PeerConnector: Send + Sync + 'static {
    type Link: PeerLink;

    fn connect(
        &self,
        content_hash: &str,
    ) -> impl Future<Output = Result<Self::Link, SyncError>> + Send;
}

/// Cache of peer connections.
///
/// Not shared: the sync worker owns the broker and is its only user.
pub struct SessionBroker<C: PeerConnector> {
    connector: C,
    links: HashMap<String, C::Link>,
}

impl<C: PeerConnector> SessionBroker<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            links: HashMap::new(),
        }
    }

    /// Cached connection to `content_hash`, connecting first if needed.
    ///
    /// Returns `None` when the peer cannot be resolved.
    pub async fn connect(&mut self, content_hash: &str) -> Option<&C::Link> {
        let key = content_hash.to_ascii_lowercase();
        if !self.links.contains_key(&key) {
            match self.connector.connect(&key).await {
                Ok(link) => {
                    info!(peer = %key, "Connected to peer session");
                    self.links.insert(key.clone(), link);
                }
                Err(e) => {
                    warn!(peer = %key, error = %e, "Peer session unavailable");
                    return None;
                }
            }
        }
        self.links.get(&key)
    }

    /// Drop the cached connection so the next [`connect`](Self::connect)
    /// starts from discovery.
    pub fn evict(&mut self, content_hash: &str) {
        if self
            .links
            .remove(&content_hash.to_ascii_lowercase())
            .is_some()
        {
            debug!(peer = %content_hash, "Evicted peer connection");
        }
    }

    pub fn is_cached(&self, content_hash: &str) -> bool {
        self.links.contains_key(&content_hash.to_ascii_lowercase())
    }

    pub fn cached_count(&self) -> usize {
        self.links.len()
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockConnector;
    use super::SessionBroker;

    #[tokio::test]
    async fn connection_is_cached() {
        let connector = MockConnector::default();
        let mut broker = SessionBroker::new(connector.clone());

        assert!(broker.connect("aa").await.is_some());
        assert!(broker.connect("AA").await.is_some());
        assert_eq!(connector.connects("aa"), 1);
        assert_eq!(broker.cached_count(), 1);
    }

    #[tokio::test]
    async fn eviction_forces_fresh_discovery() {
        let connector = MockConnector::default();
        let mut broker = SessionBroker::new(connector.clone());

        broker.connect("aa").await;
        broker.evict("aa");
        assert!(!broker.is_cached("aa"));

        broker.connect("aa").await;
        assert_eq!(connector.connects("aa"), 2);
        assert!(broker.is_cached("aa"));
    }

    #[tokio::test]
    async fn unresolvable_peer_is_not_cached() {
        let connector = MockConnector::default();
        connector.state().unreachable.insert("bb".to_string());
        let mut broker = SessionBroker::new(connector.clone());

        assert!(broker.connect("bb").await.is_none());
        assert!(broker.connect("bb").await.is_none());
        assert_eq!(connector.connects("bb"), 2);
        assert_eq!(broker.cached_count(), 0);

        // Evicting an absent entry is a no-op.
        broker.evict("bb");
    }
}

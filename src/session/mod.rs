//! Peer sessions: identity, discovery and outbound synchronization.
//!
//! Each analysis session publishes a descriptor named after its content hash
//! and serves RPC on a local port. Commands for a peer are queued and
//! delivered by a single worker that owns the peer connection cache.
//!
//! # Architecture
//!
//! ```text
//!  diff view ── enqueue ──▶ SyncQueue (unbounded FIFO)
//!                               │
//!                               ▼
//!                           SyncWorker
//!                           └─ SessionBroker
//!                              ├─ links: HashMap<hash, PeerLink>
//!                              └─ PeerConnector ── descriptor dir
//!                                      │                <hash>.json
//!                                      ▼ HTTP JSON-RPC
//!                               peer session :18861+
//! ```

pub mod broker;
pub mod descriptor;
pub mod queue;
mod types;

pub use broker::{PeerConnector, PeerLink, SessionBroker};
pub use descriptor::{
    descriptor_path, find_descriptor, list_descriptors, read_descriptor, write_descriptor,
    DescriptorError,
};
pub use queue::{sync_queue, SyncQueue, SyncWorker};
pub use types::{ConnectionDescriptor, SessionIdentity, SyncCommand};

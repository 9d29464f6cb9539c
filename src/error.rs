//! Error types shared across the session, host and sync layers.
//!
//! Host and marshaling failures propagate to the in-process caller. Peer
//! failures (`SyncError`) are contained by the sync worker: logged, cached
//! connection evicted, command dropped.

use thiserror::Error;

/// Failures reported by an analysis host primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Not supported by this host: {0}")]
    NotSupported(String),

    #[error("Address {0:#x} is outside the loaded image")]
    InvalidAddress(u64),

    #[error("Function not found at address {0:#x}")]
    FunctionNotFound(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Host error: {0}")]
    Failed(String),
}

/// Failures of a call marshaled onto the host's main thread.
#[derive(Error, Debug)]
pub enum AffinityError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Main-thread job panicked: {0}")]
    Panicked(String),

    #[error("Main-thread loop is closed")]
    LoopClosed,

    #[error("No analysis host is installed on the main thread")]
    NoHost,
}

/// Failures talking to a peer session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Peer unreachable or its descriptor is stale.
    #[error("Connection to peer failed: {0}")]
    ConnectionFailure(String),

    /// Peer reachable but the remote operation failed.
    #[error("Remote call failed: {0}")]
    RemoteCallFailure(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            SyncError::ConnectionFailure(e.to_string())
        } else {
            SyncError::RemoteCallFailure(e.to_string())
        }
    }
}

impl<T> From<std::sync::mpsc::SendError<T>> for AffinityError {
    fn from(_: std::sync::mpsc::SendError<T>) -> Self {
        AffinityError::LoopClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for AffinityError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        AffinityError::LoopClosed
    }
}

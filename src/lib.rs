//! Cross-session sync for paired binary analysis sessions
//!
//! Two analysis sessions, one per binary, each expose a small JSON-RPC
//! service. Given an externally computed match document, a session colors the
//! matched and unmatched blocks of its binary, lists the function matches, and
//! on row activation navigates locally while asking its peer to navigate to
//! the corresponding function.
//!
//! # Architecture
//!
//! The analysis host is single-threaded and **must** be driven from the main
//! thread:
//!
//! - **Main thread**: runs the [`HostLoop`], which executes queued host jobs
//!   by priority (UI-fast, then write, then read).
//!
//! - **Background thread**: runs the tokio runtime with the RPC server
//!   ([`server`]), the sync worker ([`session::SyncWorker`]) and detached
//!   `export` / `show_diff` tasks.
//!
//! - **MainThread**: cloneable handle used by every other thread to run work
//!   on the host and wait for its result.
//!
//! ```text
//!  peer session ──HTTP──▶ RpcService ──MainThread──▶ HostLoop ─▶ AnalysisHost
//!                              │                         ▲
//!                   show_diff  ▼                         │
//!                         DiffViewer ──activate──────────┘
//!                              │ enqueue
//!                              ▼
//!                          SyncQueue ─▶ SyncWorker ─▶ SessionBroker ──HTTP──▶ peer
//! ```
//!
//! # RPC methods
//!
//! - `get_pid`, `get_md5`, `get_root_filename`: session identity
//! - `jumpto`: navigate to an image-relative address
//! - `set_item_color`: color one item
//! - `export`, `show_diff`: detached; outcome via `task_status`
//! - `run_commands`: batch of `jumpto` / `color_lines` / `color_node`
//! - `view_rows`, `activate_row`: read and drive an open diff view

use std::path::PathBuf;

pub mod client;
pub mod diff;
pub mod error;
pub mod host;
pub mod server;
pub mod session;

pub use client::{DescriptorConnector, RpcClient};
pub use diff::{DiffViewer, MatchDocument, ViewRegistry};
pub use error::{AffinityError, HostError, SyncError};
pub use host::{main_thread_channel, AnalysisHost, HostLoop, InMemoryHost, MainThread};
pub use server::bootstrap::{launch, RunningSession, ServeConfig, BASE_PORT};
pub use server::RpcService;
pub use session::{SessionBroker, SyncCommand, SyncQueue, SyncWorker};

/// Expand `~/` prefix to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    path.strip_prefix("~/")
        .and_then(|stripped| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(stripped)))
        .unwrap_or_else(|| PathBuf::from(path))
}

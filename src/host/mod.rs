//! Analysis host integration.
//!
//! The host (disassembler session) is single-threaded: every query and
//! mutation must happen on the thread that owns it. This module provides the
//! [`AnalysisHost`] surface the core consumes and a channel-based executor
//! that marshals calls onto the owning thread ([`MainThread`] on the caller
//! side, [`HostLoop`] on the owning side).

pub mod handlers;
mod loop_impl;
pub mod memory;
pub mod request;
pub mod types;
pub mod worker;

use crate::diff::MatchRow;
use crate::error::HostError;
use std::path::Path;

pub use loop_impl::{main_thread_channel, HostLoop};
pub use memory::InMemoryHost;
pub use request::Affinity;
pub use types::*;
pub use worker::MainThread;

/// Synchronous primitives of the analysis host.
///
/// Implementations are only ever called on the host's main thread, so they
/// need not be `Send` or `Sync`. Other threads reach them through
/// [`MainThread::execute`] / [`MainThread::execute_sync`].
pub trait AnalysisHost {
    fn image_base(&self) -> Address;

    /// Size of the item (instruction or data head) at `address`.
    fn item_size(&self, address: Address) -> u64;

    fn short_name(&self, address: Address) -> Option<String>;

    fn current_address(&self) -> Address;

    /// Move the view to an absolute address.
    fn jump_to(&self, address: Address) -> Result<(), HostError>;

    fn set_item_color(&self, address: Address, color: Color);

    /// Flow chart of the function containing `address`.
    fn flowchart(&self, address: Address) -> Option<FlowChart>;

    fn set_node_colors(
        &self,
        function_start: Address,
        block_id: usize,
        colors: NodeColors,
    ) -> Result<(), HostError>;

    fn root_filename(&self) -> String;

    fn input_file_path(&self) -> String;

    /// Digest of the input file, lowercase hex.
    fn content_hash(&self) -> String;

    /// Run the host's analysis export feature into `path`.
    fn export_analysis(&self, _path: &Path) -> Result<(), HostError> {
        Err(HostError::NotSupported("export".to_string()))
    }

    /// Present a function-match table. Widget rendering belongs to the host.
    fn show_match_view(
        &self,
        _title: &str,
        _headers: &[&str],
        _rows: &[MatchRow],
    ) -> Result<(), HostError> {
        Ok(())
    }
}

/// Run a host loop on a dedicated thread that plays the main thread.
#[cfg(test)]
pub(crate) fn spawn_test_host(host: InMemoryHost) -> (MainThread, std::thread::JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let handle = std::thread::spawn(move || {
        let (main, host_loop) = main_thread_channel();
        tx.send(main).expect("send handle");
        host_loop.run(std::rc::Rc::new(host));
    });
    (rx.recv().expect("main thread handle"), handle)
}

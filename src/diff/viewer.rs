//! Function-match view: block coloring, rows and row activation.

use super::document::{FunctionMatch, MatchDocument, Role};
use crate::error::HostError;
use crate::host::handlers::coloring::color_range;
use crate::host::{AnalysisHost, Color};
use crate::session::{SyncCommand, SyncQueue};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

pub const VIEW_TITLE: &str = "Function Matches";

pub const COLUMN_HEADERS: [&str; 7] = [
    "Source", "Address", "Target", "Address", "Matched", "Removed", "Added",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffColors {
    pub matched: Color,
    pub unmatched: Color,
}

impl Default for DiffColors {
    fn default() -> Self {
        Self {
            matched: 0xCCFFFF,
            unmatched: 0xCC00CC,
        }
    }
}

/// One function match as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRow {
    /// Position of the match in the document.
    pub index: usize,
    pub self_name: String,
    /// Absolute address in this session's image.
    pub self_address: u64,
    pub peer_name: String,
    /// Image-relative address in the peer.
    pub peer_address: u64,
    pub matched_blocks: usize,
    pub self_unidentified: usize,
    pub peer_unidentified: usize,
}

impl MatchRow {
    /// Display text, in [`COLUMN_HEADERS`] order.
    pub fn cells(&self) -> [String; 7] {
        [
            self.self_name.clone(),
            format!("{:08x}", self.self_address),
            self.peer_name.clone(),
            format!("{:08x}", self.peer_address),
            format!("{:08}", self.matched_blocks),
            format!("{:08}", self.self_unidentified),
            format!("{:08}", self.peer_unidentified),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    SelfName,
    SelfAddress,
    PeerName,
    PeerAddress,
    Matched,
    SelfUnidentified,
    PeerUnidentified,
}

impl SortColumn {
    fn compare(self, a: &MatchRow, b: &MatchRow) -> Ordering {
        match self {
            SortColumn::SelfName => a.self_name.cmp(&b.self_name),
            SortColumn::SelfAddress => a.self_address.cmp(&b.self_address),
            SortColumn::PeerName => a.peer_name.cmp(&b.peer_name),
            SortColumn::PeerAddress => a.peer_address.cmp(&b.peer_address),
            SortColumn::Matched => a.matched_blocks.cmp(&b.matched_blocks),
            SortColumn::SelfUnidentified => a.self_unidentified.cmp(&b.self_unidentified),
            SortColumn::PeerUnidentified => a.peer_unidentified.cmp(&b.peer_unidentified),
        }
    }
}

fn fallback_name(address: u64) -> String {
    format!("sub_{address:x}")
}

/// A match document viewed from one role.
///
/// Construction and every method taking a host must run on the host's main
/// thread.
#[derive(Debug, Clone)]
pub struct DiffViewer {
    document: Arc<MatchDocument>,
    role: Role,
    peer_hash: Option<String>,
    colors: DiffColors,
    sync: SyncQueue,
    rows: Vec<MatchRow>,
}

impl DiffViewer {
    pub fn build(
        host: &dyn AnalysisHost,
        document: Arc<MatchDocument>,
        role: Role,
        peer_hash: Option<String>,
        colors: DiffColors,
        sync: SyncQueue,
    ) -> Self {
        let base = host.image_base();
        let peer = role.peer();
        let rows = document
            .function_matches
            .iter()
            .enumerate()
            .map(|(index, fm)| {
                let self_address = base.saturating_add(fm.address(role));
                let self_name = host
                    .short_name(self_address)
                    .or_else(|| fm.name(role).map(str::to_string))
                    .unwrap_or_else(|| fallback_name(self_address));
                let peer_name = fm
                    .name(peer)
                    .map(str::to_string)
                    .unwrap_or_else(|| fallback_name(fm.address(peer)));
                MatchRow {
                    index,
                    self_name,
                    self_address,
                    peer_name,
                    peer_address: fm.address(peer),
                    matched_blocks: fm.matched_block_count(),
                    self_unidentified: fm.unidentified_count(role),
                    peer_unidentified: fm.unidentified_count(peer),
                }
            })
            .collect();

        Self {
            document,
            role,
            peer_hash,
            colors,
            sync,
            rows,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_hash(&self) -> Option<&str> {
        self.peer_hash.as_deref()
    }

    /// Rows in display order.
    pub fn rows(&self) -> &[MatchRow] {
        &self.rows
    }

    pub fn sort_rows(&mut self, column: SortColumn, descending: bool) {
        self.rows.sort_by(|a, b| {
            let ord = column.compare(a, b);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    /// Color this session's side of one match. Returns the items colored.
    pub fn color_function_match(&self, host: &dyn AnalysisHost, fm: &FunctionMatch) -> usize {
        let matched: usize = fm
            .matches
            .iter()
            .map(|pair| {
                let block = pair.block(self.role);
                color_range(host, block.start, block.end, self.colors.matched)
            })
            .sum();
        let unmatched: usize = fm
            .unidentified_blocks
            .for_role(self.role)
            .iter()
            .map(|block| color_range(host, block.start, block.end, self.colors.unmatched))
            .sum();
        matched + unmatched
    }

    /// Color every match in the document.
    pub fn apply_colors(&self, host: &dyn AnalysisHost) -> usize {
        let colored: usize = self
            .document
            .function_matches
            .iter()
            .map(|fm| self.color_function_match(host, fm))
            .sum();
        debug!(role = %self.role, items = colored, "Applied diff colors");
        colored
    }

    /// Hand the table to the host.
    pub fn show(&self, host: &dyn AnalysisHost) -> Result<(), HostError> {
        host.show_match_view(VIEW_TITLE, &COLUMN_HEADERS, &self.rows)
    }

    /// Activate the row at `position` (display order).
    ///
    /// Jumps locally, queues the matching jump for the peer and recolors the
    /// match. A failed local jump is logged and does not stop the other two
    /// steps. Returns the queued command, if any.
    pub fn activate(
        &self,
        position: usize,
        host: &dyn AnalysisHost,
    ) -> Result<Option<SyncCommand>, HostError> {
        let row = self
            .rows
            .get(position)
            .ok_or_else(|| HostError::NotFound(format!("row {position}")))?;
        if let Err(e) = host.jump_to(row.self_address) {
            warn!(
                row = position,
                address = format!("{:#x}", row.self_address),
                error = %e,
                "Local jump failed"
            );
        }

        let command = match &self.peer_hash {
            Some(peer) => {
                let command = SyncCommand::Jumpto {
                    target_content_hash: peer.clone(),
                    address: row.peer_address,
                };
                self.sync.enqueue(command.clone()).then_some(command)
            }
            None => {
                warn!(row = position, "No peer session known, not syncing");
                None
            }
        };

        if let Some(fm) = self.document.function_matches.get(row.index) {
            self.color_function_match(host, fm);
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{test_fixture, InMemoryHost};
    use crate::session::sync_queue;

    const PEER_HASH: &str = "fedcba9876543210fedcba9876543210";

    fn document() -> Arc<MatchDocument> {
        let json = format!(
            r#"{{
            "source_md5": "0123456789abcdef0123456789abcdef",
            "target_md5": "{PEER_HASH}",
            "function_matches": [
                {{"source": 4198400, "target": 4202496, "target_name": "foo",
                  "matches": [
                    {{"source": 4198400, "source_end": 4198416, "target": 4202496, "target_end": 4202512}},
                    {{"source": 4198416, "source_end": 4198432, "target": 4202512, "target_end": 4202528}}
                  ],
                  "unidentified_blocks": {{"sources": [{{"start": 4198432, "end": 4198448}}], "targets": []}}}},
                {{"source": 4202496, "target": 4206592,
                  "matches": [],
                  "unidentified_blocks": {{"sources": [], "targets": [{{"start": 4206592, "end": 4206600}}]}}}}
            ]}}"#
        );
        Arc::new(MatchDocument::from_json(json.as_bytes()).expect("document"))
    }

    /// Image loaded at 0 so document offsets are absolute addresses.
    fn host() -> InMemoryHost {
        let mut fixture = test_fixture();
        fixture.image_base = 0;
        fixture.image_size = 0x0100_0000;
        InMemoryHost::new(fixture)
    }

    fn viewer(host: &InMemoryHost, sync: SyncQueue) -> DiffViewer {
        DiffViewer::build(
            host,
            document(),
            Role::Source,
            Some(PEER_HASH.to_string()),
            DiffColors::default(),
            sync,
        )
    }

    #[test]
    fn row_activation_jumps_locally_and_syncs_peer() {
        let host = host();
        let (sync, mut rx) = sync_queue();
        let viewer = viewer(&host, sync);

        let row = &viewer.rows()[0];
        assert_eq!(row.self_name, "main");
        assert_eq!(row.peer_name, "foo");
        assert_eq!(row.matched_blocks, 4);
        assert_eq!(row.self_unidentified, 1);
        assert_eq!(row.peer_unidentified, 0);

        let command = viewer.activate(0, &host).expect("activate");
        let expected = SyncCommand::Jumpto {
            target_content_hash: PEER_HASH.to_string(),
            address: 0x402000,
        };
        assert_eq!(command, Some(expected.clone()));
        assert_eq!(host.current_address(), 0x401000);
        assert_eq!(rx.try_recv().ok(), Some(expected));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_local_jump_still_syncs_and_recolors() {
        let mut fixture = test_fixture();
        fixture.image_base = 0;
        fixture.image_size = 0x1000;
        let host = InMemoryHost::new(fixture);
        let (sync, mut rx) = sync_queue();
        let viewer = viewer(&host, sync);

        let command = viewer.activate(0, &host).expect("activate");
        let expected = SyncCommand::Jumpto {
            target_content_hash: PEER_HASH.to_string(),
            address: 0x402000,
        };
        assert_eq!(command, Some(expected.clone()));
        assert!(host.jump_history().is_empty());
        assert_eq!(rx.try_recv().ok(), Some(expected));
        assert_eq!(host.item_color(0x401000), Some(0xCCFFFF));
        assert_eq!(host.item_color(0x401020), Some(0xCC00CC));
    }

    #[test]
    fn colors_only_this_sides_blocks() {
        let host = host();
        let (sync, _rx) = sync_queue();
        let viewer = viewer(&host, sync);

        // 32 matched bytes and 16 unidentified bytes of 4-byte items.
        assert_eq!(viewer.apply_colors(&host), 12);
        assert_eq!(host.item_color(0x401000), Some(0xCCFFFF));
        assert_eq!(host.item_color(0x40101c), Some(0xCCFFFF));
        assert_eq!(host.item_color(0x401020), Some(0xCC00CC));
        assert_eq!(host.item_color(0x401030), None);
        // Target-side blocks belong to the peer.
        assert_eq!(host.item_color(0x402000), None);
        assert_eq!(host.item_color(0x403000), None);
    }

    #[test]
    fn activation_recolor_is_idempotent() {
        let host = host();
        let (sync, _rx) = sync_queue();
        let viewer = viewer(&host, sync);
        viewer.apply_colors(&host);
        let before = host.item_colors();

        viewer.activate(0, &host).expect("activate");
        assert_eq!(host.item_colors(), before);
    }

    #[test]
    fn target_role_reads_the_other_side() {
        let host = host();
        let (sync, _rx) = sync_queue();
        let viewer = DiffViewer::build(
            &host,
            document(),
            Role::Target,
            Some("0123456789abcdef0123456789abcdef".to_string()),
            DiffColors::default(),
            sync,
        );

        let row = &viewer.rows()[1];
        assert_eq!(row.self_address, 0x403000);
        assert_eq!(row.self_name, "sub_403000");
        assert_eq!(row.peer_name, "sub_402000");
        assert_eq!(row.self_unidentified, 1);
        assert_eq!(row.peer_unidentified, 0);
        assert_eq!(viewer.apply_colors(&host), 8 + 2);
    }

    #[test]
    fn cells_are_zero_padded() {
        let host = host();
        let (sync, _rx) = sync_queue();
        let viewer = viewer(&host, sync);
        assert_eq!(
            viewer.rows()[0].cells(),
            [
                "main".to_string(),
                "00401000".to_string(),
                "foo".to_string(),
                "00402000".to_string(),
                "00000004".to_string(),
                "00000001".to_string(),
                "00000000".to_string(),
            ]
        );
    }

    #[test]
    fn sorting_reorders_activation_targets() {
        let host = host();
        let (sync, mut rx) = sync_queue();
        let mut viewer = viewer(&host, sync);

        viewer.sort_rows(SortColumn::SelfAddress, true);
        assert_eq!(viewer.rows()[0].index, 1);

        viewer.activate(0, &host).expect("activate");
        assert_eq!(host.current_address(), 0x402000);
        assert!(matches!(
            rx.try_recv(),
            Ok(SyncCommand::Jumpto { address: 0x403000, .. })
        ));

        viewer.sort_rows(SortColumn::Matched, true);
        assert_eq!(viewer.rows()[0].index, 0);
    }

    #[test]
    fn without_peer_nothing_is_queued() {
        let host = host();
        let (sync, mut rx) = sync_queue();
        let viewer = DiffViewer::build(
            &host,
            document(),
            Role::Source,
            None,
            DiffColors::default(),
            sync,
        );
        assert_eq!(viewer.activate(0, &host).expect("activate"), None);
        assert!(rx.try_recv().is_err());
        assert!(viewer.activate(9, &host).is_err());
    }

    #[test]
    fn show_hands_rows_to_host() {
        let host = host();
        let (sync, _rx) = sync_queue();
        viewer(&host, sync).show(&host).expect("show");

        let views = host.shown_views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].title, VIEW_TITLE);
        assert_eq!(views[0].headers.len(), 7);
        assert_eq!(views[0].rows.len(), 2);
    }
}

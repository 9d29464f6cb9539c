//! In-memory analysis host.
//!
//! Stands in for a live disassembler: the image layout (functions, blocks,
//! item sizes) comes from a JSON fixture and every mutation is recorded so it
//! can be inspected. Used by `binsync serve --fixture` and by the tests.

use crate::diff::MatchRow;
use crate::error::HostError;
use crate::host::{Address, AnalysisHost, Color, FlowBlock, FlowChart, NodeColors};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

fn default_image_size() -> u64 {
    0x0100_0000
}

fn default_item_size() -> u64 {
    4
}

/// Image layout description for [`InMemoryHost`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostFixture {
    #[serde(alias = "md5")]
    pub content_hash: String,
    pub root_filename: String,
    #[serde(default)]
    pub input_file_path: String,
    pub image_base: u64,
    #[serde(default = "default_image_size")]
    pub image_size: u64,
    /// Size reported for addresses without an explicit item.
    #[serde(default = "default_item_size")]
    pub default_item_size: u64,
    #[serde(default)]
    pub items: Vec<FixtureItem>,
    #[serde(default)]
    pub functions: Vec<FixtureFunction>,
}

/// An item with an explicit size, at an absolute address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FixtureItem {
    pub address: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFunction {
    pub address: u64,
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<FixtureBlock>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FixtureBlock {
    pub start: u64,
    pub end: u64,
}

impl HostFixture {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A match table handed to [`AnalysisHost::show_match_view`].
#[derive(Debug, Clone)]
pub struct ShownView {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<MatchRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    current: Address,
    item_colors: BTreeMap<Address, Color>,
    color_writes: BTreeMap<Address, usize>,
    node_colors: BTreeMap<(Address, usize), NodeColors>,
    jumps: Vec<Address>,
    views: Vec<ShownView>,
    exports: Vec<PathBuf>,
}

/// Analysis host backed by a [`HostFixture`]. Clones share state.
#[derive(Clone)]
pub struct InMemoryHost {
    fixture: Arc<HostFixture>,
    item_sizes: Arc<HashMap<Address, u64>>,
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryHost {
    pub fn new(fixture: HostFixture) -> Self {
        let item_sizes = fixture
            .items
            .iter()
            .map(|item| (item.address, item.size))
            .collect();
        let state = MemoryState {
            current: fixture.image_base,
            ..Default::default()
        };
        Self {
            fixture: Arc::new(fixture),
            item_sizes: Arc::new(item_sizes),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contains(&self, address: Address) -> bool {
        let base = self.fixture.image_base;
        address >= base && address - base < self.fixture.image_size
    }

    fn function_containing(&self, address: Address) -> Option<&FixtureFunction> {
        self.fixture.functions.iter().find(|func| {
            func.address == address
                || func
                    .blocks
                    .iter()
                    .any(|block| block.start <= address && address < block.end)
        })
    }

    pub fn item_color(&self, address: Address) -> Option<Color> {
        self.lock_state().item_colors.get(&address).copied()
    }

    pub fn item_colors(&self) -> BTreeMap<Address, Color> {
        self.lock_state().item_colors.clone()
    }

    /// How many times each address has been colored.
    pub fn color_write_counts(&self) -> BTreeMap<Address, usize> {
        self.lock_state().color_writes.clone()
    }

    pub fn node_colors(&self, function_start: Address, block_id: usize) -> Option<NodeColors> {
        self.lock_state()
            .node_colors
            .get(&(function_start, block_id))
            .copied()
    }

    pub fn jump_history(&self) -> Vec<Address> {
        self.lock_state().jumps.clone()
    }

    pub fn shown_views(&self) -> Vec<ShownView> {
        self.lock_state().views.clone()
    }

    pub fn exports(&self) -> Vec<PathBuf> {
        self.lock_state().exports.clone()
    }
}

impl AnalysisHost for InMemoryHost {
    fn image_base(&self) -> Address {
        self.fixture.image_base
    }

    fn item_size(&self, address: Address) -> u64 {
        self.item_sizes
            .get(&address)
            .copied()
            .unwrap_or(self.fixture.default_item_size)
    }

    fn short_name(&self, address: Address) -> Option<String> {
        self.fixture
            .functions
            .iter()
            .find(|func| func.address == address)
            .map(|func| func.name.clone())
    }

    fn current_address(&self) -> Address {
        self.lock_state().current
    }

    fn jump_to(&self, address: Address) -> Result<(), HostError> {
        if !self.contains(address) {
            return Err(HostError::InvalidAddress(address));
        }
        debug!(address = format!("{:#x}", address), "Jumping");
        let mut state = self.lock_state();
        state.current = address;
        state.jumps.push(address);
        Ok(())
    }

    fn set_item_color(&self, address: Address, color: Color) {
        let mut state = self.lock_state();
        state.item_colors.insert(address, color);
        *state.color_writes.entry(address).or_insert(0) += 1;
    }

    fn flowchart(&self, address: Address) -> Option<FlowChart> {
        let func = self.function_containing(address)?;
        let blocks = if func.blocks.is_empty() {
            vec![FlowBlock {
                id: 0,
                start: func.address,
                end: func.address + self.fixture.default_item_size,
            }]
        } else {
            func.blocks
                .iter()
                .enumerate()
                .map(|(id, block)| FlowBlock {
                    id,
                    start: block.start,
                    end: block.end,
                })
                .collect()
        };
        Some(FlowChart {
            function_start: func.address,
            blocks,
        })
    }

    fn set_node_colors(
        &self,
        function_start: Address,
        block_id: usize,
        colors: NodeColors,
    ) -> Result<(), HostError> {
        let chart = self
            .flowchart(function_start)
            .filter(|chart| chart.function_start == function_start)
            .ok_or(HostError::FunctionNotFound(function_start))?;
        if block_id >= chart.blocks.len() {
            return Err(HostError::NotFound(format!(
                "block {block_id} of function {function_start:#x}"
            )));
        }
        self.lock_state()
            .node_colors
            .insert((function_start, block_id), colors);
        Ok(())
    }

    fn root_filename(&self) -> String {
        self.fixture.root_filename.clone()
    }

    fn input_file_path(&self) -> String {
        self.fixture.input_file_path.clone()
    }

    fn content_hash(&self) -> String {
        self.fixture.content_hash.clone()
    }

    fn export_analysis(&self, path: &Path) -> Result<(), HostError> {
        let functions: Vec<_> = self
            .fixture
            .functions
            .iter()
            .map(|func| {
                json!({
                    "address": func.address,
                    "name": func.name,
                    "blocks": func.blocks.iter().map(|b| json!({"start": b.start, "end": b.end})).collect::<Vec<_>>(),
                })
            })
            .collect();
        let export = json!({
            "content_hash": self.content_hash().to_ascii_lowercase(),
            "root_filename": self.fixture.root_filename,
            "image_base": self.fixture.image_base,
            "functions": functions,
        });
        let text = serde_json::to_string_pretty(&export)
            .map_err(|e| HostError::Failed(format!("export encoding failed: {e}")))?;
        std::fs::write(path, text)
            .map_err(|e| HostError::Failed(format!("{}: {}", path.display(), e)))?;
        self.lock_state().exports.push(path.to_path_buf());
        Ok(())
    }

    fn show_match_view(
        &self,
        title: &str,
        headers: &[&str],
        rows: &[MatchRow],
    ) -> Result<(), HostError> {
        self.lock_state().views.push(ShownView {
            title: title.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows.to_vec(),
        });
        Ok(())
    }
}

/// Small image used across the unit tests.
///
/// `main` at 0x401000 with three 16-byte blocks, `helper` at 0x402000 with
/// one 32-byte block; 4-byte items everywhere.
#[cfg(test)]
pub(crate) fn test_fixture() -> HostFixture {
    HostFixture {
        content_hash: "0123456789abcdef0123456789abcdef".to_string(),
        root_filename: "source.exe".to_string(),
        input_file_path: "/samples/source.exe".to_string(),
        image_base: 0x400000,
        image_size: 0x10000,
        default_item_size: 4,
        items: Vec::new(),
        functions: vec![
            FixtureFunction {
                address: 0x401000,
                name: "main".to_string(),
                blocks: vec![
                    FixtureBlock {
                        start: 0x401000,
                        end: 0x401010,
                    },
                    FixtureBlock {
                        start: 0x401010,
                        end: 0x401020,
                    },
                    FixtureBlock {
                        start: 0x401020,
                        end: 0x401030,
                    },
                ],
            },
            FixtureFunction {
                address: 0x402000,
                name: "helper".to_string(),
                blocks: vec![FixtureBlock {
                    start: 0x402000,
                    end: 0x402020,
                }],
            },
        ],
    }
}

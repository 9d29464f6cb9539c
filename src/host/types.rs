//! Value types exchanged with the analysis host.

use serde::{Deserialize, Serialize};

/// Absolute address inside the analyzed image.
pub type Address = u64;

/// Host color value (0xBBGGRR as the host interprets it).
pub type Color = u32;

/// One basic block of a function's flow chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowBlock {
    pub id: usize,
    pub start: Address,
    pub end: Address,
}

/// Flow chart of the function containing some address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowChart {
    pub function_start: Address,
    pub blocks: Vec<FlowBlock>,
}

/// Graph-node visual attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeColors {
    pub bg_color: Color,
    pub frame_color: Color,
}

/// Identity facts read from the host once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    /// Lowercase hex digest of the input file.
    pub content_hash: String,
    pub root_filename: String,
    pub input_file_path: String,
}

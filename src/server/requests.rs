//! JSON-RPC wire types and per-method parameters.
//!
//! Parameter structs accept either named (`{"address": ..}`) or positional
//! (`[..]`) params. Addresses may be given as numbers or as strings in any
//! base [`parse_address`] understands.

use crate::diff::SortColumn;
use crate::host::handlers::parse_address;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const HOST_ERROR: i32 = -32000;

/// Frame color used by `color_node` when none is given.
pub const DEFAULT_FRAME_COLOR: u32 = 0x000000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn deserialize_address<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AddressRepr {
        Number(u64),
        Text(String),
    }

    match AddressRepr::deserialize(deserializer)? {
        AddressRepr::Number(n) => Ok(n),
        AddressRepr::Text(s) => parse_address(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_addresses<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize_address")] u64);

    let wrapped = Vec::<Wrapped>::deserialize(deserializer)?;
    Ok(wrapped.into_iter().map(|w| w.0).collect())
}

#[derive(Debug, Deserialize)]
pub struct JumptoParams {
    /// Image-relative offset.
    #[serde(deserialize_with = "deserialize_address")]
    pub address: u64,
}

#[derive(Debug, Deserialize)]
pub struct SetItemColorParams {
    /// Absolute address.
    #[serde(deserialize_with = "deserialize_address")]
    pub address: u64,
    pub color: u32,
}

#[derive(Debug, Deserialize)]
pub struct FilenameParams {
    #[serde(alias = "path")]
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct RunCommandsParams {
    /// Decoded entry by entry so one malformed command does not reject the
    /// batch.
    pub commands: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskStatusParams {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRowParams {
    /// View id from `show_diff`; the latest view when omitted.
    #[serde(default)]
    pub view: Option<usize>,
    /// Row position in display order.
    pub row: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewRowsParams {
    #[serde(default)]
    pub view: Option<usize>,
    #[serde(default)]
    pub sort: Option<SortColumn>,
    #[serde(default)]
    pub descending: bool,
}

/// One entry of a `run_commands` batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum BatchCommand {
    /// Navigate to an image-relative offset.
    Jumpto {
        #[serde(deserialize_with = "deserialize_address")]
        address: u64,
    },
    /// Color the items in an image-relative range.
    ColorLines {
        #[serde(deserialize_with = "deserialize_address")]
        start: u64,
        #[serde(deserialize_with = "deserialize_address")]
        end: u64,
        color: u32,
    },
    /// Color flow-chart nodes at image-relative addresses.
    ColorNode {
        #[serde(deserialize_with = "deserialize_addresses")]
        addresses: Vec<u64>,
        bg_color: u32,
        #[serde(default = "default_frame_color")]
        frame_color: u32,
    },
}

fn default_frame_color() -> u32 {
    DEFAULT_FRAME_COLOR
}

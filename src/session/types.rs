//! Session identity, discovery descriptor and sync command types.

use crate::host::HostIdentity;
use serde::{Deserialize, Serialize};

/// A command for a peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SyncCommand {
    /// Navigate the peer to an image-relative address.
    Jumpto {
        target_content_hash: String,
        address: u64,
    },
}

impl SyncCommand {
    /// Content hash of the session the command is addressed to.
    pub fn target(&self) -> &str {
        match self {
            SyncCommand::Jumpto {
                target_content_hash,
                ..
            } => target_content_hash,
        }
    }
}

/// On-disk record advertising a session's RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub port: u16,
    #[serde(alias = "md5")]
    pub content_hash: String,
    #[serde(alias = "root_fileanem")]
    pub root_filename: String,
    #[serde(default)]
    pub input_filename: String,
}

/// Identity of the running session. Fixed after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub content_hash: String,
    pub root_filename: String,
    pub input_file_path: String,
    pub rpc_port: u16,
}

impl SessionIdentity {
    pub fn new(host: HostIdentity, rpc_port: u16) -> Self {
        Self {
            content_hash: host.content_hash,
            root_filename: host.root_filename,
            input_file_path: host.input_file_path,
            rpc_port,
        }
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            port: self.rpc_port,
            content_hash: self.content_hash.clone(),
            root_filename: self.root_filename.clone(),
            input_filename: self.input_file_path.clone(),
        }
    }
}

//! JSON-RPC client for a session's RPC service.
//!
//! Used by the sync worker to drive peers and by `binsync call`.

use crate::error::SyncError;
use crate::session::{find_descriptor, PeerConnector, PeerLink};
use reqwest::Client;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Client for one session's `/rpc` endpoint.
pub struct RpcClient {
    http_client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Connect to `host:port`. `timeout` bounds each call; `None` waits
    /// indefinitely.
    pub fn new(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self, SyncError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| SyncError::ConnectionFailure(format!("HTTP client setup: {e}")))?;
        Ok(Self {
            http_client,
            url: format!("http://{host}:{port}/rpc"),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Invoke `method` and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, SyncError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(url = %self.url, method = %method, id, "RPC call");

        let response = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let result: Value = response.json().await?;

        if let Some(error) = result.get("error").filter(|e| !e.is_null()) {
            return Err(SyncError::RemoteCallFailure(error.to_string()));
        }

        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn get_pid(&self) -> Result<u32, SyncError> {
        let value = self.call("get_pid", json!({})).await?;
        value
            .as_u64()
            .and_then(|pid| u32::try_from(pid).ok())
            .ok_or_else(|| SyncError::RemoteCallFailure(format!("unexpected pid {value}")))
    }

    pub async fn get_md5(&self) -> Result<String, SyncError> {
        self.call_string("get_md5").await
    }

    pub async fn get_root_filename(&self) -> Result<String, SyncError> {
        self.call_string("get_root_filename").await
    }

    pub async fn jumpto(&self, address: u64) -> Result<(), SyncError> {
        self.call("jumpto", json!({ "address": address })).await?;
        Ok(())
    }

    pub async fn set_item_color(&self, address: u64, color: u32) -> Result<(), SyncError> {
        self.call(
            "set_item_color",
            json!({ "address": address, "color": color }),
        )
        .await?;
        Ok(())
    }

    pub async fn export(&self, filename: &str) -> Result<(), SyncError> {
        self.call("export", json!({ "filename": filename })).await?;
        Ok(())
    }

    pub async fn show_diff(&self, filename: &str) -> Result<(), SyncError> {
        self.call("show_diff", json!({ "filename": filename }))
            .await?;
        Ok(())
    }

    pub async fn run_commands(&self, commands: Vec<Value>) -> Result<(), SyncError> {
        self.call("run_commands", json!({ "commands": commands }))
            .await?;
        Ok(())
    }

    async fn call_string(&self, method: &str) -> Result<String, SyncError> {
        match self.call(method, json!({})).await? {
            Value::String(s) => Ok(s),
            other => Err(SyncError::RemoteCallFailure(format!(
                "{method} returned {other}"
            ))),
        }
    }
}

impl PeerLink for RpcClient {
    async fn jumpto(&self, address: u64) -> Result<(), SyncError> {
        RpcClient::jumpto(self, address).await
    }
}

/// Finds peers through the descriptor directory.
///
/// A descriptor only counts once the session behind it answers `get_md5`
/// with the expected hash.
#[derive(Debug, Clone)]
pub struct DescriptorConnector {
    dir: PathBuf,
    host: String,
    timeout: Option<Duration>,
}

impl DescriptorConnector {
    pub fn new(dir: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            dir,
            host: "127.0.0.1".to_string(),
            timeout,
        }
    }

    /// Open a client to the session advertised for `content_hash`.
    pub async fn open(&self, content_hash: &str) -> Result<RpcClient, SyncError> {
        let descriptor = find_descriptor(&self.dir, content_hash)
            .map_err(|e| SyncError::ConnectionFailure(e.to_string()))?;
        let client = RpcClient::new(&self.host, descriptor.port, self.timeout)?;

        let reported = client.get_md5().await.map_err(|e| match e {
            SyncError::RemoteCallFailure(msg) | SyncError::ConnectionFailure(msg) => {
                SyncError::ConnectionFailure(format!("{}: {}", client.url(), msg))
            }
        })?;
        if !reported.eq_ignore_ascii_case(content_hash) {
            return Err(SyncError::ConnectionFailure(format!(
                "{} serves session {}, expected {}",
                client.url(),
                reported,
                content_hash
            )));
        }
        Ok(client)
    }
}

impl PeerConnector for DescriptorConnector {
    type Link = RpcClient;

    async fn connect(&self, content_hash: &str) -> Result<RpcClient, SyncError> {
        self.open(content_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::DescriptorConnector;
    use crate::error::SyncError;
    use crate::session::{write_descriptor, ConnectionDescriptor, SessionBroker};

    #[tokio::test]
    async fn missing_descriptor_is_a_connection_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = DescriptorConnector::new(dir.path().to_path_buf(), None);
        assert!(matches!(
            connector.open("abcd").await,
            Err(SyncError::ConnectionFailure(_))
        ));
    }

    #[tokio::test]
    async fn stale_descriptor_is_not_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Reserve a port and release it so nothing listens there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        write_descriptor(
            dir.path(),
            &ConnectionDescriptor {
                port,
                content_hash: "abcd".to_string(),
                root_filename: "gone.exe".to_string(),
                input_filename: String::new(),
            },
        )
        .expect("write");

        let connector = DescriptorConnector::new(dir.path().to_path_buf(), None);
        let mut broker = SessionBroker::new(connector);
        assert!(broker.connect("abcd").await.is_none());
        assert!(!broker.is_cached("abcd"));
    }
}

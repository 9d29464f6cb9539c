//! RPC service exposed by every session.
//!
//! [`RpcService`] decodes JSON-RPC requests, routes them by method name and
//! runs every host-touching operation through the [`MainThread`] shim. The
//! HTTP transport lives in [`http`]; port selection and descriptor
//! publication in [`bootstrap`].

pub mod bootstrap;
pub mod http;
pub mod requests;
pub mod task;

use crate::diff::{DiffColors, DiffViewer, MatchDocument, MatchDocumentError, Role, ViewRegistry};
use crate::error::AffinityError;
use crate::expand_path;
use crate::host::handlers::coloring::{color_nodes, color_range};
use crate::host::handlers::navigation::jump_to_offset;
use crate::host::handlers::session::host_identity;
use crate::host::{Affinity, MainThread, NodeColors};
use crate::session::{SessionIdentity, SyncQueue};
use requests::*;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use task::{TaskKind, TaskRegistry, TaskStatus};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures surfaced to the RPC caller.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Host(#[from] AffinityError),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Parse(_) => PARSE_ERROR,
            RpcError::InvalidRequest(_) => INVALID_REQUEST,
            RpcError::MethodNotFound(_) => METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => INVALID_PARAMS,
            RpcError::Host(_) => HOST_ERROR,
        }
    }
}

/// Failures of a detached `show_diff`.
#[derive(Error, Debug)]
enum ShowDiffError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Document(#[from] MatchDocumentError),

    #[error(transparent)]
    Host(#[from] AffinityError),
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = match params {
        None | Some(Value::Null) => json!({}),
        Some(params) => params,
    };
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

/// The session's RPC surface. Clones share all state.
#[derive(Clone)]
pub struct RpcService {
    main: MainThread,
    identity: Arc<SessionIdentity>,
    tasks: TaskRegistry,
    views: ViewRegistry,
    sync: SyncQueue,
    colors: DiffColors,
}

impl RpcService {
    pub fn new(main: MainThread, identity: SessionIdentity, sync: SyncQueue) -> Self {
        Self {
            main,
            identity: Arc::new(identity),
            tasks: TaskRegistry::new(),
            views: ViewRegistry::new(),
            sync,
            colors: DiffColors::default(),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    /// Decode and answer one JSON-RPC request body.
    pub async fn handle_body(&self, body: &[u8]) -> JsonRpcResponse {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => return error_response(None, RpcError::Parse(e.to_string())),
        };
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => return error_response(None, RpcError::InvalidRequest(e.to_string())),
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return error_response(
                request.id,
                RpcError::InvalidRequest(format!("unsupported jsonrpc version {}", request.jsonrpc)),
            );
        }

        debug!(method = %request.method, "RPC request");
        match self.dispatch(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(e) => {
                warn!(method = %request.method, error = %e, "RPC request failed");
                error_response(request.id, e)
            }
        }
    }

    /// Route a method call.
    pub async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "get_pid" => Ok(json!(std::process::id())),
            "jumpto" => {
                let p: JumptoParams = parse_params(params)?;
                self.jumpto(p.address).await
            }
            "set_item_color" => {
                let p: SetItemColorParams = parse_params(params)?;
                self.set_item_color(p.address, p.color).await
            }
            "get_md5" => self.get_md5().await,
            "get_root_filename" => self.get_root_filename().await,
            "export" => {
                let p: FilenameParams = parse_params(params)?;
                Ok(self.export(&p.filename))
            }
            "show_diff" => {
                let p: FilenameParams = parse_params(params)?;
                Ok(self.show_diff(&p.filename))
            }
            "run_commands" => {
                let p: RunCommandsParams = parse_params(params)?;
                self.run_commands(p.commands).await;
                Ok(Value::Null)
            }
            "task_status" => {
                let p: TaskStatusParams = parse_params(params)?;
                self.task_status(p.id.as_deref())
            }
            "view_rows" => {
                let p: ViewRowsParams = parse_params(params)?;
                self.view_rows(p)
            }
            "activate_row" => {
                let p: ActivateRowParams = parse_params(params)?;
                self.activate_row(p.view, p.row).await
            }
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    async fn jumpto(&self, offset: u64) -> Result<Value, RpcError> {
        let address = self
            .main
            .execute(Affinity::UiFast, move |host| jump_to_offset(host, offset))
            .await?;
        debug!(address = format!("{:#x}", address), "Jumped");
        Ok(Value::Null)
    }

    async fn set_item_color(&self, address: u64, color: u32) -> Result<Value, RpcError> {
        self.main
            .execute(Affinity::UiFast, move |host| {
                host.set_item_color(address, color);
                Ok(())
            })
            .await?;
        Ok(Value::Null)
    }

    async fn get_md5(&self) -> Result<Value, RpcError> {
        let identity = self
            .main
            .execute(Affinity::Read, |host| Ok(host_identity(host)))
            .await?;
        Ok(json!(identity.content_hash))
    }

    async fn get_root_filename(&self) -> Result<Value, RpcError> {
        let name = self
            .main
            .execute(Affinity::Read, |host| Ok(host.root_filename()))
            .await?;
        Ok(json!(name))
    }

    /// Start an export in the background. The caller only gets `null`; the
    /// outcome is recorded as a task.
    fn export(&self, filename: &str) -> Value {
        let path = expand_path(filename);
        let id = self
            .tasks
            .create(TaskKind::Export, &format!("Exporting to {}", path.display()));
        let main = self.main.clone();
        let tasks = self.tasks.clone();

        tokio::spawn(async move {
            let target = path.clone();
            let result = main
                .execute(Affinity::Write, move |host| host.export_analysis(&target))
                .await;
            match result {
                Ok(()) => {
                    info!(path = %path.display(), "Export finished");
                    tasks.complete(&id, json!({ "path": path.display().to_string() }));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Export failed");
                    tasks.fail(&id, &e.to_string());
                }
            }
        });
        Value::Null
    }

    /// Load a match document and open its view in the background.
    fn show_diff(&self, filename: &str) -> Value {
        let path = expand_path(filename);
        let id = self
            .tasks
            .create(TaskKind::ShowDiff, &format!("Loading {}", path.display()));
        let service = self.clone();

        tokio::spawn(async move {
            match service.open_diff(path.clone()).await {
                Ok(result) => {
                    info!(path = %path.display(), "Diff view opened");
                    service.tasks.complete(&id, result);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "show_diff failed");
                    service.tasks.fail(&id, &e.to_string());
                }
            }
        });
        Value::Null
    }

    async fn open_diff(&self, path: PathBuf) -> Result<Value, ShowDiffError> {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ShowDiffError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let document = Arc::new(MatchDocument::from_json(&bytes)?);

        let (role, peer_hash) = match document.role_of(&self.identity.content_hash) {
            Some(role) => (role, document.content_hash(role.peer())),
            None => {
                warn!(
                    session = %self.identity.content_hash,
                    "Session not named in match document, viewing as source"
                );
                (Role::Source, document.content_hash(Role::Target))
            }
        };
        let peer_hash = peer_hash.map(str::to_ascii_lowercase);
        if peer_hash.is_none() {
            warn!("Match document names no peer session, row activation will not sync");
        }

        let colors = self.colors;
        let sync = self.sync.clone();
        let viewer = self
            .main
            .execute(Affinity::Write, move |host| {
                let viewer = DiffViewer::build(host, document, role, peer_hash, colors, sync);
                viewer.apply_colors(host);
                viewer.show(host)?;
                Ok(viewer)
            })
            .await?;

        let rows = viewer.rows().len();
        let view = self.views.insert(viewer);
        Ok(json!({ "view": view, "role": role, "rows": rows }))
    }

    /// Run a batch in order. Failing entries are logged and skipped.
    async fn run_commands(&self, commands: Vec<Value>) {
        for (index, raw) in commands.into_iter().enumerate() {
            let command: BatchCommand = match serde_json::from_value(raw) {
                Ok(command) => command,
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed batch command");
                    continue;
                }
            };
            if let Err(e) = self.run_command(command).await {
                warn!(index, error = %e, "Batch command failed");
            }
        }
    }

    async fn run_command(&self, command: BatchCommand) -> Result<(), AffinityError> {
        match command {
            BatchCommand::Jumpto { address } => {
                self.main
                    .execute(Affinity::UiFast, move |host| jump_to_offset(host, address))
                    .await?;
            }
            BatchCommand::ColorLines { start, end, color } => {
                self.main
                    .execute(Affinity::UiFast, move |host| {
                        Ok(color_range(host, start, end, color))
                    })
                    .await?;
            }
            BatchCommand::ColorNode {
                addresses,
                bg_color,
                frame_color,
            } => {
                let colors = NodeColors {
                    bg_color,
                    frame_color,
                };
                self.main
                    .execute(Affinity::UiFast, move |host| {
                        color_nodes(host, &addresses, colors)
                    })
                    .await?;
            }
        }
        Ok(())
    }

    fn task_status(&self, id: Option<&str>) -> Result<Value, RpcError> {
        match id {
            Some(id) => {
                let state = self
                    .tasks
                    .get(id)
                    .ok_or_else(|| RpcError::InvalidParams(format!("unknown task {id}")))?;
                Ok(json!(state))
            }
            None => {
                let tasks = self.tasks.list_all();
                let running = tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Running)
                    .count();
                Ok(json!({ "tasks": tasks, "running": running }))
            }
        }
    }

    fn resolve_view(&self, view: Option<usize>) -> Result<(usize, DiffViewer), RpcError> {
        let found = match view {
            Some(id) => self.views.get(id).map(|viewer| (id, viewer)),
            None => self.views.latest(),
        };
        found.ok_or_else(|| match view {
            Some(id) => RpcError::InvalidParams(format!("no diff view {id}")),
            None => RpcError::InvalidParams("no diff view is open".to_string()),
        })
    }

    fn view_rows(&self, params: ViewRowsParams) -> Result<Value, RpcError> {
        let (id, _) = self.resolve_view(params.view)?;
        if let Some(column) = params.sort {
            self.views.sort(id, column, params.descending);
        }
        let (id, viewer) = self.resolve_view(Some(id))?;
        let rows: Vec<Value> = viewer
            .rows()
            .iter()
            .map(|row| {
                let mut value = json!(row);
                value["cells"] = json!(row.cells());
                value
            })
            .collect();
        Ok(json!({
            "view": id,
            "title": crate::diff::VIEW_TITLE,
            "headers": crate::diff::COLUMN_HEADERS,
            "role": viewer.role(),
            "peer": viewer.peer_hash(),
            "rows": rows,
        }))
    }

    async fn activate_row(&self, view: Option<usize>, row: usize) -> Result<Value, RpcError> {
        let (_, viewer) = self.resolve_view(view)?;
        let synced = self
            .main
            .execute(Affinity::UiFast, move |host| viewer.activate(row, host))
            .await?;
        Ok(json!({ "synced": synced }))
    }
}

fn error_response(id: Option<Value>, error: RpcError) -> JsonRpcResponse {
    JsonRpcResponse::error(id, error.code(), error.to_string())
}

#[cfg(test)]
mod tests {
    use super::task::TaskStatus;
    use super::RpcService;
    use crate::host::handlers::session::host_identity;
    use crate::host::memory::{test_fixture, InMemoryHost};
    use crate::host::{spawn_test_host, Affinity, AnalysisHost, MainThread};
    use crate::session::{sync_queue, SessionIdentity, SyncCommand};
    use serde_json::{json, Value};
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const PEER_HASH: &str = "fedcba9876543210fedcba9876543210";

    struct Harness {
        service: RpcService,
        host: InMemoryHost,
        main: MainThread,
        handle: JoinHandle<()>,
        sync_rx: UnboundedReceiver<SyncCommand>,
    }

    impl Harness {
        fn new() -> Self {
            let host = InMemoryHost::new(test_fixture());
            let (main, handle) = spawn_test_host(host.clone());
            let (sync, sync_rx) = sync_queue();
            let identity = SessionIdentity::new(host_identity(&host), 18861);
            Self {
                service: RpcService::new(main.clone(), identity, sync),
                host,
                main,
                handle,
                sync_rx,
            }
        }

        async fn call(&self, method: &str, params: Value) -> Value {
            let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
            let response = self.service.handle_body(body.to_string().as_bytes()).await;
            serde_json::to_value(response).expect("encode response")
        }

        async fn raw(&self, body: &str) -> Value {
            serde_json::to_value(self.service.handle_body(body.as_bytes()).await)
                .expect("encode response")
        }

        fn finish(self) {
            self.main.shutdown().expect("shutdown");
            self.handle.join().expect("host thread");
        }
    }

    fn error_code(response: &Value) -> i64 {
        response["error"]["code"].as_i64().unwrap_or_default()
    }

    #[tokio::test]
    async fn identity_queries() {
        let h = Harness::new();

        let md5 = h.call("get_md5", json!({})).await;
        assert_eq!(md5["result"], "0123456789abcdef0123456789abcdef");
        assert_eq!(md5["id"], 1);

        let name = h.call("get_root_filename", Value::Null).await;
        assert_eq!(name["result"], "source.exe");

        let pid = h.call("get_pid", json!([])).await;
        assert_eq!(pid["result"], std::process::id());
        h.finish();
    }

    #[tokio::test]
    async fn jumpto_is_image_relative() {
        let h = Harness::new();
        let response = h.call("jumpto", json!({"address": "0x2000"})).await;
        assert_eq!(response["result"], Value::Null);
        assert!(response.get("error").is_none());
        assert_eq!(h.host.current_address(), 0x402000);

        h.call("set_item_color", json!([0x401000, 0xCCFFFF])).await;
        assert_eq!(h.host.item_color(0x401000), Some(0xCCFFFF));
        h.finish();
    }

    #[tokio::test]
    async fn error_codes() {
        let h = Harness::new();
        assert_eq!(error_code(&h.raw("{").await), -32700);
        assert_eq!(error_code(&h.raw(r#"{"jsonrpc": "2.0", "id": 1}"#).await), -32600);
        assert_eq!(
            error_code(&h.raw(r#"{"jsonrpc": "1.0", "id": 1, "method": "get_pid"}"#).await),
            -32600
        );
        assert_eq!(error_code(&h.call("rename", json!({})).await), -32601);
        assert_eq!(error_code(&h.call("jumpto", json!({})).await), -32602);
        // Outside the fixture image.
        assert_eq!(
            error_code(&h.call("jumpto", json!({"address": 0x100000})).await),
            -32000
        );
        h.finish();
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let h = Harness::new();
        let response = h
            .call(
                "run_commands",
                json!({"commands": [
                    {"name": "color_lines", "start": 0x1000, "end": 0x1008, "color": 1},
                    {"name": "frobnicate"},
                    {"name": "jumpto", "address": 0x100000},
                    {"name": "color_node", "addresses": [0x1010], "bg_color": 2},
                    {"name": "jumpto", "address": 0x2000}
                ]}),
            )
            .await;
        assert_eq!(response["result"], Value::Null);

        assert_eq!(h.host.item_color(0x401000), Some(1));
        assert_eq!(h.host.item_color(0x401004), Some(1));
        let node = h.host.node_colors(0x401000, 1).expect("node colored");
        assert_eq!((node.bg_color, node.frame_color), (2, 0));
        assert_eq!(h.host.current_address(), 0x402000);
        h.finish();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batch_coloring_runs_ahead_of_queued_writes() {
        let h = Harness::new();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        // Hold the main thread so the next two jobs queue up behind it.
        let main = h.main.clone();
        let blocker = tokio::spawn(async move {
            main.execute(Affinity::UiFast, move |_| {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
                Ok(())
            })
            .await
        });
        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .expect("join")
            .expect("blocker started");

        let main = h.main.clone();
        let host = h.host.clone();
        let write = tokio::spawn(async move {
            main.execute(Affinity::Write, move |_| Ok(host.item_color(0x401000)))
                .await
        });
        let service = h.service.clone();
        let batch = tokio::spawn(async move {
            service
                .dispatch(
                    "run_commands",
                    Some(json!({"commands": [
                        {"name": "color_lines", "start": 0x1000, "end": 0x1004, "color": 7}
                    ]})),
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        release_tx.send(()).expect("release");

        blocker.await.expect("join").expect("blocker");
        batch.await.expect("join").expect("batch");
        let seen_by_write = write.await.expect("join").expect("write");
        assert_eq!(seen_by_write, Some(7));
        h.finish();
    }

    #[tokio::test]
    async fn export_is_detached_and_tracked() {
        let h = Harness::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.json");

        let response = h
            .call("export", json!({"filename": path.display().to_string()}))
            .await;
        assert_eq!(response["result"], Value::Null);

        let task = h.service.tasks().list_all().remove(0);
        let state = h.service.tasks().wait(&task.id).await.expect("task");
        assert_eq!(state.status, TaskStatus::Completed);
        assert!(path.exists());
        assert_eq!(h.host.exports(), vec![path]);

        let status = h.call("task_status", json!({"id": task.id})).await;
        assert_eq!(status["result"]["status"], "completed");
        h.finish();
    }

    #[tokio::test]
    async fn show_diff_failure_is_recorded_not_returned() {
        let h = Harness::new();
        let response = h
            .call("show_diff", json!({"filename": "/nonexistent/matches.json"}))
            .await;
        assert_eq!(response["result"], Value::Null);
        assert!(response.get("error").is_none());

        let task = h.service.tasks().list_all().remove(0);
        let state = h.service.tasks().wait(&task.id).await.expect("task");
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(h.service.views().is_empty());
        h.finish();
    }

    #[tokio::test]
    async fn show_diff_then_activate_row_syncs_peer() {
        let mut h = Harness::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("matches.json");
        let document = json!({
            "source_md5": "0123456789ABCDEF0123456789ABCDEF",
            "target_md5": PEER_HASH,
            "function_matches": [{
                "source": 0x1000, "target": 0x2000, "target_name": "foo",
                "matches": [
                    {"source": 0x1000, "source_end": 0x1010, "target": 0x2000, "target_end": 0x2010},
                    {"source": 0x1010, "source_end": 0x1020, "target": 0x2010, "target_end": 0x2020}
                ],
                "unidentified_blocks": {"sources": [{"start": 0x1020, "end": 0x1030}], "targets": []}
            }]
        });
        std::fs::write(&path, document.to_string()).expect("write document");

        h.call("show_diff", json!([path.display().to_string()])).await;
        let task = h.service.tasks().list_all().remove(0);
        let state = h.service.tasks().wait(&task.id).await.expect("task");
        assert_eq!(state.status, TaskStatus::Completed, "{}", state.message);
        assert_eq!(h.host.item_color(0x401000), Some(0xCCFFFF));
        assert_eq!(h.host.item_color(0x401020), Some(0xCC00CC));
        assert_eq!(h.host.shown_views().len(), 1);

        let rows = h.call("view_rows", json!({})).await;
        let row = &rows["result"]["rows"][0];
        assert_eq!(row["self_name"], "main");
        assert_eq!(row["matched_blocks"], 4);
        assert_eq!(row["self_unidentified"], 1);
        assert_eq!(row["peer_unidentified"], 0);
        assert_eq!(row["cells"][1], "00401000");
        assert_eq!(rows["result"]["role"], "source");

        let activated = h.call("activate_row", json!({"row": 0})).await;
        assert_eq!(activated["result"]["synced"]["address"], 0x2000);
        assert_eq!(h.host.current_address(), 0x401000);
        assert_eq!(
            h.sync_rx.try_recv().ok(),
            Some(SyncCommand::Jumpto {
                target_content_hash: PEER_HASH.to_string(),
                address: 0x2000,
            })
        );
        assert!(h.sync_rx.try_recv().is_err());

        let missing = h.call("activate_row", json!({"view": 5, "row": 0})).await;
        assert_eq!(error_code(&missing), -32602);
        h.finish();
    }
}

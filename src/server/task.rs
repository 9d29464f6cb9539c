//! In-process registry for detached operations.
//!
//! `export` and `show_diff` answer their RPC immediately and finish in the
//! background; their outcome lands here and is readable via `task_status`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Export,
    ShowDiff,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Export => write!(f, "export"),
            TaskKind::ShowDiff => write!(f, "show_diff"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

/// Snapshot of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe registry of background tasks. Clones share state.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<String, TaskState>>>,
    changed: Arc<Notify>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskState>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a running task and return its id.
    pub fn create(&self, kind: TaskKind, message: &str) -> String {
        let id = next_task_id(kind);
        let state = TaskState {
            id: id.clone(),
            kind,
            status: TaskStatus::Running,
            message: message.to_string(),
            result: None,
            created_at: Utc::now(),
        };
        self.lock().insert(id.clone(), state);
        id
    }

    pub fn get(&self, id: &str) -> Option<TaskState> {
        self.lock().get(id).cloned()
    }

    /// All tasks, oldest first.
    pub fn list_all(&self) -> Vec<TaskState> {
        let mut tasks: Vec<TaskState> = self.lock().values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn complete(&self, id: &str, result: Value) {
        self.finish(id, TaskStatus::Completed, "Completed", Some(result));
    }

    pub fn fail(&self, id: &str, error: &str) {
        self.finish(id, TaskStatus::Failed, error, None);
    }

    fn finish(&self, id: &str, status: TaskStatus, message: &str, result: Option<Value>) {
        if let Some(state) = self.lock().get_mut(id) {
            state.status = status;
            state.message = message.to_string();
            state.result = result;
        }
        self.changed.notify_waiters();
    }

    /// Wait until the task leaves `Running`. `None` if the id is unknown.
    pub async fn wait(&self, id: &str) -> Option<TaskState> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.get(id)?;
            if state.status != TaskStatus::Running {
                return Some(state);
            }
            notified.await;
        }
    }
}

fn next_task_id(kind: TaskKind) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{kind}-{n}")
}

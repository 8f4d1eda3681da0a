//! Upload task board
//!
//! Per-file upload state, keyed by a monotonic task id. Every change
//! publishes a fresh `Arc` snapshot, so readers never observe a map that is
//! being mutated and can diff successive snapshots.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

/// Identifier of one upload task, unique per board
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Uploading,
    Completed,
    Error,
}

/// State of one file travelling through the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub file_name: String,
    pub submitted_at: DateTime<Utc>,
    /// 0 while in flight, 100 once the server accepted the file
    pub progress: u8,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl UploadTask {
    /// Display key combining submission time and file name.
    pub fn display_key(&self) -> String {
        format!("{}-{}", self.submitted_at.timestamp_millis(), self.file_name)
    }
}

pub type TaskSnapshot = Arc<BTreeMap<TaskId, UploadTask>>;

pub struct TaskBoard {
    next_id: AtomicU64,
    tasks: watch::Sender<TaskSnapshot>,
    writer: Mutex<()>,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBoard {
    pub fn new() -> Self {
        let (tasks, _) = watch::channel(Arc::new(BTreeMap::new()));
        Self {
            next_id: AtomicU64::new(1),
            tasks,
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.tasks.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.tasks.subscribe()
    }

    pub fn get(&self, id: TaskId) -> Option<UploadTask> {
        self.tasks.borrow().get(&id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Copy the current map, apply `f`, publish the copy.
    fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<TaskId, UploadTask>) -> R) -> R {
        let _writer = self.writer.lock();
        let mut next = (**self.tasks.borrow()).clone();
        let result = f(&mut next);
        self.tasks.send_replace(Arc::new(next));
        result
    }

    pub(crate) fn start(&self, file_name: &str) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let task = UploadTask {
            id,
            file_name: file_name.to_string(),
            submitted_at: Utc::now(),
            progress: 0,
            status: TaskStatus::Uploading,
            error: None,
        };
        self.update(|tasks| {
            tasks.insert(id, task);
        });
        id
    }

    pub(crate) fn complete(&self, id: TaskId) {
        self.update(|tasks| {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Completed;
                task.progress = 100;
                task.error = None;
            }
        });
    }

    pub(crate) fn fail(&self, id: TaskId, message: impl Into<String>) {
        let message = message.into();
        self.update(|tasks| {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Error;
                task.progress = 0;
                task.error = Some(message);
            }
        });
    }

    /// Remove a task only if it is still in `status`.
    pub(crate) fn remove_if(&self, id: TaskId, status: TaskStatus) -> Option<UploadTask> {
        self.update(|tasks| {
            if tasks.get(&id).map(|t| t.status) == Some(status) {
                tasks.remove(&id)
            } else {
                None
            }
        })
    }
}

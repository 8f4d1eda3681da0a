//! Sequential upload queue
//!
//! One worker task per queue drains an unbounded channel of batches and
//! sends files to the attachment API strictly one at a time, in submission
//! order. A file's task is created right before its request and settles
//! only from that request's response, so one failed file never affects its
//! siblings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mp_core::config::AppConfig;
use mp_core::ValidationErrors;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::AttachmentApi;
use crate::classify::classify;
use crate::error::{UploadError, UploadResult};
use crate::list::AttachmentListView;
use crate::model::{Attachment, CreateAttachmentRequest, UploadFile};
use crate::station::StationConfig;
use crate::task::{TaskBoard, TaskId, TaskStatus, UploadTask};
use crate::validate::check_file;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a completed task stays on the board
    pub completed_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            completed_retention: Duration::from_millis(
                mp_core::config::DEFAULT_COMPLETED_RETENTION_MS,
            ),
        }
    }
}

impl QueueConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            completed_retention: config.completed_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    pub task_id: TaskId,
    pub file_name: String,
    pub error: String,
}

/// What happened to each file of one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub completed: Vec<Attachment>,
    pub failed: Vec<FailedUpload>,
    /// Files never sent because the queue shut down first
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Resolves once every file of a batch has settled. Dropping it does not
/// affect the uploads.
#[derive(Debug)]
pub struct BatchHandle {
    rx: oneshot::Receiver<BatchReport>,
}

impl BatchHandle {
    pub async fn wait(self) -> UploadResult<BatchReport> {
        self.rx.await.map_err(|_| UploadError::QueueClosed)
    }
}

/// A validated file with everything needed to send it again
#[derive(Debug, Clone)]
struct QueuedFile {
    file: UploadFile,
    identifier: String,
    station: Arc<StationConfig>,
}

struct Batch {
    files: Vec<QueuedFile>,
    reply: oneshot::Sender<BatchReport>,
}

struct Shared {
    board: TaskBoard,
    failed: Mutex<HashMap<TaskId, QueuedFile>>,
}

#[derive(Clone)]
pub struct UploadQueue {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Batch>,
    cancel: CancellationToken,
}

impl UploadQueue {
    /// Start the worker for `list`'s work order. Must be called from within
    /// a tokio runtime.
    pub fn spawn(
        api: Arc<dyn AttachmentApi>,
        list: Arc<AttachmentListView>,
        config: QueueConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            board: TaskBoard::new(),
            failed: Mutex::new(HashMap::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Worker {
            api,
            list,
            shared: shared.clone(),
            config,
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run(rx));

        Self { shared, tx, cancel }
    }

    pub fn board(&self) -> &TaskBoard {
        &self.shared.board
    }

    /// Queue validated files under `identifier`. Files that fail the
    /// station policy, or a blank identifier, refuse the whole batch before
    /// anything is queued.
    pub fn enqueue(
        &self,
        files: Vec<UploadFile>,
        identifier: &str,
        station: Arc<StationConfig>,
    ) -> UploadResult<BatchHandle> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(UploadError::MissingIdentifier);
        }

        let mut errors = ValidationErrors::new();
        for file in &files {
            if let Err(reason) = check_file(file, &station) {
                errors.add(file.name(), reason.to_string());
            }
        }
        if !errors.is_empty() {
            return Err(UploadError::Invalid(errors));
        }

        let files = files
            .into_iter()
            .map(|file| QueuedFile {
                file,
                identifier: identifier.to_string(),
                station: station.clone(),
            })
            .collect();
        self.submit(files)
    }

    /// Send a failed file again under a new task.
    pub fn retry(&self, task_id: TaskId) -> UploadResult<BatchHandle> {
        let queued = self
            .shared
            .failed
            .lock()
            .remove(&task_id)
            .ok_or(UploadError::NotRetryable(task_id))?;

        match self.submit(vec![queued.clone()]) {
            Ok(handle) => {
                self.shared.board.remove_if(task_id, TaskStatus::Error);
                debug!(task_id = %task_id, file = %queued.file.name(), "Retry queued");
                Ok(handle)
            }
            Err(e) => {
                self.shared.failed.lock().insert(task_id, queued);
                Err(e)
            }
        }
    }

    /// Remove a failed task from the board.
    pub fn dismiss(&self, task_id: TaskId) -> UploadResult<UploadTask> {
        self.shared.failed.lock().remove(&task_id);
        self.shared
            .board
            .remove_if(task_id, TaskStatus::Error)
            .ok_or(UploadError::NotRetryable(task_id))
    }

    /// Stop the worker once the current file has settled. Queued files that
    /// were not started are reported as skipped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    fn submit(&self, files: Vec<QueuedFile>) -> UploadResult<BatchHandle> {
        if self.is_closed() {
            return Err(UploadError::QueueClosed);
        }
        let (reply, rx) = oneshot::channel();
        let count = files.len();
        self.tx
            .send(Batch { files, reply })
            .map_err(|_| UploadError::QueueClosed)?;
        debug!(files = count, "Batch queued");
        Ok(BatchHandle { rx })
    }
}

struct Worker {
    api: Arc<dyn AttachmentApi>,
    list: Arc<AttachmentListView>,
    shared: Arc<Shared>,
    config: QueueConfig,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Batch>) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let report = self.process(batch.files).await;
            let _ = batch.reply.send(report);
        }

        rx.close();
        while let Some(batch) = rx.recv().await {
            let report = BatchReport {
                skipped: batch
                    .files
                    .iter()
                    .map(|q| q.file.name().to_string())
                    .collect(),
                ..Default::default()
            };
            let _ = batch.reply.send(report);
        }
        debug!(work_order_id = %self.list.work_order_id(), "Upload worker stopped");
    }

    async fn process(&self, files: Vec<QueuedFile>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut files = files.into_iter();

        while let Some(queued) = files.next() {
            if self.cancel.is_cancelled() {
                report.skipped.push(queued.file.name().to_string());
                report
                    .skipped
                    .extend(files.by_ref().map(|q| q.file.name().to_string()));
                break;
            }

            let file_name = queued.file.name().to_string();
            let task_id = self.shared.board.start(&file_name);
            match self.upload(task_id, &queued).await {
                Ok(attachment) => report.completed.push(attachment),
                Err(error) => {
                    self.shared.failed.lock().insert(task_id, queued);
                    report.failed.push(FailedUpload {
                        task_id,
                        file_name,
                        error,
                    });
                }
            }
        }

        report
    }

    #[instrument(skip(self, queued), fields(file = %queued.file.name()))]
    async fn upload(&self, task_id: TaskId, queued: &QueuedFile) -> Result<Attachment, String> {
        let kind = queued.station.resolve_kind(classify(queued.file.name()));
        let request = CreateAttachmentRequest {
            file: queued.file.clone(),
            category: queued.station.category.clone(),
            kind,
            cam_number: queued.identifier.clone(),
        };

        match self
            .api
            .create_attachment(self.list.work_order_id(), request)
            .await
        {
            Ok(attachment) => {
                info!(
                    task_id = %task_id,
                    filename = %attachment.filename,
                    kind = %attachment.kind,
                    "Attachment uploaded"
                );
                self.shared.board.complete(task_id);
                self.schedule_removal(task_id);

                if let Err(e) = self.list.refresh_and_notify().await {
                    warn!(task_id = %task_id, error = %e, "Failed to refresh attachments after upload");
                }
                Ok(attachment)
            }
            Err(e) => {
                let message = e.user_message();
                warn!(task_id = %task_id, error = %message, "Attachment upload failed");
                self.shared.board.fail(task_id, message.clone());
                Err(message)
            }
        }
    }

    fn schedule_removal(&self, task_id: TaskId) {
        let shared = self.shared.clone();
        let delay = self.config.completed_retention;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.board.remove_if(task_id, TaskStatus::Completed);
        });
    }
}

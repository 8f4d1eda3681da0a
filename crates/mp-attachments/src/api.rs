//! Attachment API collaborator
//!
//! The pipeline talks to the portal only through [`AttachmentApi`].
//! `mp-client` provides the HTTP implementation; [`MemoryAttachmentApi`]
//! keeps everything in process and records every call for tests and
//! offline runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use mp_core::{PortalError, PortalResult};
use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::model::{Attachment, AttachmentKind, CreateAttachmentRequest, StationCategory, UploadedBy};

/// Attachment endpoints of the portal, scoped by work order
#[async_trait]
pub trait AttachmentApi: Send + Sync {
    /// Full snapshot of a work order's attachments
    async fn list_attachments(&self, work_order_id: &str) -> PortalResult<Vec<Attachment>>;

    /// Upload one file with its station, kind and identifier
    async fn create_attachment(
        &self,
        work_order_id: &str,
        request: CreateAttachmentRequest,
    ) -> PortalResult<Attachment>;

    /// Delete by server-side filename
    async fn delete_attachment(&self, work_order_id: &str, filename: &str) -> PortalResult<()>;

    /// Fetch the stored bytes
    async fn download_attachment(&self, work_order_id: &str, filename: &str)
        -> PortalResult<Bytes>;
}

/// One recorded interaction with [`MemoryAttachmentApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    List {
        work_order_id: String,
    },
    CreateStarted {
        work_order_id: String,
        original_name: String,
        category: StationCategory,
        kind: AttachmentKind,
        cam_number: String,
    },
    CreateSettled {
        original_name: String,
        succeeded: bool,
    },
    Delete {
        work_order_id: String,
        filename: String,
    },
    Download {
        work_order_id: String,
        filename: String,
    },
}

#[derive(Debug, Default)]
struct FailurePlan {
    create: HashMap<String, String>,
    delete: Option<String>,
    list: Option<String>,
}

/// In-memory attachment API for testing and offline use
pub struct MemoryAttachmentApi {
    attachments: RwLock<BTreeMap<String, Vec<(Attachment, Bytes)>>>,
    calls: Mutex<Vec<ApiCall>>,
    failures: Mutex<FailurePlan>,
    latency: Duration,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemoryAttachmentApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAttachmentApi {
    pub fn new() -> Self {
        Self {
            attachments: RwLock::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(FailurePlan::default()),
            latency: Duration::ZERO,
            next_id: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every create call, so overlapping requests would be observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed an existing attachment.
    pub async fn insert(&self, work_order_id: &str, attachment: Attachment, data: Bytes) {
        let mut attachments = self.attachments.write().await;
        attachments
            .entry(work_order_id.to_string())
            .or_default()
            .push((attachment, data));
    }

    /// Make creates of `original_name` fail with `message`.
    pub fn fail_create(&self, original_name: impl Into<String>, message: impl Into<String>) {
        self.failures
            .lock()
            .create
            .insert(original_name.into(), message.into());
    }

    pub fn fail_delete(&self, message: impl Into<String>) {
        self.failures.lock().delete = Some(message.into());
    }

    pub fn fail_list(&self, message: impl Into<String>) {
        self.failures.lock().list = Some(message.into());
    }

    pub fn clear_failures(&self) {
        *self.failures.lock() = FailurePlan::default();
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    /// Recorded calls that change server state, in order.
    pub fn mutations(&self) -> Vec<ApiCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ApiCall::CreateStarted { .. } | ApiCall::Delete { .. }))
            .cloned()
            .collect()
    }

    /// Highest number of create requests that were ever in flight together.
    pub fn max_concurrent_creates(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AttachmentApi for MemoryAttachmentApi {
    async fn list_attachments(&self, work_order_id: &str) -> PortalResult<Vec<Attachment>> {
        self.record(ApiCall::List {
            work_order_id: work_order_id.to_string(),
        });
        if let Some(message) = self.failures.lock().list.clone() {
            return Err(PortalError::from_status(500, message));
        }

        let attachments = self.attachments.read().await;
        Ok(attachments
            .get(work_order_id)
            .map(|entries| entries.iter().map(|(a, _)| a.clone()).collect())
            .unwrap_or_default())
    }

    async fn create_attachment(
        &self,
        work_order_id: &str,
        request: CreateAttachmentRequest,
    ) -> PortalResult<Attachment> {
        let original_name = request.file.name().to_string();
        self.record(ApiCall::CreateStarted {
            work_order_id: work_order_id.to_string(),
            original_name: original_name.clone(),
            category: request.category.clone(),
            kind: request.kind.clone(),
            cam_number: request.cam_number.clone(),
        });

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = self.store_upload(work_order_id, request).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(ApiCall::CreateSettled {
            original_name,
            succeeded: result.is_ok(),
        });
        result
    }

    async fn delete_attachment(&self, work_order_id: &str, filename: &str) -> PortalResult<()> {
        self.record(ApiCall::Delete {
            work_order_id: work_order_id.to_string(),
            filename: filename.to_string(),
        });
        if let Some(message) = self.failures.lock().delete.clone() {
            return Err(PortalError::from_status(500, message));
        }

        let mut attachments = self.attachments.write().await;
        let entries = attachments
            .get_mut(work_order_id)
            .ok_or_else(|| PortalError::NotFound {
                entity: "work order",
                field: "id",
                value: work_order_id.to_string(),
            })?;
        let before = entries.len();
        entries.retain(|(a, _)| a.filename != filename);

        if entries.len() == before {
            return Err(PortalError::NotFound {
                entity: "attachment",
                field: "filename",
                value: filename.to_string(),
            });
        }
        Ok(())
    }

    async fn download_attachment(
        &self,
        work_order_id: &str,
        filename: &str,
    ) -> PortalResult<Bytes> {
        self.record(ApiCall::Download {
            work_order_id: work_order_id.to_string(),
            filename: filename.to_string(),
        });

        let attachments = self.attachments.read().await;
        attachments
            .get(work_order_id)
            .and_then(|entries| entries.iter().find(|(a, _)| a.filename == filename))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| PortalError::NotFound {
                entity: "attachment",
                field: "filename",
                value: filename.to_string(),
            })
    }
}

impl MemoryAttachmentApi {
    async fn store_upload(
        &self,
        work_order_id: &str,
        request: CreateAttachmentRequest,
    ) -> PortalResult<Attachment> {
        let injected = self.failures.lock().create.get(request.file.name()).cloned();
        if let Some(message) = injected {
            return Err(PortalError::from_status(500, message));
        }

        let data = request
            .file
            .read()
            .await
            .map_err(|e| PortalError::Internal(format!("failed to read file: {}", e)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let attachment = Attachment {
            filename: format!("{}-{}", id, request.file.name()),
            original_name: request.file.name().to_string(),
            category: request.category,
            kind: request.kind,
            size: data.len() as u64,
            uploaded_at: Utc::now(),
            uploaded_by: UploadedBy::Name("memory".to_string()),
            cam_number: Some(request.cam_number),
            description: None,
            approved_at: None,
            rejection_reason: None,
        };

        let mut attachments = self.attachments.write().await;
        attachments
            .entry(work_order_id.to_string())
            .or_default()
            .push((attachment.clone(), data));

        Ok(attachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UploadFile;

    fn request(name: &str) -> CreateAttachmentRequest {
        CreateAttachmentRequest {
            file: UploadFile::from_bytes(name.to_string(), &b"G04*"[..]),
            category: StationCategory::Intake,
            kind: AttachmentKind::Gerber,
            cam_number: "CAM-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let api = MemoryAttachmentApi::new();

        let created = api.create_attachment("wo-1", request("a.gbr")).await.unwrap();
        assert_eq!(created.original_name, "a.gbr");
        assert_eq!(created.size, 4);
        assert_eq!(created.cam_number.as_deref(), Some("CAM-1"));

        let listed = api.list_attachments("wo-1").await.unwrap();
        assert_eq!(listed, vec![created.clone()]);
        assert!(api.list_attachments("wo-2").await.unwrap().is_empty());

        let data = api
            .download_attachment("wo-1", &created.filename)
            .await
            .unwrap();
        assert_eq!(data, Bytes::from_static(b"G04*"));

        api.delete_attachment("wo-1", &created.filename).await.unwrap();
        assert!(api.list_attachments("wo-1").await.unwrap().is_empty());

        let again = api.delete_attachment("wo-1", &created.filename).await;
        assert!(matches!(again, Err(PortalError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_from_unknown_work_order() {
        let api = MemoryAttachmentApi::new();

        let err = api.delete_attachment("wo-9", "a.gbr").await.unwrap_err();
        assert!(matches!(
            err,
            PortalError::NotFound { entity: "work order", .. }
        ));
        assert!(api.attachments.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let api = MemoryAttachmentApi::new();
        api.fail_create("bad.gbr", "Disk full");
        api.fail_list("List unavailable");

        let err = api
            .create_attachment("wo-1", request("bad.gbr"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Disk full");
        assert!(api.list_attachments("wo-1").await.is_err());

        api.clear_failures();
        assert!(api.list_attachments("wo-1").await.unwrap().is_empty());

        assert_eq!(
            api.calls()[1],
            ApiCall::CreateSettled {
                original_name: "bad.gbr".to_string(),
                succeeded: false
            }
        );
    }
}

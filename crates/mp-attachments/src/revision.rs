//! Reupload workflow
//!
//! Replacing an attachment deletes the old file first and only then uploads
//! the new one. If the delete fails nothing is uploaded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::classify::all_extensions;
use crate::error::{ReuploadError, UploadError};
use crate::gate::{GateOutcome, MetadataGate};
use crate::list::AttachmentListView;
use crate::model::{Attachment, PendingUploadItem, UploadFile};
use crate::queue::{BatchHandle, UploadQueue};
use crate::station::StationConfig;
use crate::validate::check_file;

/// Asks the operator for one replacement file
#[async_trait]
pub trait FilePicker: Send + Sync {
    /// `accept` lists the allowed extensions without dots. `None` means the
    /// operator picked nothing.
    async fn pick_file(&self, accept: &[&str]) -> Option<UploadFile>;
}

#[derive(Debug)]
pub enum ReuploadOutcome {
    NoFileSelected,
    Cancelled,
    Queued {
        replaced: Attachment,
        identifier: String,
        handle: BatchHandle,
    },
}

pub struct RevisionController {
    station: Arc<StationConfig>,
    gate: Arc<MetadataGate>,
    queue: UploadQueue,
    list: Arc<AttachmentListView>,
    picker: Arc<dyn FilePicker>,
}

impl RevisionController {
    pub fn new(
        station: Arc<StationConfig>,
        gate: Arc<MetadataGate>,
        queue: UploadQueue,
        list: Arc<AttachmentListView>,
        picker: Arc<dyn FilePicker>,
    ) -> Self {
        Self {
            station,
            gate,
            queue,
            list,
            picker,
        }
    }

    /// Replace `existing` with a file chosen through the picker.
    #[instrument(skip(self, existing), fields(filename = %existing.filename))]
    pub async fn reupload(&self, existing: &Attachment) -> Result<ReuploadOutcome, ReuploadError> {
        let Some(file) = self.picker.pick_file(all_extensions()).await else {
            return Ok(ReuploadOutcome::NoFileSelected);
        };

        check_file(&file, &self.station).map_err(|reason| ReuploadError::Rejected {
            file_name: file.name().to_string(),
            reason,
        })?;

        let staged = vec![PendingUploadItem::replacing(file, existing.clone())];
        let outcome = self
            .gate
            .request_metadata(
                staged,
                &self.station.identifier_label,
                existing.cam_number.as_deref(),
            )
            .await?;

        let (identifier, items) = match outcome {
            GateOutcome::Cancelled => return Ok(ReuploadOutcome::Cancelled),
            GateOutcome::Confirmed { identifier, items } => (identifier, items),
        };

        // The old file must survive when the replacement has nowhere to go.
        if self.queue.is_closed() {
            warn!("Reupload aborted, upload queue is closed");
            return Err(UploadError::QueueClosed.into());
        }

        self.list
            .delete(&existing.filename)
            .await
            .map_err(|source| {
                warn!(error = %source, "Reupload aborted, previous file was not deleted");
                ReuploadError::DeleteFailed {
                    filename: existing.filename.clone(),
                    source,
                }
            })?;

        let files: Vec<UploadFile> = items.into_iter().map(|item| item.file).collect();
        let handle = self
            .queue
            .enqueue(files, &identifier, self.station.clone())?;
        info!(identifier = %identifier, "Replacement queued");

        Ok(ReuploadOutcome::Queued {
            replaced: existing.clone(),
            identifier,
            handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, AttachmentApi, MemoryAttachmentApi};
    use crate::list::AttachmentFilter;
    use crate::model::{AttachmentKind, StationCategory, UploadedBy};
    use crate::queue::QueueConfig;
    use bytes::Bytes;
    use parking_lot::Mutex;

    const WO: &str = "wo-7";

    struct OneShotPicker {
        file: Mutex<Option<UploadFile>>,
        offered: Mutex<Vec<String>>,
    }

    impl OneShotPicker {
        fn new(file: Option<UploadFile>) -> Arc<Self> {
            Arc::new(Self {
                file: Mutex::new(file),
                offered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FilePicker for OneShotPicker {
        async fn pick_file(&self, accept: &[&str]) -> Option<UploadFile> {
            *self.offered.lock() = accept.iter().map(|s| s.to_string()).collect();
            self.file.lock().take()
        }
    }

    fn old_pdf() -> Attachment {
        Attachment {
            filename: "old.pdf".to_string(),
            original_name: "old.pdf".to_string(),
            category: StationCategory::Intake,
            kind: AttachmentKind::JobCard,
            size: 3,
            uploaded_at: chrono::Utc::now(),
            uploaded_by: UploadedBy::Id(3),
            cam_number: Some("CAM-5".to_string()),
            description: None,
            approved_at: None,
            rejection_reason: None,
        }
    }

    struct Fixture {
        api: Arc<MemoryAttachmentApi>,
        gate: Arc<MetadataGate>,
        queue: UploadQueue,
        controller: RevisionController,
    }

    async fn fixture(picked: Option<UploadFile>) -> Fixture {
        let api = Arc::new(MemoryAttachmentApi::new());
        api.insert(WO, old_pdf(), Bytes::from_static(b"old")).await;

        let station = Arc::new(StationConfig::intake());
        let gate = Arc::new(MetadataGate::new());
        let list = Arc::new(AttachmentListView::new(
            api.clone(),
            WO,
            AttachmentFilter::all(),
        ));
        let queue = UploadQueue::spawn(api.clone(), list.clone(), QueueConfig::default());
        let controller = RevisionController::new(
            station,
            gate.clone(),
            queue.clone(),
            list,
            OneShotPicker::new(picked),
        );
        Fixture {
            api,
            gate,
            queue,
            controller,
        }
    }

    fn new_pdf() -> UploadFile {
        UploadFile::from_bytes("new.pdf", &b"%PDF"[..])
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_happens_before_create() {
        let fx = fixture(Some(new_pdf())).await;
        let existing = old_pdf();

        let (outcome, prefill) = tokio::join!(fx.controller.reupload(&existing), async {
            let prompt = fx.gate.next_prompt().await.unwrap();
            fx.gate.confirm(&prompt.prefill).unwrap();
            prompt.prefill
        });
        assert_eq!(prefill, "CAM-5");

        let handle = match outcome.unwrap() {
            ReuploadOutcome::Queued {
                replaced,
                identifier,
                handle,
            } => {
                assert_eq!(replaced.filename, "old.pdf");
                assert_eq!(identifier, "CAM-5");
                handle
            }
            other => panic!("expected queued reupload, got {:?}", other),
        };
        let report = handle.wait().await.unwrap();
        assert_eq!(report.completed.len(), 1);

        assert_eq!(
            fx.api.mutations(),
            vec![
                ApiCall::Delete {
                    work_order_id: WO.to_string(),
                    filename: "old.pdf".to_string(),
                },
                ApiCall::CreateStarted {
                    work_order_id: WO.to_string(),
                    original_name: "new.pdf".to_string(),
                    category: StationCategory::Intake,
                    kind: AttachmentKind::JobCard,
                    cam_number: "CAM-5".to_string(),
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_blocks_create() {
        let fx = fixture(Some(new_pdf())).await;
        fx.api.fail_delete("Permission denied");
        let existing = old_pdf();

        let (outcome, _) = tokio::join!(fx.controller.reupload(&existing), async {
            fx.gate.next_prompt().await.unwrap();
            fx.gate.confirm("CAM-6").unwrap();
        });

        match outcome {
            Err(ReuploadError::DeleteFailed { filename, source }) => {
                assert_eq!(filename, "old.pdf");
                assert_eq!(source.user_message(), "Permission denied");
            }
            other => panic!("expected delete failure, got {:?}", other),
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!fx
            .api
            .calls()
            .iter()
            .any(|c| matches!(c, ApiCall::CreateStarted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_queue_keeps_old_file() {
        let fx = fixture(Some(new_pdf())).await;
        fx.queue.shutdown();
        let existing = old_pdf();

        let (outcome, _) = tokio::join!(fx.controller.reupload(&existing), async {
            let prompt = fx.gate.next_prompt().await.unwrap();
            fx.gate.confirm(&prompt.prefill).unwrap();
        });

        assert!(matches!(
            outcome,
            Err(ReuploadError::Upload(UploadError::QueueClosed))
        ));
        assert!(fx.api.mutations().is_empty());
        let remaining = fx.api.list_attachments(WO).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].filename, "old.pdf");
    }

    #[tokio::test]
    async fn test_cancel_contacts_nothing() {
        let fx = fixture(Some(new_pdf())).await;
        let existing = old_pdf();

        let (outcome, _) = tokio::join!(fx.controller.reupload(&existing), async {
            fx.gate.next_prompt().await.unwrap();
            fx.gate.cancel().unwrap();
        });

        assert!(matches!(outcome.unwrap(), ReuploadOutcome::Cancelled));
        assert!(fx.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_file_picked() {
        let fx = fixture(None).await;
        let outcome = fx.controller.reupload(&old_pdf()).await.unwrap();
        assert!(matches!(outcome, ReuploadOutcome::NoFileSelected));
        assert!(fx.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_picker_offers_full_allow_list() {
        let picker = OneShotPicker::new(None);
        let api = Arc::new(MemoryAttachmentApi::new());
        let list = Arc::new(AttachmentListView::new(api.clone(), WO, AttachmentFilter::all()));
        let controller = RevisionController::new(
            Arc::new(StationConfig::nc_drill()),
            Arc::new(MetadataGate::new()),
            UploadQueue::spawn(api, list.clone(), QueueConfig::default()),
            list,
            picker.clone(),
        );

        controller.reupload(&old_pdf()).await.unwrap();
        let offered = picker.offered.lock().clone();
        assert_eq!(offered.len(), all_extensions().len());
        assert!(offered.contains(&"pdf".to_string()));
        assert!(offered.contains(&"png".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_replacement_never_opens_gate() {
        let fx = fixture(Some(UploadFile::from_bytes("new.exe", &b"MZ"[..]))).await;

        let err = fx.controller.reupload(&old_pdf()).await.unwrap_err();
        assert!(matches!(err, ReuploadError::Rejected { ref file_name, .. } if file_name == "new.exe"));
        assert_eq!(fx.gate.state(), crate::gate::GateState::Idle);
        assert!(fx.api.calls().is_empty());
    }
}

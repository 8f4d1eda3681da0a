//! Upload panel for one station
//!
//! Ties the pipeline together: validate the chosen files, ask for the
//! station identifier, then queue what passed.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::api::AttachmentApi;
use crate::error::UploadResult;
use crate::gate::{GateOutcome, MetadataGate};
use crate::list::{AttachmentFilter, AttachmentListView, AttachmentSink};
use crate::model::{PendingUploadItem, UploadFile};
use crate::queue::{BatchHandle, QueueConfig, UploadQueue};
use crate::revision::{FilePicker, RevisionController};
use crate::station::StationConfig;
use crate::validate::{validate, RejectedFile};

#[derive(Debug)]
pub enum UploadStatus {
    /// Every file was rejected; the gate was never opened
    NothingAccepted,
    Cancelled,
    Queued {
        identifier: String,
        handle: BatchHandle,
    },
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub rejected: Vec<RejectedFile>,
    /// Single message covering all rejected files
    pub rejection_message: Option<String>,
    pub status: UploadStatus,
}

pub struct UploadPanel {
    station: Arc<StationConfig>,
    gate: Arc<MetadataGate>,
    queue: UploadQueue,
    list: Arc<AttachmentListView>,
}

impl UploadPanel {
    /// Build the panel and start its queue worker. Must be called from
    /// within a tokio runtime.
    pub fn new(
        api: Arc<dyn AttachmentApi>,
        work_order_id: impl Into<String>,
        station: StationConfig,
        config: QueueConfig,
        sink: Option<Arc<dyn AttachmentSink>>,
    ) -> Self {
        let mut list =
            AttachmentListView::new(api.clone(), work_order_id, AttachmentFilter::for_station(&station));
        if let Some(sink) = sink {
            list = list.with_sink(sink);
        }
        let list = Arc::new(list);
        let queue = UploadQueue::spawn(api, list.clone(), config);

        Self {
            station: Arc::new(station),
            gate: Arc::new(MetadataGate::new()),
            queue,
            list,
        }
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    pub fn gate(&self) -> &Arc<MetadataGate> {
        &self.gate
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    pub fn list(&self) -> &Arc<AttachmentListView> {
        &self.list
    }

    /// Reupload controller sharing this panel's gate, queue and list.
    pub fn reuploader(&self, picker: Arc<dyn FilePicker>) -> RevisionController {
        RevisionController::new(
            self.station.clone(),
            self.gate.clone(),
            self.queue.clone(),
            self.list.clone(),
            picker,
        )
    }

    #[instrument(skip(self, files), fields(station = %self.station.category, files = files.len()))]
    pub async fn upload_files(&self, files: Vec<UploadFile>) -> UploadResult<UploadOutcome> {
        let report = validate(files, &self.station);
        let rejection_message = report.aggregate_message();
        if let Some(message) = &rejection_message {
            warn!(rejected = report.rejected.len(), "{}", message);
        }

        if report.accepted.is_empty() {
            return Ok(UploadOutcome {
                rejected: report.rejected,
                rejection_message,
                status: UploadStatus::NothingAccepted,
            });
        }

        let items = report
            .accepted
            .into_iter()
            .map(PendingUploadItem::new)
            .collect();
        let outcome = self
            .gate
            .request_metadata(items, &self.station.identifier_label, None)
            .await?;

        let status = match outcome {
            GateOutcome::Cancelled => UploadStatus::Cancelled,
            GateOutcome::Confirmed { identifier, items } => {
                let files: Vec<UploadFile> = items.into_iter().map(|item| item.file).collect();
                let count = files.len();
                let handle = self
                    .queue
                    .enqueue(files, &identifier, self.station.clone())?;
                info!(identifier = %identifier, files = count, "Upload batch queued");
                UploadStatus::Queued { identifier, handle }
            }
        };

        Ok(UploadOutcome {
            rejected: report.rejected,
            rejection_message,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, MemoryAttachmentApi};
    use crate::gate::GateState;
    use crate::model::{Attachment, AttachmentKind, StationCategory};
    use parking_lot::Mutex;

    fn panel(api: Arc<MemoryAttachmentApi>, station: StationConfig) -> UploadPanel {
        UploadPanel::new(api, "wo-9", station, QueueConfig::default(), None)
    }

    #[tokio::test]
    async fn test_oversized_only_batch_never_contacts_server() {
        let api = Arc::new(MemoryAttachmentApi::new());
        let panel = panel(api.clone(), StationConfig::intake());

        let huge = UploadFile::from_bytes("panel.gbr", vec![0u8; 60 * 1024 * 1024]);
        let outcome = panel.upload_files(vec![huge]).await.unwrap();

        assert!(matches!(outcome.status, UploadStatus::NothingAccepted));
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(
            outcome.rejection_message.as_deref(),
            Some("1 file rejected: panel.gbr (File too large (max 50MB))")
        );
        assert_eq!(panel.gate().state(), GateState::Idle);
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_uploads_accepted_files() {
        let api = Arc::new(MemoryAttachmentApi::new());
        let notified: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = {
            let notified = notified.clone();
            move |all: &[Attachment]| notified.lock().push(all.len())
        };
        let panel = UploadPanel::new(
            api.clone(),
            "wo-9",
            StationConfig::intake(),
            QueueConfig::default(),
            Some(Arc::new(sink) as Arc<dyn AttachmentSink>),
        );

        let files = vec![
            UploadFile::from_bytes("panel.gbr", &b"G04*"[..]),
            UploadFile::from_bytes("virus.exe", &b"MZ"[..]),
        ];
        let (outcome, label) = tokio::join!(panel.upload_files(files), async {
            let prompt = panel.gate().next_prompt().await.unwrap();
            assert_eq!(prompt.file_names, vec!["panel.gbr"]);
            panel.gate().confirm("CAM-1007").unwrap();
            prompt.label
        });
        assert_eq!(label, "CAM Number");

        let outcome = outcome.unwrap();
        assert_eq!(
            outcome.rejection_message.as_deref(),
            Some("1 file rejected: virus.exe (Unsupported file type)")
        );
        let report = match outcome.status {
            UploadStatus::Queued { identifier, handle } => {
                assert_eq!(identifier, "CAM-1007");
                handle.wait().await.unwrap()
            }
            other => panic!("expected queued upload, got {:?}", other),
        };

        let created = &report.completed[0];
        assert_eq!(created.kind, AttachmentKind::Gerber);
        assert_eq!(created.category, StationCategory::Intake);
        assert_eq!(created.cam_number.as_deref(), Some("CAM-1007"));
        assert_eq!(*notified.lock(), vec![1]);
        assert_eq!(panel.list().displayed().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_gate_uploads_nothing() {
        let api = Arc::new(MemoryAttachmentApi::new());
        let panel = panel(api.clone(), StationConfig::phototools());

        let (outcome, _) = tokio::join!(
            panel.upload_files(vec![UploadFile::from_bytes("top.gtl", &b"G04*"[..])]),
            async {
                let prompt = panel.gate().next_prompt().await.unwrap();
                assert_eq!(prompt.label, "Film Number");
                panel.gate().cancel().unwrap();
            }
        );

        assert!(matches!(outcome.unwrap().status, UploadStatus::Cancelled));
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_view_filters_to_station() {
        let api = Arc::new(MemoryAttachmentApi::new());
        let intake = panel(api.clone(), StationConfig::intake());
        let drill = panel(api.clone(), StationConfig::nc_drill());

        let (outcome, _) = tokio::join!(
            drill.upload_files(vec![UploadFile::from_bytes("holes.gbr", &b"M48"[..])]),
            async {
                drill.gate().next_prompt().await.unwrap();
                drill.gate().confirm("NC-12").unwrap();
            }
        );
        if let UploadStatus::Queued { handle, .. } = outcome.unwrap().status {
            let report = handle.wait().await.unwrap();
            assert_eq!(report.completed[0].kind, AttachmentKind::DrillFile);
        } else {
            panic!("expected queued upload");
        }

        assert_eq!(drill.list().displayed().len(), 1);
        assert!(intake.list().refresh().await.unwrap().is_empty());
        assert!(api
            .mutations()
            .iter()
            .all(|c| matches!(c, ApiCall::CreateStarted { category: StationCategory::NcDrill, .. })));
    }
}

//! # mp-attachments
//!
//! Attachment upload and revision pipeline for Manufacturing Portal RS.
//!
//! ## Features
//!
//! - File classification by extension and kind resolution per station
//! - Per-station type and size validation with partial batch acceptance
//! - A metadata gate requiring the station identifier before any upload
//! - A sequential upload queue with independent per-file task state
//! - Delete-then-replace reuploads
//! - A refreshing, filtered attachment list with a parent notification hook
//!
//! ## Example
//!
//! ```rust,ignore
//! use mp_attachments::{MemoryAttachmentApi, QueueConfig, StationConfig, UploadFile, UploadPanel};
//! use std::sync::Arc;
//!
//! let api = Arc::new(MemoryAttachmentApi::new());
//! let panel = UploadPanel::new(api, "wo-17", StationConfig::intake(), QueueConfig::default(), None);
//!
//! // Somewhere else, a dialog answers the gate:
//! // panel.gate().confirm("CAM-1007")?;
//! let outcome = panel
//!     .upload_files(vec![UploadFile::from_bytes("panel.gbr", data)])
//!     .await?;
//! ```

pub mod api;
pub mod classify;
pub mod error;
pub mod gate;
pub mod list;
pub mod model;
pub mod panel;
pub mod queue;
pub mod revision;
pub mod station;
pub mod task;
pub mod validate;

pub use api::{ApiCall, AttachmentApi, MemoryAttachmentApi};
pub use classify::{all_extensions, classify, resolve_kind, FileCategory};
pub use error::{ReuploadError, UploadError, UploadResult};
pub use gate::{GateError, GateOutcome, GatePrompt, GateState, MetadataGate};
pub use list::{AttachmentFilter, AttachmentListView, AttachmentSink};
pub use model::{
    Attachment, AttachmentKind, CreateAttachmentRequest, FileSource, PendingUploadItem,
    StationCategory, UploadFile, UploadedBy,
};
pub use panel::{UploadOutcome, UploadPanel, UploadStatus};
pub use queue::{BatchHandle, BatchReport, FailedUpload, QueueConfig, UploadQueue};
pub use revision::{FilePicker, ReuploadOutcome, RevisionController};
pub use station::{StationCatalog, StationConfig};
pub use task::{TaskBoard, TaskId, TaskSnapshot, TaskStatus, UploadTask};
pub use validate::{check_file, validate, RejectedFile, RejectionReason, ValidationReport};

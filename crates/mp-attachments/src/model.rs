//! Attachment Model
//!
//! Client-side view of work-order attachments and of the files an operator
//! stages for upload.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{classify, FileCategory};

/// Station scope of an attachment (which upload surface produced it)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StationCategory {
    Intake,
    NcDrill,
    Phototools,
    Inspection,
    Other(String),
}

impl StationCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Intake => "intake",
            Self::NcDrill => "nc_drill",
            Self::Phototools => "phototools",
            Self::Inspection => "inspection",
            Self::Other(s) => s,
        }
    }

    /// Kind forced by single-purpose stations, regardless of file extension.
    pub fn default_kind_override(&self) -> Option<AttachmentKind> {
        match self {
            Self::NcDrill => Some(AttachmentKind::DrillFile),
            Self::Phototools => Some(AttachmentKind::Film),
            _ => None,
        }
    }
}

impl From<String> for StationCategory {
    fn from(s: String) -> Self {
        match s.as_str() {
            "intake" => Self::Intake,
            "nc_drill" => Self::NcDrill,
            "phototools" => Self::Phototools,
            "inspection" => Self::Inspection,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for StationCategory {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<StationCategory> for String {
    fn from(category: StationCategory) -> Self {
        category.as_str().to_string()
    }
}

impl std::fmt::Display for StationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted classification tag used for downstream filtering and approval
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttachmentKind {
    DrillFile,
    Gerber,
    Spec,
    JobCard,
    Film,
    InspectionImage,
    Other(String),
}

impl AttachmentKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::DrillFile => "drill_file",
            Self::Gerber => "gerber",
            Self::Spec => "spec",
            Self::JobCard => "job_card",
            Self::Film => "film",
            Self::InspectionImage => "inspection_image",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for AttachmentKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "drill_file" => Self::DrillFile,
            "gerber" => Self::Gerber,
            "spec" => Self::Spec,
            "job_card" => Self::JobCard,
            "film" => Self::Film,
            "inspection_image" => Self::InspectionImage,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for AttachmentKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<AttachmentKind> for String {
    fn from(kind: AttachmentKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uploader reference: the API returns either a user id or a display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadedBy {
    Id(i64),
    Name(String),
}

impl std::fmt::Display for UploadedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "user #{}", id),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// An attachment record as returned by the portal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Server-side filename, unique per work order
    pub filename: String,
    /// Name of the file as the operator uploaded it
    pub original_name: String,
    pub category: StationCategory,
    pub kind: AttachmentKind,
    /// File size in bytes
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: UploadedBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cam_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl Attachment {
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection_reason.is_some()
    }

    /// Get file extension of the original name
    pub fn extension(&self) -> Option<&str> {
        if !self.original_name.contains('.') {
            return None;
        }
        self.original_name
            .rsplit('.')
            .next()
            .filter(|ext| ext.len() <= 10 && !ext.is_empty())
    }

    /// Human-readable file size
    pub fn human_size(&self) -> String {
        human_size(self.size)
    }
}

pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let size = bytes as f64;
    let base = 1024.0_f64;
    let i = (size.ln() / base.ln()).floor() as usize;
    let i = i.min(UNITS.len() - 1);

    let value = size / base.powi(i as i32);
    format!("{:.1} {}", value, UNITS[i])
}

/// Where the bytes of a staged file live
#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file chosen by the operator, not yet sent anywhere
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    size: u64,
    source: FileSource,
}

impl UploadFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    /// Stage a file from disk. Only metadata is read here; the content is
    /// read when the upload request is built.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid file name: {}", path.display()),
                )
            })?
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn category(&self) -> FileCategory {
        classify(&self.name)
    }

    /// MIME type guessed from the file name
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .to_string()
    }

    pub async fn read(&self) -> std::io::Result<Bytes> {
        match &self.source {
            FileSource::Memory(data) => Ok(data.clone()),
            FileSource::Path(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

/// A staged file waiting for the metadata gate
#[derive(Debug, Clone)]
pub struct PendingUploadItem {
    pub file: UploadFile,
    /// Attachment this file supersedes, when part of a reupload
    pub is_replacement_for: Option<Attachment>,
}

impl PendingUploadItem {
    pub fn new(file: UploadFile) -> Self {
        Self {
            file,
            is_replacement_for: None,
        }
    }

    pub fn replacing(file: UploadFile, existing: Attachment) -> Self {
        Self {
            file,
            is_replacement_for: Some(existing),
        }
    }
}

/// The multipart payload of a create-attachment call
#[derive(Debug, Clone)]
pub struct CreateAttachmentRequest {
    pub file: UploadFile,
    pub category: StationCategory,
    pub kind: AttachmentKind,
    /// Operator-entered identifier, already trimmed
    pub cam_number: String,
}

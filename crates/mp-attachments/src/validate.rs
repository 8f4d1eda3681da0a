//! Batch validation against a station's upload policy
//!
//! Files are judged one by one; a bad file never blocks its siblings.

use mp_core::ValidationErrors;
use tracing::debug;

use crate::classify::{classify, FileCategory};
use crate::model::{human_size, UploadFile};
use crate::station::StationConfig;

const MIB: u64 = 1024 * 1024;

/// Why a file was turned away before reaching the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    UnsupportedType,
    TooLarge { max: u64 },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType => f.write_str("Unsupported file type"),
            Self::TooLarge { max } if max % MIB == 0 => {
                write!(f, "File too large (max {}MB)", max / MIB)
            }
            Self::TooLarge { max } => write!(f, "File too large (max {})", human_size(*max)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RejectedFile {
    pub file: UploadFile,
    pub reason: RejectionReason,
}

/// Outcome of validating one batch; `accepted` and `rejected` together hold
/// every input file exactly once, each in input order.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub accepted: Vec<UploadFile>,
    pub rejected: Vec<RejectedFile>,
}

impl ValidationReport {
    pub fn has_rejections(&self) -> bool {
        !self.rejected.is_empty()
    }

    /// Rejections keyed by file name.
    pub fn errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for rejected in &self.rejected {
            errors.add(rejected.file.name(), rejected.reason.to_string());
        }
        errors
    }

    /// One message covering every rejected file, or `None` when all passed.
    pub fn aggregate_message(&self) -> Option<String> {
        if self.rejected.is_empty() {
            return None;
        }

        let details = self
            .rejected
            .iter()
            .map(|r| format!("{} ({})", r.file.name(), r.reason))
            .collect::<Vec<_>>()
            .join(", ");
        let noun = if self.rejected.len() == 1 { "file" } else { "files" };
        Some(format!("{} {} rejected: {}", self.rejected.len(), noun, details))
    }
}

/// Check one file against the station policy.
pub fn check_file(file: &UploadFile, station: &StationConfig) -> Result<(), RejectionReason> {
    if classify(file.name()) == FileCategory::Unknown {
        return Err(RejectionReason::UnsupportedType);
    }
    if file.size() > station.max_file_size {
        return Err(RejectionReason::TooLarge {
            max: station.max_file_size,
        });
    }
    Ok(())
}

/// Split a batch into accepted and rejected files.
pub fn validate(files: Vec<UploadFile>, station: &StationConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    for file in files {
        match check_file(&file, station) {
            Ok(()) => report.accepted.push(file),
            Err(reason) => {
                debug!(file = %file.name(), size = file.size(), reason = %reason, "File rejected");
                report.rejected.push(RejectedFile { file, reason });
            }
        }
    }

    report
}

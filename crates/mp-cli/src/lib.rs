//! Terminal plumbing for the `mp` binary: logging setup, answering the
//! metadata gate from stdin, and picking replacement files from disk.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use mp_attachments::{
    classify, FilePicker, GateError, MetadataGate, StationConfig, UploadFile,
};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

/// Initialize tracing for the CLI. Logs go to stderr so stdout stays JSON.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,mp_attachments=debug,mp_client=debug")
            }),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// How the gate was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAnswer {
    Confirmed(String),
    Cancelled,
}

/// Answer the next metadata prompt. A preset identifier is tried first;
/// after that lines are read from `input`. An empty line accepts the
/// prefill when there is one and otherwise asks again. End of input
/// cancels.
pub async fn answer_gate<R, W>(
    gate: &MetadataGate,
    preset: Option<String>,
    mut input: R,
    mut out: W,
) -> std::io::Result<GateAnswer>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut preset = preset;

    loop {
        let Some(prompt) = gate.next_prompt().await else {
            return Ok(GateAnswer::Cancelled);
        };

        let value = match preset.take() {
            Some(value) => value,
            None => {
                if let Some(message) = &prompt.message {
                    writeln!(out, "{}", message)?;
                } else {
                    if let Some(replacing) = &prompt.replacing {
                        writeln!(out, "Replacing {}", replacing)?;
                    }
                    writeln!(out, "Files: {}", prompt.file_names.join(", "))?;
                }
                if prompt.prefill.is_empty() {
                    write!(out, "{}: ", prompt.label)?;
                } else {
                    write!(out, "{} [{}]: ", prompt.label, prompt.prefill)?;
                }
                out.flush()?;

                let mut line = String::new();
                if input.read_line(&mut line).await? == 0 {
                    let _ = gate.cancel();
                    return Ok(GateAnswer::Cancelled);
                }
                if line.trim().is_empty() {
                    prompt.prefill.clone()
                } else {
                    line
                }
            }
        };

        match gate.confirm(&value) {
            Ok(identifier) => return Ok(GateAnswer::Confirmed(identifier)),
            Err(GateError::EmptyIdentifier { .. }) => continue,
            Err(_) => return Ok(GateAnswer::Cancelled),
        }
    }
}

/// Picks one fixed path, honouring the picker's extension filter.
pub struct PathPicker {
    path: PathBuf,
}

impl PathPicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FilePicker for PathPicker {
    async fn pick_file(&self, accept: &[&str]) -> Option<UploadFile> {
        let file = match UploadFile::from_path(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot open replacement file");
                return None;
            }
        };

        let extension = classify::extension_of(file.name()).unwrap_or_default();
        if !accept.contains(&extension.as_str()) {
            warn!(file = %file.name(), "Replacement file type is not accepted");
            return None;
        }
        Some(file)
    }
}

/// Station as printed by `mp stations`
#[derive(Debug, Serialize)]
pub struct StationSummary {
    pub category: String,
    pub identifier_label: String,
    pub accept: String,
    pub max_file_size: u64,
    pub kind_override: Option<String>,
}

impl From<&StationConfig> for StationSummary {
    fn from(station: &StationConfig) -> Self {
        Self {
            category: station.category.to_string(),
            identifier_label: station.identifier_label.clone(),
            accept: station.accept_filter(),
            max_file_size: station.max_file_size,
            kind_override: station.kind_override.as_ref().map(|k| k.to_string()),
        }
    }
}

/// Classification of one file name, optionally at a station
#[derive(Debug, Serialize)]
pub struct Classification {
    pub file: String,
    pub category: classify::FileCategory,
    pub kind: Option<String>,
}

pub fn classify_name(name: &str, station: Option<&StationConfig>) -> Classification {
    let category = classify::classify(name);
    Classification {
        file: name.to_string(),
        category,
        kind: station.map(|s| s.resolve_kind(category).to_string()),
    }
}

//! Metadata gate
//!
//! Nothing is uploaded until the operator has entered the station's
//! identifier (CAM, Film or NC Drill number). The gate is a small state
//! machine shared by fresh uploads and reuploads:
//!
//! ```text
//! Idle -> AwaitingInput -> Confirmed
//!                       \-> Cancelled
//! ```
//!
//! The requesting side awaits [`MetadataGate::request_metadata`]; whoever
//! plays the dialog watches [`MetadataGate::subscribe`] and answers with
//! [`MetadataGate::confirm`] or [`MetadataGate::cancel`].

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::model::PendingUploadItem;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("{label} is required")]
    EmptyIdentifier { label: String },
    #[error("Metadata gate is already awaiting input")]
    Busy,
    #[error("Metadata gate is not awaiting input")]
    NotAwaitingInput,
    #[error("No files staged for upload")]
    NothingStaged,
}

/// What the dialog shows while awaiting input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePrompt {
    /// Identifier field label, taken from the station
    pub label: String,
    /// Initial field value
    pub prefill: String,
    pub file_names: Vec<String>,
    /// Server filename of the attachment being replaced, for reuploads
    pub replacing: Option<String>,
    /// Validation message after an empty submission
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Idle,
    AwaitingInput(GatePrompt),
    Confirmed { identifier: String },
    Cancelled,
}

/// Result handed back to the requester
#[derive(Debug)]
pub enum GateOutcome {
    Confirmed {
        identifier: String,
        items: Vec<PendingUploadItem>,
    },
    Cancelled,
}

struct PendingRequest {
    id: u64,
    label: String,
    items: Vec<PendingUploadItem>,
    responder: oneshot::Sender<GateOutcome>,
}

pub struct MetadataGate {
    pending: Mutex<Option<PendingRequest>>,
    state: watch::Sender<GateState>,
    next_request: AtomicU64,
}

/// Withdraws the request when its requester stops waiting.
struct Withdraw<'a> {
    gate: &'a MetadataGate,
    id: u64,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        let mut pending = self.gate.pending.lock();
        if pending.as_ref().is_some_and(|p| p.id == self.id) {
            *pending = None;
            debug!("Metadata request abandoned");
            self.gate.state.send_replace(GateState::Idle);
        }
    }
}

impl Default for MetadataGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Idle);
        Self {
            pending: Mutex::new(None),
            state,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// Stage `items` and wait for the operator. The replacement target, if
    /// any, is read from the items themselves.
    pub async fn request_metadata(
        &self,
        items: Vec<PendingUploadItem>,
        label: &str,
        prefill: Option<&str>,
    ) -> Result<GateOutcome, GateError> {
        if items.is_empty() {
            return Err(GateError::NothingStaged);
        }

        let (receiver, id) = {
            let mut pending = self.pending.lock();
            // A requester that went away leaves a closed responder behind.
            if pending.as_ref().is_some_and(|p| !p.responder.is_closed()) {
                return Err(GateError::Busy);
            }

            let prompt = GatePrompt {
                label: label.to_string(),
                prefill: prefill.unwrap_or_default().to_string(),
                file_names: items.iter().map(|i| i.file.name().to_string()).collect(),
                replacing: items
                    .iter()
                    .find_map(|i| i.is_replacement_for.as_ref())
                    .map(|a| a.filename.clone()),
                message: None,
            };

            let (responder, receiver) = oneshot::channel();
            let id = self.next_request.fetch_add(1, Ordering::Relaxed);
            *pending = Some(PendingRequest {
                id,
                label: label.to_string(),
                items,
                responder,
            });

            debug!(label = %prompt.label, files = prompt.file_names.len(), "Awaiting metadata");
            self.state.send_replace(GateState::AwaitingInput(prompt));
            (receiver, id)
        };

        let _withdraw = Withdraw { gate: self, id };
        // A dropped responder only happens if the gate itself goes away.
        Ok(receiver.await.unwrap_or(GateOutcome::Cancelled))
    }

    /// Submit the identifier. Blank input keeps the gate open with a
    /// validation message.
    pub fn confirm(&self, input: &str) -> Result<String, GateError> {
        let mut guard = self.pending.lock();
        let request = guard.take().ok_or(GateError::NotAwaitingInput)?;
        if request.responder.is_closed() {
            drop(guard);
            self.state.send_replace(GateState::Idle);
            return Err(GateError::NotAwaitingInput);
        }

        let identifier = input.trim().to_string();
        if identifier.is_empty() {
            let label = request.label.clone();
            *guard = Some(request);
            let message = format!("{} is required", label);
            self.state.send_modify(|state| {
                if let GateState::AwaitingInput(prompt) = state {
                    prompt.message = Some(message);
                }
            });
            return Err(GateError::EmptyIdentifier { label });
        }
        drop(guard);

        debug!(identifier = %identifier, "Metadata confirmed");
        self.state.send_replace(GateState::Confirmed {
            identifier: identifier.clone(),
        });
        let delivered = request.responder.send(GateOutcome::Confirmed {
            identifier: identifier.clone(),
            items: request.items,
        });
        if delivered.is_err() {
            self.state.send_replace(GateState::Idle);
            return Err(GateError::NotAwaitingInput);
        }
        Ok(identifier)
    }

    /// Abandon the staged files and any replacement target.
    pub fn cancel(&self) -> Result<(), GateError> {
        let request = self
            .pending
            .lock()
            .take()
            .ok_or(GateError::NotAwaitingInput)?;

        if request.responder.is_closed() {
            self.state.send_replace(GateState::Idle);
            return Err(GateError::NotAwaitingInput);
        }

        debug!(files = request.items.len(), "Metadata request cancelled");
        self.state.send_replace(GateState::Cancelled);
        if request.responder.send(GateOutcome::Cancelled).is_err() {
            self.state.send_replace(GateState::Idle);
            return Err(GateError::NotAwaitingInput);
        }
        Ok(())
    }

    /// Wait until the gate is awaiting input and return the current prompt.
    pub async fn next_prompt(&self) -> Option<GatePrompt> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, GateState::AwaitingInput(_)))
            .await
            .ok()?;
        match &*state {
            GateState::AwaitingInput(prompt) => Some(prompt.clone()),
            _ => None,
        }
    }
}

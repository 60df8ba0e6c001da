//! Progress events
//!
//! The tracker broadcasts a [`ProgressEvent`] for every completion, issuance,
//! reset and persistence failure. Presentation layers subscribe instead of
//! re-deriving completion from rendered percentages.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::progress::LearningPath;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    ModuleStarted {
        path: LearningPath,
        module_id: String,
    },
    StepRecorded {
        path: LearningPath,
        module_id: String,
        section_id: String,
        step_id: String,
    },
    SectionCompleted {
        path: LearningPath,
        module_id: String,
        section_id: String,
    },
    ModuleCompleted {
        path: LearningPath,
        module_id: String,
    },
    PathCompleted {
        path: LearningPath,
    },
    CertificateIssued {
        path: LearningPath,
        certificate_id: String,
    },
    ProgressReset {
        path: Option<LearningPath>,
    },
    PersistenceFailed {
        message: String,
    },
}

/// Broadcast channel for progress events
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: ProgressEvent) {
        trace!(event = ?event, "Emitting progress event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

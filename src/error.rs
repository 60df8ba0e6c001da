//! Error types for station-progress

use thiserror::Error;

use crate::progress::LearningPath;

/// Failures of the persistence medium.
///
/// These never invalidate the in-memory progress of a session. The tracker
/// reports them alongside the successful mutation so the caller can warn.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Caller errors: ids absent from the catalog, blank recipients, locked
/// sections. No state is mutated when one of these is returned.
#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Unknown learning path: {0}")]
    UnknownPath(String),

    #[error("Unknown module {module_id} in path {path}")]
    UnknownModule { path: LearningPath, module_id: String },

    #[error("Unknown section {section_id} in module {module_id}")]
    UnknownSection { module_id: String, section_id: String },

    #[error("Certificate recipient name must not be empty")]
    EmptyRecipient,

    #[error("Path {0} is not complete")]
    PathIncomplete(LearningPath),

    #[error("Section {section_id} of module {module_id} is locked")]
    SectionLocked { module_id: String, section_id: String },

    #[error("Invalid catalog: {0}")]
    Catalog(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

//! Locking policy
//!
//! Access is gated at module granularity. The first module of a path is
//! always open; any later module opens once the module right before it in
//! catalog order is complete. Every section of an open module is accessible.
//!
//! These functions only read. They are called for every rendered card.

use crate::catalog::Catalog;
use crate::error::ProgressError;
use crate::model::module_sections_complete;
use crate::progress::{LearningPath, UserProgress};

/// Whether a section may not be accessed yet.
pub fn is_locked(
    progress: &UserProgress,
    catalog: &Catalog,
    path: LearningPath,
    module_id: &str,
    section_id: &str,
) -> Result<bool, ProgressError> {
    catalog.section(path, module_id, section_id)?;
    is_module_locked(progress, catalog, path, module_id)
}

/// Whether a module may not be accessed yet.
pub fn is_module_locked(
    progress: &UserProgress,
    catalog: &Catalog,
    path: LearningPath,
    module_id: &str,
) -> Result<bool, ProgressError> {
    let (index, _) = catalog.module(path, module_id)?;
    if index == 0 {
        return Ok(false);
    }
    let previous = &catalog.path(path)?.modules[index - 1];
    Ok(!module_sections_complete(progress, path, previous))
}

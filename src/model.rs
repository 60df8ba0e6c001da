//! Progress model
//!
//! Pure operations over a [`UserProgress`] value. Every operation validates
//! its ids against the [`Catalog`] before touching state, so an `Err` always
//! means nothing changed. Completion is applied on write: the call that
//! satisfies a section's checkpoint count completes the section, and the call
//! that completes a module's last section completes the module.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::catalog::{Catalog, ModuleEntry};
use crate::error::ProgressError;
use crate::progress::{LearningPath, UserProgress};

/// What a mutation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// Any field of the document changed
    pub changed: bool,
    pub step_added: bool,
    pub section_completed: bool,
    pub module_completed: bool,
}

/// Ensure a module (and optionally a section) entry exists with `startedAt`.
///
/// Idempotent: a second call leaves the original `startedAt` untouched.
pub fn start_module(
    progress: &mut UserProgress,
    catalog: &Catalog,
    path: LearningPath,
    module_id: &str,
    section_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, ProgressError> {
    catalog.module(path, module_id)?;
    if let Some(section_id) = section_id {
        catalog.section(path, module_id, section_id)?;
    }

    let mut transition = Transition::default();
    if progress.module(path, module_id).is_none() {
        transition.changed = true;
    }
    let module = progress.module_entry(path, module_id, now);

    if let Some(section_id) = section_id {
        if module.section(section_id).is_none() {
            transition.changed = true;
            module.section_entry(section_id, now);
        }
    }

    Ok(transition)
}

/// Acknowledge one checkpoint of a section.
///
/// Completes the section once the distinct step count reaches the catalog's
/// `required_steps`, and the module once all of its sections are complete.
pub fn record_step(
    progress: &mut UserProgress,
    catalog: &Catalog,
    path: LearningPath,
    module_id: &str,
    section_id: &str,
    step_id: &str,
    now: DateTime<Utc>,
) -> Result<Transition, ProgressError> {
    let (_, module_entry) = catalog.module(path, module_id)?;
    let section_entry = catalog.section(path, module_id, section_id)?;

    let mut transition = Transition::default();
    if progress.section(path, module_id, section_id).is_none() {
        transition.changed = true;
    }

    let section = progress
        .module_entry(path, module_id, now)
        .section_entry(section_id, now);

    if section.record_step(step_id) {
        transition.changed = true;
        transition.step_added = true;
    }

    let required = section_entry.required_steps as usize;
    if required > 0
        && section.completed_steps().len() >= required
        && section.mark_complete(now)
    {
        transition.changed = true;
        transition.section_completed = true;
        debug!(path = %path, module_id, section_id, "Section reached required checkpoints");
    }

    if transition.section_completed {
        transition.module_completed = refresh_module_completion(progress, path, module_entry, now);
    }

    Ok(transition)
}

/// Complete a section regardless of its step count.
pub fn complete_section(
    progress: &mut UserProgress,
    catalog: &Catalog,
    path: LearningPath,
    module_id: &str,
    section_id: &str,
    now: DateTime<Utc>,
) -> Result<Transition, ProgressError> {
    let (_, module_entry) = catalog.module(path, module_id)?;
    catalog.section(path, module_id, section_id)?;

    let mut transition = Transition::default();
    if progress.section(path, module_id, section_id).is_none() {
        transition.changed = true;
    }

    let section = progress
        .module_entry(path, module_id, now)
        .section_entry(section_id, now);

    if section.mark_complete(now) {
        transition.changed = true;
        transition.section_completed = true;
        transition.module_completed = refresh_module_completion(progress, path, module_entry, now);
    }

    Ok(transition)
}

/// Completion percentage of one section, 0..=100.
///
/// A completed section is always 100. Otherwise the share of distinct steps
/// over `required_steps`, rounded to the nearest whole percent.
pub fn section_percent(
    progress: &UserProgress,
    path: LearningPath,
    module_id: &str,
    section_id: &str,
    required_steps: u32,
) -> u8 {
    let Some(section) = progress.section(path, module_id, section_id) else {
        return 0;
    };
    if section.is_complete() {
        return 100;
    }
    if required_steps == 0 {
        return 0;
    }

    let ratio = section.completed_steps().len() as f64 / required_steps as f64;
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// True iff every catalog section of the module has `completedAt` set.
pub fn is_module_complete(
    progress: &UserProgress,
    catalog: &Catalog,
    path: LearningPath,
    module_id: &str,
) -> Result<bool, ProgressError> {
    let (_, module_entry) = catalog.module(path, module_id)?;
    Ok(module_sections_complete(progress, path, module_entry))
}

pub(crate) fn module_sections_complete(
    progress: &UserProgress,
    path: LearningPath,
    module_entry: &ModuleEntry,
) -> bool {
    let Some(module) = progress.module(path, &module_entry.id) else {
        return false;
    };
    module_entry
        .sections
        .iter()
        .all(|s| module.section(&s.id).is_some_and(|p| p.is_complete()))
}

/// Set the module's `completedAt` if its sections are now all complete.
///
/// Returns true only on the transition.
pub(crate) fn refresh_module_completion(
    progress: &mut UserProgress,
    path: LearningPath,
    module_entry: &ModuleEntry,
    now: DateTime<Utc>,
) -> bool {
    if !module_sections_complete(progress, path, module_entry) {
        return false;
    }
    let completed = progress
        .module_mut(path, &module_entry.id)
        .is_some_and(|m| m.mark_complete(now));
    if completed {
        debug!(path = %path, module_id = %module_entry.id, "Module complete");
    }
    completed
}

/// What an imported document added
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// `path/module` or `path/module/section` ids absent from the catalog
    pub skipped: Vec<String>,
    pub completed_sections: Vec<(LearningPath, String, String)>,
    pub completed_modules: Vec<(LearningPath, String)>,
    pub completed_paths: Vec<LearningPath>,
}

/// Merge another document into `progress`, keeping only catalog entries.
///
/// Completions already present are never lost. Afterwards every catalog
/// section and module is re-derived: a section whose merged step set reaches
/// `required_steps` completes at `now`, and a module whose sections are all
/// complete takes the latest of their `completedAt` values.
pub fn merge_progress(
    progress: &mut UserProgress,
    catalog: &Catalog,
    other: &UserProgress,
    now: DateTime<Utc>,
) -> MergeReport {
    let mut incoming = other.clone();
    let mut report = MergeReport {
        skipped: incoming.retain(
            |path, module_id| catalog.module(path, module_id).is_ok(),
            |path, module_id, section_id| catalog.section(path, module_id, section_id).is_ok(),
        ),
        ..Default::default()
    };

    let current: &UserProgress = progress;
    let already_complete: Vec<LearningPath> = catalog
        .paths()
        .filter(|entry| path_modules_complete(current, entry.path, &entry.modules))
        .map(|entry| entry.path)
        .collect();

    progress.merge(&incoming);

    for entry in catalog.paths() {
        let path = entry.path;
        for module_entry in &entry.modules {
            let Some(module) = progress.module_mut(path, &module_entry.id) else {
                continue;
            };
            for section_entry in &module_entry.sections {
                let required = section_entry.required_steps as usize;
                let Some(section) = module.section_mut(&section_entry.id) else {
                    continue;
                };
                if required > 0 && section.completed_steps().len() >= required && section.mark_complete(now) {
                    report
                        .completed_sections
                        .push((path, module_entry.id.clone(), section_entry.id.clone()));
                }
            }

            let stamp = last_section_completion(progress, path, module_entry).unwrap_or(now);
            if refresh_module_completion(progress, path, module_entry, stamp) {
                report.completed_modules.push((path, module_entry.id.clone()));
            }
        }

        if !already_complete.contains(&path) && path_modules_complete(progress, path, &entry.modules) {
            report.completed_paths.push(path);
        }
    }

    if !report.skipped.is_empty() {
        warn!(skipped = report.skipped.len(), "Imported progress had ids outside the catalog");
    }
    report
}

fn path_modules_complete(progress: &UserProgress, path: LearningPath, modules: &[ModuleEntry]) -> bool {
    modules
        .iter()
        .all(|m| progress.module(path, &m.id).is_some_and(|p| p.is_complete()))
}

fn last_section_completion(
    progress: &UserProgress,
    path: LearningPath,
    module_entry: &ModuleEntry,
) -> Option<DateTime<Utc>> {
    let module = progress.module(path, &module_entry.id)?;
    module_entry
        .sections
        .iter()
        .filter_map(|s| module.section(&s.id).and_then(|p| p.completed_at()))
        .max()
}

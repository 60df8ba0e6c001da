//! Progress tracker - the single stateful entry point
//!
//! Wraps catalog, model, locking policy, certificate issuer and store.
//! Every mutation runs as one unit under the state mutex:
//!
//! ```text
//! lock ─► clone state ─► model op (validate + mutate) ─► swap in ─► save ─► emit ─► unlock
//! ```
//!
//! Events are broadcast before the lock is released, so subscribers see them
//! in the same order the mutations were applied.
//!
//! A failed save never rolls back the in-memory update. It is returned in
//! [`Mutation::persistence`], logged, and broadcast as
//! [`ProgressEvent::PersistenceFailed`], so learning continues in-session.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::certificate::{self, Certificate, ModuleDetail};
use crate::config::{CertificatePolicy, Config};
use crate::error::{ProgressError, StoreError};
use crate::events::{EventBus, ProgressEvent};
use crate::locking;
use crate::model::{self, MergeReport, Transition};
use crate::progress::{LearningPath, ModuleProgress, SectionProgress, UserProgress};
use crate::store::ProgressStore;

/// Tracker behaviour switches
#[derive(Debug, Clone, Copy)]
pub struct TrackerOptions {
    /// Refuse progress updates on locked sections
    pub enforce_locks: bool,
    pub certificate_policy: CertificatePolicy,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            enforce_locks: true,
            certificate_policy: CertificatePolicy::Append,
        }
    }
}

impl From<&Config> for TrackerOptions {
    fn from(config: &Config) -> Self {
        Self {
            enforce_locks: config.enforce_locks,
            certificate_policy: config.certificate_policy,
        }
    }
}

/// Outcome of writing the document after a mutation
#[derive(Debug)]
pub enum Persistence {
    Saved,
    /// Nothing changed, nothing written
    Unchanged,
    /// In-memory state is updated but not durable
    Failed(StoreError),
}

/// Result of a successful mutation
#[derive(Debug)]
pub struct Mutation<T> {
    pub value: T,
    pub persistence: Persistence,
}

impl<T> Mutation<T> {
    pub fn is_persisted(&self) -> bool {
        !matches!(self.persistence, Persistence::Failed(_))
    }

    pub fn warning(&self) -> Option<&StoreError> {
        match &self.persistence {
            Persistence::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Per-module row of a path overview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub title: String,
    /// Mean of the module's section percentages
    pub percent: u8,
    pub locked: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathSummary {
    pub path: LearningPath,
    pub title: String,
    pub modules: Vec<ModuleSummary>,
    pub complete: bool,
}

pub struct ProgressTracker {
    catalog: Arc<Catalog>,
    store: Box<dyn ProgressStore>,
    state: Mutex<UserProgress>,
    events: EventBus,
    options: TrackerOptions,
    load_warning: Option<String>,
}

impl ProgressTracker {
    /// Load the stored document and build a tracker around it.
    ///
    /// An unavailable store degrades to empty in-memory progress; the reason
    /// is kept in [`ProgressTracker::load_warning`].
    pub fn open(catalog: Arc<Catalog>, store: Box<dyn ProgressStore>, options: TrackerOptions) -> Self {
        let (state, load_warning) = match store.load() {
            Ok(progress) => (progress, None),
            Err(e) => {
                warn!(error = %e, "Progress store unavailable, continuing in memory");
                (UserProgress::default(), Some(e.to_string()))
            }
        };

        info!(
            paths = catalog.paths().count(),
            enforce_locks = options.enforce_locks,
            "ProgressTracker initialized"
        );

        Self {
            catalog,
            store,
            state: Mutex::new(state),
            events: EventBus::new(),
            options,
            load_warning,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, UserProgress> {
        // State is only ever replaced whole, so a poisoned guard still holds
        // a consistent document.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `op` on a draft of the state; commit and persist if it changed.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut UserProgress, &mut Vec<ProgressEvent>) -> Result<(T, bool), ProgressError>,
    ) -> Result<Mutation<T>, ProgressError> {
        let mut events = Vec::new();
        let mut state = self.lock();
        let mut draft = state.clone();
        let (value, changed) = op(&mut draft, &mut events)?;
        let persistence = if changed {
            *state = draft;
            self.persist(&state)
        } else {
            Persistence::Unchanged
        };

        if let Persistence::Failed(e) = &persistence {
            events.push(ProgressEvent::PersistenceFailed {
                message: e.to_string(),
            });
        }
        for event in events {
            self.events.emit(event);
        }
        drop(state);

        Ok(Mutation { value, persistence })
    }

    fn persist(&self, state: &UserProgress) -> Persistence {
        match self.store.save(state) {
            Ok(()) => Persistence::Saved,
            Err(e) => {
                warn!(error = %e, "Failed to persist progress, keeping in-memory state");
                Persistence::Failed(e)
            }
        }
    }

    fn ensure_unlocked(
        &self,
        state: &UserProgress,
        path: LearningPath,
        module_id: &str,
        section_id: Option<&str>,
    ) -> Result<(), ProgressError> {
        if !self.options.enforce_locks {
            return Ok(());
        }
        let locked = match section_id {
            Some(section_id) => locking::is_locked(state, &self.catalog, path, module_id, section_id)?,
            None => locking::is_module_locked(state, &self.catalog, path, module_id)?,
        };
        if locked {
            return Err(ProgressError::SectionLocked {
                module_id: module_id.to_string(),
                section_id: section_id.unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }

    /// Events implied by a section-level transition
    fn completion_events(
        &self,
        state: &UserProgress,
        transition: Transition,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
        events: &mut Vec<ProgressEvent>,
    ) {
        if transition.section_completed {
            events.push(ProgressEvent::SectionCompleted {
                path,
                module_id: module_id.to_string(),
                section_id: section_id.to_string(),
            });
        }
        if transition.module_completed {
            events.push(ProgressEvent::ModuleCompleted {
                path,
                module_id: module_id.to_string(),
            });
            if certificate::is_path_complete(state, &self.catalog, path).unwrap_or(false) {
                info!(path = %path, "Learning path complete");
                events.push(ProgressEvent::PathCompleted { path });
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of the current document
    pub fn progress(&self) -> UserProgress {
        self.lock().clone()
    }

    pub fn module_progress(&self, path: LearningPath, module_id: &str) -> Option<ModuleProgress> {
        self.lock().module(path, module_id).cloned()
    }

    pub fn section_state(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
    ) -> Option<SectionProgress> {
        self.lock().section(path, module_id, section_id).cloned()
    }

    /// Section completion, 0..=100
    pub fn section_progress(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
    ) -> Result<u8, ProgressError> {
        let entry = self.catalog.section(path, module_id, section_id)?;
        let state = self.lock();
        Ok(model::section_percent(&state, path, module_id, section_id, entry.required_steps))
    }

    pub fn is_section_locked(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
    ) -> Result<bool, ProgressError> {
        locking::is_locked(&self.lock(), &self.catalog, path, module_id, section_id)
    }

    pub fn is_module_complete(&self, path: LearningPath, module_id: &str) -> Result<bool, ProgressError> {
        model::is_module_complete(&self.lock(), &self.catalog, path, module_id)
    }

    pub fn is_path_complete(&self, path: LearningPath) -> Result<bool, ProgressError> {
        certificate::is_path_complete(&self.lock(), &self.catalog, path)
    }

    /// Per-module percentages and lock states for a path overview
    pub fn path_summary(&self, path: LearningPath) -> Result<PathSummary, ProgressError> {
        let entry = self.catalog.path(path)?;
        let state = self.lock();

        let mut modules = Vec::with_capacity(entry.modules.len());
        for module in &entry.modules {
            let total: u32 = module
                .sections
                .iter()
                .map(|s| model::section_percent(&state, path, &module.id, &s.id, s.required_steps) as u32)
                .sum();
            let percent = (total as f64 / module.sections.len() as f64).round() as u8;
            let progress = state.module(path, &module.id);

            modules.push(ModuleSummary {
                id: module.id.clone(),
                title: module.title.clone(),
                percent,
                locked: locking::is_module_locked(&state, &self.catalog, path, &module.id)?,
                started_at: progress.map(|m| m.started_at()),
                completed_at: progress.and_then(|m| m.completed_at()),
            });
        }

        Ok(PathSummary {
            path,
            title: entry.title.clone(),
            complete: certificate::is_path_complete(&state, &self.catalog, path)?,
            modules,
        })
    }

    /// All issued certificates, newest first
    pub fn certificates(&self) -> Vec<Certificate> {
        let mut certificates: Vec<Certificate> = self.lock().certificates().values().cloned().collect();
        certificates.sort_by_key(|c| std::cmp::Reverse(c.issued_at()));
        certificates
    }

    pub fn certificates_for(&self, path: LearningPath) -> Vec<Certificate> {
        self.certificates()
            .into_iter()
            .filter(|c| c.path_type() == path)
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn mark_module_started(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: Option<&str>,
    ) -> Result<Mutation<ModuleProgress>, ProgressError> {
        self.mutate(|state, events| {
            self.ensure_unlocked(state, path, module_id, section_id)?;
            let is_new = state.module(path, module_id).is_none();
            let transition = model::start_module(state, &self.catalog, path, module_id, section_id, Utc::now())?;
            if is_new {
                debug!(path = %path, module_id, "Module started");
                events.push(ProgressEvent::ModuleStarted {
                    path,
                    module_id: module_id.to_string(),
                });
            }
            let module = state
                .module(path, module_id)
                .cloned()
                .ok_or_else(|| ProgressError::UnknownModule {
                    path,
                    module_id: module_id.to_string(),
                })?;
            Ok((module, transition.changed))
        })
    }

    /// Acknowledge a step; returns the section's new percentage.
    pub fn update_section_progress(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
        step_id: &str,
    ) -> Result<Mutation<u8>, ProgressError> {
        let required = self.catalog.section(path, module_id, section_id)?.required_steps;
        self.mutate(|state, events| {
            self.ensure_unlocked(state, path, module_id, Some(section_id))?;
            let transition = model::record_step(
                state,
                &self.catalog,
                path,
                module_id,
                section_id,
                step_id,
                Utc::now(),
            )?;
            if transition.step_added {
                events.push(ProgressEvent::StepRecorded {
                    path,
                    module_id: module_id.to_string(),
                    section_id: section_id.to_string(),
                    step_id: step_id.to_string(),
                });
            }
            self.completion_events(state, transition, path, module_id, section_id, events);
            let percent = model::section_percent(state, path, module_id, section_id, required);
            Ok((percent, transition.changed))
        })
    }

    pub fn mark_section_complete(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
    ) -> Result<Mutation<SectionProgress>, ProgressError> {
        self.mutate(|state, events| {
            self.ensure_unlocked(state, path, module_id, Some(section_id))?;
            let transition =
                model::complete_section(state, &self.catalog, path, module_id, section_id, Utc::now())?;
            self.completion_events(state, transition, path, module_id, section_id, events);
            let section = state
                .section(path, module_id, section_id)
                .cloned()
                .ok_or_else(|| ProgressError::UnknownSection {
                    module_id: module_id.to_string(),
                    section_id: section_id.to_string(),
                })?;
            Ok((section, transition.changed))
        })
    }

    /// Issue a certificate for a completed path.
    ///
    /// Without `module_details`, a snapshot is taken from catalog and progress.
    pub fn generate_path_certificate(
        &self,
        path: LearningPath,
        recipient_name: &str,
        module_details: Option<Vec<ModuleDetail>>,
    ) -> Result<Mutation<Certificate>, ProgressError> {
        if recipient_name.trim().is_empty() {
            return Err(ProgressError::EmptyRecipient);
        }

        self.mutate(|state, events| {
            if !certificate::is_path_complete(state, &self.catalog, path)? {
                return Err(ProgressError::PathIncomplete(path));
            }

            if self.options.certificate_policy == CertificatePolicy::Reuse {
                let newest = state
                    .certificates()
                    .values()
                    .filter(|c| c.path_type() == path)
                    .max_by_key(|c| c.issued_at())
                    .cloned();
                if let Some(existing) = newest {
                    return Ok((existing, false));
                }
            }

            let completed_modules = self
                .catalog
                .path(path)?
                .modules
                .iter()
                .map(|m| m.id.clone())
                .collect::<Vec<_>>();
            let details = match module_details {
                Some(details) => details,
                None => certificate::snapshot_details(state, &self.catalog, path)?,
            };

            let mut issued_at = Utc::now();
            let mut issued = certificate::issue_at(
                path,
                recipient_name,
                completed_modules.clone(),
                Some(details.clone()),
                issued_at,
            )?;
            // ids derive from path + millisecond; step past any collision
            while state.certificates().contains_key(issued.id()) {
                issued_at += chrono::Duration::milliseconds(1);
                issued = certificate::issue_at(
                    path,
                    recipient_name,
                    completed_modules.clone(),
                    Some(details.clone()),
                    issued_at,
                )?;
            }

            info!(path = %path, certificate_id = %issued.id(), "Certificate issued");
            events.push(ProgressEvent::CertificateIssued {
                path,
                certificate_id: issued.id().to_string(),
            });
            state.insert_certificate(issued.clone());
            Ok((issued, true))
        })
    }

    /// Clear one path's module data, or everything including certificates.
    ///
    /// Irreversible. Callers confirm with the learner first.
    pub fn reset_progress(&self, path: Option<LearningPath>) -> Mutation<()> {
        let mut state = self.lock();
        let persistence = match path {
            // the stored copy may lag behind memory after a failed save, so
            // write the in-memory result rather than editing the stored one
            Some(path) => {
                state.clear_path(path);
                self.persist(&state)
            }
            None => {
                *state = UserProgress::default();
                match self.store.clear(None) {
                    Ok(()) => Persistence::Saved,
                    Err(e) => {
                        warn!(error = %e, "Failed to clear stored progress");
                        Persistence::Failed(e)
                    }
                }
            }
        };

        info!(path = ?path, "Progress reset");
        self.events.emit(ProgressEvent::ProgressReset { path });
        if let Persistence::Failed(e) = &persistence {
            self.events.emit(ProgressEvent::PersistenceFailed {
                message: e.to_string(),
            });
        }
        drop(state);
        Mutation {
            value: (),
            persistence,
        }
    }

    /// Merge another document into the current one without losing completions.
    ///
    /// Modules and sections the catalog does not know are dropped and listed
    /// in [`MergeReport::skipped`]. Completion is re-derived afterwards, with
    /// the matching events.
    pub fn import(&self, other: &UserProgress) -> Mutation<MergeReport> {
        let result = self.mutate(|state, events| {
            let before = state.clone();
            let report = model::merge_progress(state, &self.catalog, other, Utc::now());
            for (path, module_id, section_id) in &report.completed_sections {
                events.push(ProgressEvent::SectionCompleted {
                    path: *path,
                    module_id: module_id.clone(),
                    section_id: section_id.clone(),
                });
            }
            for (path, module_id) in &report.completed_modules {
                events.push(ProgressEvent::ModuleCompleted {
                    path: *path,
                    module_id: module_id.clone(),
                });
            }
            for path in &report.completed_paths {
                info!(path = %path, "Learning path complete");
                events.push(ProgressEvent::PathCompleted { path: *path });
            }
            let changed = *state != before;
            Ok((report, changed))
        });
        // merge_progress never fails
        result.unwrap_or_else(|_| Mutation {
            value: MergeReport::default(),
            persistence: Persistence::Unchanged,
        })
    }
}

//! Learner progress document
//!
//! One `UserProgress` per learner. Serialized as a single JSON object with a
//! top-level key per learning path plus a `certificates` map:
//!
//! ```text
//! {
//!   "bitcoin":   { "<moduleId>": ModuleProgress, ... },
//!   "lightning": { ... },
//!   "liquid":    { ... },
//!   "certificates": { "<certificateId>": Certificate, ... }
//! }
//! ```
//!
//! Completion timestamps only ever move from absent to present. The fields
//! are private so nothing outside this crate can clear them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::certificate::Certificate;
use crate::error::ProgressError;

/// Named curriculum track
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningPath {
    Bitcoin,
    Lightning,
    Liquid,
}

impl LearningPath {
    pub const ALL: [LearningPath; 3] = [
        LearningPath::Bitcoin,
        LearningPath::Lightning,
        LearningPath::Liquid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningPath::Bitcoin => "bitcoin",
            LearningPath::Lightning => "lightning",
            LearningPath::Liquid => "liquid",
        }
    }
}

impl fmt::Display for LearningPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningPath {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitcoin" => Ok(LearningPath::Bitcoin),
            "lightning" => Ok(LearningPath::Lightning),
            "liquid" => Ok(LearningPath::Liquid),
            other => Err(ProgressError::UnknownPath(other.to_string())),
        }
    }
}

/// Progress through one section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionProgress {
    id: String,
    #[serde(default)]
    completed_steps: BTreeSet<String>,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl SectionProgress {
    pub(crate) fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            completed_steps: BTreeSet::new(),
            started_at: now,
            completed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Distinct steps acknowledged so far
    pub fn completed_steps(&self) -> &BTreeSet<String> {
        &self.completed_steps
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Returns true if the step was not already recorded.
    pub(crate) fn record_step(&mut self, step_id: &str) -> bool {
        self.completed_steps.insert(step_id.to_string())
    }

    /// Returns true only on the transition from incomplete to complete.
    pub(crate) fn mark_complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(now);
        true
    }

    fn merge(&mut self, other: &SectionProgress) {
        self.completed_steps
            .extend(other.completed_steps.iter().cloned());
        self.started_at = self.started_at.min(other.started_at);
        self.completed_at = earliest(self.completed_at, other.completed_at);
    }
}

/// Progress through one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    id: String,
    #[serde(default)]
    completed_sections: BTreeMap<String, SectionProgress>,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl ModuleProgress {
    pub(crate) fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            completed_sections: BTreeMap::new(),
            started_at: now,
            completed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sections(&self) -> &BTreeMap<String, SectionProgress> {
        &self.completed_sections
    }

    pub fn section(&self, section_id: &str) -> Option<&SectionProgress> {
        self.completed_sections.get(section_id)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Section entry, created with `startedAt = now` if absent
    pub(crate) fn section_entry(&mut self, section_id: &str, now: DateTime<Utc>) -> &mut SectionProgress {
        self.completed_sections
            .entry(section_id.to_string())
            .or_insert_with(|| SectionProgress::new(section_id, now))
    }

    pub(crate) fn section_mut(&mut self, section_id: &str) -> Option<&mut SectionProgress> {
        self.completed_sections.get_mut(section_id)
    }

    pub(crate) fn mark_complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(now);
        true
    }

    /// Sections and `startedAt` only. The module's own `completedAt` is
    /// derived from its sections against the catalog, never copied.
    fn merge(&mut self, other: &ModuleProgress) {
        for (id, section) in &other.completed_sections {
            match self.completed_sections.get_mut(id) {
                Some(existing) => existing.merge(section),
                None => {
                    self.completed_sections.insert(id.clone(), section.clone());
                }
            }
        }
        self.started_at = self.started_at.min(other.started_at);
    }
}

/// Module id -> progress, for one learning path
pub type PathProgress = BTreeMap<String, ModuleProgress>;

/// Root aggregate persisted by a [`crate::store::ProgressStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    #[serde(default)]
    bitcoin: PathProgress,
    #[serde(default)]
    lightning: PathProgress,
    #[serde(default)]
    liquid: PathProgress,
    #[serde(default)]
    certificates: BTreeMap<String, Certificate>,
}

impl UserProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self, path: LearningPath) -> &PathProgress {
        match path {
            LearningPath::Bitcoin => &self.bitcoin,
            LearningPath::Lightning => &self.lightning,
            LearningPath::Liquid => &self.liquid,
        }
    }

    pub(crate) fn path_mut(&mut self, path: LearningPath) -> &mut PathProgress {
        match path {
            LearningPath::Bitcoin => &mut self.bitcoin,
            LearningPath::Lightning => &mut self.lightning,
            LearningPath::Liquid => &mut self.liquid,
        }
    }

    pub fn module(&self, path: LearningPath, module_id: &str) -> Option<&ModuleProgress> {
        self.path(path).get(module_id)
    }

    pub fn section(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
    ) -> Option<&SectionProgress> {
        self.module(path, module_id)
            .and_then(|m| m.section(section_id))
    }

    pub(crate) fn module_entry(
        &mut self,
        path: LearningPath,
        module_id: &str,
        now: DateTime<Utc>,
    ) -> &mut ModuleProgress {
        self.path_mut(path)
            .entry(module_id.to_string())
            .or_insert_with(|| ModuleProgress::new(module_id, now))
    }

    pub(crate) fn module_mut(&mut self, path: LearningPath, module_id: &str) -> Option<&mut ModuleProgress> {
        self.path_mut(path).get_mut(module_id)
    }

    pub fn certificates(&self) -> &BTreeMap<String, Certificate> {
        &self.certificates
    }

    pub(crate) fn insert_certificate(&mut self, certificate: Certificate) {
        self.certificates
            .insert(certificate.id().to_string(), certificate);
    }

    /// Drop all module/section data for one path. Certificates survive.
    pub(crate) fn clear_path(&mut self, path: LearningPath) {
        self.path_mut(path).clear();
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
            && LearningPath::ALL.iter().all(|p| self.path(*p).is_empty())
    }

    /// Combine another document into this one without losing completions.
    ///
    /// Step sets are unioned; `startedAt` and section `completedAt` take the
    /// earliest value present on either side. Module `completedAt` is left for
    /// [`crate::model::merge_progress`] to re-derive. Certificates are added by
    /// id and never replaced.
    pub(crate) fn merge(&mut self, other: &UserProgress) {
        for path in LearningPath::ALL {
            let target = self.path_mut(path);
            for (id, module) in other.path(path) {
                target
                    .entry(id.clone())
                    .or_insert_with(|| ModuleProgress::new(id, module.started_at))
                    .merge(module);
            }
        }
        for (id, certificate) in &other.certificates {
            self.certificates
                .entry(id.clone())
                .or_insert_with(|| certificate.clone());
        }
    }

    /// Drop modules and sections the predicates reject.
    ///
    /// Returns the dropped ids as `path/module` or `path/module/section`.
    pub(crate) fn retain(
        &mut self,
        mut keep_module: impl FnMut(LearningPath, &str) -> bool,
        mut keep_section: impl FnMut(LearningPath, &str, &str) -> bool,
    ) -> Vec<String> {
        let mut dropped = Vec::new();
        for path in LearningPath::ALL {
            self.path_mut(path).retain(|module_id, module| {
                if !keep_module(path, module_id.as_str()) {
                    dropped.push(format!("{}/{}", path, module_id));
                    return false;
                }
                module.completed_sections.retain(|section_id, _| {
                    let keep = keep_section(path, module_id.as_str(), section_id.as_str());
                    if !keep {
                        dropped.push(format!("{}/{}/{}", path, module_id, section_id));
                    }
                    keep
                });
                true
            });
        }
        dropped
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

//! Legacy progress migration
//!
//! Converts the older flat document, keyed by module id with no path level,
//! into a [`UserProgress`]:
//!
//! ```json
//! {
//!   "money-basics": {
//!     "completed": false,
//!     "lastUpdated": 1700000000000,
//!     "sections": {
//!       "barter": { "completed": true },
//!       "gold":   { "steps": [1, 2] }
//!     }
//!   }
//! }
//! ```
//!
//! Module ids are resolved against the catalog. Anything the catalog does not
//! know is skipped and reported. This runs once, outside the tracker's steady
//! state; its output is merged with [`crate::ProgressTracker::import`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::ProgressError;
use crate::model::refresh_module_completion;
use crate::progress::{LearningPath, UserProgress};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySection {
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    steps: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyModule {
    #[serde(default)]
    completed: bool,
    /// Unix millis
    #[serde(default)]
    last_updated: Option<i64>,
    #[serde(default)]
    sections: BTreeMap<String, LegacySection>,
}

/// Outcome of a migration
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub progress: UserProgress,
    pub migrated_modules: usize,
    /// `module` or `module/section` ids absent from the catalog
    pub skipped: Vec<String>,
}

/// Whether a raw document looks like the legacy layout rather than the
/// current one.
pub fn is_legacy_document(raw: &str) -> bool {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return false;
    };
    let current_keys = ["bitcoin", "lightning", "liquid", "certificates"];
    !map.is_empty() && map.keys().all(|k| !current_keys.contains(&k.as_str()))
}

fn step_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_path(catalog: &Catalog, module_id: &str) -> Option<LearningPath> {
    catalog
        .paths()
        .find(|p| p.modules.iter().any(|m| m.id == module_id))
        .map(|p| p.path)
}

/// Convert a legacy document. `now` stamps entries that carry no timestamp.
pub fn migrate_legacy(
    raw: &str,
    catalog: &Catalog,
    now: DateTime<Utc>,
) -> Result<MigrationReport, ProgressError> {
    let legacy: BTreeMap<String, LegacyModule> = serde_json::from_str(raw)
        .map_err(|e| ProgressError::Store(e.into()))?;

    let mut report = MigrationReport::default();

    for (module_id, module) in legacy {
        let Some(path) = resolve_path(catalog, &module_id) else {
            warn!(module_id = %module_id, "Legacy module not in catalog, skipping");
            report.skipped.push(module_id);
            continue;
        };
        let (_, module_entry) = catalog.module(path, &module_id)?;
        let stamp = module
            .last_updated
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(now);

        let progress = report.progress.module_entry(path, &module_id, stamp);

        for (section_id, section) in &module.sections {
            let Some(section_entry) = module_entry.find_section(section_id) else {
                report.skipped.push(format!("{}/{}", module_id, section_id));
                continue;
            };
            let target = progress.section_entry(section_id, stamp);
            for step in &section.steps {
                target.record_step(&step_id(step));
            }
            let required = section_entry.required_steps as usize;
            let enough_steps = required > 0 && target.completed_steps().len() >= required;
            if section.completed || enough_steps {
                target.mark_complete(stamp);
            }
        }

        // a finished legacy module finished every one of its sections
        if module.completed {
            for section in &module_entry.sections {
                progress.section_entry(&section.id, stamp).mark_complete(stamp);
            }
        }

        refresh_module_completion(&mut report.progress, path, module_entry, stamp);
        report.migrated_modules += 1;
    }

    info!(
        migrated = report.migrated_modules,
        skipped = report.skipped.len(),
        "Legacy progress migrated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModuleEntry, PathCatalog};

    fn catalog() -> Catalog {
        Catalog::new(vec![
            PathCatalog::new(LearningPath::Bitcoin)
                .module(ModuleEntry::new("money", "").section("barter", 0).section("gold", 2)),
            PathCatalog::new(LearningPath::Liquid)
                .module(ModuleEntry::new("sidechains", "").section("peg", 1).section("assets", 1)),
        ])
        .unwrap()
    }

    #[test]
    fn test_detects_legacy_layout() {
        assert!(is_legacy_document(r#"{"money":{"completed":true}}"#));
        assert!(!is_legacy_document(r#"{"bitcoin":{},"certificates":{}}"#));
        assert!(!is_legacy_document("not json"));
        assert!(!is_legacy_document("{}"));
    }

    #[test]
    fn test_migrates_sections_and_propagates() {
        let raw = r#"{
            "money": {
                "lastUpdated": 1700000000000,
                "sections": {
                    "barter": { "completed": true },
                    "gold": { "steps": [1, "2"] }
                }
            },
            "sidechains": { "completed": true },
            "altcoins": { "completed": true }
        }"#;

        let report = migrate_legacy(raw, &catalog(), Utc::now()).unwrap();
        assert_eq!(report.migrated_modules, 2);
        assert_eq!(report.skipped, vec!["altcoins".to_string()]);

        let progress = &report.progress;
        let money = progress.module(LearningPath::Bitcoin, "money").unwrap();
        assert!(money.is_complete());
        assert_eq!(
            money.completed_at(),
            DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000)
        );
        assert!(money.section("gold").unwrap().completed_steps().contains("1"));

        let sidechains = progress.module(LearningPath::Liquid, "sidechains").unwrap();
        assert!(sidechains.is_complete());
        assert_eq!(sidechains.sections().len(), 2);
    }

    #[test]
    fn test_unknown_section_skipped() {
        let raw = r#"{ "money": { "sections": { "fiat": { "completed": true } } } }"#;
        let report = migrate_legacy(raw, &catalog(), Utc::now()).unwrap();
        assert_eq!(report.skipped, vec!["money/fiat".to_string()]);
        assert!(!report.progress.module(LearningPath::Bitcoin, "money").unwrap().is_complete());
    }
}

//! Module/section catalog
//!
//! Read-only description of every learning path: ordered modules, ordered
//! sections, and the number of checkpoints each section requires. Owned by
//! the content configuration; the tracker never adds or removes entries.
//!
//! ## File format
//!
//! ```toml
//! [[path]]
//! path = "bitcoin"
//! title = "Bitcoin Fundamentals"
//!
//! [[path.modules]]
//! id = "money-basics"
//! title = "What is money?"
//!
//! [[path.modules.sections]]
//! id = "barter"
//! title = "From barter to coins"
//! required_steps = 3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::ProgressError;
use crate::progress::LearningPath;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Checkpoints a learner must acknowledge (0 = explicit completion only)
    #[serde(default)]
    pub required_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub sections: Vec<SectionEntry>,
}

impl ModuleEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            sections: Vec::new(),
        }
    }

    /// Append a section (builder style)
    pub fn section(mut self, id: impl Into<String>, required_steps: u32) -> Self {
        let id = id.into();
        self.sections.push(SectionEntry {
            title: id.clone(),
            id,
            required_steps,
        });
        self
    }

    pub fn find_section(&self, section_id: &str) -> Option<&SectionEntry> {
        self.sections.iter().find(|s| s.id == section_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathCatalog {
    pub path: LearningPath,
    #[serde(default)]
    pub title: String,
    pub modules: Vec<ModuleEntry>,
}

impl PathCatalog {
    pub fn new(path: LearningPath) -> Self {
        Self {
            path,
            title: path.to_string(),
            modules: Vec::new(),
        }
    }

    /// Append a module (builder style)
    pub fn module(mut self, module: ModuleEntry) -> Self {
        self.modules.push(module);
        self
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(rename = "path", default)]
    paths: Vec<PathCatalog>,
}

/// Validated catalog of all learning paths
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    paths: Vec<PathCatalog>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids and empty paths/modules.
    pub fn new(paths: Vec<PathCatalog>) -> Result<Self, ProgressError> {
        let mut seen_paths = HashSet::new();
        for path in &paths {
            if !seen_paths.insert(path.path) {
                return Err(ProgressError::Catalog(format!("path {} declared twice", path.path)));
            }
            if path.modules.is_empty() {
                return Err(ProgressError::Catalog(format!("path {} has no modules", path.path)));
            }

            let mut seen_modules = HashSet::new();
            for module in &path.modules {
                if !seen_modules.insert(module.id.as_str()) {
                    return Err(ProgressError::Catalog(format!(
                        "module {} declared twice in path {}",
                        module.id, path.path
                    )));
                }
                if module.sections.is_empty() {
                    return Err(ProgressError::Catalog(format!(
                        "module {} has no sections",
                        module.id
                    )));
                }

                let mut seen_sections = HashSet::new();
                for section in &module.sections {
                    if !seen_sections.insert(section.id.as_str()) {
                        return Err(ProgressError::Catalog(format!(
                            "section {} declared twice in module {}",
                            section.id, module.id
                        )));
                    }
                }
            }
        }

        Ok(Self { paths })
    }

    /// Load a catalog from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProgressError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProgressError::Catalog(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let catalog = Self::from_toml(&content)?;
        info!(
            path = %path.as_ref().display(),
            paths = catalog.paths.len(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    pub fn from_toml(content: &str) -> Result<Self, ProgressError> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| ProgressError::Catalog(e.to_string()))?;
        Self::new(file.paths)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathCatalog> {
        self.paths.iter()
    }

    pub fn path(&self, path: LearningPath) -> Result<&PathCatalog, ProgressError> {
        self.paths
            .iter()
            .find(|p| p.path == path)
            .ok_or_else(|| ProgressError::UnknownPath(path.to_string()))
    }

    /// Module entry plus its position in the path's ordering
    pub fn module(
        &self,
        path: LearningPath,
        module_id: &str,
    ) -> Result<(usize, &ModuleEntry), ProgressError> {
        self.path(path)?
            .modules
            .iter()
            .enumerate()
            .find(|(_, m)| m.id == module_id)
            .ok_or_else(|| ProgressError::UnknownModule {
                path,
                module_id: module_id.to_string(),
            })
    }

    pub fn section(
        &self,
        path: LearningPath,
        module_id: &str,
        section_id: &str,
    ) -> Result<&SectionEntry, ProgressError> {
        let (_, module) = self.module(path, module_id)?;
        module
            .find_section(section_id)
            .ok_or_else(|| ProgressError::UnknownSection {
                module_id: module_id.to_string(),
                section_id: section_id.to_string(),
            })
    }
}

//! Path completion certificates
//!
//! A certificate is an immutable record that a learner finished every module
//! of a learning path. Its `verificationHash` is a SHA-256 digest over all
//! other fields in a fixed order, so anyone holding the JSON can recompute it.
//!
//! The hash is tamper-evidence only. No secret key is involved, so anyone
//! able to edit the JSON can also recompute a matching hash. It detects
//! corruption and naive edits, not forgery.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::Catalog;
use crate::error::ProgressError;
use crate::progress::{LearningPath, UserProgress};

/// Snapshot of one section for display/export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDetail {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Snapshot of one module, independent of later catalog changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetail {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sections: Vec<SectionDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    id: String,
    recipient_name: String,
    path_type: LearningPath,
    issued_at: DateTime<Utc>,
    completed_modules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module_details: Option<Vec<ModuleDetail>>,
    verification_hash: String,
}

/// Hashed fields, in hash order
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashInput<'a> {
    id: &'a str,
    recipient_name: &'a str,
    path_type: LearningPath,
    issued_at: String,
    completed_modules: &'a [String],
    module_details: Option<&'a [ModuleDetail]>,
}

impl Certificate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn recipient_name(&self) -> &str {
        &self.recipient_name
    }

    pub fn path_type(&self) -> LearningPath {
        self.path_type
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn completed_modules(&self) -> &[String] {
        &self.completed_modules
    }

    pub fn module_details(&self) -> Option<&[ModuleDetail]> {
        self.module_details.as_deref()
    }

    pub fn verification_hash(&self) -> &str {
        &self.verification_hash
    }

    fn compute_hash(&self) -> String {
        let input = HashInput {
            id: &self.id,
            recipient_name: &self.recipient_name,
            path_type: self.path_type,
            issued_at: self.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            completed_modules: &self.completed_modules,
            module_details: self.module_details.as_deref(),
        };
        // Serializing borrowed strings, vectors and chrono values cannot fail.
        let bytes = serde_json::to_vec(&input).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// Deterministic id from path and issuance time (millisecond precision)
pub fn certificate_id(path: LearningPath, issued_at: DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!("{}:{}", path, issued_at.timestamp_millis()).as_bytes());
    format!("{}-{}", path, &hex::encode(digest)[..16])
}

/// True iff every catalog module of the path has `completedAt` set.
pub fn is_path_complete(
    progress: &UserProgress,
    catalog: &Catalog,
    path: LearningPath,
) -> Result<bool, ProgressError> {
    let entry = catalog.path(path)?;
    Ok(entry.modules.iter().all(|m| {
        progress
            .module(path, &m.id)
            .is_some_and(|p| p.is_complete())
    }))
}

/// Issue a certificate stamped with the current time.
pub fn issue(
    path: LearningPath,
    recipient_name: &str,
    completed_modules: Vec<String>,
    module_details: Option<Vec<ModuleDetail>>,
) -> Result<Certificate, ProgressError> {
    issue_at(path, recipient_name, completed_modules, module_details, Utc::now())
}

/// Issue a certificate at a given time, truncated to milliseconds.
///
/// Refuses blank recipient names. The name is stored trimmed.
pub fn issue_at(
    path: LearningPath,
    recipient_name: &str,
    completed_modules: Vec<String>,
    module_details: Option<Vec<ModuleDetail>>,
    issued_at: DateTime<Utc>,
) -> Result<Certificate, ProgressError> {
    let recipient_name = recipient_name.trim();
    if recipient_name.is_empty() {
        return Err(ProgressError::EmptyRecipient);
    }

    let issued_at = DateTime::<Utc>::from_timestamp_millis(issued_at.timestamp_millis()).unwrap_or(issued_at);

    let mut certificate = Certificate {
        id: certificate_id(path, issued_at),
        recipient_name: recipient_name.to_string(),
        path_type: path,
        issued_at,
        completed_modules,
        module_details,
        verification_hash: String::new(),
    };
    certificate.verification_hash = certificate.compute_hash();
    Ok(certificate)
}

/// Recompute the hash and compare it with the stored one.
pub fn verify(certificate: &Certificate) -> bool {
    certificate.compute_hash() == certificate.verification_hash
}

/// Build module/section snapshots from the catalog and current progress.
pub fn snapshot_details(
    progress: &UserProgress,
    catalog: &Catalog,
    path: LearningPath,
) -> Result<Vec<ModuleDetail>, ProgressError> {
    let entry = catalog.path(path)?;
    Ok(entry
        .modules
        .iter()
        .map(|module| {
            let module_progress = progress.module(path, &module.id);
            ModuleDetail {
                id: module.id.clone(),
                title: module.title.clone(),
                completed_at: module_progress.and_then(|m| m.completed_at()),
                sections: module
                    .sections
                    .iter()
                    .map(|section| SectionDetail {
                        id: section.id.clone(),
                        title: section.title.clone(),
                        completed_at: module_progress
                            .and_then(|m| m.section(&section.id))
                            .and_then(|s| s.completed_at()),
                    })
                    .collect(),
            }
        })
        .collect())
}

//! End-to-end tests for the progress tracker
//!
//! Run against real sled/JSON stores in temporary directories, plus the
//! in-memory store where failure injection is needed.

use std::sync::Arc;

use station_progress::certificate::{self, verify};
use station_progress::{
    Catalog, Certificate, JsonFileStore, LearningPath, MemoryStore, ModuleEntry, PathCatalog,
    Persistence, ProgressError, ProgressEvent, ProgressStore, ProgressTracker, SledProgressStore,
    StoreError, TrackerOptions, UserProgress,
};
use tempfile::TempDir;

/// bitcoin: A(a1: 3 steps) -> B(b1: 3 steps); lightning and liquid: one module each
fn catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::new(vec![
            PathCatalog::new(LearningPath::Bitcoin)
                .module(ModuleEntry::new("A", "Money").section("a1", 3))
                .module(ModuleEntry::new("B", "Keys").section("b1", 3)),
            PathCatalog::new(LearningPath::Lightning)
                .module(ModuleEntry::new("L", "Channels").section("l1", 1)),
            PathCatalog::new(LearningPath::Liquid)
                .module(ModuleEntry::new("Q", "Sidechains").section("q1", 1)),
        ])
        .unwrap(),
    )
}

fn memory_tracker() -> ProgressTracker {
    ProgressTracker::open(catalog(), Box::new(MemoryStore::new()), TrackerOptions::default())
}

/// Hands the tracker a store the test can still reach
struct Shared(Arc<MemoryStore>);

impl ProgressStore for Shared {
    fn load(&self) -> Result<UserProgress, StoreError> {
        self.0.load()
    }
    fn save(&self, progress: &UserProgress) -> Result<(), StoreError> {
        self.0.save(progress)
    }
    fn clear(&self, scope: Option<LearningPath>) -> Result<(), StoreError> {
        self.0.clear(scope)
    }
}

fn complete_bitcoin(tracker: &ProgressTracker) {
    for step in ["1", "2", "3"] {
        tracker
            .update_section_progress(LearningPath::Bitcoin, "A", "a1", step)
            .unwrap();
    }
    tracker
        .mark_section_complete(LearningPath::Bitcoin, "B", "b1")
        .unwrap();
}

#[test]
fn test_bitcoin_path_end_to_end() {
    let tracker = memory_tracker();
    let path = LearningPath::Bitcoin;

    assert!(!tracker.is_section_locked(path, "A", "a1").unwrap());
    assert!(tracker.is_section_locked(path, "B", "b1").unwrap());

    tracker.update_section_progress(path, "A", "a1", "1").unwrap();
    let mutation = tracker.update_section_progress(path, "A", "a1", "2").unwrap();
    assert_eq!(mutation.value, 67);
    assert_eq!(tracker.section_progress(path, "A", "a1").unwrap(), 67);
    assert!(!tracker.is_module_complete(path, "A").unwrap());
    assert!(tracker.is_section_locked(path, "B", "b1").unwrap());

    let mutation = tracker.update_section_progress(path, "A", "a1", "3").unwrap();
    assert_eq!(mutation.value, 100);
    assert!(tracker.is_module_complete(path, "A").unwrap());
    assert!(tracker.module_progress(path, "A").unwrap().completed_at().is_some());
    assert!(!tracker.is_section_locked(path, "B", "b1").unwrap());
    assert!(!tracker.is_path_complete(path).unwrap());

    tracker.mark_section_complete(path, "B", "b1").unwrap();
    assert!(tracker.is_module_complete(path, "B").unwrap());
    assert!(tracker.is_path_complete(path).unwrap());

    let certificate = tracker
        .generate_path_certificate(path, "Alice", None)
        .unwrap()
        .value;
    assert!(verify(&certificate));
    assert_eq!(certificate.completed_modules(), ["A".to_string(), "B".to_string()]);
    assert_eq!(certificate.recipient_name(), "Alice");
    assert_eq!(tracker.certificates().len(), 1);
}

#[test]
fn test_percent_never_decreases_after_completion() {
    let tracker = memory_tracker();
    let path = LearningPath::Bitcoin;

    tracker.mark_section_complete(path, "A", "a1").unwrap();
    let completed_at = tracker
        .section_state(path, "A", "a1")
        .unwrap()
        .completed_at();

    for step in ["x", "y", "x"] {
        let mutation = tracker.update_section_progress(path, "A", "a1", step).unwrap();
        assert_eq!(mutation.value, 100);
    }
    tracker.mark_section_complete(path, "A", "a1").unwrap();

    assert_eq!(
        tracker.section_state(path, "A", "a1").unwrap().completed_at(),
        completed_at
    );
}

#[test]
fn test_duplicate_steps_are_idempotent() {
    let tracker = memory_tracker();
    tracker
        .update_section_progress(LearningPath::Bitcoin, "A", "a1", "1")
        .unwrap();
    let before = tracker.progress();

    let mutation = tracker
        .update_section_progress(LearningPath::Bitcoin, "A", "a1", "1")
        .unwrap();
    assert!(matches!(mutation.persistence, Persistence::Unchanged));
    assert_eq!(tracker.progress(), before);
}

#[test]
fn test_unknown_ids_are_validation_errors() {
    let tracker = memory_tracker();
    assert!(matches!(
        tracker.update_section_progress(LearningPath::Bitcoin, "Z", "a1", "1"),
        Err(ProgressError::UnknownModule { .. })
    ));
    assert!(matches!(
        tracker.section_progress(LearningPath::Bitcoin, "A", "nope"),
        Err(ProgressError::UnknownSection { .. })
    ));
    assert!(tracker.progress().is_empty());
}

#[test]
fn test_tampered_certificate_fails_verification() {
    let tracker = memory_tracker();
    complete_bitcoin(&tracker);
    let issued = tracker
        .generate_path_certificate(LearningPath::Bitcoin, "Alice", None)
        .unwrap()
        .value;

    let mut json = serde_json::to_value(&issued).unwrap();
    json["recipientName"] = serde_json::json!("Mallory");
    let forged: Certificate = serde_json::from_value(json).unwrap();
    assert!(!verify(&forged));

    let mut json = serde_json::to_value(&issued).unwrap();
    json["completedModules"] = serde_json::json!(["A"]);
    let forged: Certificate = serde_json::from_value(json).unwrap();
    assert!(!verify(&forged));
}

#[test]
fn test_blank_recipient_rejected_before_state_changes() {
    let tracker = memory_tracker();
    complete_bitcoin(&tracker);
    let before = tracker.progress();

    let result = tracker.generate_path_certificate(LearningPath::Bitcoin, " \t", None);
    assert!(matches!(result, Err(ProgressError::EmptyRecipient)));
    assert_eq!(tracker.progress(), before);
}

#[test]
fn test_reset_scoping() {
    let tracker = memory_tracker();
    complete_bitcoin(&tracker);
    tracker
        .mark_section_complete(LearningPath::Lightning, "L", "l1")
        .unwrap();
    tracker
        .update_section_progress(LearningPath::Liquid, "Q", "q1", "1")
        .unwrap();
    tracker
        .generate_path_certificate(LearningPath::Bitcoin, "Alice", None)
        .unwrap();

    tracker.reset_progress(Some(LearningPath::Bitcoin));
    let progress = tracker.progress();
    assert!(progress.path(LearningPath::Bitcoin).is_empty());
    assert!(progress.module(LearningPath::Lightning, "L").is_some());
    assert!(progress.module(LearningPath::Liquid, "Q").is_some());
    assert_eq!(progress.certificates().len(), 1);
    assert!(tracker.is_section_locked(LearningPath::Bitcoin, "B", "b1").unwrap());

    tracker.reset_progress(None);
    assert!(tracker.progress().is_empty());
    assert!(tracker.certificates().is_empty());
}

#[test]
fn test_save_failure_keeps_session_progress() {
    let store = Arc::new(MemoryStore::new());
    let tracker = ProgressTracker::open(
        catalog(),
        Box::new(Shared(Arc::clone(&store))),
        TrackerOptions::default(),
    );
    let mut events = tracker.subscribe();

    store.set_unavailable(true);
    let mutation = tracker
        .update_section_progress(LearningPath::Bitcoin, "A", "a1", "1")
        .unwrap();
    assert!(!mutation.is_persisted());
    assert!(mutation.warning().is_some());
    assert_eq!(mutation.value, 33);
    assert_eq!(tracker.section_progress(LearningPath::Bitcoin, "A", "a1").unwrap(), 33);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ProgressEvent::PersistenceFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    store.set_unavailable(false);
    let mutation = tracker
        .update_section_progress(LearningPath::Bitcoin, "A", "a1", "2")
        .unwrap();
    assert!(mutation.is_persisted());
    let stored = store.load().unwrap();
    assert_eq!(
        stored
            .section(LearningPath::Bitcoin, "A", "a1")
            .unwrap()
            .completed_steps()
            .len(),
        2
    );
}

#[test]
fn test_unavailable_store_on_open_degrades() {
    let store = MemoryStore::new();
    store.set_unavailable(true);
    let tracker = ProgressTracker::open(catalog(), Box::new(store), TrackerOptions::default());

    assert!(tracker.load_warning().is_some());
    assert!(tracker.progress().is_empty());
    let mutation = tracker
        .mark_module_started(LearningPath::Bitcoin, "A", Some("a1"))
        .unwrap();
    assert!(!mutation.is_persisted());
    assert!(tracker.module_progress(LearningPath::Bitcoin, "A").is_some());
}

#[test]
fn test_corrupt_store_starts_fresh() {
    let tracker = ProgressTracker::open(
        catalog(),
        Box::new(MemoryStore::with_raw("{\"bitcoin\": [oops")),
        TrackerOptions::default(),
    );
    assert!(tracker.load_warning().is_none());
    assert!(tracker.progress().is_empty());
}

#[test]
fn test_sled_progress_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("progress.sled");

    let issued = {
        let store = SledProgressStore::open(&db_path, "progress").unwrap();
        let tracker = ProgressTracker::open(catalog(), Box::new(store), TrackerOptions::default());
        complete_bitcoin(&tracker);
        tracker
            .generate_path_certificate(LearningPath::Bitcoin, "Alice", None)
            .unwrap()
            .value
    };

    let store = SledProgressStore::open(&db_path, "progress").unwrap();
    let tracker = ProgressTracker::open(catalog(), Box::new(store), TrackerOptions::default());
    assert!(tracker.is_path_complete(LearningPath::Bitcoin).unwrap());
    let reloaded = tracker.certificates_for(LearningPath::Bitcoin);
    assert_eq!(reloaded, vec![issued]);
    assert!(verify(&reloaded[0]));
}

#[test]
fn test_json_document_layout_on_disk() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("progress.json");

    let tracker = ProgressTracker::open(
        catalog(),
        Box::new(JsonFileStore::new(&file)),
        TrackerOptions::default(),
    );
    complete_bitcoin(&tracker);
    tracker
        .generate_path_certificate(LearningPath::Bitcoin, "Alice", None)
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    let section = &raw["bitcoin"]["A"]["completedSections"]["a1"];
    assert_eq!(section["completedSteps"], serde_json::json!(["1", "2", "3"]));
    assert!(section["completedAt"].is_string());
    assert!(raw["bitcoin"]["B"]["completedAt"].is_string());

    let certificates = raw["certificates"].as_object().unwrap();
    assert_eq!(certificates.len(), 1);
    let stored: Certificate =
        serde_json::from_value(certificates.values().next().unwrap().clone()).unwrap();
    assert!(certificate::verify(&stored));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_do_not_lose_steps() {
    let tracker = Arc::new(ProgressTracker::open(
        Arc::new(
            Catalog::new(vec![PathCatalog::new(LearningPath::Liquid)
                .module(ModuleEntry::new("Q", "Sidechains").section("q1", 64))])
            .unwrap(),
        ),
        Box::new(MemoryStore::new()),
        TrackerOptions::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..64 {
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::task::spawn_blocking(move || {
            tracker
                .update_section_progress(LearningPath::Liquid, "Q", "q1", &i.to_string())
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let section = tracker.section_state(LearningPath::Liquid, "Q", "q1").unwrap();
    assert_eq!(section.completed_steps().len(), 64);
    assert!(section.is_complete());
    assert!(tracker.is_path_complete(LearningPath::Liquid).unwrap());
}

#[tokio::test]
async fn test_path_completion_event() {
    let tracker = memory_tracker();
    let mut events = tracker.subscribe();

    tracker
        .mark_section_complete(LearningPath::Lightning, "L", "l1")
        .unwrap();
    let issued = tracker
        .generate_path_certificate(LearningPath::Lightning, "Satoshi", None)
        .unwrap()
        .value;

    let expected = vec![
        ProgressEvent::SectionCompleted {
            path: LearningPath::Lightning,
            module_id: "L".to_string(),
            section_id: "l1".to_string(),
        },
        ProgressEvent::ModuleCompleted {
            path: LearningPath::Lightning,
            module_id: "L".to_string(),
        },
        ProgressEvent::PathCompleted {
            path: LearningPath::Lightning,
        },
        ProgressEvent::CertificateIssued {
            path: LearningPath::Lightning,
            certificate_id: issued.id().to_string(),
        },
    ];
    for event in expected {
        assert_eq!(events.recv().await.unwrap(), event);
    }
}

#[test]
fn test_scoped_reset_writes_session_state() {
    let store = Arc::new(MemoryStore::new());
    let tracker = ProgressTracker::open(
        catalog(),
        Box::new(Shared(Arc::clone(&store))),
        TrackerOptions::default(),
    );

    tracker
        .mark_section_complete(LearningPath::Lightning, "L", "l1")
        .unwrap();
    store.set_unavailable(true);
    let mutation = tracker
        .update_section_progress(LearningPath::Bitcoin, "A", "a1", "1")
        .unwrap();
    assert!(!mutation.is_persisted());

    store.set_unavailable(false);
    let mutation = tracker.reset_progress(Some(LearningPath::Lightning));
    assert!(matches!(mutation.persistence, Persistence::Saved));

    let stored = store.load().unwrap();
    assert_eq!(stored, tracker.progress());
    assert!(stored.section(LearningPath::Bitcoin, "A", "a1").is_some());
    assert!(stored.path(LearningPath::Lightning).is_empty());
}

/// bitcoin: A(a1, a2), both completed explicitly
fn two_section_catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::new(vec![PathCatalog::new(LearningPath::Bitcoin)
            .module(ModuleEntry::new("A", "Money").section("a1", 0).section("a2", 0))])
        .unwrap(),
    )
}

#[test]
fn test_import_completing_last_section_completes_module() {
    let tracker = ProgressTracker::open(
        two_section_catalog(),
        Box::new(MemoryStore::new()),
        TrackerOptions::default(),
    );
    tracker
        .mark_section_complete(LearningPath::Bitcoin, "A", "a1")
        .unwrap();

    let other = ProgressTracker::open(
        two_section_catalog(),
        Box::new(MemoryStore::new()),
        TrackerOptions::default(),
    );
    other
        .mark_section_complete(LearningPath::Bitcoin, "A", "a2")
        .unwrap();

    let mut events = tracker.subscribe();
    let mutation = tracker.import(&other.progress());
    assert!(matches!(mutation.persistence, Persistence::Saved));
    assert_eq!(
        mutation.value.completed_modules,
        vec![(LearningPath::Bitcoin, "A".to_string())]
    );
    assert_eq!(mutation.value.completed_paths, vec![LearningPath::Bitcoin]);

    let module = tracker.module_progress(LearningPath::Bitcoin, "A").unwrap();
    assert_eq!(
        module.completed_at(),
        module.section("a2").unwrap().completed_at()
    );
    assert!(tracker.is_path_complete(LearningPath::Bitcoin).unwrap());
    assert!(tracker
        .generate_path_certificate(LearningPath::Bitcoin, "Alice", None)
        .is_ok());

    assert_eq!(
        events.try_recv().unwrap(),
        ProgressEvent::ModuleCompleted {
            path: LearningPath::Bitcoin,
            module_id: "A".to_string(),
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        ProgressEvent::PathCompleted {
            path: LearningPath::Bitcoin
        }
    );
}

#[test]
fn test_import_drops_ids_outside_catalog() {
    let tracker = memory_tracker();
    let other: UserProgress = serde_json::from_value(serde_json::json!({
        "bitcoin": {
            "GHOST": { "id": "GHOST", "startedAt": "2024-01-01T00:00:00Z" },
            "A": {
                "id": "A",
                "startedAt": "2024-01-01T00:00:00Z",
                "completedAt": "2024-01-02T00:00:00Z",
                "completedSections": {
                    "zz": { "id": "zz", "startedAt": "2024-01-01T00:00:00Z" }
                }
            }
        }
    }))
    .unwrap();

    let mutation = tracker.import(&other);
    assert_eq!(
        mutation.value.skipped,
        vec!["bitcoin/A/zz".to_string(), "bitcoin/GHOST".to_string()]
    );
    assert!(tracker.module_progress(LearningPath::Bitcoin, "GHOST").is_none());

    // module A is known but none of its sections are done
    let module = tracker.module_progress(LearningPath::Bitcoin, "A").unwrap();
    assert!(module.sections().is_empty());
    assert!(!module.is_complete());
    assert!(tracker.is_section_locked(LearningPath::Bitcoin, "B", "b1").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_broadcast_in_commit_order() {
    let mut module_list = PathCatalog::new(LearningPath::Liquid);
    for i in 0..16 {
        module_list = module_list.module(ModuleEntry::new(format!("m{}", i), "").section("s", 0));
    }
    let tracker = Arc::new(ProgressTracker::open(
        Arc::new(Catalog::new(vec![module_list]).unwrap()),
        Box::new(MemoryStore::new()),
        TrackerOptions {
            enforce_locks: false,
            ..Default::default()
        },
    ));
    let mut events = tracker.subscribe();

    let mut handles = Vec::new();
    for i in 0..16 {
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::task::spawn_blocking(move || {
            tracker
                .mark_section_complete(LearningPath::Liquid, &format!("m{}", i), "s")
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let module_events = seen
        .iter()
        .filter(|e| matches!(e, ProgressEvent::ModuleCompleted { .. }))
        .count();
    assert_eq!(module_events, 16);
    assert_eq!(
        seen.last(),
        Some(&ProgressEvent::PathCompleted {
            path: LearningPath::Liquid
        })
    );
}

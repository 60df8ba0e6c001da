//! Station Progress - learning progress tracker for Satoshi Station
//!
//! Tracks a learner through the Bitcoin, Lightning and Liquid learning paths:
//! which sections and modules are complete, which modules are still locked,
//! and which completion certificates have been issued.
//!
//! ## Architecture
//!
//! ```text
//! Presentation (cards, progress bars, lock icons)
//!     │
//!     ▼
//! ProgressTracker ──► events (broadcast)
//!     │
//!     ├─► model        pure mutations, completion on write
//!     ├─► locking      module-granularity gating
//!     ├─► certificate  issuance + SHA-256 verification hash
//!     └─► store        sled / JSON file / memory
//!            ▲
//!         catalog (read-only: paths → modules → sections)
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/station-progress/
//! ├── progress.sled/                     # sled backend
//! ├── satoshi-station-progress.json      # json backend
//! ├── catalog.toml                       # module/section catalog
//! └── config.toml                        # Configuration
//! ```

pub mod catalog;
pub mod certificate;
pub mod config;
pub mod error;
pub mod events;
pub mod locking;
pub mod migration;
pub mod model;
pub mod progress;
pub mod store;
pub mod tracker;

// Re-exports
pub use catalog::{Catalog, ModuleEntry, PathCatalog, SectionEntry};
pub use certificate::{Certificate, ModuleDetail, SectionDetail};
pub use config::{CertificatePolicy, Config, StoreBackend};
pub use error::{ProgressError, StoreError};
pub use events::{EventBus, ProgressEvent};
pub use model::MergeReport;
pub use progress::{LearningPath, ModuleProgress, SectionProgress, UserProgress};
pub use store::{JsonFileStore, MemoryStore, ProgressStore, SledProgressStore};
pub use tracker::{ModuleSummary, Mutation, PathSummary, Persistence, ProgressTracker, TrackerOptions};

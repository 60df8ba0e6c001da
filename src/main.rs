//! Station Progress CLI
//!
//! Drives the progress tracker against a local store, the way the website's
//! presentation layer does.
//!
//! ## Usage
//!
//! ```bash
//! # Overview of a path (percentages, locks)
//! station-progress status bitcoin
//!
//! # Acknowledge a checkpoint / complete a section
//! station-progress step bitcoin money-basics barter 1
//! station-progress complete bitcoin money-basics barter
//!
//! # Issue and check certificates
//! station-progress certify bitcoin "Alice" > cert.json
//! station-progress verify cert.json
//!
//! # Import a legacy document, reset a path
//! station-progress migrate old-progress.json
//! station-progress reset --path bitcoin --yes
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use station_progress::migration::{is_legacy_document, migrate_legacy};
use station_progress::store::open_store;
use station_progress::{
    certificate, Catalog, Certificate, Config, LearningPath, Mutation, ProgressTracker, StoreBackend,
    TrackerOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "station-progress")]
#[command(about = "Learning progress tracker for Satoshi Station")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "STATION_PROGRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Storage backend
    #[arg(long, value_enum)]
    backend: Option<StoreBackend>,

    /// Catalog TOML file
    #[arg(long, env = "STATION_PROGRESS_CATALOG")]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show module percentages and locks for a path
    Status { path: LearningPath },
    /// Mark a module (and optionally a section) as started
    Start {
        path: LearningPath,
        module: String,
        section: Option<String>,
    },
    /// Acknowledge one checkpoint of a section
    Step {
        path: LearningPath,
        module: String,
        section: String,
        step: String,
    },
    /// Complete a section without steps
    Complete {
        path: LearningPath,
        module: String,
        section: String,
    },
    /// Print whether a section is locked
    Locked {
        path: LearningPath,
        module: String,
        section: String,
    },
    /// Issue a certificate for a completed path (printed as JSON)
    Certify { path: LearningPath, recipient: String },
    /// List issued certificates
    Certificates { path: Option<LearningPath> },
    /// Check a certificate JSON file
    Verify { file: PathBuf },
    /// Print the whole progress document
    Export,
    /// Clear progress for one path, or everything
    Reset {
        #[arg(long)]
        path: Option<LearningPath>,
        /// Confirm the irreversible reset
        #[arg(long)]
        yes: bool,
    },
    /// Import a legacy flat progress document
    Migrate { file: PathBuf },
}

fn report<T>(mutation: &Mutation<T>) {
    if let Some(e) = mutation.warning() {
        warn!(error = %e, "Progress was not saved; it only lives in this session");
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("station_progress=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(catalog) = args.catalog {
        config.catalog_path = Some(catalog);
    }

    // Verification needs neither catalog nor store
    if let Command::Verify { file } = &args.command {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let cert: Certificate = serde_json::from_str(&raw).context("parsing certificate")?;
        if certificate::verify(&cert) {
            println!("valid: {} issued to {} on {}", cert.id(), cert.recipient_name(), cert.issued_at());
            return Ok(());
        }
        bail!("certificate {} failed verification", cert.id());
    }

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating {}", config.storage_dir.display()))?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let catalog = Arc::new(Catalog::load(config.catalog_path())?);
    let store = open_store(&config)?;
    let tracker = ProgressTracker::open(catalog, store, TrackerOptions::from(&config));
    if let Some(warning) = tracker.load_warning() {
        warn!(warning, "Starting with empty progress");
    }

    match args.command {
        Command::Status { path } => {
            let summary = tracker.path_summary(path)?;
            println!("{} ({})", summary.title, if summary.complete { "complete" } else { "in progress" });
            for module in summary.modules {
                let lock = if module.locked { "locked" } else { "open" };
                println!("  {:<24} {:>3}%  {}", module.id, module.percent, lock);
            }
        }
        Command::Start { path, module, section } => {
            let mutation = tracker.mark_module_started(path, &module, section.as_deref())?;
            report(&mutation);
            println!("{} started at {}", module, mutation.value.started_at());
        }
        Command::Step { path, module, section, step } => {
            let mutation = tracker.update_section_progress(path, &module, &section, &step)?;
            report(&mutation);
            println!("{}/{}: {}%", module, section, mutation.value);
        }
        Command::Complete { path, module, section } => {
            let mutation = tracker.mark_section_complete(path, &module, &section)?;
            report(&mutation);
            println!("{}/{}: complete", module, section);
        }
        Command::Locked { path, module, section } => {
            println!("{}", tracker.is_section_locked(path, &module, &section)?);
        }
        Command::Certify { path, recipient } => {
            let mutation = tracker.generate_path_certificate(path, &recipient, None)?;
            report(&mutation);
            println!("{}", serde_json::to_string_pretty(&mutation.value)?);
        }
        Command::Certificates { path } => {
            let certificates = match path {
                Some(path) => tracker.certificates_for(path),
                None => tracker.certificates(),
            };
            for cert in certificates {
                println!("{}  {}  {}  {}", cert.id(), cert.path_type(), cert.recipient_name(), cert.issued_at());
            }
        }
        Command::Export => {
            println!("{}", serde_json::to_string_pretty(&tracker.progress())?);
        }
        Command::Reset { path, yes } => {
            if !yes {
                bail!("reset is irreversible; pass --yes to confirm");
            }
            let mutation = tracker.reset_progress(path);
            report(&mutation);
        }
        Command::Migrate { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            if !is_legacy_document(&raw) {
                bail!("{} is not a legacy progress document", file.display());
            }
            let migration = migrate_legacy(&raw, tracker.catalog(), chrono::Utc::now())?;
            for skipped in &migration.skipped {
                warn!(id = %skipped, "Not in catalog, skipped");
            }
            let mutation = tracker.import(&migration.progress);
            report(&mutation);
            println!(
                "migrated {} modules, {} newly complete",
                migration.migrated_modules,
                mutation.value.completed_modules.len()
            );
        }
        Command::Verify { .. } => unreachable!("handled before opening the store"),
    }

    Ok(())
}

//! Glacier: incremental extraction engine for paginated query-by-filter
//! APIs.
//!
//! This crate handles:
//! - Expanding declarative table/query specs into independent work units
//! - Resolving selectors into deterministic filter expressions
//! - Cheap change detection via server-side counts before any page fetch
//! - Paginated fetching with per-page time budgets and tally verification
//! - Historical backfills chunked into resumable descending ranges
//! - Writing gzip-compressed JSON artifacts to cloud storage (S3, GCS,
//!   local)

pub mod config;
pub mod error;
pub mod extract;
pub mod filter;
pub mod metrics;
pub mod plan;
pub mod signal;
pub mod sink;
pub mod source;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use config::Config;
pub use error::ExtractError;
pub use extract::{ExtractionStats, RunReport, UnitOutcome, UnitReport, run_extraction};
pub use signal::shutdown_signal;
pub use storage::{StorageProvider, StorageProviderRef};
pub use tracing::init_tracing;

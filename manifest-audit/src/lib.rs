//! Manifest Audit Library
//!
//! Reconciles two file inventories of the same tree (a ZFS backup listing
//! and a filelist scan) and aggregates filelist sizes per directory prefix.

pub mod aggregate;
pub mod config;
pub mod context;
pub mod input;
pub mod manifest;
pub mod progress;
pub mod reconcile;
pub mod shutdown;
pub mod utils;

// Re-export commonly used types
pub use aggregate::{aggregate, AggregationEngine, AggregationReport};
pub use config::Config;
pub use context::{RunContext, RunOptions};
pub use manifest::{FileRecord, ManifestIndex, MetaValue, NumericPolicy, Source};
pub use reconcile::{reconcile, Category, ReconciliationReport};
pub use utils::errors::AuditError;
pub type Result<T> = std::result::Result<T, AuditError>;

//! Utility modules for manifest auditing.

pub mod errors;
pub mod logger;

pub use errors::{AuditError, Result};

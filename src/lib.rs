//! avis-mirror - Mirrors Avis fiscal-year report folders between SharePoint sites
//!
//! This library provides the selective-sync pipeline: folder resolution and
//! planning, idempotent destination location, the skip-if-present copy
//! decision, and the spreadsheet normalization applied to recognized Avis
//! report workbooks.

pub mod cli;
pub mod config;
pub mod graph;
pub mod logging;
pub mod store;
pub mod sync;
pub mod utils;
pub mod workbook;

// Re-export the core seam and pipeline types for easier use
pub use store::{ReportStore, StorageItem};
pub use sync::{SyncEngine, SyncSummary};
pub use workbook::normalize_workbook;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! deltasync - incremental one-way sync to object storage
//!
//! Uploads files from a local tree that changed after a cutoff date, skipping
//! files whose remote copy already matches by content digest.

pub mod error;
pub mod ignore;
pub mod report;
pub mod store;
pub mod sync;
pub mod types;
pub mod walk;

pub use error::{Result, SyncError};
pub use sync::{run_sync, SyncReport};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

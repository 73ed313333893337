pub mod config;
pub mod core;
pub mod logging;
pub mod models;
pub mod storage;

pub use core::{SyncConfig, SyncEngine, SyncError, SyncReport, SyncStats};
pub use models::{SyncJob, SyncMode, SyncOptions, SyncStatus};

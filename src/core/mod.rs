pub mod checksum;
pub mod comparator;
pub mod conflict;
pub mod engine;
pub mod executor;
pub mod filter;
pub mod planner;
pub mod scanner;
pub mod stats;
pub mod transfer;

pub use checksum::{checksum, ChecksumCache};
pub use comparator::{Classification, CompareConfig, Comparison, FileComparator};
pub use conflict::{ConflictDetector, ConflictResolution, ConflictResolver, ResolutionRule};
pub use engine::{SyncConfig, SyncEngine, SyncError, SyncReport};
pub use executor::{ExecutionOutcome, SyncExecutor};
pub use filter::FilterEngine;
pub use planner::{ActionSummary, SyncAction, SyncPlan, SyncPlanner};
pub use scanner::{EntryIndex, FileScanner, ScanResult};
pub use stats::{AtomicStats, SyncStats};
pub use transfer::{transfer_file, ProgressSender, TransferProgress};

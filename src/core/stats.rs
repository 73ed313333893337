use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 同步统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub copied: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub conflicts: u64,
    pub errors: u64,
    pub bytes_transferred: u64,
}

impl SyncStats {
    /// 已传输的数据量（MB）
    pub fn megabytes_transferred(&self) -> f64 {
        self.bytes_transferred as f64 / (1024.0 * 1024.0)
    }
}

/// 多个传输任务共享的计数器
#[derive(Debug, Default)]
pub struct AtomicStats {
    copied: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    skipped: AtomicU64,
    conflicts: AtomicU64,
    errors: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl AtomicStats {
    pub fn add_copied(&self) {
        self.copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, count: u64) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_conflicts(&self, count: u64) {
        self.conflicts.store(count, Ordering::Relaxed);
    }

    pub fn add_errors(&self, count: u64) {
        self.errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            copied: self.copied.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}

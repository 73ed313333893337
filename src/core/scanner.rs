use crate::storage::{FileInfo, ListFailure, Storage, StorageResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 相对路径 -> 条目
pub type EntryIndex = HashMap<String, FileInfo>;

/// 扫描结果
#[derive(Debug, Default)]
pub struct ScanResult {
    pub index: EntryIndex,
    /// 无法读取而被跳过的子条目
    pub failures: Vec<ListFailure>,
    pub file_count: usize,
    pub dir_count: usize,
}

impl ScanResult {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// 扫描失败的路径（其下的条目状态未知）
    pub fn failed_paths(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.path.as_str())
    }
}

/// 文件扫描器
#[derive(Default)]
pub struct FileScanner {
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl FileScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带取消标志的扫描器
    pub fn with_cancel(cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            cancel_flag: Some(cancel_flag),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 扫描存储并建立条目索引
    ///
    /// 无副作用，可重复调用。单个子条目读取失败只记录并跳过，整体扫描继续。
    pub async fn scan_storage(
        &self,
        storage: &dyn Storage,
        prefix: Option<&str>,
    ) -> StorageResult<ScanResult> {
        info!("开始扫描存储: {}, prefix: {:?}", storage.name(), prefix);

        let listing = storage.list_files(prefix).await?;
        debug!("list_files 返回 {} 个条目", listing.files.len());

        let mut result = ScanResult {
            index: HashMap::with_capacity(listing.files.len()),
            failures: listing.failures,
            ..Default::default()
        };

        for failure in &result.failures {
            warn!("扫描时跳过无法读取的条目: {} - {}", failure.path, failure.error);
        }

        for file in listing.files {
            if result.index.len() % 100 == 0 && self.is_cancelled() {
                info!("扫描已取消: {}", storage.name());
                break;
            }

            if file.is_dir {
                result.dir_count += 1;
            } else {
                result.file_count += 1;
            }
            result.index.insert(file.path.clone(), file);
        }

        info!(
            "扫描完成: {} 个文件, {} 个目录, {} 个失败",
            result.file_count,
            result.dir_count,
            result.failure_count()
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_scan_builds_relative_index() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs/img")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(tmp.path().join("docs/img/logo.png"), b"png").unwrap();

        let storage = LocalStorage::new(tmp.path());
        let result = FileScanner::new().scan_storage(&storage, None).await.unwrap();

        assert_eq!(result.file_count, 2);
        assert_eq!(result.dir_count, 2);
        assert_eq!(result.failure_count(), 0);

        let a = &result.index["a.txt"];
        assert_eq!(a.size, 5);
        assert!(!a.is_dir);
        assert!(result.index["docs/img"].is_dir);
        assert_eq!(result.index["docs/img"].size, 0);
        assert!(result.index.contains_key("docs/img/logo.png"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_keeps_readable_entries_on_partial_failure() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/readme.md"), b"# hi").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("docs/broken")).unwrap();

        let storage = LocalStorage::new(tmp.path());
        let result = FileScanner::new().scan_storage(&storage, None).await.unwrap();

        assert_eq!(result.file_count, 1);
        assert_eq!(result.dir_count, 1);
        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.failed_paths().collect::<Vec<_>>(), vec!["docs/broken"]);
        assert!(!result.index.contains_key("docs/broken"));
    }

    #[tokio::test]
    async fn test_scan_is_repeatable() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("x"), b"1").unwrap();

        let storage = LocalStorage::new(tmp.path());
        let scanner = FileScanner::new();
        let first = scanner.scan_storage(&storage, None).await.unwrap();
        let second = scanner.scan_storage(&storage, None).await.unwrap();
        assert_eq!(first.index, second.index);
    }
}

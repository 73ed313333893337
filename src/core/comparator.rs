use crate::core::checksum::ChecksumCache;
use crate::models::SyncOptions;
use crate::storage::FileInfo;
use tracing::debug;

/// 单个文件的比较结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 目标不存在
    Copy,
    /// 目标存在但需要覆盖
    Update,
    /// 无需处理
    Skip,
}

/// 比较结果，附带无法获取校验和时的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub classification: Classification,
    pub checksum_error: Option<String>,
}

impl Comparison {
    fn of(classification: Classification) -> Self {
        Self {
            classification,
            checksum_error: None,
        }
    }
}

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// 时间容差（秒），用于抹平不同文件系统的时间精度差异
    pub time_tolerance_seconds: i64,
    pub use_timestamp: bool,
    pub use_checksum: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 2,
            use_timestamp: true,
            use_checksum: false,
        }
    }
}

impl From<&SyncOptions> for CompareConfig {
    fn from(options: &SyncOptions) -> Self {
        Self {
            use_timestamp: options.use_timestamp,
            use_checksum: options.use_checksum,
            ..Default::default()
        }
    }
}

/// 文件比较器
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 判断源文件相对目标需要的动作
    ///
    /// 规则依次为：目标不存在则复制；大小不同则更新；仅按时间比较时源比目标新超过容差则更新；
    /// 按校验和比较时两侧都能算出且不同则更新。其余情况跳过。目录不在这里处理。
    pub async fn classify(
        &self,
        source: &FileInfo,
        dest: Option<&FileInfo>,
        checksums: &ChecksumCache,
    ) -> Comparison {
        let Some(dest) = dest else {
            return Comparison::of(Classification::Copy);
        };

        if source.size != dest.size {
            debug!(
                "文件大小不同: {} (src={}, dst={})",
                source.path, source.size, dest.size
            );
            return Comparison::of(Classification::Update);
        }

        if self.config.use_timestamp && !self.config.use_checksum {
            if source.modified_time > dest.modified_time + self.config.time_tolerance_seconds {
                debug!(
                    "源文件更新: {} (src={}, dst={})",
                    source.path, source.modified_time, dest.modified_time
                );
                return Comparison::of(Classification::Update);
            }
            return Comparison::of(Classification::Skip);
        }

        if self.config.use_checksum {
            let src_sum = checksums.source(&source.path).await;
            let dst_sum = checksums.dest(&dest.path).await;

            return match (src_sum, dst_sum) {
                (Some(s), Some(d)) if s != d => {
                    debug!("校验和不同: {}", source.path);
                    Comparison::of(Classification::Update)
                }
                (Some(_), Some(_)) => Comparison::of(Classification::Skip),
                (s, _) => {
                    let side = if s.is_none() { "源" } else { "目标" };
                    Comparison {
                        classification: Classification::Skip,
                        checksum_error: Some(format!("{}: 无法获取{}文件校验和", source.path, side)),
                    }
                }
            };
        }

        Comparison::of(Classification::Skip)
    }
}

impl Default for FileComparator {
    fn default() -> Self {
        Self::with_config(CompareConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStorage, Storage};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Trees {
        src: TempDir,
        dst: TempDir,
    }

    impl Trees {
        fn new() -> Self {
            Self {
                src: tempfile::tempdir().unwrap(),
                dst: tempfile::tempdir().unwrap(),
            }
        }

        fn cache(&self) -> ChecksumCache {
            ChecksumCache::new(
                Arc::new(LocalStorage::new(self.src.path())) as Arc<dyn Storage>,
                Arc::new(LocalStorage::new(self.dst.path())) as Arc<dyn Storage>,
                4096,
            )
        }
    }

    fn comparator(use_timestamp: bool, use_checksum: bool) -> FileComparator {
        FileComparator::with_config(CompareConfig {
            use_timestamp,
            use_checksum,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_missing_dest_is_copy() {
        let trees = Trees::new();
        let src = FileInfo::file("a.txt", 5, 100);
        let result = comparator(true, false).classify(&src, None, &trees.cache()).await;
        assert_eq!(result.classification, Classification::Copy);
    }

    #[tokio::test]
    async fn test_size_difference_is_update() {
        let trees = Trees::new();
        let src = FileInfo::file("a.txt", 5, 100);
        let dst = FileInfo::file("a.txt", 6, 500);
        let result = comparator(true, false)
            .classify(&src, Some(&dst), &trees.cache())
            .await;
        assert_eq!(result.classification, Classification::Update);
    }

    #[tokio::test]
    async fn test_timestamp_tolerance() {
        let trees = Trees::new();
        let cache = trees.cache();
        let cmp = comparator(true, false);
        let dst = FileInfo::file("a.txt", 5, 100);

        let within = FileInfo::file("a.txt", 5, 102);
        assert_eq!(
            cmp.classify(&within, Some(&dst), &cache).await.classification,
            Classification::Skip
        );

        let newer = FileInfo::file("a.txt", 5, 103);
        assert_eq!(
            cmp.classify(&newer, Some(&dst), &cache).await.classification,
            Classification::Update
        );

        // 目标更新不会反向覆盖
        let older = FileInfo::file("a.txt", 5, 10);
        assert_eq!(
            cmp.classify(&older, Some(&dst), &cache).await.classification,
            Classification::Skip
        );
    }

    #[tokio::test]
    async fn test_checksum_difference_with_equal_size_is_update() {
        let trees = Trees::new();
        std::fs::write(trees.src.path().join("a.txt"), b"0123456789").unwrap();
        std::fs::write(trees.dst.path().join("a.txt"), b"abcdefghij").unwrap();

        let src = FileInfo::file("a.txt", 10, 100);
        let dst = FileInfo::file("a.txt", 10, 100);
        let result = comparator(true, true)
            .classify(&src, Some(&dst), &trees.cache())
            .await;
        assert_eq!(result.classification, Classification::Update);
    }

    #[tokio::test]
    async fn test_equal_checksum_ignores_mtime() {
        let trees = Trees::new();
        std::fs::write(trees.src.path().join("a.txt"), b"same").unwrap();
        std::fs::write(trees.dst.path().join("a.txt"), b"same").unwrap();

        let src = FileInfo::file("a.txt", 4, 9_000);
        let dst = FileInfo::file("a.txt", 4, 100);
        let result = comparator(true, true)
            .classify(&src, Some(&dst), &trees.cache())
            .await;
        assert_eq!(result.classification, Classification::Skip);
        assert!(result.checksum_error.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_checksum_skips_with_error() {
        let trees = Trees::new();
        std::fs::write(trees.src.path().join("a.txt"), b"data").unwrap();

        let src = FileInfo::file("a.txt", 4, 100);
        let dst = FileInfo::file("a.txt", 4, 100);
        let result = comparator(false, true)
            .classify(&src, Some(&dst), &trees.cache())
            .await;
        assert_eq!(result.classification, Classification::Skip);
        assert!(result.checksum_error.is_some());
    }

    #[tokio::test]
    async fn test_no_comparison_method_skips_same_size() {
        let trees = Trees::new();
        let src = FileInfo::file("a.txt", 4, 9_000);
        let dst = FileInfo::file("a.txt", 4, 100);
        let result = comparator(false, false)
            .classify(&src, Some(&dst), &trees.cache())
            .await;
        assert_eq!(result.classification, Classification::Skip);
    }
}

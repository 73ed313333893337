use crate::core::checksum::ChecksumCache;
use crate::core::comparator::CompareConfig;
use crate::core::scanner::EntryIndex;
use crate::models::{SyncMode, SyncOptions};
use crate::storage::FileInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// 冲突解决结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// 用源覆盖目标
    KeepSource,
    /// 保留目标，不做处理
    KeepDest,
}

impl std::fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictResolution::KeepSource => write!(f, "keep_source"),
            ConflictResolution::KeepDest => write!(f, "keep_dest"),
        }
    }
}

/// 决定冲突结果的规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionRule {
    /// 强制模式：源优先
    Forced,
    /// 源文件更新
    SourceNewer,
    /// 目标更新或时间相同
    DestNewerOrTie,
}

/// 冲突检测器
///
/// 只比较当前两侧的状态，没有上次同步的基线记录。
pub struct ConflictDetector {
    time_tolerance_seconds: i64,
    use_checksum: bool,
}

impl ConflictDetector {
    pub fn new(options: &SyncOptions) -> Self {
        Self {
            time_tolerance_seconds: CompareConfig::from(options).time_tolerance_seconds,
            use_checksum: options.use_checksum,
        }
    }

    /// 找出两侧都存在且内容可能不同的文件，仅在双向模式下有结果
    pub async fn detect(
        &self,
        mode: SyncMode,
        source: &EntryIndex,
        dest: &EntryIndex,
        checksums: &ChecksumCache,
    ) -> BTreeSet<String> {
        let mut conflicts = BTreeSet::new();
        if mode != SyncMode::TwoWay {
            return conflicts;
        }

        let mut paths: Vec<&String> = source.keys().collect();
        paths.sort();

        for path in paths {
            let (Some(src), Some(dst)) = (source.get(path), dest.get(path)) else {
                continue;
            };
            if src.is_dir || dst.is_dir {
                continue;
            }

            let conflicting = if self.use_checksum {
                match (checksums.source(path).await, checksums.dest(path).await) {
                    (Some(s), Some(d)) => s != d,
                    // 无法比较时不视为冲突，交给比较器处理
                    _ => false,
                }
            } else {
                (src.modified_time - dst.modified_time).abs() > self.time_tolerance_seconds
            };

            if conflicting {
                warn!("检测到冲突: {}", path);
                conflicts.insert(path.clone());
            }
        }

        if !conflicts.is_empty() {
            warn!("共检测到 {} 个冲突", conflicts.len());
        }

        conflicts
    }
}

/// 冲突解决器
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    force: bool,
}

impl ConflictResolver {
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    /// 解决单个冲突：强制模式源优先，否则较新的一侧优先，时间相同时保留目标
    pub fn resolve(&self, source: &FileInfo, dest: &FileInfo) -> (ConflictResolution, ResolutionRule) {
        if self.force {
            warn!("冲突按源解决（强制模式）: {}", source.path);
            return (ConflictResolution::KeepSource, ResolutionRule::Forced);
        }

        if source.modified_time > dest.modified_time {
            info!("冲突按源解决（源较新）: {}", source.path);
            (ConflictResolution::KeepSource, ResolutionRule::SourceNewer)
        } else {
            info!("冲突按目标解决（目标较新）: {}", source.path);
            (ConflictResolution::KeepDest, ResolutionRule::DestNewerOrTie)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStorage, Storage};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn index(entries: &[FileInfo]) -> EntryIndex {
        entries
            .iter()
            .map(|e| (e.path.clone(), e.clone()))
            .collect::<HashMap<_, _>>()
    }

    fn options(use_checksum: bool) -> SyncOptions {
        SyncOptions {
            sync_mode: SyncMode::TwoWay,
            use_checksum,
            ..Default::default()
        }
    }

    fn cache(src: &std::path::Path, dst: &std::path::Path) -> ChecksumCache {
        ChecksumCache::new(
            Arc::new(LocalStorage::new(src)) as Arc<dyn Storage>,
            Arc::new(LocalStorage::new(dst)) as Arc<dyn Storage>,
            1024,
        )
    }

    #[tokio::test]
    async fn test_mtime_heuristic_flags_conflicts() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let checksums = cache(src_dir.path(), dst_dir.path());

        let source = index(&[
            FileInfo::file("shared.txt", 3, 100),
            FileInfo::file("close.txt", 3, 100),
            FileInfo::file("only_src.txt", 3, 100),
            FileInfo::dir("d", 100),
        ]);
        let dest = index(&[
            FileInfo::file("shared.txt", 3, 200),
            FileInfo::file("close.txt", 3, 102),
            FileInfo::dir("d", 900),
        ]);

        let detector = ConflictDetector::new(&options(false));
        let conflicts = detector
            .detect(SyncMode::TwoWay, &source, &dest, &checksums)
            .await;
        assert_eq!(conflicts.into_iter().collect::<Vec<_>>(), vec!["shared.txt"]);

        // 非双向模式不检测
        let none = detector
            .detect(SyncMode::OneWay, &source, &dest, &checksums)
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_equal_checksums_never_conflict() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("same.txt"), b"abc").unwrap();
        std::fs::write(dst_dir.path().join("same.txt"), b"abc").unwrap();
        std::fs::write(src_dir.path().join("diff.txt"), b"abc").unwrap();
        std::fs::write(dst_dir.path().join("diff.txt"), b"xyz").unwrap();
        let checksums = cache(src_dir.path(), dst_dir.path());

        let source = index(&[
            FileInfo::file("same.txt", 3, 100),
            FileInfo::file("diff.txt", 3, 100),
        ]);
        let dest = index(&[
            FileInfo::file("same.txt", 3, 10_000),
            FileInfo::file("diff.txt", 3, 100),
        ]);

        let conflicts = ConflictDetector::new(&options(true))
            .detect(SyncMode::TwoWay, &source, &dest, &checksums)
            .await;
        assert_eq!(conflicts.into_iter().collect::<Vec<_>>(), vec!["diff.txt"]);
    }

    #[test]
    fn test_resolution_rules() {
        let src = FileInfo::file("a", 1, 100);
        let newer_dst = FileInfo::file("a", 1, 200);
        let older_dst = FileInfo::file("a", 1, 50);
        let tie_dst = FileInfo::file("a", 1, 100);

        let resolver = ConflictResolver::new(false);
        assert_eq!(
            resolver.resolve(&src, &newer_dst),
            (ConflictResolution::KeepDest, ResolutionRule::DestNewerOrTie)
        );
        assert_eq!(
            resolver.resolve(&src, &older_dst),
            (ConflictResolution::KeepSource, ResolutionRule::SourceNewer)
        );
        assert_eq!(resolver.resolve(&src, &tie_dst).0, ConflictResolution::KeepDest);

        let forced = ConflictResolver::new(true);
        assert_eq!(
            forced.resolve(&src, &newer_dst),
            (ConflictResolution::KeepSource, ResolutionRule::Forced)
        );
    }
}

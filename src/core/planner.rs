use crate::core::checksum::ChecksumCache;
use crate::core::comparator::{Classification, CompareConfig, FileComparator};
use crate::core::conflict::{ConflictDetector, ConflictResolution, ConflictResolver};
use crate::core::filter::FilterEngine;
use crate::core::scanner::{EntryIndex, ScanResult};
use crate::models::{SyncMode, SyncOptions};
use crate::storage::FileInfo;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// 同步动作，路径均为相对路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 复制新文件或创建目录
    Copy {
        source_path: String,
        dest_path: String,
        is_dir: bool,
        size: u64,
        modified_time: i64,
    },
    /// 覆盖已存在的文件
    Update {
        source_path: String,
        dest_path: String,
        is_dir: bool,
        size: u64,
        modified_time: i64,
    },
    /// 删除目标中的条目
    Delete { dest_path: String, is_dir: bool },
    /// 跳过
    Skip { path: String },
    /// 已解决的冲突，实际执行的是 Update 或 Skip
    Conflict {
        path: String,
        resolution: ConflictResolution,
    },
}

impl SyncAction {
    fn copy(source: &FileInfo) -> Self {
        SyncAction::Copy {
            source_path: source.path.clone(),
            dest_path: source.path.clone(),
            is_dir: source.is_dir,
            size: source.size,
            modified_time: source.modified_time,
        }
    }

    fn update(source: &FileInfo) -> Self {
        SyncAction::Update {
            source_path: source.path.clone(),
            dest_path: source.path.clone(),
            is_dir: source.is_dir,
            size: source.size,
            modified_time: source.modified_time,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            SyncAction::Copy { dest_path, .. } => dest_path,
            SyncAction::Update { dest_path, .. } => dest_path,
            SyncAction::Delete { dest_path, .. } => dest_path,
            SyncAction::Skip { path } => path,
            SyncAction::Conflict { path, .. } => path,
        }
    }
}

/// 同步计划
///
/// 每个相对路径最多出现在一个动作列表中，执行顺序为：创建目录、复制/更新、删除。
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub dirs_to_create: Vec<SyncAction>,
    pub files_to_copy: Vec<SyncAction>,
    pub files_to_update: Vec<SyncAction>,
    pub to_delete: Vec<SyncAction>,
    pub skipped: BTreeSet<String>,
    pub conflicts: BTreeMap<String, ConflictResolution>,
    /// 规划阶段的非致命错误（如无法获取校验和）
    pub errors: Vec<String>,
}

impl SyncPlan {
    pub fn summary(&self) -> ActionSummary {
        let bytes = |actions: &[SyncAction]| -> u64 {
            actions
                .iter()
                .map(|a| match a {
                    SyncAction::Copy { size, .. } | SyncAction::Update { size, .. } => *size,
                    _ => 0,
                })
                .sum()
        };

        ActionSummary {
            dir_count: self.dirs_to_create.len(),
            copy_count: self.files_to_copy.len(),
            copy_bytes: bytes(&self.files_to_copy),
            update_count: self.files_to_update.len(),
            update_bytes: bytes(&self.files_to_update),
            delete_count: self.to_delete.len(),
            skip_count: self.skipped.len(),
            conflict_count: self.conflicts.len(),
        }
    }

    /// 没有任何需要执行的变更
    pub fn is_empty(&self) -> bool {
        self.dirs_to_create.is_empty()
            && self.files_to_copy.is_empty()
            && self.files_to_update.is_empty()
            && self.to_delete.is_empty()
    }

    /// 按执行顺序列出全部动作，末尾附带跳过和冲突记录
    pub fn actions(&self) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        actions.extend(self.dirs_to_create.iter().cloned());
        actions.extend(self.files_to_copy.iter().cloned());
        actions.extend(self.files_to_update.iter().cloned());
        actions.extend(self.to_delete.iter().cloned());
        actions.extend(self.skipped.iter().map(|p| SyncAction::Skip { path: p.clone() }));
        actions.extend(self.conflicts.iter().map(|(p, r)| SyncAction::Conflict {
            path: p.clone(),
            resolution: *r,
        }));
        actions
    }
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSummary {
    pub dir_count: usize,
    pub copy_count: usize,
    pub copy_bytes: u64,
    pub update_count: usize,
    pub update_bytes: u64,
    pub delete_count: usize,
    pub skip_count: usize,
    pub conflict_count: usize,
}

impl ActionSummary {
    pub fn total_transfer_bytes(&self) -> u64 {
        self.copy_bytes + self.update_bytes
    }
}

/// 同步计划生成器
pub struct SyncPlanner {
    mode: SyncMode,
    filter: FilterEngine,
    comparator: FileComparator,
    detector: ConflictDetector,
    resolver: ConflictResolver,
}

impl SyncPlanner {
    pub fn new(options: &SyncOptions) -> Self {
        Self {
            mode: options.sync_mode,
            filter: FilterEngine::new(&options.exclude_patterns, &options.include_patterns),
            comparator: FileComparator::with_config(CompareConfig::from(options)),
            detector: ConflictDetector::new(options),
            resolver: ConflictResolver::new(options.force),
        }
    }

    /// 按过滤规则筛选源索引
    pub fn filter_index(&self, index: &EntryIndex) -> EntryIndex {
        index
            .iter()
            .filter(|(path, _)| self.filter.include(path))
            .map(|(path, info)| (path.clone(), info.clone()))
            .collect()
    }

    /// 生成同步计划
    pub async fn plan(
        &self,
        source: &ScanResult,
        dest: &ScanResult,
        checksums: &ChecksumCache,
    ) -> SyncPlan {
        let source_index = self.filter_index(&source.index);
        let dest_index = &dest.index;
        debug!(
            "过滤后源条目 {} 个（原 {} 个）",
            source_index.len(),
            source.index.len()
        );

        let conflicts = self
            .detector
            .detect(self.mode, &source_index, dest_index, checksums)
            .await;

        let mut plan = SyncPlan::default();

        let mut paths: Vec<&String> = source_index.keys().collect();
        paths.sort();

        for path in paths {
            let src = &source_index[path];
            let dst = dest_index.get(path);

            if src.is_dir {
                if dst.is_none() {
                    plan.dirs_to_create.push(SyncAction::copy(src));
                }
                continue;
            }

            if let (true, Some(dst)) = (conflicts.contains(path), dst) {
                let (resolution, rule) = self.resolver.resolve(src, dst);
                debug!("冲突处理: {} -> {} ({:?})", path, resolution, rule);
                plan.conflicts.insert(path.clone(), resolution);
                match resolution {
                    ConflictResolution::KeepSource => plan.files_to_update.push(SyncAction::update(src)),
                    ConflictResolution::KeepDest => {
                        plan.skipped.insert(path.clone());
                    }
                }
                continue;
            }

            let comparison = self.comparator.classify(src, dst, checksums).await;
            if let Some(err) = comparison.checksum_error {
                plan.errors.push(err);
            }

            match comparison.classification {
                Classification::Copy => plan.files_to_copy.push(SyncAction::copy(src)),
                Classification::Update => plan.files_to_update.push(SyncAction::update(src)),
                Classification::Skip => {
                    plan.skipped.insert(path.clone());
                }
            }
        }

        if self.mode == SyncMode::Mirror {
            plan.to_delete = self.plan_deletions(&source_index, source, dest_index);
        }

        let summary = plan.summary();
        info!(
            "同步计划: 创建目录 {}, 复制 {}, 更新 {}, 删除 {}, 跳过 {}, 冲突 {}",
            summary.dir_count,
            summary.copy_count,
            summary.update_count,
            summary.delete_count,
            summary.skip_count,
            summary.conflict_count
        );

        plan
    }

    /// 镜像模式：目标中存在而过滤后的源中不存在的条目
    ///
    /// 已计划删除的目录下的条目不再单独列出；源扫描失败的路径下不删除任何条目。
    fn plan_deletions(
        &self,
        source_index: &EntryIndex,
        source: &ScanResult,
        dest_index: &EntryIndex,
    ) -> Vec<SyncAction> {
        let failed: Vec<&str> = source.failed_paths().collect();
        let under_failed = |path: &str| {
            failed.iter().any(|f| {
                f.is_empty() || path == *f || path.strip_prefix(*f).is_some_and(|r| r.starts_with('/'))
            })
        };

        let mut paths: Vec<&String> = dest_index.keys().collect();
        paths.sort();

        let mut deleted_dirs: HashSet<&str> = HashSet::new();
        let mut deletions = Vec::new();

        for path in paths {
            if source_index.contains_key(path) || !self.filter.include(path) {
                continue;
            }
            if under_failed(path) {
                debug!("源扫描失败，保留目标条目: {}", path);
                continue;
            }
            if has_deleted_ancestor(path, &deleted_dirs) {
                continue;
            }

            let is_dir = dest_index[path].is_dir;
            if is_dir {
                deleted_dirs.insert(path.as_str());
            }
            deletions.push(SyncAction::Delete {
                dest_path: path.clone(),
                is_dir,
            });
        }

        deletions
    }
}

fn has_deleted_ancestor(path: &str, deleted_dirs: &HashSet<&str>) -> bool {
    path.match_indices('/')
        .any(|(idx, _)| deleted_dirs.contains(&path[..idx]))
}

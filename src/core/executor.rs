use crate::core::planner::{SyncAction, SyncPlan};
use crate::core::stats::{AtomicStats, SyncStats};
use crate::core::transfer::{transfer_file, ProgressSender};
use crate::models::SyncOptions;
use crate::storage::{Storage, DEFAULT_CHUNK_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// 计划执行结果
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stats: SyncStats,
    pub errors: Vec<String>,
    /// 执行中途收到取消信号，剩余动作未派发
    pub cancelled: bool,
}

/// 单个传输任务需要的上下文，派发到后台任务时整体克隆
#[derive(Clone)]
struct TaskContext {
    source: Arc<dyn Storage>,
    dest: Arc<dyn Storage>,
    chunk_size: usize,
    backup: bool,
    dry_run: bool,
    progress: Option<ProgressSender>,
}

/// 计划执行器
///
/// 执行顺序：依次创建目录，然后以有限并发复制/更新文件，全部完成后再依次删除。
/// 单个路径失败只计入错误数，不影响其它动作。
pub struct SyncExecutor {
    ctx: TaskContext,
    max_concurrent: usize,
    cancelled: Arc<AtomicBool>,
}

impl SyncExecutor {
    pub fn new(source: Arc<dyn Storage>, dest: Arc<dyn Storage>, options: &SyncOptions) -> Self {
        Self {
            ctx: TaskContext {
                source,
                dest,
                chunk_size: DEFAULT_CHUNK_SIZE,
                backup: options.backup,
                dry_run: options.dry_run,
                progress: None,
            },
            max_concurrent: 4,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.ctx.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressSender>) -> Self {
        self.ctx.progress = progress;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 执行计划，`scan_errors` 是扫描阶段已发生的错误，一并计入统计
    pub async fn execute(&self, plan: &SyncPlan, scan_errors: Vec<String>) -> ExecutionOutcome {
        let stats = Arc::new(AtomicStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));

        stats.add_skipped(plan.skipped.len() as u64);
        stats.set_conflicts(plan.conflicts.len() as u64);

        {
            let mut errs = errors.write().await;
            for err in scan_errors.into_iter().chain(plan.errors.iter().cloned()) {
                error!("{}", err);
                stats.add_errors(1);
                errs.push(err);
            }
        }

        let mut cancelled = false;

        // 1. 目录必须先于其下的文件创建
        for action in &plan.dirs_to_create {
            if self.is_cancelled() {
                cancelled = true;
                break;
            }
            let SyncAction::Copy { dest_path, .. } = action else {
                continue;
            };
            match self.create_directory(dest_path).await {
                Ok(()) => stats.add_copied(),
                Err(e) => {
                    error!("{}", e);
                    stats.add_errors(1);
                    errors.write().await.push(e);
                }
            }
        }

        // 2. 并行复制/更新
        if !cancelled {
            cancelled = self.run_transfers(plan, &stats, &errors).await;
        }

        // 3. 所有传输完成后再删除
        if !cancelled {
            for action in &plan.to_delete {
                if self.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let SyncAction::Delete { dest_path, is_dir } = action else {
                    continue;
                };
                match self.delete(dest_path, *is_dir).await {
                    Ok(()) => stats.add_deleted(),
                    Err(e) => {
                        error!("{}", e);
                        stats.add_errors(1);
                        errors.write().await.push(e);
                    }
                }
            }
        }

        if cancelled {
            warn!("同步已取消，剩余操作未执行");
        }

        let error_list = errors.read().await.clone();
        ExecutionOutcome {
            stats: stats.snapshot(),
            errors: error_list,
            cancelled,
        }
    }

    async fn run_transfers(
        &self,
        plan: &SyncPlan,
        stats: &Arc<AtomicStats>,
        errors: &Arc<RwLock<Vec<String>>>,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();
        let mut cancelled = false;

        for action in plan.files_to_copy.iter().chain(plan.files_to_update.iter()) {
            if self.is_cancelled() {
                cancelled = true;
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let ctx = self.ctx.clone();
            let stats = stats.clone();
            let errors = errors.clone();
            let action = action.clone();

            let handle = tokio::spawn(async move {
                match Self::copy_or_update(&ctx, &action).await {
                    Ok(bytes) => {
                        if matches!(action, SyncAction::Update { .. }) {
                            stats.add_updated();
                        } else {
                            stats.add_copied();
                        }
                        stats.add_bytes(bytes);
                    }
                    Err(e) => {
                        error!("{}", e);
                        stats.add_errors(1);
                        errors.write().await.push(e);
                    }
                }
                drop(permit);
            });

            handles.push(handle);
        }

        // 等待所有任务完成（包括取消前已派发的）
        for handle in handles {
            if let Err(e) = handle.await {
                stats.add_errors(1);
                errors.write().await.push(format!("传输任务异常退出: {}", e));
            }
        }

        cancelled
    }

    async fn create_directory(&self, path: &str) -> Result<(), String> {
        if self.ctx.dry_run {
            info!("[DRY RUN] 创建目录: {}", path);
            return Ok(());
        }

        debug!("创建目录: {}", path);
        self.ctx
            .dest
            .create_dir(path)
            .await
            .map_err(|e| format!("创建目录失败 {}: {}", path, e))
    }

    async fn copy_or_update(ctx: &TaskContext, action: &SyncAction) -> Result<u64, String> {
        let (source_path, dest_path, size, modified_time, is_update) = match action {
            SyncAction::Copy {
                source_path,
                dest_path,
                size,
                modified_time,
                ..
            } => (source_path, dest_path, *size, *modified_time, false),
            SyncAction::Update {
                source_path,
                dest_path,
                size,
                modified_time,
                ..
            } => (source_path, dest_path, *size, *modified_time, true),
            _ => return Ok(0),
        };
        let verb = if is_update { "更新" } else { "复制" };

        if ctx.dry_run {
            info!("[DRY RUN] {}: {} ({} 字节)", verb, dest_path, size);
            return Ok(0);
        }

        // 复制的目标也可能已存在（目标子树扫描失败时）
        if ctx.backup && (is_update || matches!(ctx.dest.exists(dest_path).await, Ok(true))) {
            Self::backup(ctx, dest_path).await;
        }

        debug!("{}: {} -> {} ({} 字节)", verb, source_path, dest_path, size);
        let bytes = transfer_file(
            ctx.source.as_ref(),
            source_path,
            ctx.dest.as_ref(),
            dest_path,
            size,
            ctx.chunk_size,
            ctx.progress.as_ref(),
        )
        .await
        .map_err(|e| format!("{}失败 {}: {}", verb, dest_path, e))?;

        if let Err(e) = ctx.dest.set_modified(dest_path, modified_time).await {
            debug!("无法保留修改时间: {} - {}", dest_path, e);
        }

        Ok(bytes)
    }

    /// 覆盖或删除前复制一份 `<path>.bak.<时间戳>`，失败只告警
    async fn backup(ctx: &TaskContext, path: &str) {
        let backup_path = format!("{}.bak.{}", path, chrono::Utc::now().timestamp());
        match ctx.dest.copy(path, &backup_path, ctx.chunk_size).await {
            Ok(_) => info!("已创建备份: {}", backup_path),
            Err(e) => warn!("创建备份失败 {}: {}", path, e),
        }
    }

    async fn delete(&self, path: &str, is_dir: bool) -> Result<(), String> {
        if self.ctx.dry_run {
            info!("[DRY RUN] 删除{}: {}", if is_dir { "目录" } else { "文件" }, path);
            return Ok(());
        }

        if self.ctx.backup && !is_dir {
            Self::backup(&self.ctx, path).await;
        }

        debug!("删除: {}", path);
        self.ctx
            .dest
            .delete_tree(path)
            .await
            .map_err(|e| format!("删除失败 {}: {}", path, e))
    }
}

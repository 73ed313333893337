use crate::core::checksum::ChecksumCache;
use crate::core::executor::SyncExecutor;
use crate::core::planner::SyncPlanner;
use crate::core::scanner::{FileScanner, ScanResult};
use crate::core::stats::SyncStats;
use crate::core::transfer::ProgressSender;
use crate::models::{SyncJob, SyncMode, SyncOptions, SyncStatus};
use crate::storage::{
    self, ConnectOptions, ListFailure, Storage, StorageError, CONNECT_TIMEOUT_SECS,
    DEFAULT_CHUNK_SIZE,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数
    pub max_concurrent_transfers: usize,
    /// 分块大小（字节）
    pub chunk_size: usize,
    /// 建立连接的超时（秒）
    pub connect_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
        }
    }
}

/// 导致整次同步无法进行的错误
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("源存储连接失败: {0}")]
    SourceConnection(#[source] StorageError),

    #[error("目标存储连接失败: {0}")]
    DestConnection(#[source] StorageError),

    #[error("源路径不存在: {0}")]
    SourceMissing(String),

    #[error("目标目录不可用 {path}: {source}")]
    DestinationUnavailable {
        path: String,
        #[source]
        source: StorageError,
    },
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source: String,
    pub destination: String,
    pub mode: SyncMode,
    pub status: SyncStatus,
    pub dry_run: bool,
    pub stats: SyncStats,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// 没有任何错误即为成功
    pub fn success(&self) -> bool {
        self.stats.errors == 0
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// 同步引擎
pub struct SyncEngine {
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
    progress: Option<ProgressSender>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// 订阅传输进度
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 取消同步：停止派发新的操作，已开始的传输会执行完
    ///
    /// 取消状态会一直保持，之后的同步在连接后立即以取消状态结束，直到调用 [`SyncEngine::reset`]。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 清除取消状态
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 连接两端存储并执行一次同步
    ///
    /// 连接在返回前释放，无论成功与否。
    pub async fn synchronize(&self, job: &SyncJob) -> Result<SyncReport, SyncError> {
        let connect_options = ConnectOptions {
            port: job.port,
            ssh_key: job.ssh_key.clone(),
            timeout: Duration::from_secs(self.config.connect_timeout_secs),
        };

        let source = storage::connect(&job.source, &connect_options)
            .await
            .map_err(|e| {
                error!("创建源存储失败: {}", e);
                SyncError::SourceConnection(e)
            })?;
        let dest = storage::connect(&job.destination, &connect_options)
            .await
            .map_err(|e| {
                error!("创建目标存储失败: {}", e);
                SyncError::DestConnection(e)
            })?;

        // 连接期间可能已收到取消信号
        let result = if self.is_cancelled() {
            warn!("连接建立期间收到取消信号，跳过同步");
            Ok(self.cancelled_report(source.storage().as_ref(), dest.storage().as_ref(), &job.options))
        } else {
            self.synchronize_with(source.storage(), dest.storage(), &job.options)
                .await
        };

        dest.disconnect();
        source.disconnect();

        result.map(|mut report| {
            report.source = job.source.clone();
            report.destination = job.destination.clone();
            report
        })
    }

    /// 在已建立的存储上执行一次同步
    pub async fn synchronize_with(
        &self,
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        if self.is_cancelled() {
            warn!("同步已取消: {} -> {}", source.name(), dest.name());
            return Ok(self.cancelled_report(source.as_ref(), dest.as_ref(), options));
        }

        let started = Instant::now();
        let start_time = chrono::Utc::now().timestamp();

        info!(
            "开始同步: {} -> {} (模式: {})",
            source.name(),
            dest.name(),
            options.sync_mode
        );
        if options.dry_run {
            info!("[DRY RUN] 模拟运行，不会修改任何文件");
        }

        match source.stat("").await {
            Ok(Some(root)) if root.is_dir => {}
            Ok(_) => {
                error!("源路径不存在: {}", source.name());
                return Err(SyncError::SourceMissing(source.name().to_string()));
            }
            Err(e) if e.is_not_found() => {
                return Err(SyncError::SourceMissing(source.name().to_string()));
            }
            Err(e) => return Err(SyncError::SourceConnection(e)),
        }

        let dest_exists = self.prepare_destination(dest.as_ref(), options.dry_run).await?;

        let scanner = FileScanner::with_cancel(self.cancelled.clone());
        let source_scan = Self::scan_or_fail(&scanner, source.as_ref()).await;
        let dest_scan = if dest_exists {
            Self::scan_or_fail(&scanner, dest.as_ref()).await
        } else {
            ScanResult::default()
        };

        info!(
            "找到 {} 个源条目和 {} 个目标条目",
            source_scan.index.len(),
            dest_scan.index.len()
        );

        let scan_errors: Vec<String> = source_scan
            .failures
            .iter()
            .chain(dest_scan.failures.iter())
            .map(|f| format!("扫描失败 {}: {}", display_path(&f.path), f.error))
            .collect();

        let checksums = ChecksumCache::new(source.clone(), dest.clone(), self.config.chunk_size);
        let planner = SyncPlanner::new(options);
        let plan = if self.is_cancelled() {
            Default::default()
        } else {
            planner.plan(&source_scan, &dest_scan, &checksums).await
        };

        for action in plan.actions() {
            debug!("计划动作: {:?}", action);
        }

        let executor = SyncExecutor::new(source.clone(), dest.clone(), options)
            .with_concurrency(self.config.max_concurrent_transfers)
            .with_chunk_size(self.config.chunk_size)
            .with_cancel(self.cancelled.clone())
            .with_progress(self.progress.clone());
        let outcome = executor.execute(&plan, scan_errors).await;

        let status = if outcome.cancelled || self.is_cancelled() {
            SyncStatus::Cancelled
        } else if outcome.stats.errors > 0 {
            SyncStatus::Failed
        } else {
            SyncStatus::Completed
        };

        info!(
            "同步完成: {} -> {} - 复制 {}, 更新 {}, 删除 {}, 错误 {}",
            source.name(),
            dest.name(),
            outcome.stats.copied,
            outcome.stats.updated,
            outcome.stats.deleted,
            outcome.stats.errors
        );

        Ok(SyncReport {
            source: source.name().to_string(),
            destination: dest.name().to_string(),
            mode: options.sync_mode,
            status,
            dry_run: options.dry_run,
            stats: outcome.stats,
            start_time,
            end_time: chrono::Utc::now().timestamp(),
            duration_ms: started.elapsed().as_millis() as u64,
            errors: outcome.errors,
        })
    }

    /// 未做任何操作就被取消时的报告
    fn cancelled_report(&self, source: &dyn Storage, dest: &dyn Storage, options: &SyncOptions) -> SyncReport {
        let now = chrono::Utc::now().timestamp();
        SyncReport {
            source: source.name().to_string(),
            destination: dest.name().to_string(),
            mode: options.sync_mode,
            status: SyncStatus::Cancelled,
            dry_run: options.dry_run,
            stats: SyncStats::default(),
            start_time: now,
            end_time: now,
            duration_ms: 0,
            errors: Vec::new(),
        }
    }

    /// 检查目标根目录，不存在时自动创建（模拟运行时视为空目录）
    async fn prepare_destination(&self, dest: &dyn Storage, dry_run: bool) -> Result<bool, SyncError> {
        let unavailable = |source: StorageError| SyncError::DestinationUnavailable {
            path: dest.name().to_string(),
            source,
        };

        match dest.stat("").await {
            Ok(Some(root)) if root.is_dir => return Ok(true),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(unavailable(e)),
        }

        if dry_run {
            info!("[DRY RUN] 创建目标目录: {}", dest.name());
            return Ok(false);
        }

        debug!("目标目录不存在，尝试自动创建...");
        dest.create_dir("").await.map_err(|e| {
            error!("无法创建目标目录: {} - {}", dest.name(), e);
            unavailable(e)
        })?;
        info!("已创建目标目录: {}", dest.name());
        Ok(true)
    }

    /// 根目录列举失败时记为根路径的失败，使镜像模式不会据此删除任何条目
    async fn scan_or_fail(scanner: &FileScanner, storage: &dyn Storage) -> ScanResult {
        match scanner.scan_storage(storage, None).await {
            Ok(result) => result,
            Err(e) => {
                error!("扫描存储失败: {} - {}", storage.name(), e);
                ScanResult {
                    failures: vec![ListFailure {
                        path: String::new(),
                        error: e,
                    }],
                    ..Default::default()
                }
            }
        }
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

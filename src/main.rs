use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use treesync::config::{JobConfig, LogSettings};
use treesync::logging::{LogConfig, SizeRotatingWriter};
use treesync::storage::DEFAULT_SSH_PORT;
use treesync::{SyncEngine, SyncJob, SyncMode, SyncOptions, SyncReport, SyncStatus};

/// 在本地目录和远程目录（user@host:path）之间同步文件
#[derive(Debug, Parser)]
#[command(name = "treesync", version, about)]
struct Cli {
    /// 源目录
    source: Option<String>,

    /// 目标目录
    destination: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 模拟运行，不做任何修改
    #[arg(short, long)]
    dry_run: bool,

    /// 输出调试信息
    #[arg(short, long)]
    verbose: bool,

    /// 只输出错误
    #[arg(short, long)]
    quiet: bool,

    /// 同步模式
    #[arg(short, long, default_value = "one-way", value_parser = parse_mode)]
    sync_mode: SyncMode,

    /// 排除的文件模式（可重复）
    #[arg(short, long)]
    exclude: Vec<String>,

    /// 包含的文件模式（可重复）
    #[arg(short, long)]
    include: Vec<String>,

    /// 按修改时间比较
    #[arg(short, long)]
    timestamp: bool,

    /// 按校验和比较
    #[arg(short = 'z', long)]
    checksum: bool,

    /// 覆盖或删除前创建备份
    #[arg(short, long)]
    backup: bool,

    /// 冲突时总是以源为准
    #[arg(short, long)]
    force: bool,

    /// 日志文件
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// 远程连接端口
    #[arg(short, long, default_value_t = DEFAULT_SSH_PORT)]
    port: u16,

    /// SSH 私钥路径
    #[arg(long)]
    ssh_key: Option<String>,
}

fn parse_mode(s: &str) -> Result<SyncMode, String> {
    s.parse()
}

impl Cli {
    /// 解析出要执行的任务列表和日志设置
    fn jobs(&self) -> Result<(Vec<SyncJob>, LogSettings)> {
        if let Some(path) = &self.config {
            let mut config = JobConfig::load(path)?;
            config.apply_overrides(self.dry_run, self.verbose, self.quiet);
            let mut settings = config.log_settings();
            if let Some(log) = &self.log {
                settings.log_file = Some(log.to_string_lossy().into_owned());
            }
            return Ok((config.into_jobs()?, settings));
        }

        let (Some(source), Some(destination)) = (&self.source, &self.destination) else {
            bail!("必须指定源和目标目录，或使用 --config 指定配置文件");
        };

        let options = SyncOptions {
            sync_mode: self.sync_mode,
            exclude_patterns: self.exclude.clone(),
            include_patterns: self.include.clone(),
            // 有意的默认值：未指定 -t/-z 时按修改时间比较，而不是只比较大小，
            // 与 SyncOptions 和配置文件的默认值保持一致
            use_timestamp: self.timestamp || !self.checksum,
            use_checksum: self.checksum,
            backup: self.backup,
            force: self.force,
            dry_run: self.dry_run,
        };

        let job = SyncJob {
            source: source.clone(),
            destination: destination.clone(),
            options,
            port: self.port,
            ssh_key: self.ssh_key.clone(),
        };

        let settings = LogSettings {
            verbose: self.verbose,
            quiet: self.quiet,
            log_file: self.log.as_ref().map(|p| p.to_string_lossy().into_owned()),
        };

        Ok((vec![job], settings))
    }
}

/// 初始化日志系统，返回的 guard 需要保持到程序退出
fn init_logging(settings: &LogSettings) -> Option<WorkerGuard> {
    let config = LogConfig::from_flags(
        settings.verbose,
        settings.quiet,
        settings.log_file.as_ref().map(PathBuf::from),
    );

    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let mut file_error = None;
    let (file_layer, guard) = match &config.file {
        Some(path) => match SizeRotatingWriter::new(path, config.max_size_mb) {
            Ok(writer) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(writer);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                file_error = Some(format!("无法打开日志文件 {}: {}", path.display(), e));
                (None, None)
            }
        },
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Some(msg) = file_error {
        warn!("{}", msg);
    }

    guard
}

/// 输出单个任务的汇总信息
fn print_summary(report: &SyncReport) {
    let stats = &report.stats;
    info!("{}", "=".repeat(60));
    info!("同步汇总: {} -> {}", report.source, report.destination);
    info!("{}", "=".repeat(60));
    info!("耗时: {:.2} 秒", report.duration().as_secs_f64());
    info!("复制: {}", stats.copied);
    info!("更新: {}", stats.updated);
    info!("删除: {}", stats.deleted);
    info!("跳过: {}", stats.skipped);
    info!("冲突: {}", stats.conflicts);
    info!("错误: {}", stats.errors);
    info!("传输数据: {:.2} MB", stats.megabytes_transferred());
    if report.dry_run {
        info!("模拟运行，未做任何修改");
    }
    info!("{}", "=".repeat(60));
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (jobs, settings) = match cli.jobs() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_logging(&settings);

    let engine = Arc::new(SyncEngine::new());

    // Ctrl-C：停止派发新的操作，取消状态对剩余的同步对同样有效
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，正在停止...");
                engine.cancel();
            }
        });
    }

    let total = jobs.len();
    let mut failed = false;

    for (i, job) in jobs.iter().enumerate() {
        if total > 1 {
            info!("同步对 {}/{}", i + 1, total);
        }

        match engine.synchronize(job).await {
            Ok(report) => {
                print_summary(&report);
                if !report.success() && !job.options.dry_run {
                    error!("同步完成但存在错误: {} -> {}", job.source, job.destination);
                    failed = true;
                }
                if report.status == SyncStatus::Cancelled {
                    failed = true;
                    break;
                }
            }
            Err(e) => {
                error!("同步失败: {}", e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

//! 任务配置模块

use crate::models::{SyncJob, SyncMode, SyncOptions};
use crate::storage::DEFAULT_SSH_PORT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 配置文件中的一组参数，既用于单个同步对，也用于全局选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, alias = "syncMode", skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    #[serde(default, alias = "use_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<bool>,
    #[serde(default, alias = "use_checksum", skip_serializing_if = "Option::is_none")]
    pub checksum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet: Option<bool>,
    #[serde(default, alias = "log_file", skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl PairConfig {
    /// 同步对中的值覆盖全局值
    fn merged_over(self, global: &PairConfig) -> PairConfig {
        let g = global.clone();
        PairConfig {
            source: self.source.or(g.source),
            destination: self.destination.or(g.destination),
            sync_mode: self.sync_mode.or(g.sync_mode),
            exclude: self.exclude.or(g.exclude),
            include: self.include.or(g.include),
            timestamp: self.timestamp.or(g.timestamp),
            checksum: self.checksum.or(g.checksum),
            backup: self.backup.or(g.backup),
            force: self.force.or(g.force),
            dry_run: self.dry_run.or(g.dry_run),
            port: self.port.or(g.port),
            ssh_key: self.ssh_key.or(g.ssh_key),
            verbose: self.verbose.or(g.verbose),
            quiet: self.quiet.or(g.quiet),
            log: self.log.or(g.log),
        }
    }

    /// 转换为同步任务，源和目标必须存在
    pub fn to_job(&self) -> Result<SyncJob> {
        let source = self
            .source
            .clone()
            .filter(|s| !s.is_empty())
            .context("配置缺少 source")?;
        let destination = self
            .destination
            .clone()
            .filter(|s| !s.is_empty())
            .context("配置缺少 destination")?;

        let defaults = SyncOptions::default();
        let options = SyncOptions {
            sync_mode: self.sync_mode.unwrap_or(defaults.sync_mode),
            exclude_patterns: self.exclude.clone().unwrap_or_default(),
            include_patterns: self.include.clone().unwrap_or_default(),
            use_timestamp: self.timestamp.unwrap_or(defaults.use_timestamp),
            use_checksum: self.checksum.unwrap_or(defaults.use_checksum),
            backup: self.backup.unwrap_or(false),
            force: self.force.unwrap_or(false),
            dry_run: self.dry_run.unwrap_or(false),
        };

        Ok(SyncJob {
            source,
            destination,
            options,
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            ssh_key: self.ssh_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawConfig {
    Batch {
        sync_pairs: Vec<PairConfig>,
        #[serde(default)]
        global_options: PairConfig,
    },
    Single(PairConfig),
}

/// 日志相关的配置项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub verbose: bool,
    pub quiet: bool,
    pub log_file: Option<String>,
}

/// 任务配置：一个或多个同步对（已合并全局选项）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobConfig {
    pub pairs: Vec<PairConfig>,
}

impl JobConfig {
    /// 解析 JSON 配置，支持单个同步对或 `{sync_pairs, global_options}` 批量格式
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content).context("解析配置文件失败")?;
        let pairs = match raw {
            RawConfig::Batch {
                sync_pairs,
                global_options,
            } => sync_pairs
                .into_iter()
                .map(|pair| pair.merged_over(&global_options))
                .collect(),
            RawConfig::Single(pair) => vec![pair],
        };
        Ok(Self { pairs })
    }

    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        Self::from_json(&content)
    }

    /// 命令行参数优先于配置文件，只会打开开关不会关闭
    pub fn apply_overrides(&mut self, dry_run: bool, verbose: bool, quiet: bool) {
        for pair in &mut self.pairs {
            if dry_run {
                pair.dry_run = Some(true);
            }
            if verbose {
                pair.verbose = Some(true);
            }
            if quiet {
                pair.quiet = Some(true);
            }
        }
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            verbose: self.pairs.iter().any(|p| p.verbose.unwrap_or(false)),
            quiet: self.pairs.iter().any(|p| p.quiet.unwrap_or(false)),
            log_file: self
                .pairs
                .iter()
                .find_map(|p| p.log.clone().filter(|l| !l.is_empty())),
        }
    }

    pub fn into_jobs(self) -> Result<Vec<SyncJob>> {
        self.pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| pair.to_job().with_context(|| format!("同步对 {} 配置无效", i + 1)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pair_config() {
        let config = JobConfig::from_json(
            r#"{
                "source": "/data/src",
                "destination": "backup@nas:/data/dst",
                "sync_mode": "mirror",
                "exclude": ["*.tmp"],
                "checksum": true,
                "port": 2222
            }"#,
        )
        .unwrap();

        let jobs = config.into_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.destination, "backup@nas:/data/dst");
        assert_eq!(job.options.sync_mode, SyncMode::Mirror);
        assert_eq!(job.options.exclude_patterns, vec!["*.tmp"]);
        assert!(job.options.use_checksum);
        assert!(job.options.use_timestamp);
        assert_eq!(job.port, 2222);
    }

    #[test]
    fn test_batch_pairs_override_global_options() {
        let mut config = JobConfig::from_json(
            r#"{
                "sync_pairs": [
                    {"source": "a", "destination": "b", "use_checksum": true, "backup": true},
                    {"source": "c", "destination": "d", "sync_mode": "two-way", "ssh_key": "~/.ssh/id_rsa"}
                ],
                "global_options": {"verbose": true, "log_file": "/tmp/sync.log", "backup": false, "port": 2022}
            }"#,
        )
        .unwrap();
        config.apply_overrides(true, false, false);

        let settings = config.log_settings();
        assert!(settings.verbose);
        assert_eq!(settings.log_file.as_deref(), Some("/tmp/sync.log"));

        let jobs = config.into_jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].options.backup);
        assert!(jobs[0].options.use_checksum);
        assert!(!jobs[1].options.backup);
        assert_eq!(jobs[1].options.sync_mode, SyncMode::TwoWay);
        assert_eq!(jobs[1].ssh_key.as_deref(), Some("~/.ssh/id_rsa"));
        assert!(jobs.iter().all(|j| j.port == 2022 && j.options.dry_run));
    }

    #[test]
    fn test_missing_destination_is_rejected() {
        let config = JobConfig::from_json(r#"{"source": "a"}"#).unwrap();
        let err = config.into_jobs().unwrap_err();
        assert!(format!("{:#}", err).contains("destination"));
    }

    #[test]
    fn test_invalid_sync_mode_is_rejected() {
        assert!(JobConfig::from_json(r#"{"source": "a", "destination": "b", "sync_mode": "sideways"}"#).is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::storage::DEFAULT_SSH_PORT;

/// 同步模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// 单向：源 -> 目标
    #[default]
    OneWay,
    /// 双向：检测两侧冲突（仅源 -> 目标传播）
    TwoWay,
    /// 镜像：单向 + 删除目标中多余的条目
    Mirror,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::OneWay => write!(f, "one-way"),
            SyncMode::TwoWay => write!(f, "two-way"),
            SyncMode::Mirror => write!(f, "mirror"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "one-way" | "one_way" | "oneway" => Ok(SyncMode::OneWay),
            "two-way" | "two_way" | "twoway" => Ok(SyncMode::TwoWay),
            "mirror" => Ok(SyncMode::Mirror),
            other => Err(format!("无效的同步模式: {}", other)),
        }
    }
}

/// 同步状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    Failed,
    Cancelled,
}

/// 单次同步的选项，运行期间不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default = "default_use_timestamp")]
    pub use_timestamp: bool,
    #[serde(default)]
    pub use_checksum: bool,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_use_timestamp() -> bool {
    true
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::OneWay,
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            use_timestamp: default_use_timestamp(),
            use_checksum: false,
            backup: false,
            force: false,
            dry_run: false,
        }
    }
}

/// 同步任务：一对源/目标及其选项
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub options: SyncOptions,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl SyncJob {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            options: SyncOptions::default(),
            port: default_port(),
            ssh_key: None,
        }
    }
}

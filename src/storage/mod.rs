pub mod error;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use remote::RemoteStorage;

// ============ 公共常量 ============

/// 建立远程连接的超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
/// 默认分块大小（字节）
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;
/// 默认 SSH 端口
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 文件信息
///
/// `path` 是相对于同步根目录的路径，统一使用 `/` 分隔，是源和目标之间匹配条目的唯一键。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    /// 修改时间（Unix 秒）
    pub modified_time: i64,
    pub is_dir: bool,
}

impl FileInfo {
    pub fn file(path: impl Into<String>, size: u64, modified_time: i64) -> Self {
        Self {
            path: path.into(),
            size,
            modified_time,
            is_dir: false,
        }
    }

    pub fn dir(path: impl Into<String>, modified_time: i64) -> Self {
        Self {
            path: path.into(),
            size: 0,
            modified_time,
            is_dir: true,
        }
    }
}

/// 列举过程中无法读取的条目
#[derive(Debug)]
pub struct ListFailure {
    pub path: String,
    pub error: StorageError,
}

/// 递归列举结果：成功读取的条目 + 被跳过的条目
#[derive(Debug, Default)]
pub struct FileListing {
    pub files: Vec<FileInfo>,
    pub failures: Vec<ListFailure>,
}

/// 分块读取流
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// 分块写入目标
#[async_trait]
pub trait FileSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// 提交写入，成功后目标文件才可见
    async fn finish(self: Box<Self>) -> StorageResult<()>;

    /// 放弃写入并清理中间数据
    async fn abort(self: Box<Self>);
}

/// 存储抽象接口
///
/// 所有路径都相对于存储根目录，空字符串表示根目录本身。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出所有文件和目录（不含根目录），单个条目失败不会中断列举
    async fn list_files(&self, prefix: Option<&str>) -> StorageResult<FileListing>;

    /// 获取元数据，不存在时返回 `None`
    async fn stat(&self, path: &str) -> StorageResult<Option<FileInfo>>;

    /// 检查文件是否存在
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 打开分块读取流
    async fn open_read(&self, path: &str, chunk_size: usize) -> StorageResult<ByteStream>;

    /// 打开写入目标，自动创建缺失的父目录
    async fn open_write(&self, path: &str) -> StorageResult<Box<dyn FileSink>>;

    /// 创建目录（含所有父目录）
    async fn create_dir(&self, path: &str) -> StorageResult<()>;

    /// 删除文件或空目录，路径不存在时视为成功
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// 递归删除目录树（或单个文件）
    async fn delete_tree(&self, path: &str) -> StorageResult<()>;

    /// 设置修改时间，后端不支持时忽略
    async fn set_modified(&self, _path: &str, _modified_time: i64) -> StorageResult<()> {
        Ok(())
    }

    /// 复制文件（同一存储内），返回复制的字节数
    async fn copy(&self, from: &str, to: &str, chunk_size: usize) -> StorageResult<u64> {
        let stream = self.open_read(from, chunk_size).await?;
        let sink = self.open_write(to).await?;
        pipe(stream, sink, |_| {}).await
    }

    /// 是否为远程存储
    fn is_remote(&self) -> bool;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 把读取流逐块写入目标，每写完一块回调一次字节增量
pub async fn pipe<F>(mut stream: ByteStream, mut sink: Box<dyn FileSink>, mut on_chunk: F) -> StorageResult<u64>
where
    F: FnMut(u64) + Send,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };
        let len = chunk.len() as u64;
        if let Err(e) = sink.write_chunk(chunk).await {
            sink.abort().await;
            return Err(e);
        }
        written += len;
        on_chunk(len);
    }
    sink.finish().await?;
    Ok(written)
}

/// 同步路径的位置：本地路径或 `user@host:path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Local(PathBuf),
    Remote {
        user: String,
        host: String,
        path: String,
    },
}

impl StorageLocation {
    /// 解析路径，只有 `user@host:path` 形式才视为远程
    pub fn parse(spec: &str) -> Self {
        if let Some((user_host, path)) = spec.split_once(':') {
            if !user_host.contains('/') && !user_host.contains('\\') {
                if let Some((user, host)) = user_host.split_once('@') {
                    if !user.is_empty() && !host.is_empty() {
                        return StorageLocation::Remote {
                            user: user.to_string(),
                            host: host.to_string(),
                            path: path.to_string(),
                        };
                    }
                }
            }
        }
        StorageLocation::Local(PathBuf::from(spec))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StorageLocation::Remote { .. })
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local(p) => write!(f, "{}", p.display()),
            StorageLocation::Remote { user, host, path } => write!(f, "{}@{}:{}", user, host, path),
        }
    }
}

/// 建立远程连接所需的参数
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub port: u16,
    pub ssh_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            ssh_key: None,
            timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }
}

/// 一次同步期间持有的存储连接
///
/// 连接在 `disconnect` 或离开作用域时释放，错误路径上同样生效。
pub struct StorageConnection {
    storage: Arc<dyn Storage>,
}

impl StorageConnection {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn disconnect(self) {
        drop(self);
    }
}

impl Drop for StorageConnection {
    fn drop(&mut self) {
        tracing::debug!("释放存储连接: {}", self.storage.name());
    }
}

/// 根据路径建立存储连接
pub async fn connect(spec: &str, options: &ConnectOptions) -> StorageResult<StorageConnection> {
    match StorageLocation::parse(spec) {
        StorageLocation::Local(path) => {
            tracing::info!("初始化本地存储: {}", path.display());
            Ok(StorageConnection::new(Arc::new(LocalStorage::new(&path)) as Arc<dyn Storage>))
        }
        StorageLocation::Remote { user, host, path } => {
            tracing::info!("连接远程存储: {}@{}:{} (端口 {})", user, host, path, options.port);
            let storage = RemoteStorage::connect_sftp(&user, &host, &path, options).await?;
            Ok(StorageConnection::new(Arc::new(storage) as Arc<dyn Storage>))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_location() {
        let loc = StorageLocation::parse("alice@backup.example.com:/srv/data");
        assert_eq!(
            loc,
            StorageLocation::Remote {
                user: "alice".to_string(),
                host: "backup.example.com".to_string(),
                path: "/srv/data".to_string(),
            }
        );
        assert!(loc.is_remote());
        assert_eq!(loc.to_string(), "alice@backup.example.com:/srv/data");

        let loc = StorageLocation::parse("bob@host:relative/dir");
        assert!(matches!(loc, StorageLocation::Remote { ref path, .. } if path == "relative/dir"));
    }

    #[test]
    fn test_parse_local_location() {
        assert!(!StorageLocation::parse("/home/user/docs").is_remote());
        assert!(!StorageLocation::parse("relative/dir").is_remote());
        // `@` 和 `:` 都必须出现在第一个路径分隔符之前
        assert!(!StorageLocation::parse("/mnt/user@host:x").is_remote());
        assert!(!StorageLocation::parse("host:/path").is_remote());
        assert!(!StorageLocation::parse(r"C:\data").is_remote());
    }
}

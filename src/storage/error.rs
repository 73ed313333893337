//! 存储层错误类型

use std::io;
use thiserror::Error;

/// 存储操作错误
///
/// 除建立初始连接时的 [`StorageError::ConnectionFailed`] 外，其余错误只影响单个路径，
/// 由调用方记录后继续处理其它条目。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("路径不存在: {0}")]
    NotFound(String),

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("连接失败 {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("IO 错误 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("存储后端错误 ({path}): {source}")]
    Backend {
        path: String,
        #[source]
        source: opendal::Error,
    },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// 将 IO 错误归类到对应的错误种类
    pub fn io(path: impl Into<String>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path),
            _ => StorageError::Io { path, source: err },
        }
    }

    /// 将 opendal 错误归类到对应的错误种类
    pub fn backend(path: impl Into<String>, err: opendal::Error) -> Self {
        let path = path.into();
        match err.kind() {
            opendal::ErrorKind::NotFound => StorageError::NotFound(path),
            opendal::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path),
            _ => StorageError::Backend { path, source: err },
        }
    }

    pub fn connection(target: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::ConnectionFailed {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// 后台任务异常退出（spawn_blocking 被取消或 panic）
    pub(crate) fn task(path: impl Into<String>, err: tokio::task::JoinError) -> Self {
        StorageError::Io {
            path: path.into(),
            source: io::Error::new(io::ErrorKind::Other, err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

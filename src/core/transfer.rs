//! 文件传输 - 分块流式复制，支持本地/远程任意组合

use crate::storage::{pipe, LocalStorage, Storage, StorageResult};
use serde::Serialize;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// 传输进度事件，每写完一块发送一次
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub path: String,
    /// 本次写入的字节数
    pub delta: u64,
    /// 当前文件已写入的字节数
    pub transferred: u64,
    /// 当前文件的总大小
    pub total: u64,
}

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;

/// 把源文件复制到目标路径，返回写入的字节数
///
/// 两端都是远程存储时先落到本地临时文件再上传，临时文件无论成败都会删除，字节数只计一次。
pub async fn transfer_file(
    source: &dyn Storage,
    source_path: &str,
    dest: &dyn Storage,
    dest_path: &str,
    size: u64,
    chunk_size: usize,
    progress: Option<&ProgressSender>,
) -> StorageResult<u64> {
    if source.is_remote() && dest.is_remote() {
        let staging_dir = std::env::temp_dir();
        return staged_transfer(&staging_dir, source, source_path, dest, dest_path, size, chunk_size, progress)
            .await;
    }
    stream_between(source, source_path, dest, dest_path, size, chunk_size, progress).await
}

async fn stream_between(
    source: &dyn Storage,
    source_path: &str,
    dest: &dyn Storage,
    dest_path: &str,
    size: u64,
    chunk_size: usize,
    progress: Option<&ProgressSender>,
) -> StorageResult<u64> {
    let stream = source.open_read(source_path, chunk_size).await?;
    let sink = dest.open_write(dest_path).await?;

    let mut transferred = 0u64;
    pipe(stream, sink, |delta| {
        transferred += delta;
        if let Some(tx) = progress {
            // 接收端关闭不影响传输
            let _ = tx.send(TransferProgress {
                path: dest_path.to_string(),
                delta,
                transferred,
                total: size,
            });
        }
    })
    .await
}

#[allow(clippy::too_many_arguments)]
async fn staged_transfer(
    staging_dir: &Path,
    source: &dyn Storage,
    source_path: &str,
    dest: &dyn Storage,
    dest_path: &str,
    size: u64,
    chunk_size: usize,
    progress: Option<&ProgressSender>,
) -> StorageResult<u64> {
    let staged_name = format!("treesync-{}.stage", Uuid::new_v4());
    let staged_path = staging_dir.join(&staged_name);
    let staging = LocalStorage::new(staging_dir);

    scopeguard::defer! {
        if let Err(e) = std::fs::remove_file(&staged_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("删除临时文件失败: {} - {}", staged_path.display(), e);
            }
        }
    }

    debug!("经本地中转: {} -> {}", source_path, staged_path.display());
    stream_between(source, source_path, &staging, &staged_name, size, chunk_size, None).await?;
    stream_between(&staging, &staged_name, dest, dest_path, size, chunk_size, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RemoteStorage;
    use opendal::{services, Operator};

    fn remote(root: &Path) -> RemoteStorage {
        let op = Operator::new(services::Fs::default().root(&root.to_string_lossy()))
            .unwrap()
            .finish();
        RemoteStorage::from_operator(op, "fs-remote")
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_local_transfer_reports_progress() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let data = vec![7u8; 10_000];
        std::fs::write(src.path().join("f.bin"), &data).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let bytes = transfer_file(
            &LocalStorage::new(src.path()),
            "f.bin",
            &LocalStorage::new(dst.path()),
            "nested/f.bin",
            data.len() as u64,
            4096,
            Some(&tx),
        )
        .await
        .unwrap();
        drop(tx);

        assert_eq!(bytes, 10_000);
        assert_eq!(std::fs::read(dst.path().join("nested/f.bin")).unwrap(), data);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.iter().map(|e| e.delta).sum::<u64>(), 10_000);
        let last = events.last().unwrap();
        assert_eq!((last.transferred, last.total), (10_000, 10_000));
    }

    #[tokio::test]
    async fn test_remote_to_remote_goes_through_staging() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("r.txt"), b"remote payload").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let bytes = staged_transfer(
            staging.path(),
            &remote(src.path()),
            "r.txt",
            &remote(dst.path()),
            "out/r.txt",
            14,
            4,
            Some(&tx),
        )
        .await
        .unwrap();
        drop(tx);

        assert_eq!(bytes, 14);
        assert_eq!(std::fs::read(dst.path().join("out/r.txt")).unwrap(), b"remote payload");
        assert_eq!(entries(staging.path()), 0);

        // 进度只统计上传阶段
        let mut total = 0;
        while let Some(event) = rx.recv().await {
            total += event.delta;
        }
        assert_eq!(total, 14);
    }

    #[tokio::test]
    async fn test_failed_staged_transfer_cleans_up() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("r.txt"), b"payload").unwrap();
        // 目标路径被目录占用，上传阶段失败
        std::fs::create_dir_all(dst.path().join("taken")).unwrap();

        let result = staged_transfer(
            staging.path(),
            &remote(src.path()),
            "r.txt",
            &remote(dst.path()),
            "taken",
            7,
            1024,
            None,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(entries(staging.path()), 0);
        assert!(dst.path().join("taken").is_dir());
    }
}

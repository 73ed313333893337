use super::{
    ByteStream, ConnectOptions, FileInfo, FileListing, FileSink, ListFailure, Storage, StorageError,
    StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use opendal::{Metadata, Metakey, Operator, Writer};
use std::path::Path;
use tracing::{debug, warn};

/// 远程存储：通过 opendal 的 Operator 访问
///
/// 生产环境使用 SFTP 服务建立会话，测试中可以包装任意 Operator。
pub struct RemoteStorage {
    operator: Operator,
    name: String,
}

impl RemoteStorage {
    /// 建立 SFTP 会话，并在超时时间内验证连接可用
    pub async fn connect_sftp(
        user: &str,
        host: &str,
        root: &str,
        options: &ConnectOptions,
    ) -> StorageResult<Self> {
        use opendal::services::Sftp;

        let target = format!("{}@{}:{}", user, host, root);

        let mut builder = Sftp::default()
            .endpoint(&format!("ssh://{}@{}:{}", user, host, options.port))
            .user(user)
            .known_hosts_strategy("add");

        if !root.is_empty() {
            builder = builder.root(root);
        }

        if let Some(ref key) = options.ssh_key {
            let key_path = expand_home(key);
            if Path::new(&key_path).is_file() {
                builder = builder.key(&key_path);
            } else {
                warn!("SSH 密钥文件不存在: {}", key_path);
            }
        }

        let operator = Operator::new(builder)
            .map_err(|e| StorageError::connection(&target, e))?
            .finish();

        let storage = Self {
            operator,
            name: format!("sftp://{}", target),
        };

        match tokio::time::timeout(options.timeout, storage.probe()).await {
            Ok(Ok(())) => Ok(storage),
            Ok(Err(e)) => Err(StorageError::connection(&target, e)),
            Err(_) => Err(StorageError::connection(
                &target,
                format!("连接超时 ({}s)", options.timeout.as_secs()),
            )),
        }
    }

    pub fn from_operator(operator: Operator, name: impl Into<String>) -> Self {
        Self {
            operator,
            name: name.into(),
        }
    }

    /// 访问根目录以确认会话可用，根目录不存在不算连接失败
    async fn probe(&self) -> StorageResult<()> {
        match self.operator.stat("/").await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::backend("/", e)),
        }
    }

    fn file_path(path: &str) -> String {
        path.replace('\\', "/").trim_matches('/').to_string()
    }

    /// opendal 中目录路径必须以 `/` 结尾
    fn dir_path(path: &str) -> String {
        let path = Self::file_path(path);
        if path.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", path)
        }
    }

    fn to_file_info(path: String, meta: &Metadata) -> FileInfo {
        let modified_time = meta.last_modified().map_or(0, |t| t.timestamp());
        if meta.is_dir() {
            FileInfo::dir(path, modified_time)
        } else {
            FileInfo::file(path, meta.content_length(), modified_time)
        }
    }

    /// 逐级创建父目录（某些服务端不会自动创建）
    async fn ensure_parent(&self, path: &str) -> StorageResult<()> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() < 2 {
            return Ok(());
        }

        let mut current = String::new();
        for part in &parts[..parts.len() - 1] {
            current.push_str(part);
            current.push('/');
            self.operator
                .create_dir(&current)
                .await
                .map_err(|e| StorageError::backend(current.trim_end_matches('/'), e))?;
        }
        Ok(())
    }
}

fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => std::env::var("HOME")
            .map(|home| format!("{}/{}", home.trim_end_matches('/'), rest))
            .unwrap_or_else(|_| path.to_string()),
        None => path.to_string(),
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn list_files(&self, prefix: Option<&str>) -> StorageResult<FileListing> {
        let start = Self::dir_path(prefix.unwrap_or(""));
        let mut listing = FileListing::default();
        let mut pending = vec![start.clone()];

        // 显式栈代替递归，单个目录列举失败只记录并跳过该子树
        while let Some(dir) = pending.pop() {
            let entries = match self
                .operator
                .list_with(&dir)
                .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
                .await
            {
                Ok(entries) => entries,
                Err(e) if dir == start && e.kind() == opendal::ErrorKind::NotFound => {
                    return Ok(listing);
                }
                Err(e) => {
                    let path = Self::file_path(&dir);
                    warn!("列举远程目录失败: {} - {}", dir, e);
                    listing.failures.push(ListFailure {
                        error: StorageError::backend(path.clone(), e),
                        path,
                    });
                    continue;
                }
            };

            for entry in entries {
                let raw = entry.path();
                // 跳过目录自身
                if raw == dir || raw == "/" || raw.is_empty() {
                    continue;
                }

                let meta = entry.metadata();
                let info = Self::to_file_info(Self::file_path(raw), meta);
                if info.is_dir {
                    pending.push(raw.to_string());
                }
                listing.files.push(info);
            }
        }

        Ok(listing)
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<FileInfo>> {
        let file_path = Self::file_path(path);
        if file_path.is_empty() {
            return match self.operator.stat("/").await {
                Ok(meta) => Ok(Some(Self::to_file_info(String::new(), &meta))),
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::backend(path, e)),
            };
        }

        match self.operator.stat(&file_path).await {
            Ok(meta) => return Ok(Some(Self::to_file_info(file_path, &meta))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::backend(path, e)),
        }

        // 可能是目录
        match self.operator.stat(&Self::dir_path(path)).await {
            Ok(meta) => Ok(Some(Self::to_file_info(file_path, &meta))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::backend(path, e)),
        }
    }

    async fn open_read(&self, path: &str, chunk_size: usize) -> StorageResult<ByteStream> {
        let file_path = Self::file_path(path);
        let total = self
            .operator
            .stat(&file_path)
            .await
            .map_err(|e| StorageError::backend(path, e))?
            .content_length();

        let operator = self.operator.clone();
        let chunk = chunk_size.max(1) as u64;

        let stream = futures::stream::try_unfold(0u64, move |offset| {
            let operator = operator.clone();
            let file_path = file_path.clone();
            async move {
                if offset >= total {
                    return Ok(None);
                }
                let end = (offset + chunk).min(total);
                let data = operator
                    .read_with(&file_path)
                    .range(offset..end)
                    .await
                    .map_err(|e| StorageError::backend(file_path.clone(), e))?;
                let bytes = Bytes::from(data.to_vec());
                if bytes.is_empty() {
                    return Ok(None);
                }
                let next = offset + bytes.len() as u64;
                Ok(Some((bytes, next)))
            }
        });

        Ok(Box::pin(stream))
    }

    async fn open_write(&self, path: &str) -> StorageResult<Box<dyn FileSink>> {
        let file_path = Self::file_path(path);
        self.ensure_parent(&file_path).await?;

        let writer = self
            .operator
            .writer(&file_path)
            .await
            .map_err(|e| StorageError::backend(path, e))?;

        Ok(Box::new(RemoteSink {
            path: file_path,
            writer,
        }))
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        self.operator
            .create_dir(&Self::dir_path(path))
            .await
            .map_err(|e| StorageError::backend(path, e))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let target = match self.stat(path).await? {
            None => return Ok(()),
            Some(info) if info.is_dir => Self::dir_path(path),
            Some(_) => Self::file_path(path),
        };

        match self.operator.delete(&target).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::backend(path, e)),
        }
    }

    async fn delete_tree(&self, path: &str) -> StorageResult<()> {
        match self.stat(path).await? {
            None => return Ok(()),
            Some(info) if !info.is_dir => return self.delete(path).await,
            Some(_) => {}
        }

        let listing = self.list_files(Some(path)).await?;
        if let Some(failure) = listing.failures.into_iter().next() {
            return Err(failure.error);
        }

        let (mut dirs, files): (Vec<FileInfo>, Vec<FileInfo>) =
            listing.files.into_iter().partition(|f| f.is_dir);

        for file in &files {
            debug!("删除远程文件: {}", file.path);
            self.delete(&file.path).await?;
        }

        // 子目录排在父目录之后，倒序即可保证先删最深的目录
        dirs.sort_by(|a, b| b.path.cmp(&a.path));
        for dir in &dirs {
            self.delete(&dir.path).await?;
        }

        self.delete(path).await
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct RemoteSink {
    path: String,
    writer: Writer,
}

#[async_trait]
impl FileSink for RemoteSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.writer
            .write(chunk)
            .await
            .map_err(|e| StorageError::backend(self.path.clone(), e))
    }

    async fn finish(self: Box<Self>) -> StorageResult<()> {
        let RemoteSink { path, mut writer } = *self;
        writer
            .close()
            .await
            .map(|_| ())
            .map_err(|e| StorageError::backend(path, e))
    }

    async fn abort(self: Box<Self>) {
        let RemoteSink { path, mut writer } = *self;
        if let Err(e) = writer.abort().await {
            debug!("放弃远程写入失败: {} - {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pipe;

    fn fs_storage(root: &Path) -> RemoteStorage {
        let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
        let operator = Operator::new(builder).unwrap().finish();
        RemoteStorage::from_operator(operator, format!("fs://{}", root.display()))
    }

    #[test]
    fn test_dir_path_normalization() {
        assert_eq!(RemoteStorage::dir_path(""), "/");
        assert_eq!(RemoteStorage::dir_path("a/b"), "a/b/");
        assert_eq!(RemoteStorage::dir_path("/a/b/"), "a/b/");
        assert_eq!(RemoteStorage::file_path("\\a\\b.txt"), "a/b.txt");
    }

    #[tokio::test]
    async fn test_iterative_listing_matches_tree() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("x/y")).unwrap();
        std::fs::write(tmp.path().join("top.txt"), b"123").unwrap();
        std::fs::write(tmp.path().join("x/y/deep.txt"), b"12345").unwrap();

        let storage = fs_storage(tmp.path());
        let listing = storage.list_files(None).await.unwrap();
        assert!(listing.failures.is_empty());

        let mut entries: Vec<_> = listing
            .files
            .iter()
            .map(|f| (f.path.clone(), f.is_dir, f.size))
            .collect();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("top.txt".to_string(), false, 3),
                ("x".to_string(), true, 0),
                ("x/y".to_string(), true, 0),
                ("x/y/deep.txt".to_string(), false, 5),
            ]
        );
    }

    #[tokio::test]
    async fn test_stat_distinguishes_files_dirs_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("d")).unwrap();
        std::fs::write(tmp.path().join("f.txt"), b"abc").unwrap();

        let storage = fs_storage(tmp.path());
        assert!(!storage.stat("f.txt").await.unwrap().unwrap().is_dir);
        assert!(storage.stat("d").await.unwrap().unwrap().is_dir);
        assert!(storage.stat("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_streamed_write_and_tree_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = fs_storage(tmp.path());
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
        std::fs::write(tmp.path().join("src.bin"), &content).unwrap();

        let stream = storage.open_read("src.bin", 1024).await.unwrap();
        let sink = storage.open_write("a/b/dst.bin").await.unwrap();
        assert_eq!(pipe(stream, sink, |_| {}).await.unwrap(), content.len() as u64);
        assert_eq!(std::fs::read(tmp.path().join("a/b/dst.bin")).unwrap(), content);

        storage.delete_tree("a").await.unwrap();
        assert!(!tmp.path().join("a").exists());
        assert!(tmp.path().join("src.bin").exists());
    }
}

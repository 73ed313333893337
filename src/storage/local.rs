use super::{ByteStream, FileInfo, FileListing, FileSink, ListFailure, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    /// 根目录不存在时不会自动创建，由同步引擎决定是否创建
    pub fn new(path: impl AsRef<Path>) -> Self {
        let base_path = path.as_ref().to_path_buf();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn relative_path(base: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(base).ok()?;
        Some(Self::normalize_path(&rel.to_string_lossy()))
    }

    fn to_file_info(path: String, metadata: &std::fs::Metadata) -> FileInfo {
        FileInfo {
            path,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified_time: metadata.modified().map(unix_seconds).unwrap_or(0),
            is_dir: metadata.is_dir(),
        }
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self, prefix: Option<&str>) -> StorageResult<FileListing> {
        let base = prefix.map_or_else(|| self.base_path.clone(), |p| self.resolve_path(p));

        if !base.exists() {
            return Ok(FileListing::default());
        }

        let base_path = self.base_path.clone();
        let display = base.display().to_string();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let mut listing = FileListing::default();

            for entry in WalkDir::new(&base).follow_links(false).sort_by_file_name() {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        let path = e
                            .path()
                            .and_then(|p| Self::relative_path(&base_path, p))
                            .unwrap_or_default();
                        listing.failures.push(ListFailure {
                            error: StorageError::io(path.clone(), std::io::Error::from(e)),
                            path,
                        });
                        continue;
                    }
                };

                // 跳过根目录本身
                let Some(relative_path) = Self::relative_path(&base_path, entry.path()) else {
                    continue;
                };
                if relative_path.is_empty() {
                    continue;
                }

                // 跟随符号链接取目标的元数据，与读取文件内容时的行为保持一致
                match std::fs::metadata(entry.path()) {
                    Ok(metadata) => listing.files.push(Self::to_file_info(relative_path, &metadata)),
                    Err(e) => listing.failures.push(ListFailure {
                        error: StorageError::io(relative_path.clone(), e),
                        path: relative_path,
                    }),
                }
            }

            listing
        })
        .await
        .map_err(|e| StorageError::task(display, e))
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<FileInfo>> {
        match fs::metadata(self.resolve_path(path)).await {
            Ok(metadata) => Ok(Some(Self::to_file_info(Self::normalize_path(path), &metadata))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn open_read(&self, path: &str, chunk_size: usize) -> StorageResult<ByteStream> {
        let file = fs::File::open(self.resolve_path(path))
            .await
            .map_err(|e| StorageError::io(path, e))?;

        let owned = path.to_string();
        let stream = ReaderStream::with_capacity(file, chunk_size.max(1))
            .map_err(move |e| StorageError::io(owned.clone(), e));
        Ok(Box::pin(stream))
    }

    async fn open_write(&self, path: &str) -> StorageResult<Box<dyn FileSink>> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(path, e))?;
        }

        // 先写入同目录下的临时文件，完成后再原子重命名
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = full_path.with_file_name(format!(".{}.part", file_name));
        let file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        Ok(Box::new(LocalSink {
            path: path.to_string(),
            temp_path,
            final_path: full_path,
            file,
        }))
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        fs::create_dir_all(self.resolve_path(path))
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full_path = self.resolve_path(path);

        let metadata = match fs::symlink_metadata(&full_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        };
        result.map_err(|e| StorageError::io(path, e))
    }

    async fn delete_tree(&self, path: &str) -> StorageResult<()> {
        let full_path = self.resolve_path(path);

        let metadata = match fs::symlink_metadata(&full_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        };
        result.map_err(|e| StorageError::io(path, e))
    }

    async fn set_modified(&self, path: &str, modified_time: i64) -> StorageResult<()> {
        if modified_time < 0 {
            return Ok(());
        }
        let full_path = self.resolve_path(path);
        let time = UNIX_EPOCH + Duration::from_secs(modified_time as u64);
        let owned = path.to_string();

        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&full_path)?;
            file.set_modified(time)
        })
        .await
        .map_err(|e| StorageError::task(owned.clone(), e))?
        .map_err(|e| StorageError::io(owned, e))
    }

    async fn copy(&self, from: &str, to: &str, _chunk_size: usize) -> StorageResult<u64> {
        let target = self.resolve_path(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(to, e))?;
        }
        fs::copy(self.resolve_path(from), target)
            .await
            .map_err(|e| StorageError::io(from, e))
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct LocalSink {
    path: String,
    temp_path: PathBuf,
    final_path: PathBuf,
    file: fs::File,
}

#[async_trait]
impl FileSink for LocalSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.file
            .write_all(&chunk)
            .await
            .map_err(|e| StorageError::io(self.path.clone(), e))
    }

    async fn finish(self: Box<Self>) -> StorageResult<()> {
        let LocalSink {
            path,
            temp_path,
            final_path,
            mut file,
        } = *self;

        if let Err(e) = file.flush().await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::io(path, e));
        }
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::io(path, e));
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        let LocalSink { temp_path, file, .. } = *self;
        drop(file);
        let _ = fs::remove_file(&temp_path).await;
    }
}

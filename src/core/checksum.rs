use crate::storage::{Storage, StorageResult};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 流式计算文件内容的 blake3 校验和（十六进制）
pub async fn checksum(storage: &dyn Storage, path: &str, chunk_size: usize) -> StorageResult<String> {
    let mut stream = storage.open_read(path, chunk_size).await?;
    let mut hasher = blake3::Hasher::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Source,
    Dest,
}

/// 单次同步内的校验和缓存
///
/// 冲突检测和比较器可能都需要同一个文件的校验和，每个文件最多计算一次。
/// 无法获取的校验和记为 `None`。
pub struct ChecksumCache {
    source: Arc<dyn Storage>,
    dest: Arc<dyn Storage>,
    chunk_size: usize,
    entries: Mutex<HashMap<(Side, String), Option<String>>>,
}

impl ChecksumCache {
    pub fn new(source: Arc<dyn Storage>, dest: Arc<dyn Storage>, chunk_size: usize) -> Self {
        Self {
            source,
            dest,
            chunk_size,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn source(&self, path: &str) -> Option<String> {
        self.get(Side::Source, path).await
    }

    pub async fn dest(&self, path: &str) -> Option<String> {
        self.get(Side::Dest, path).await
    }

    async fn get(&self, side: Side, path: &str) -> Option<String> {
        let key = (side, path.to_string());
        if let Some(cached) = self.entries.lock().await.get(&key) {
            return cached.clone();
        }

        let storage = match side {
            Side::Source => self.source.as_ref(),
            Side::Dest => self.dest.as_ref(),
        };

        let value = match checksum(storage, path, self.chunk_size).await {
            Ok(sum) => {
                debug!("校验和 {:?} {}: {}", side, path, sum);
                Some(sum)
            }
            Err(e) => {
                warn!("无法计算校验和: {} - {}", path, e);
                None
            }
        };

        self.entries.lock().await.insert(key, value.clone());
        value
    }
}

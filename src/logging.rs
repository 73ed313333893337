//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志文件路径，为空时只输出到控制台
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            file: None,
        }
    }
}

impl LogConfig {
    /// 根据命令行开关确定日志级别：verbose 优先于 quiet
    pub fn from_flags(verbose: bool, quiet: bool, file: Option<PathBuf>) -> Self {
        let level = if verbose {
            "debug"
        } else if quiet {
            "error"
        } else {
            "info"
        };
        Self {
            level: level.to_string(),
            file,
            ..Default::default()
        }
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，超过限制时轮转为 `<文件名>.old`
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SizeRotatingWriter {
    pub fn new(file_path: &Path, max_size_mb: u32) -> io::Result<Self> {
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let max_size = (max_size_mb as u64) * 1024 * 1024;
        let writer = Self::open_file(file_path, max_size)?;

        Ok(Self {
            file_path: file_path.to_path_buf(),
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if let Ok(metadata) = fs::metadata(file_path) {
            if metadata.len() > max_size {
                Self::rotate_log(file_path)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        Ok(BufWriter::new(file))
    }

    fn backup_path(file_path: &Path) -> PathBuf {
        let mut name = file_path.as_os_str().to_owned();
        name.push(".old");
        PathBuf::from(name)
    }

    /// 轮转日志文件
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = Self::backup_path(file_path);
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    /// 锁被毒化时继续使用内部数据，日志写入不应导致程序崩溃
    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rotate_if_needed(&self, guard: &mut MutexGuard<'_, Option<BufWriter<File>>>) {
        let too_large = fs::metadata(&self.file_path)
            .map(|m| m.len() > self.max_size)
            .unwrap_or(false);
        if !too_large {
            return;
        }

        if let Some(mut w) = guard.take() {
            let _ = w.flush();
        }
        let _ = Self::rotate_log(&self.file_path);
        if let Ok(new_writer) = Self::open_file(&self.file_path, self.max_size) {
            **guard = Some(new_writer);
        }
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.lock();
        let written = match guard.as_mut() {
            Some(writer) => {
                let n = writer.write(buf)?;
                writer.flush()?;
                n
            }
            None => return Err(io::Error::new(io::ErrorKind::Other, "日志写入器不可用")),
        };
        self.rotate_if_needed(&mut guard);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock().as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_flags() {
        assert_eq!(LogConfig::from_flags(true, true, None).tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogConfig::from_flags(false, true, None).tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogConfig::from_flags(false, false, None).tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_writer_rotates_when_over_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/sync.log");

        // 0MB 上限：每次写入后都会轮转
        let mut writer = SizeRotatingWriter::new(&path, 0).unwrap();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();
        writer.flush().unwrap();

        let old = fs::read_to_string(tmp.path().join("logs/sync.log.old")).unwrap();
        assert_eq!(old, "second line\n");
        assert!(path.exists());
    }

    #[test]
    fn test_writer_appends_within_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sync.log");

        let mut writer = SizeRotatingWriter::new(&path, 1).unwrap();
        writer.write_all(b"a\n").unwrap();
        let mut clone = writer.clone();
        clone.write_all(b"b\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
        assert!(!tmp.path().join("sync.log.old").exists());
    }
}

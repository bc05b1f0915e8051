// 本地文件系统抽象

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

/// 目录中的一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileEntry {
    pub path: PathBuf,
    pub name: String,
    /// 创建时间（平台不支持时退回修改时间）
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

#[async_trait]
pub trait LocalFileSystem: Send + Sync {
    /// 确保目录存在
    async fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    /// 列出目录下的普通文件（不递归）
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<LocalFileEntry>>;

    /// 以固定大小的缓冲区复制文件，写完后刷新并落盘，返回字节数
    async fn copy_with_flush(&self, from: &Path, to: &Path, buffer_size: usize) -> io::Result<u64>;
}

/// 基于 tokio::fs 的实现
#[derive(Debug, Clone, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LocalFileSystem for TokioFileSystem {
    async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<LocalFileEntry>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                tracing::warn!("跳过无法解码的文件名: {:?}", entry.path());
                continue;
            };

            let modified: DateTime<Utc> = metadata.modified()?.into();
            let created: DateTime<Utc> = metadata.created().map(Into::into).unwrap_or(modified);

            files.push(LocalFileEntry {
                path: entry.path(),
                name,
                created,
                modified,
                size: metadata.len(),
            });
        }

        Ok(files)
    }

    async fn copy_with_flush(&self, from: &Path, to: &Path, buffer_size: usize) -> io::Result<u64> {
        let buffer_size = buffer_size.max(1);
        let source = fs::File::open(from).await?;
        let target = fs::File::create(to).await?;

        let mut reader = BufReader::with_capacity(buffer_size, source);
        let mut writer = BufWriter::with_capacity(buffer_size, target);
        let mut buffer = vec![0u8; buffer_size];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n]).await?;
            total += n as u64;
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("IMG_0001.jpg"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("thumbnails")).unwrap();

        let files = TokioFileSystem::new().list_files(dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "IMG_0001.jpg");
        assert_eq!(files[0].size, 3);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_not_found() {
        let dir = tempdir().unwrap();
        let err = TokioFileSystem::new()
            .list_files(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_copy_with_small_buffer() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("source.mp4");
        let to = dir.path().join("nested").join("copy.mp4");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&from, &content).unwrap();

        let fs = TokioFileSystem::new();
        fs.ensure_dir(to.parent().unwrap()).await.unwrap();
        let copied = fs.copy_with_flush(&from, &to, 7).await.unwrap();

        assert_eq!(copied, content.len() as u64);
        assert_eq!(std::fs::read(&to).unwrap(), content);
    }
}

//! 暂存文件管理
//!
//! 上传前的本地副本由守卫持有，离开作用域即删除

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// 暂存文件守卫
///
/// 守卫被丢弃时删除对应文件，无论上传成功还是失败。
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 手动删除文件
    pub fn remove(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let existed = self.path.exists();
        if let Err(e) = self.remove() {
            tracing::warn!("清理暂存文件失败: {} - {}", self.path.display(), e);
        } else if existed {
            tracing::debug!("已清理暂存文件: {}", self.path.display());
        }
    }
}

impl std::fmt::Debug for TempFileGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempFileGuard")
            .field("path", &self.path)
            .finish()
    }
}

/// 暂存文件管理器
///
/// 负责生成唯一的暂存路径，并清扫被中断的运行留下的残留文件
#[derive(Debug, Clone)]
pub struct TempFileManager {
    temp_dir: PathBuf,
    prefix: String,
}

impl TempFileManager {
    /// 不创建目录，目录由调用方通过本地文件系统确保存在
    pub fn new(temp_dir: PathBuf, prefix: &str) -> Self {
        Self {
            temp_dir,
            prefix: prefix.to_string(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// 为原始文件名分配暂存路径：前缀 + UUID + 原扩展名
    pub fn create_temp_file(&self, original_name: &str) -> TempFileGuard {
        let extension = match original_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{}", ext),
            _ => String::new(),
        };
        let filename = format!("{}{}{}", self.prefix, uuid::Uuid::new_v4(), extension);
        TempFileGuard::new(self.temp_dir.join(filename))
    }

    /// 清理超过指定时间的暂存文件，返回清理数量
    ///
    /// 目录不存在时视为无事可做
    pub async fn cleanup_old(&self, max_age: Duration) -> std::io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut cleaned = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&self.prefix) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let expired = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age >= max_age)
                .unwrap_or(false);

            if !expired {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!("已清理过期暂存文件: {}", path.display());
                    cleaned += 1;
                }
                Err(e) => tracing::warn!("删除过期暂存文件失败: {} - {}", path.display(), e),
            }
        }

        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_temp_file_guard_auto_cleanup() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_temp.tmp");
        std::fs::write(&file_path, "test content").unwrap();

        {
            let guard = TempFileGuard::new(file_path.clone());
            assert!(guard.exists());
        }

        assert!(!file_path.exists());
    }

    #[test]
    fn test_guard_without_file_is_quiet() {
        let dir = tempdir().unwrap();
        let guard = TempFileGuard::new(dir.path().join("never_written.jpg"));
        assert!(guard.remove().is_ok());
    }

    #[test]
    fn test_temp_names_are_unique_and_keep_extension() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::new(dir.path().to_path_buf(), "cu_");

        let a = manager.create_temp_file("IMG_0001.JPG");
        let b = manager.create_temp_file("IMG_0001.JPG");
        assert_ne!(a.path(), b.path());

        let name = a.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("cu_"));
        assert!(name.ends_with(".JPG"));

        let bare = manager.create_temp_file("README");
        let name = bare.path().file_name().unwrap().to_str().unwrap();
        assert!(!name.contains('.'));
    }

    #[tokio::test]
    async fn test_cleanup_old_respects_prefix_and_age() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::new(dir.path().to_path_buf(), "cu_");

        for i in 0..3 {
            std::fs::write(dir.path().join(format!("cu_{}.jpg", i)), "x").unwrap();
        }
        let other = dir.path().join("other_file.txt");
        std::fs::write(&other, "other").unwrap();

        // 刚写入的文件都还没过期
        assert_eq!(manager.cleanup_old(Duration::from_secs(3600)).await.unwrap(), 0);

        assert_eq!(manager.cleanup_old(Duration::ZERO).await.unwrap(), 3);
        assert!(other.exists());
    }

    #[tokio::test]
    async fn test_cleanup_missing_dir() {
        let dir = tempdir().unwrap();
        let manager = TempFileManager::new(dir.path().join("missing"), "cu_");
        assert_eq!(manager.cleanup_old(Duration::ZERO).await.unwrap(), 0);
    }
}

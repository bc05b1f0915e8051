//! 命名互斥锁
//!
//! 同一进程内使用异步互斥锁排队，跨进程使用锁文件上的建议锁（flock / LockFileEx）。
//! 两层锁都持有后才允许访问共享设置，守卫被丢弃时按相反顺序释放。

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// 两次尝试获取文件锁之间的间隔
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// 锁操作错误
#[derive(Debug, Error)]
pub enum LockError {
    #[error("获取锁 {name} 超时 ({timeout:?})")]
    Timeout { name: String, timeout: Duration },

    #[error("创建锁文件失败: {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("获取锁失败: {path}: {source}")]
    AcquireFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 命名锁
///
/// 由锁名称确定锁文件路径：`<dir>/<name>.lock`
#[derive(Debug, Clone)]
pub struct NamedLock {
    name: String,
    lock_path: PathBuf,
    local: Arc<Mutex<()>>,
    timeout: Duration,
}

impl NamedLock {
    pub fn new(dir: &Path, name: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            lock_path: dir.join(format!("{}.lock", name)),
            local: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// 获取锁（阻塞直到成功或超时）
    pub async fn acquire(&self) -> Result<NamedLockGuard, LockError> {
        let started = Instant::now();

        let local = tokio::time::timeout(self.timeout, self.local.clone().lock_owned())
            .await
            .map_err(|_| self.timeout_error())?;

        let file = self.open_lock_file()?;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if started.elapsed() >= self.timeout {
                        warn!("等待锁 {} 超时，放弃本次操作", self.name);
                        return Err(self.timeout_error());
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(LockError::AcquireFailed {
                        path: self.lock_path.clone(),
                        source: e,
                    })
                }
            }
        }

        debug!(
            "已获取锁 {} (等待 {} ms)",
            self.name,
            started.elapsed().as_millis()
        );

        Ok(NamedLockGuard {
            file,
            name: self.name.clone(),
            _local: local,
        })
    }

    fn open_lock_file(&self) -> Result<File, LockError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::CreateFailed {
                path: self.lock_path.clone(),
                source: e,
            })?;
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| LockError::CreateFailed {
                path: self.lock_path.clone(),
                source: e,
            })
    }

    fn timeout_error(&self) -> LockError {
        LockError::Timeout {
            name: self.name.clone(),
            timeout: self.timeout,
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// 锁守卫，丢弃时释放文件锁和进程内锁
pub struct NamedLockGuard {
    file: File,
    name: String,
    _local: OwnedMutexGuard<()>,
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("释放锁 {} 失败: {}", self.name, e);
        } else {
            debug!("已释放锁 {}", self.name);
        }
    }
}

impl std::fmt::Debug for NamedLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLockGuard")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let lock = NamedLock::new(dir.path(), "settings", Duration::from_secs(1));

        {
            let _guard = lock.acquire().await.unwrap();
            assert!(lock.lock_path().exists());
        }

        // 释放后可以再次获取
        let _guard = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_holder_in_process_times_out() {
        let dir = tempdir().unwrap();
        let lock = NamedLock::new(dir.path(), "settings", Duration::from_millis(100));
        let shared = lock.clone();

        let _guard = lock.acquire().await.unwrap();
        let err = shared.acquire().await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_independent_instance_blocked_by_file_lock() {
        // 两个独立的 NamedLock 实例只共享锁文件，模拟另一个进程
        let dir = tempdir().unwrap();
        let first = NamedLock::new(dir.path(), "settings", Duration::from_millis(100));
        let second = NamedLock::new(dir.path(), "settings", Duration::from_millis(100));

        let guard = first.acquire().await.unwrap();
        assert!(matches!(
            second.acquire().await,
            Err(LockError::Timeout { .. })
        ));

        drop(guard);
        assert!(second.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_different_names_do_not_contend() {
        let dir = tempdir().unwrap();
        let settings = NamedLock::new(dir.path(), "settings", Duration::from_millis(100));
        let structured = NamedLock::new(dir.path(), "structured", Duration::from_millis(100));

        let _a = settings.acquire().await.unwrap();
        let _b = structured.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let dir = tempdir().unwrap();
        let lock = NamedLock::new(dir.path(), "settings", Duration::from_secs(5));
        let waiter = lock.clone();

        let guard = lock.acquire().await.unwrap();
        let handle = tokio::spawn(async move { waiter.acquire().await.is_ok() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        assert!(handle.await.unwrap());
    }
}

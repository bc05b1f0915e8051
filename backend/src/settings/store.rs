//! 跨进程设置存储
//!
//! - 键值设置：SQLite 表 `settings`，值为 JSON 文本
//! - 结构化设置：每个键一个 JSON 文件
//!
//! 两类设置分别由独立的命名锁保护，互不争用。
//! `try_*` 方法区分"不存在"与"出错"；`load` / `save` 等方法吞掉错误并返回默认值。

use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use super::lock::{LockError, NamedLock, NamedLockGuard};

/// 数据库连接池类型
type DbPool = Pool<SqliteConnectionManager>;
type DbConnection = PooledConnection<SqliteConnectionManager>;

/// 键值设置锁名称
pub const SETTINGS_LOCK_NAME: &str = "settings";
/// 结构化设置锁名称
pub const STRUCTURED_LOCK_NAME: &str = "structured_settings";

/// 设置存储错误
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("文件读写错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SettingsError {
    fn from(err: rusqlite::Error) -> Self {
        SettingsError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for SettingsError {
    fn from(err: r2d2::Error) -> Self {
        SettingsError::Database(format!("Failed to get db connection: {}", err))
    }
}

/// 设置存储
pub struct SettingsStore {
    pool: Arc<DbPool>,
    structured_dir: PathBuf,
    settings_lock: NamedLock,
    structured_lock: NamedLock,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("pool", &"<DbPool>")
            .field("structured_dir", &self.structured_dir)
            .field("settings_lock", &self.settings_lock.lock_path())
            .field("structured_lock", &self.structured_lock.lock_path())
            .finish()
    }
}

impl SettingsStore {
    /// 打开（或创建）设置目录下的存储
    ///
    /// 目录结构：
    /// - `settings.db`：键值设置
    /// - `structured/`：结构化设置
    /// - `*.lock`：命名锁文件
    pub fn open(dir: &Path, lock_timeout: Duration) -> Result<Self, SettingsError> {
        std::fs::create_dir_all(dir)?;
        let structured_dir = dir.join("structured");
        std::fs::create_dir_all(&structured_dir)?;

        let manager = SqliteConnectionManager::file(dir.join("settings.db")).with_init(|c| {
            c.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        });
        let pool = Pool::builder().max_size(4).build(manager)?;

        let store = Self {
            pool: Arc::new(pool),
            structured_dir,
            settings_lock: NamedLock::new(dir, SETTINGS_LOCK_NAME, lock_timeout),
            structured_lock: NamedLock::new(dir, STRUCTURED_LOCK_NAME, lock_timeout),
        };
        store.init_database()?;

        Ok(store)
    }

    fn get_conn(&self) -> Result<DbConnection, SettingsError> {
        Ok(self.pool.get()?)
    }

    fn init_database(&self) -> Result<(), SettingsError> {
        let conn = self.get_conn()?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,       -- 设置键
                value TEXT NOT NULL,        -- JSON 编码的值
                updated_at TEXT NOT NULL    -- 更新时间 (RFC3339格式)
            )",
            [],
        )?;

        Ok(())
    }

    // ==================== 键值设置 ====================

    /// 获取键值锁并返回读写会话
    ///
    /// 会话存活期间其他进程/任务无法读写键值设置，用于读-改-写
    pub async fn transaction(&self) -> Result<SettingsTxn, SettingsError> {
        let guard = self.settings_lock.acquire().await?;
        let conn = self.get_conn()?;
        Ok(SettingsTxn {
            conn,
            _guard: guard,
        })
    }

    /// 读取设置（区分不存在与错误）
    pub async fn try_load<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, SettingsError> {
        self.transaction().await?.get(key)
    }

    /// 写入设置
    pub async fn try_save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        self.transaction().await?.put(key, value)
    }

    /// 删除设置，返回是否存在
    pub async fn remove(&self, key: &str) -> Result<bool, SettingsError> {
        self.transaction().await?.delete(key)
    }

    /// 读取设置，不存在或出错时返回 `default`
    pub async fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_load(key).await {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                error!("读取设置失败，使用默认值: key={}, error={}", key, e);
                default
            }
        }
    }

    /// 写入设置，出错时返回 false
    pub async fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match self.try_save(key, value).await {
            Ok(()) => true,
            Err(e) => {
                error!("保存设置失败: key={}, error={}", key, e);
                false
            }
        }
    }

    // ==================== 结构化设置 ====================

    fn structured_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.structured_dir.join(format!("{}.json", file_name))
    }

    /// 读取结构化设置（区分不存在与错误）
    pub async fn try_load_structured<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, SettingsError> {
        let _guard = self.structured_lock.acquire().await?;
        let path = self.structured_path(key);

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let value = serde_json::from_str(&content)?;
        Ok(Some(value))
    }

    /// 写入结构化设置
    ///
    /// 先写临时文件再重命名，读者不会看到写了一半的文件
    pub async fn try_save_structured<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), SettingsError> {
        let _guard = self.structured_lock.acquire().await?;
        let path = self.structured_path(key);
        let tmp_path = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;

        debug!("已保存结构化设置: {:?}", path);
        Ok(())
    }

    /// 读取结构化设置，不存在或出错时返回 `T::default()`
    pub async fn load_structured<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.try_load_structured(key).await {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                error!("读取结构化设置失败，使用默认值: key={}, error={}", key, e);
                T::default()
            }
        }
    }

    /// 写入结构化设置，出错时返回 false
    pub async fn save_structured<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match self.try_save_structured(key, value).await {
            Ok(()) => true,
            Err(e) => {
                error!("保存结构化设置失败: key={}, error={}", key, e);
                false
            }
        }
    }
}

/// 持有键值锁期间的读写会话
pub struct SettingsTxn {
    conn: DbConnection,
    _guard: NamedLockGuard,
}

impl SettingsTxn {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let text = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, text, now],
        )?;

        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool, SettingsError> {
        let rows = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn open_store(dir: &Path) -> SettingsStore {
        SettingsStore::open(dir, Duration::from_millis(200)).unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_returns_default() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert_eq!(store.load("ImageErrorCount", 7u32).await, 7);
        assert!(store.try_load::<u32>("ImageErrorCount").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_values() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(store.save("ImageErrorFileName", &"IMG_0001.jpg").await);
        assert!(store.save("ImageErrorCount", &3u32).await);

        let name: String = store.load("ImageErrorFileName", String::new()).await;
        assert_eq!(name, "IMG_0001.jpg");
        assert_eq!(store.load("ImageErrorCount", 0u32).await, 3);

        // 覆盖写
        assert!(store.save("ImageErrorCount", &4u32).await);
        assert_eq!(store.load("ImageErrorCount", 0u32).await, 4);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.try_save("ImageLastUploadDate", &1_700_000_000_000i64).await.unwrap();
        }

        let store = open_store(dir.path());
        let value: Option<i64> = store.try_load("ImageLastUploadDate").await.unwrap();
        assert_eq!(value, Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_error_and_falls_back() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.try_save("ImageErrorCount", &"not a number").await.unwrap();
        assert!(store.try_load::<u32>("ImageErrorCount").await.is_err());
        assert_eq!(store.load("ImageErrorCount", 0u32).await, 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.try_save("key", &1u8).await.unwrap();
        assert!(store.remove("key").await.unwrap());
        assert!(!store.remove("key").await.unwrap());
        assert!(store.try_load::<u8>("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_fails_open_while_lock_held_elsewhere() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.try_save("ImageErrorCount", &5u32).await.unwrap();

        // 另一个"进程"持有键值锁
        let foreign = NamedLock::new(dir.path(), SETTINGS_LOCK_NAME, Duration::from_secs(1));
        let _held = foreign.acquire().await.unwrap();

        assert_eq!(store.load("ImageErrorCount", 0u32).await, 0);
        assert!(!store.save("ImageErrorCount", &6u32).await);
        assert!(matches!(
            store.try_load::<u32>("ImageErrorCount").await,
            Err(SettingsError::Lock(LockError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_structured_not_blocked_by_settings_lock() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        let _txn = store.transaction().await.unwrap();
        let sample = Sample {
            name: "run".to_string(),
            count: 2,
        };
        assert!(store.save_structured("LastRunReport", &sample).await);
        let loaded: Sample = store.load_structured("LastRunReport").await;
        assert_eq!(loaded, sample);
    }

    #[tokio::test]
    async fn test_structured_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(store
            .try_load_structured::<Sample>("Missing")
            .await
            .unwrap()
            .is_none());

        std::fs::write(dir.path().join("structured").join("Broken.json"), "{not json").unwrap();
        assert!(store.try_load_structured::<Sample>("Broken").await.is_err());
        assert_eq!(store.load_structured::<Sample>("Broken").await, Sample::default());
    }

    #[tokio::test]
    async fn test_structured_key_is_sanitized() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.try_save_structured("../escape/attempt", &1u32).await.unwrap();
        assert!(dir
            .path()
            .join("structured")
            .join("___escape_attempt.json")
            .exists());
    }

    #[tokio::test]
    async fn test_transaction_read_modify_write() {
        let dir = tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let txn = store.transaction().await.unwrap();
                let current: u32 = txn.get("counter").unwrap().unwrap_or(0);
                txn.put("counter", &(current + 1)).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.load("counter", 0u32).await, 8);
    }
}

//! 单文件失败计数
//!
//! 只记录一个文件：新的失败文件会顶替旧记录。同一文件连续失败达到上限后
//! 被跳过，直到另一个文件失败或记录被清除。
//!
//! 持久化在两个独立的键上，所有读-改-写都在键值锁内完成。
//! 持久化出错一律按"计数为 0"处理。

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::settings::{SettingsError, SettingsStore};

/// 失败文件名的设置键
pub const ERROR_FILE_NAME_KEY: &str = "ImageErrorFileName";
/// 连续失败次数的设置键
pub const ERROR_COUNT_KEY: &str = "ImageErrorCount";

/// 默认单文件最大连续失败次数
pub const DEFAULT_MAX_FILE_UPLOAD_ERRORS: u32 = 10;

/// 失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub file_name: String,
    pub count: u32,
}

/// 计数器状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerState {
    NoActiveFailure,
    TrackingFailure(FailureRecord),
}

impl TrackerState {
    fn count_for(&self, file_name: &str) -> u32 {
        match self {
            TrackerState::TrackingFailure(record) if record.file_name == file_name => record.count,
            _ => 0,
        }
    }
}

/// 失败计数器
#[derive(Debug, Clone)]
pub struct FailureTracker {
    store: Arc<SettingsStore>,
    max_errors: u32,
}

impl FailureTracker {
    pub fn new(store: Arc<SettingsStore>, max_errors: u32) -> Self {
        Self {
            store,
            max_errors: max_errors.max(1),
        }
    }

    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// 达到该次数即跳过
    pub fn skip_threshold(&self) -> u32 {
        self.max_errors.saturating_sub(1)
    }

    async fn try_state(&self) -> Result<TrackerState, SettingsError> {
        let txn = self.store.transaction().await?;
        Ok(read_state(txn.get(ERROR_FILE_NAME_KEY)?, txn.get(ERROR_COUNT_KEY)?))
    }

    /// 当前状态，出错时视为无记录
    pub async fn state(&self) -> TrackerState {
        match self.try_state().await {
            Ok(state) => state,
            Err(e) => {
                error!("读取失败记录出错，按无记录处理: {}", e);
                TrackerState::NoActiveFailure
            }
        }
    }

    /// 记录一次失败，返回该文件当前的连续失败次数
    pub async fn on_failure(&self, file_name: &str) -> u32 {
        match self.try_on_failure(file_name).await {
            Ok(count) => count,
            Err(e) => {
                error!("记录失败次数出错: file={}, error={}", file_name, e);
                0
            }
        }
    }

    async fn try_on_failure(&self, file_name: &str) -> Result<u32, SettingsError> {
        let txn = self.store.transaction().await?;

        let previous = match (txn.get(ERROR_FILE_NAME_KEY), txn.get(ERROR_COUNT_KEY)) {
            (Ok(name), Ok(count)) => read_state(name, count),
            (Err(e), _) | (_, Err(e)) => {
                warn!("失败记录不可读，重新计数: {}", e);
                TrackerState::NoActiveFailure
            }
        };

        let count = previous.count_for(file_name).saturating_add(1);
        if count == 1 {
            if let TrackerState::TrackingFailure(old) = &previous {
                debug!("失败记录切换: {} -> {}", old.file_name, file_name);
            }
        }

        txn.put(ERROR_FILE_NAME_KEY, &file_name)?;
        txn.put(ERROR_COUNT_KEY, &count)?;

        if count >= self.skip_threshold() {
            warn!(
                "文件连续失败 {} 次，后续运行将跳过: {}",
                count, file_name
            );
        } else {
            info!("文件上传失败 {} 次: {}", count, file_name);
        }

        Ok(count)
    }

    /// 是否应跳过该文件
    pub async fn should_skip(&self, file_name: &str) -> bool {
        match self.state().await {
            TrackerState::TrackingFailure(record) if record.file_name == file_name => {
                record.count >= self.skip_threshold()
            }
            _ => false,
        }
    }

    /// 清除记录
    pub async fn clear(&self) -> bool {
        let result = async {
            let txn = self.store.transaction().await?;
            txn.delete(ERROR_FILE_NAME_KEY)?;
            txn.delete(ERROR_COUNT_KEY)?;
            Ok::<_, SettingsError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("清除失败记录出错: {}", e);
                false
            }
        }
    }

    /// 该文件上传成功后清除它的旧记录，返回是否清除
    pub async fn clear_if_tracked(&self, file_name: &str) -> bool {
        let result = async {
            let txn = self.store.transaction().await?;
            let tracked: Option<String> = txn.get(ERROR_FILE_NAME_KEY)?;
            if tracked.as_deref() != Some(file_name) {
                return Ok(false);
            }
            txn.delete(ERROR_FILE_NAME_KEY)?;
            txn.delete(ERROR_COUNT_KEY)?;
            Ok::<_, SettingsError>(true)
        }
        .await;

        match result {
            Ok(cleared) => {
                if cleared {
                    debug!("文件已成功上传，清除失败记录: {}", file_name);
                }
                cleared
            }
            Err(e) => {
                error!("清除失败记录出错: file={}, error={}", file_name, e);
                false
            }
        }
    }
}

fn read_state(name: Option<String>, count: Option<u32>) -> TrackerState {
    match name {
        Some(file_name) if !file_name.is_empty() => TrackerState::TrackingFailure(FailureRecord {
            file_name,
            count: count.unwrap_or(0),
        }),
        _ => TrackerState::NoActiveFailure,
    }
}

// 上传水位线
//
// 创建时间早于水位线的本地文件视为已处理。以 Unix 毫秒存储，不存在时为纪元。

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use crate::settings::{SettingsError, SettingsStore};

/// 水位线的设置键
pub const WATERMARK_KEY: &str = "ImageLastUploadDate";

#[derive(Debug, Clone)]
pub struct WatermarkStore {
    store: Arc<SettingsStore>,
}

impl WatermarkStore {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self { store }
    }

    /// 读取水位线，不存在或出错时返回纪元
    pub async fn load(&self) -> DateTime<Utc> {
        let millis: i64 = self.store.load(WATERMARK_KEY, 0i64).await;
        from_millis(millis)
    }

    /// 将水位线推进到 `to`，已经更新时不回退
    ///
    /// 返回是否写入成功（包括无需推进的情况）
    pub async fn advance(&self, to: DateTime<Utc>) -> bool {
        match self.try_advance(to).await {
            Ok(current) => {
                debug!("水位线: {}", current.to_rfc3339());
                true
            }
            Err(e) => {
                error!("推进水位线失败: to={}, error={}", to.to_rfc3339(), e);
                false
            }
        }
    }

    async fn try_advance(&self, to: DateTime<Utc>) -> Result<DateTime<Utc>, SettingsError> {
        let txn = self.store.transaction().await?;
        let current: i64 = txn.get(WATERMARK_KEY)?.unwrap_or(0);
        let target = to.timestamp_millis();

        if target <= current {
            return Ok(from_millis(current));
        }

        txn.put(WATERMARK_KEY, &target)?;
        Ok(from_millis(target))
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

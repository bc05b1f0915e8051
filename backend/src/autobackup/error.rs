//! 备份错误处理模块
//!
//! 提供统一的错误分类和重试策略

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 单个文件上传失败的诊断信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// 失败的文件名
    pub file_name: String,
    /// 诊断信息
    pub reason: String,
}

impl FailureDetail {
    pub fn new(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file_name, self.reason)
    }
}

/// 备份错误
#[derive(Debug, Error)]
pub enum BackupError {
    /// 文件系统错误
    #[error("文件系统错误: {0}")]
    FileSystemError(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    NetworkError(String),

    /// API 错误
    #[error("API 错误: {code} - {message}")]
    ApiError { code: i32, message: String },

    /// 去重检查错误
    #[error("去重检查错误: {0}")]
    DedupError(String),

    /// 传输失败
    #[error("传输失败: {0}")]
    Transfer(FailureDetail),

    /// 超时
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 权限错误
    #[error("权限错误: {0}")]
    PermissionDenied(String),

    /// 文件不存在
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

impl BackupError {
    /// 获取错误分类
    pub fn category(&self) -> ErrorCategory {
        classify_error(self)
    }

    /// 是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    /// 转换为失败诊断信息（用于失败计数）
    pub fn to_failure_detail(&self, file_name: &str) -> FailureDetail {
        match self {
            BackupError::Transfer(detail) => detail.clone(),
            other => FailureDetail::new(file_name, other.to_string()),
        }
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 临时错误（可重试）
    Transient,
    /// 永久错误（不可重试）
    Permanent,
    /// 速率限制（需要等待后重试）
    RateLimited,
    /// 资源错误（需要用户干预）
    Resource,
    /// 权限错误（需要授权）
    Permission,
}

/// 重试策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始延迟（毫秒）
    pub initial_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 延迟倍数（指数退避）
    pub backoff_multiplier: f64,
    /// 是否添加抖动
    pub add_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 创建新的重试策略
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// 计算第 n 次重试的延迟
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::from_millis(0);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((retry_count - 1) as i32);
        let delay = delay.min(self.max_delay_ms as f64) as u64;

        let delay = if self.add_jitter && delay >= 4 {
            // 添加 ±25% 的抖动
            let jitter_range = delay / 4;
            let jitter = rand::random::<u64>() % (jitter_range * 2);
            delay.saturating_sub(jitter_range).saturating_add(jitter)
        } else {
            delay
        };

        Duration::from_millis(delay)
    }

    /// 是否应该重试
    pub fn should_retry(&self, retry_count: u32, error: &BackupError) -> bool {
        retry_count < self.max_retries && error.is_retryable()
    }
}

/// 错误分类函数
pub fn classify_error(error: &BackupError) -> ErrorCategory {
    match error {
        BackupError::NetworkError(_) => ErrorCategory::Transient,
        BackupError::Timeout(_) => ErrorCategory::Transient,
        BackupError::ApiError { code, .. } => match *code {
            429 => ErrorCategory::RateLimited,
            500..=599 => ErrorCategory::Transient,
            401 | 403 => ErrorCategory::Permission,
            _ => ErrorCategory::Permanent,
        },
        BackupError::PermissionDenied(_) => ErrorCategory::Permission,
        BackupError::FileNotFound(_) => ErrorCategory::Resource,
        BackupError::FileSystemError(_) => ErrorCategory::Resource,
        BackupError::DedupError(_) => ErrorCategory::Transient,
        BackupError::Transfer(_) => ErrorCategory::Transient,
        BackupError::Unknown(_) => ErrorCategory::Permanent,
    }
}

/// 从 anyhow::Error 转换
impl From<anyhow::Error> for BackupError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<BackupError>() {
            Ok(backup_err) => return backup_err,
            Err(err) => err,
        };

        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return match io_err.kind() {
                std::io::ErrorKind::NotFound => BackupError::FileNotFound(format!("{:#}", err)),
                std::io::ErrorKind::PermissionDenied => {
                    BackupError::PermissionDenied(format!("{:#}", err))
                }
                std::io::ErrorKind::TimedOut => BackupError::Timeout(format!("{:#}", err)),
                _ => BackupError::FileSystemError(format!("{:#}", err)),
            };
        }

        if let Some(req_err) = err.downcast_ref::<reqwest::Error>() {
            if req_err.is_timeout() {
                return BackupError::Timeout(format!("{:#}", err));
            }
            return BackupError::NetworkError(format!("{:#}", err));
        }

        BackupError::Unknown(format!("{:#}", err))
    }
}

/// 从 std::io::Error 转换
impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BackupError::FileNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => BackupError::PermissionDenied(err.to_string()),
            std::io::ErrorKind::TimedOut => BackupError::Timeout(err.to_string()),
            _ => BackupError::FileSystemError(err.to_string()),
        }
    }
}

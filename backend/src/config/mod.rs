// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "./config/app.toml";

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "CAMERA_BACKUP_CONFIG";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 相机备份配置
    #[serde(default)]
    pub backup: CameraBackupConfig,
    /// 云端存储配置
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// 相机备份配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraBackupConfig {
    /// 设置存储目录（键值库、结构化设置、锁文件）
    #[serde(default = "default_settings_dir")]
    pub settings_dir: PathBuf,
    /// 上传暂存目录
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// 监控的本地相册目录
    #[serde(default = "default_monitored_folders")]
    pub monitored_folders: Vec<PathBuf>,
    /// 云端目标目录名（根目录下，大小写不敏感匹配）
    #[serde(default = "default_destination_name")]
    pub destination_name: String,
    /// 单个文件最大连续失败次数
    #[serde(default = "default_max_file_upload_errors")]
    pub max_file_upload_errors: u32,
    /// 暂存复制缓冲区大小（字节）
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,
    /// 命名锁获取超时（毫秒）
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// 残留暂存文件的最大保留时间（秒）
    #[serde(default = "default_stale_temp_max_age_secs")]
    pub stale_temp_max_age_secs: u64,
    /// 过滤配置
    #[serde(default)]
    pub filter: FilterConfig,
}

fn default_settings_dir() -> PathBuf {
    PathBuf::from("config/settings")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp/uploads")
}

fn default_monitored_folders() -> Vec<PathBuf> {
    vec![PathBuf::from("DCIM/Camera")]
}

fn default_destination_name() -> String {
    "Camera Uploads".to_string()
}

fn default_max_file_upload_errors() -> u32 {
    10
}

fn default_copy_buffer_size() -> usize {
    64 * 1024
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_stale_temp_max_age_secs() -> u64 {
    24 * 60 * 60
}

impl Default for CameraBackupConfig {
    fn default() -> Self {
        Self {
            settings_dir: default_settings_dir(),
            temp_dir: default_temp_dir(),
            monitored_folders: default_monitored_folders(),
            destination_name: default_destination_name(),
            max_file_upload_errors: default_max_file_upload_errors(),
            copy_buffer_size: default_copy_buffer_size(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_temp_max_age_secs: default_stale_temp_max_age_secs(),
            filter: FilterConfig::default(),
        }
    }
}

impl CameraBackupConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_upload_errors == 0 {
            return Err("max_file_upload_errors 必须大于 0".to_string());
        }
        if self.copy_buffer_size == 0 {
            return Err("copy_buffer_size 必须大于 0".to_string());
        }
        if self.destination_name.trim().is_empty() {
            return Err("destination_name 不能为空".to_string());
        }
        if self.monitored_folders.is_empty() {
            return Err("monitored_folders 不能为空".to_string());
        }
        Ok(())
    }
}

/// 过滤配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// 包含的文件扩展名（不区分大小写，为空表示全部）
    #[serde(default = "default_media_extensions")]
    pub include_extensions: Vec<String>,
    /// 跳过隐藏文件（以.开头）
    #[serde(default = "default_true")]
    pub skip_hidden: bool,
    /// 最大文件大小（字节，0 表示不限制）
    #[serde(default)]
    pub max_file_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_media_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "gif", "bmp", "heic", "heif", "webp", "dng", "mp4", "mov", "3gp",
        "m4v", "avi", "mkv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            include_extensions: default_media_extensions(),
            skip_hidden: true,
            max_file_size: 0,
        }
    }
}

impl FilterConfig {
    /// 不做任何过滤
    pub fn accept_all() -> Self {
        Self {
            include_extensions: Vec::new(),
            skip_hidden: false,
            max_file_size: 0,
        }
    }

    /// 判断文件是否应该备份
    pub fn accepts(&self, file_name: &str, size: u64) -> bool {
        if self.skip_hidden && file_name.starts_with('.') {
            return false;
        }

        if self.max_file_size > 0 && size > self.max_file_size {
            return false;
        }

        if self.include_extensions.is_empty() {
            return true;
        }

        match file_name.rsplit_once('.') {
            Some((_, ext)) => self
                .include_extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// 云端存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API 基础地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 访问令牌
    #[serde(default)]
    pub access_token: String,
    /// 请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 上传分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 分片最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: String::new(),
            timeout_secs: default_timeout_secs(),
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 尝试保存默认配置
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {:#}", e);
                }

                default_config
            }
        }
    }

    /// 配置文件路径（环境变量优先）
    pub fn config_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), String> {
        self.backup.validate()?;

        if self.remote.chunk_size == 0 {
            return Err("remote.chunk_size 必须大于 0".to_string());
        }
        if self.remote.base_url.trim().is_empty() {
            return Err("remote.base_url 不能为空".to_string());
        }
        Ok(())
    }
}

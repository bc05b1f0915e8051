//! 备份运行上下文
//!
//! 由启动代码构建并显式传入，各组件从这里取协作者

use std::sync::Arc;

use super::localfs::{LocalFileSystem, TokioFileSystem};
use crate::config::{AppConfig, CameraBackupConfig};
use crate::netdisk::{NetdiskClient, RemoteStorage};
use crate::settings::SettingsStore;
use crate::sign::DeviceFingerprint;

#[derive(Clone)]
pub struct BackupContext {
    /// 云端存储
    pub remote: Arc<dyn RemoteStorage>,
    /// 本地文件系统
    pub fs: Arc<dyn LocalFileSystem>,
    /// 跨进程设置
    pub settings: Arc<SettingsStore>,
    /// 备份配置
    pub config: CameraBackupConfig,
    /// 设备指纹
    pub device: DeviceFingerprint,
}

impl BackupContext {
    pub fn new(
        remote: Arc<dyn RemoteStorage>,
        fs: Arc<dyn LocalFileSystem>,
        settings: Arc<SettingsStore>,
        config: CameraBackupConfig,
        device: DeviceFingerprint,
    ) -> Self {
        Self {
            remote,
            fs,
            settings,
            config,
            device,
        }
    }

    /// 按应用配置构建生产环境上下文
    pub fn from_config(config: &AppConfig, device: DeviceFingerprint) -> anyhow::Result<Self> {
        let settings =
            SettingsStore::open(&config.backup.settings_dir, config.backup.lock_timeout())?;
        let remote = NetdiskClient::new(&config.remote, device.clone())?;

        Ok(Self::new(
            Arc::new(remote),
            Arc::new(TokioFileSystem::new()),
            Arc::new(settings),
            config.backup.clone(),
            device,
        ))
    }
}

impl std::fmt::Debug for BackupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupContext")
            .field("settings", &self.settings)
            .field("config", &self.config)
            .field("device", &self.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_config() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.backup.settings_dir = dir.path().join("settings");

        let device = DeviceFingerprint::from_hardware_id("dev");
        let ctx = BackupContext::from_config(&config, device).unwrap();
        assert_eq!(ctx.config.destination_name, "Camera Uploads");
        assert!(dir.path().join("settings").join("settings.db").exists());
    }
}

// Camera Backup Library
// 相机增量备份核心库

// 配置管理模块
pub mod config;

// 跨进程设置存储模块
pub mod settings;

// 设备指纹模块
pub mod sign;

// 网盘API模块
pub mod netdisk;

// 相机自动备份模块
pub mod autobackup;

#[cfg(test)]
pub(crate) mod testutil;

// 导出常用类型
pub use autobackup::{BackupContext, BackupError, CameraBackup, RunOutcome, RunReport};
pub use config::AppConfig;
pub use netdisk::{Fingerprint, NetdiskClient, RemoteNode, RemoteStorage};
pub use settings::SettingsStore;
pub use sign::DeviceFingerprint;

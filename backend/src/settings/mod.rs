// 跨进程设置存储模块

pub mod lock;
pub mod store;

pub use lock::{LockError, NamedLock, NamedLockGuard};
pub use store::{
    SettingsError, SettingsStore, SettingsTxn, SETTINGS_LOCK_NAME, STRUCTURED_LOCK_NAME,
};

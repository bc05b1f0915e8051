// 设备指纹模块

pub mod devuid;

pub use devuid::{generate_device_fingerprint, DeviceFingerprint};

// 设备指纹生成算法
//
// 算法：MD5(硬件标识)，返回大写16进制字符串
// 只用于请求统计，不参与任何备份决策

use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// 依次尝试读取的硬件标识文件
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// 生成设备指纹
///
/// # 算法
/// 1. 对硬件标识（去除首尾空白）进行 MD5 哈希
/// 2. 将结果转换为大写16进制字符串
///
/// # 示例
/// ```
/// use camera_backup::sign::generate_device_fingerprint;
/// let fp = generate_device_fingerprint("test");
/// assert_eq!(fp, "098F6BCD4621D373CADE4E832627B4F6");
/// ```
pub fn generate_device_fingerprint(hardware_id: &str) -> String {
    let digest = md5::compute(hardware_id.trim().as_bytes());
    format!("{:X}", digest)
}

/// 设备指纹（每个进程只计算一次，随请求头发送）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// 从指定硬件标识计算
    pub fn from_hardware_id(hardware_id: &str) -> Self {
        Self(generate_device_fingerprint(hardware_id))
    }

    /// 探测本机硬件标识并计算
    ///
    /// 顺序：machine-id 文件 → 主机名环境变量 → 固定占位值
    pub fn detect() -> Self {
        for path in MACHINE_ID_PATHS {
            if let Some(id) = read_non_empty(Path::new(path)) {
                debug!("使用硬件标识: {}", path);
                return Self::from_hardware_id(&id);
            }
        }

        for var in ["HOSTNAME", "COMPUTERNAME"] {
            if let Ok(host) = std::env::var(var) {
                if !host.trim().is_empty() {
                    debug!("使用主机名作为硬件标识: {}", var);
                    return Self::from_hardware_id(&host);
                }
            }
        }

        warn!("未找到硬件标识，使用占位设备指纹");
        Self::from_hardware_id("unknown-device")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn read_non_empty(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// 内容指纹
//
// 指纹 = MD5(完整内容) + ":" + 修改时间（Unix 秒）
// 内容相同但修改时间不同的文件会得到不同指纹，因此被 touch 过的文件会重新上传

use std::fmt;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// 读取缓冲区大小
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 文件指纹
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// 由内容 MD5 和修改时间组合
    pub fn from_parts(content_md5: &str, mtime: i64) -> Self {
        Self(format!("{}:{}", content_md5.to_lowercase(), mtime))
    }

    /// 从字节流计算
    pub async fn compute_from_reader<R>(reader: &mut R, mtime: i64) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut context = md5::Context::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            context.consume(&buffer[..n]);
        }

        let digest = context.compute();
        Ok(Self::from_parts(&format!("{:x}", digest), mtime))
    }

    /// 计算本地文件指纹
    pub async fn compute(path: &Path, mtime: i64) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        Self::compute_from_reader(&mut file, mtime).await
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

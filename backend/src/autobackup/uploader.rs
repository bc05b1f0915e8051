// 暂存上传
//
// 先把原文件复制到私有暂存目录，再从副本发起可续传上传。
// 副本在本次尝试结束时删除。

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::common::TempFileManager;
use super::discovery::CandidateFile;
use super::error::{BackupError, FailureDetail};
use super::localfs::LocalFileSystem;
use super::watermark::WatermarkStore;
use crate::netdisk::{RemoteNode, RemoteStorage, UploadRequest};

/// 暂存文件名前缀
pub const TEMP_FILE_PREFIX: &str = "cu_";

/// 上传回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file_name: String,
    pub node: RemoteNode,
    pub bytes: u64,
}

#[derive(Clone)]
pub struct StagedUploader {
    remote: Arc<dyn RemoteStorage>,
    fs: Arc<dyn LocalFileSystem>,
    temp: TempFileManager,
    watermark: WatermarkStore,
    copy_buffer_size: usize,
}

impl StagedUploader {
    pub fn new(
        remote: Arc<dyn RemoteStorage>,
        fs: Arc<dyn LocalFileSystem>,
        temp: TempFileManager,
        watermark: WatermarkStore,
        copy_buffer_size: usize,
    ) -> Self {
        Self {
            remote,
            fs,
            temp,
            watermark,
            copy_buffer_size,
        }
    }

    pub async fn upload(
        &self,
        candidate: &CandidateFile,
        destination: &RemoteNode,
    ) -> Result<UploadReceipt, BackupError> {
        if let Err(e) = self.remote.retry_pending_connections().await {
            warn!("预热连接失败，继续上传: {:#}", e);
        }

        let staged = self.temp.create_temp_file(&candidate.name);
        let bytes = self
            .fs
            .copy_with_flush(&candidate.path, staged.path(), self.copy_buffer_size)
            .await
            .map_err(|e| {
                BackupError::Transfer(FailureDetail::new(
                    candidate.name.clone(),
                    format!("复制到暂存目录失败: {}", e),
                ))
            })?;
        debug!("已暂存 {} ({} bytes) -> {:?}", candidate.name, bytes, staged.path());

        let request = UploadRequest {
            local_path: staged.path().to_path_buf(),
            parent_handle: destination.handle.clone(),
            file_name: candidate.name.clone(),
            mtime: candidate.mtime_secs(),
        };

        let node = self
            .remote
            .upload(&request)
            .await
            .map_err(|e| match BackupError::from(e) {
                err @ BackupError::Transfer(_) => err,
                other => BackupError::Transfer(FailureDetail::new(
                    candidate.name.clone(),
                    other.to_string(),
                )),
            })?;

        self.watermark.advance(candidate.created).await;
        info!("已备份: {} ({} bytes)", candidate.name, bytes);

        Ok(UploadReceipt {
            file_name: candidate.name.clone(),
            node,
            bytes,
        })
    }
}

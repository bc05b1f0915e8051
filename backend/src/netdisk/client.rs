// 网盘客户端实现

use crate::autobackup::error::{BackupError, RetryPolicy};
use crate::config::RemoteConfig;
use crate::netdisk::{
    CreateFolderRequest, CreateUploadRequest, Fingerprint, NodeListResponse, NodeResponse,
    RemoteNode, RemoteStorage, StatusResponse, UploadRequest, UploadSession,
    UploadSessionResponse,
};
use crate::sign::DeviceFingerprint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

/// 设备指纹请求头
pub const DEVICE_FINGERPRINT_HEADER: &str = "X-Device-Fingerprint";

/// 续传会话缓存键：同一目标、同名、同大小、同修改时间视为同一次上传
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    parent: String,
    name: String,
    size: u64,
    mtime: i64,
}

/// 网盘客户端
#[derive(Debug, Clone)]
pub struct NetdiskClient {
    /// HTTP客户端
    client: Client,
    /// API 基础地址（不含末尾 `/`）
    base_url: String,
    /// 访问令牌
    access_token: String,
    /// 设备指纹
    device: DeviceFingerprint,
    /// 上传分片大小
    chunk_size: usize,
    /// 分片重试策略
    retry_policy: RetryPolicy,
    /// 未完成的上传会话
    sessions: Arc<Mutex<HashMap<SessionKey, UploadSession>>>,
}

impl NetdiskClient {
    /// 创建新的网盘客户端
    pub fn new(config: &RemoteConfig, device: DeviceFingerprint) -> Result<Self> {
        let client = Client::builder()
            .user_agent(Self::default_user_agent())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            device,
            chunk_size: config.chunk_size.max(1),
            retry_policy: RetryPolicy::new(config.max_retries),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// 替换分片重试策略
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn default_user_agent() -> String {
        format!("camera-backup/{}", env!("CARGO_PKG_VERSION"))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn device(&self) -> &DeviceFingerprint {
        &self.device
    }

    /// 当前缓存的未完成上传会话数
    pub fn pending_session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.url(path))
            .header(DEVICE_FINGERPRINT_HEADER, self.device.as_str());

        if !self.access_token.is_empty() {
            builder = builder.bearer_auth(&self.access_token);
        }

        builder
    }

    /// 发送请求并解析 JSON，非 2xx 状态转为 API 错误
    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        let response = Self::check_status(response, what).await?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    async fn check_status(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("HTTP 请求失败: {} status={}, 响应: {}", what, status, body);
        Err(BackupError::ApiError {
            code: i32::from(status.as_u16()),
            message: body,
        }
        .into())
    }

    fn check_errno(errno: i32, errmsg: &str) -> Result<()> {
        if errno != 0 {
            return Err(BackupError::ApiError {
                code: errno,
                message: errmsg.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn node_path(handle: &str, suffix: &str) -> String {
        format!("nodes/{}{}", urlencoding::encode(handle), suffix)
    }

    // ==================== 上传 ====================

    async fn create_session(&self, request: &UploadRequest, size: u64) -> Result<UploadSession> {
        let body = CreateUploadRequest {
            parent: request.parent_handle.clone(),
            name: request.file_name.clone(),
            size,
            mtime: request.mtime,
        };

        let response: UploadSessionResponse = self
            .send_json(self.request(Method::POST, "uploads").json(&body), "create upload")
            .await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        response
            .session
            .ok_or_else(|| anyhow::anyhow!("响应中没有 session 字段"))
    }

    async fn query_session(&self, upload_id: &str) -> Result<UploadSession> {
        let path = format!("uploads/{}", urlencoding::encode(upload_id));
        let response: UploadSessionResponse = self
            .send_json(self.request(Method::GET, &path), "query upload")
            .await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        response
            .session
            .ok_or_else(|| anyhow::anyhow!("响应中没有 session 字段"))
    }

    /// 恢复已缓存的会话，服务端不再认可时新建
    async fn open_session(
        &self,
        key: &SessionKey,
        request: &UploadRequest,
    ) -> Result<UploadSession> {
        let cached = self.sessions.lock().get(key).cloned();

        if let Some(session) = cached {
            match self.query_session(&session.upload_id).await {
                Ok(remote) if remote.size == key.size => {
                    info!(
                        "恢复上传会话: {} (已上传 {}/{} bytes)",
                        remote.upload_id, remote.offset, remote.size
                    );
                    return Ok(remote);
                }
                Ok(_) => warn!("上传会话大小不一致，重新创建: {}", session.upload_id),
                Err(e) => warn!("上传会话已失效，重新创建: {} ({:#})", session.upload_id, e),
            }
            self.sessions.lock().remove(key);
        }

        let session = self.create_session(request, key.size).await?;
        debug!("创建上传会话: {}", session.upload_id);
        self.sessions.lock().insert(key.clone(), session.clone());
        Ok(session)
    }

    async fn put_chunk(
        &self,
        upload_id: &str,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<UploadSession> {
        let path = format!("uploads/{}", urlencoding::encode(upload_id));
        let builder = self
            .request(Method::PUT, &path)
            .query(&[("offset", offset.to_string())])
            .body(data);

        let response: UploadSessionResponse = self.send_json(builder, "upload chunk").await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        response
            .session
            .ok_or_else(|| anyhow::anyhow!("响应中没有 session 字段"))
    }

    /// 带重试的分片上传
    async fn put_chunk_with_retry(
        &self,
        upload_id: &str,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<UploadSession> {
        let mut retry = 0;
        loop {
            match self.put_chunk(upload_id, offset, data.clone()).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    let err = BackupError::from(e);
                    if !self.retry_policy.should_retry(retry, &err) {
                        return Err(err.into());
                    }
                    retry += 1;
                    let delay = self.retry_policy.calculate_delay(retry);
                    warn!(
                        "分片上传失败，{} ms 后第 {} 次重试: offset={}, 错误: {}",
                        delay.as_millis(),
                        retry,
                        offset,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn complete_session(&self, upload_id: &str) -> Result<RemoteNode> {
        let path = format!("uploads/{}/complete", urlencoding::encode(upload_id));
        let response: NodeResponse = self
            .send_json(self.request(Method::POST, &path), "complete upload")
            .await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        response
            .node
            .ok_or_else(|| anyhow::anyhow!("响应中没有 node 字段"))
    }

    async fn read_chunk(file: &mut tokio::fs::File, offset: u64, len: usize) -> Result<Vec<u8>> {
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)
            .await
            .with_context(|| format!("读取分片失败: offset={}", offset))?;
        Ok(buffer)
    }

    async fn upload_file(&self, request: &UploadRequest) -> Result<RemoteNode> {
        let size = tokio::fs::metadata(&request.local_path)
            .await
            .with_context(|| format!("读取文件元数据失败: {}", request.local_path.display()))?
            .len();

        let key = SessionKey {
            parent: request.parent_handle.clone(),
            name: request.file_name.clone(),
            size,
            mtime: request.mtime,
        };

        let session = self.open_session(&key, request).await?;
        let mut offset = session.offset;
        let mut file = tokio::fs::File::open(&request.local_path)
            .await
            .with_context(|| format!("无法打开文件 {}", request.local_path.display()))?;

        while offset < size {
            let len = (size - offset).min(self.chunk_size as u64) as usize;
            let data = Self::read_chunk(&mut file, offset, len).await?;
            let updated = self
                .put_chunk_with_retry(&session.upload_id, offset, data)
                .await?;

            if updated.offset <= offset {
                anyhow::bail!(
                    "服务端上传偏移未前进: upload_id={}, offset={}",
                    session.upload_id,
                    offset
                );
            }
            offset = updated.offset;
            self.sessions.lock().insert(key.clone(), updated);
            debug!("已上传 {}/{} bytes: {}", offset, size, request.file_name);
        }

        let node = self.complete_session(&session.upload_id).await?;
        self.sessions.lock().remove(&key);

        info!("上传完成: {} -> {}", request.file_name, node.handle);
        Ok(node)
    }
}

#[async_trait]
impl RemoteStorage for NetdiskClient {
    async fn root_node(&self) -> Result<RemoteNode> {
        let response: NodeResponse = self
            .send_json(self.request(Method::GET, "nodes/root"), "root node")
            .await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        response
            .node
            .ok_or_else(|| anyhow::anyhow!("响应中没有 node 字段"))
    }

    async fn children(&self, parent: &RemoteNode) -> Result<Vec<RemoteNode>> {
        let path = Self::node_path(&parent.handle, "/children");
        let response: NodeListResponse = self
            .send_json(self.request(Method::GET, &path), "list children")
            .await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        debug!("获取到 {} 个子节点: {}", response.list.len(), parent.name);
        Ok(response.list)
    }

    async fn create_folder(&self, parent: &RemoteNode, name: &str) -> Result<RemoteNode> {
        info!("创建目录: {} (parent={})", name, parent.handle);

        let path = Self::node_path(&parent.handle, "/folders");
        let body = CreateFolderRequest {
            name: name.to_string(),
        };
        let response: NodeResponse = self
            .send_json(self.request(Method::POST, &path).json(&body), "create folder")
            .await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        response
            .node
            .ok_or_else(|| anyhow::anyhow!("响应中没有 node 字段"))
    }

    async fn nodes_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<RemoteNode>> {
        let builder = self
            .request(Method::GET, "nodes")
            .query(&[("fingerprint", fingerprint.as_str())]);
        let response: NodeListResponse = self.send_json(builder, "fingerprint lookup").await?;
        Self::check_errno(response.errno, &response.errmsg)?;

        Ok(response.list)
    }

    async fn upload(&self, request: &UploadRequest) -> Result<RemoteNode> {
        self.upload_file(request).await
    }

    async fn retry_pending_connections(&self) -> Result<()> {
        let response: StatusResponse = self
            .send_json(self.request(Method::GET, "ping"), "ping")
            .await?;
        Self::check_errno(response.errno, &response.errmsg)
    }
}

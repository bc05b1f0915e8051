// 网盘API模块
//
// 备份流程通过 `RemoteStorage` 访问云端，`NetdiskClient` 是基于 HTTP 的实现

pub mod client;
pub mod fingerprint;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use client::NetdiskClient;
pub use fingerprint::Fingerprint;
pub use types::{
    CreateFolderRequest, CreateUploadRequest, NodeKind, NodeListResponse, NodeResponse,
    RemoteNode, StatusResponse, UploadRequest, UploadSession, UploadSessionResponse,
};

/// 云端存储
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// 获取根节点
    async fn root_node(&self) -> Result<RemoteNode>;

    /// 列出直接子节点
    async fn children(&self, parent: &RemoteNode) -> Result<Vec<RemoteNode>>;

    /// 在 `parent` 下创建目录
    async fn create_folder(&self, parent: &RemoteNode, name: &str) -> Result<RemoteNode>;

    /// 按指纹查找节点（可能位于任意位置，包括回收站）
    async fn nodes_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<RemoteNode>>;

    /// 可续传上传，保留原始修改时间
    async fn upload(&self, request: &UploadRequest) -> Result<RemoteNode>;

    /// 重试挂起的连接
    async fn retry_pending_connections(&self) -> Result<()>;
}

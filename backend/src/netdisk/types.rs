// 网盘API数据类型

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// 云端节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// 节点句柄
    pub handle: String,

    /// 父节点句柄（根节点为 None）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<String>,

    /// 节点名称
    pub name: String,

    /// 节点类型
    pub kind: NodeKind,

    /// 内容指纹（仅文件有效）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// 修改时间（Unix 秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,

    /// 文件大小（字节）
    #[serde(default)]
    pub size: u64,

    /// 是否位于回收站
    #[serde(default)]
    pub in_rubbish: bool,
}

impl RemoteNode {
    /// 是否是目录
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// 是否是文件
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// 是否直接位于 `parent` 之下
    pub fn is_direct_child_of(&self, parent: &RemoteNode) -> bool {
        self.parent_handle.as_deref() == Some(parent.handle.as_str())
    }
}

/// 上传请求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// 待上传的本地文件（暂存副本）
    pub local_path: PathBuf,
    /// 目标目录句柄
    pub parent_handle: String,
    /// 云端文件名
    pub file_name: String,
    /// 原始文件修改时间（Unix 秒），上传后保留
    pub mtime: i64,
}

/// 单节点响应
#[derive(Debug, Deserialize)]
pub struct NodeResponse {
    /// 错误码（0表示成功）
    pub errno: i32,

    /// 错误信息
    #[serde(default)]
    pub errmsg: String,

    /// 节点
    #[serde(default)]
    pub node: Option<RemoteNode>,
}

/// 节点列表响应
#[derive(Debug, Deserialize)]
pub struct NodeListResponse {
    /// 错误码（0表示成功）
    pub errno: i32,

    /// 错误信息
    #[serde(default)]
    pub errmsg: String,

    /// 节点列表
    #[serde(default)]
    pub list: Vec<RemoteNode>,
}

/// 上传会话响应
#[derive(Debug, Deserialize)]
pub struct UploadSessionResponse {
    /// 错误码（0表示成功）
    pub errno: i32,

    /// 错误信息
    #[serde(default)]
    pub errmsg: String,

    /// 上传会话
    #[serde(default)]
    pub session: Option<UploadSession>,
}

/// 无数据响应（ping 等）
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub errno: i32,

    #[serde(default)]
    pub errmsg: String,
}

/// 可续传的上传会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// 会话ID
    pub upload_id: String,
    /// 服务端已接收的字节数
    pub offset: u64,
    /// 文件总大小
    pub size: u64,
}

/// 创建目录请求体
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
}

/// 创建上传会话请求体
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUploadRequest {
    pub parent: String,
    pub name: String,
    pub size: u64,
    pub mtime: i64,
}

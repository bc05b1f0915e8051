// 备份目标目录定位

use std::sync::Arc;
use tracing::{info, warn};

use crate::netdisk::{RemoteNode, RemoteStorage};

/// 在云端根目录下查找或创建备份目录
#[derive(Clone)]
pub struct DestinationResolver {
    remote: Arc<dyn RemoteStorage>,
    name: String,
}

impl DestinationResolver {
    pub fn new(remote: Arc<dyn RemoteStorage>, name: impl Into<String>) -> Self {
        Self {
            remote,
            name: name.into(),
        }
    }

    pub fn destination_name(&self) -> &str {
        &self.name
    }

    /// 返回备份目录，找不到且创建失败时返回 None
    pub async fn resolve_or_create(&self) -> Option<RemoteNode> {
        let root = match self.remote.root_node().await {
            Ok(root) => root,
            Err(e) => {
                warn!("获取云端根目录失败: {:#}", e);
                return None;
            }
        };

        match self.find_in(&root).await {
            Ok(Some(node)) => return Some(node),
            Ok(None) => {}
            Err(e) => {
                warn!("列出云端根目录失败: {:#}", e);
                return None;
            }
        }

        info!("备份目录不存在，创建: {}", self.name);
        if let Err(e) = self.remote.create_folder(&root, &self.name).await {
            warn!("创建备份目录失败: {} - {:#}", self.name, e);
            return None;
        }

        // 以重新扫描的结果为准
        match self.find_in(&root).await {
            Ok(Some(node)) => Some(node),
            Ok(None) => {
                warn!("创建后仍未找到备份目录: {}", self.name);
                None
            }
            Err(e) => {
                warn!("列出云端根目录失败: {:#}", e);
                None
            }
        }
    }

    async fn find_in(&self, root: &RemoteNode) -> anyhow::Result<Option<RemoteNode>> {
        let children = self.remote.children(root).await?;
        Ok(children.into_iter().find(|node| {
            node.is_folder() && !node.in_rubbish && node.name.eq_ignore_ascii_case(&self.name)
        }))
    }
}

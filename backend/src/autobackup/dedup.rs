//! 指纹去重
//!
//! 按目标目录判断：只有直接位于备份目录下、且不在回收站里的同指纹节点才算重复。
//! 回收站中的副本视为不存在，其他目录中的副本与本目录无关，两者都需要上传。

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::discovery::CandidateFile;
use super::error::BackupError;
use crate::netdisk::{Fingerprint, RemoteNode, RemoteStorage};

/// 去重判断原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupReason {
    /// 云端没有同指纹节点
    NoMatch,
    /// 同指纹节点都在回收站
    InRubbish,
    /// 同指纹节点在其他目录
    ElsewhereInTree,
    /// 备份目录中已有
    AlreadyInDestination,
}

/// 去重检查结果
#[derive(Debug, Clone)]
pub struct DedupResult {
    pub should_upload: bool,
    pub reason: DedupReason,
    pub fingerprint: Fingerprint,
    /// 已存在的节点（仅重复时有值）
    pub existing: Option<RemoteNode>,
}

#[derive(Clone)]
pub struct DedupEngine {
    remote: Arc<dyn RemoteStorage>,
}

impl DedupEngine {
    pub fn new(remote: Arc<dyn RemoteStorage>) -> Self {
        Self { remote }
    }

    pub async fn check(
        &self,
        candidate: &CandidateFile,
        destination: &RemoteNode,
    ) -> Result<DedupResult, BackupError> {
        let fingerprint = Fingerprint::compute(&candidate.path, candidate.mtime_secs())
            .await
            .map_err(|e| {
                BackupError::DedupError(format!("计算指纹失败: {}: {}", candidate.name, e))
            })?;

        let matches = self
            .remote
            .nodes_by_fingerprint(&fingerprint)
            .await
            .map_err(|e| {
                BackupError::DedupError(format!("指纹查询失败: {}: {:#}", candidate.name, e))
            })?;

        let result = evaluate(fingerprint, matches, destination);
        debug!(
            "去重检查: {} -> {:?} (upload={})",
            candidate.name, result.reason, result.should_upload
        );
        Ok(result)
    }

    pub async fn needs_upload(
        &self,
        candidate: &CandidateFile,
        destination: &RemoteNode,
    ) -> Result<bool, BackupError> {
        Ok(self.check(candidate, destination).await?.should_upload)
    }
}

fn evaluate(
    fingerprint: Fingerprint,
    matches: Vec<RemoteNode>,
    destination: &RemoteNode,
) -> DedupResult {
    if matches.is_empty() {
        return DedupResult {
            should_upload: true,
            reason: DedupReason::NoMatch,
            fingerprint,
            existing: None,
        };
    }

    if let Some(existing) = matches
        .iter()
        .find(|node| node.is_direct_child_of(destination) && !node.in_rubbish)
    {
        return DedupResult {
            should_upload: false,
            reason: DedupReason::AlreadyInDestination,
            fingerprint,
            existing: Some(existing.clone()),
        };
    }

    let reason = if matches.iter().all(|node| node.in_rubbish) {
        DedupReason::InRubbish
    } else {
        DedupReason::ElsewhereInTree
    };

    DedupResult {
        should_upload: true,
        reason,
        fingerprint,
        existing: None,
    }
}

//! 相机备份管理器
//!
//! 一次运行：确保暂存目录 → 清扫残留 → 定位备份目录 → 发现新文件 →
//! 逐个去重、上传。任何一个文件失败就结束本次运行，等下次再试。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::common::TempFileManager;
use super::context::BackupContext;
use super::dedup::DedupEngine;
use super::discovery::{CandidateFile, FileDiscovery};
use super::error::{BackupError, FailureDetail};
use super::resolver::DestinationResolver;
use super::tracker::FailureTracker;
use super::uploader::{StagedUploader, TEMP_FILE_PREFIX};
use super::watermark::WatermarkStore;
use crate::netdisk::RemoteNode;

/// 最近一次运行报告的结构化设置键
pub const LAST_RUN_REPORT_KEY: &str = "LastRunReport";

/// 运行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// 所有候选文件都已处理
    #[default]
    Completed,
    /// 某个文件失败，提前结束
    StoppedOnFailure,
    /// 备份目录不可用
    DestinationUnavailable,
    /// 暂存目录不可用
    StagingUnavailable,
}

/// 运行报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// 发现的候选文件数
    pub discovered: usize,
    pub uploaded: usize,
    /// 云端已存在而跳过的文件数
    pub duplicates: usize,
    /// 连续失败过多而跳过的文件数
    pub poisoned: usize,
    /// 导致提前结束的文件
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_file: Option<FailureDetail>,
}

enum FileOutcome {
    Uploaded,
    Duplicate,
    Poisoned,
    Failed(FailureDetail),
}

/// 相机备份
pub struct CameraBackup {
    ctx: BackupContext,
    temp: TempFileManager,
    tracker: FailureTracker,
    watermark: WatermarkStore,
    resolver: DestinationResolver,
    discovery: FileDiscovery,
    dedup: DedupEngine,
    uploader: StagedUploader,
}

impl CameraBackup {
    pub fn new(ctx: BackupContext) -> Self {
        let config = &ctx.config;
        let temp = TempFileManager::new(config.temp_dir.clone(), TEMP_FILE_PREFIX);
        let tracker = FailureTracker::new(ctx.settings.clone(), config.max_file_upload_errors);
        let watermark = WatermarkStore::new(ctx.settings.clone());
        let resolver =
            DestinationResolver::new(ctx.remote.clone(), config.destination_name.clone());
        let discovery = FileDiscovery::new(ctx.fs.clone(), config.filter.clone());
        let dedup = DedupEngine::new(ctx.remote.clone());
        let uploader = StagedUploader::new(
            ctx.remote.clone(),
            ctx.fs.clone(),
            temp.clone(),
            watermark.clone(),
            config.copy_buffer_size,
        );

        Self {
            ctx,
            temp,
            tracker,
            watermark,
            resolver,
            discovery,
            dedup,
            uploader,
        }
    }

    pub fn context(&self) -> &BackupContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    pub fn watermark(&self) -> &WatermarkStore {
        &self.watermark
    }

    /// 最近一次运行的报告
    pub async fn last_report(&self) -> RunReport {
        self.ctx.settings.load_structured(LAST_RUN_REPORT_KEY).await
    }

    /// 执行一次备份
    ///
    /// 可重复调用，也可以与其他进程中的运行并发
    pub async fn run_once(&self) -> RunReport {
        let mut report = RunReport {
            started_at: Utc::now(),
            ..Default::default()
        };
        info!("开始相机备份 (device={})", self.ctx.device);

        report.outcome = self.run_cycle(&mut report).await;
        report.finished_at = Utc::now();

        if !self
            .ctx
            .settings
            .save_structured(LAST_RUN_REPORT_KEY, &report)
            .await
        {
            warn!("保存运行报告失败");
        }

        info!(
            "相机备份结束: {:?}, 发现 {}, 上传 {}, 重复 {}, 跳过 {}",
            report.outcome, report.discovered, report.uploaded, report.duplicates, report.poisoned
        );
        report
    }

    async fn run_cycle(&self, report: &mut RunReport) -> RunOutcome {
        if !self.ensure_temp_dir().await {
            return RunOutcome::StagingUnavailable;
        }
        self.sweep_stale_temp_files().await;

        let Some(destination) = self.resolver.resolve_or_create().await else {
            warn!("备份目录不可用，本次跳过: {}", self.resolver.destination_name());
            return RunOutcome::DestinationUnavailable;
        };
        debug!("备份目录: {} ({})", destination.name, destination.handle);

        let watermark = self.watermark.load().await;
        let candidates = self
            .discovery
            .discover(watermark, &self.ctx.config.monitored_folders)
            .await;
        report.discovered = candidates.len();

        for candidate in &candidates {
            match self.process(candidate, &destination).await {
                FileOutcome::Uploaded => report.uploaded += 1,
                FileOutcome::Duplicate => report.duplicates += 1,
                FileOutcome::Poisoned => report.poisoned += 1,
                FileOutcome::Failed(detail) => {
                    report.failed_file = Some(detail);
                    return RunOutcome::StoppedOnFailure;
                }
            }
        }

        RunOutcome::Completed
    }

    async fn process(&self, candidate: &CandidateFile, destination: &RemoteNode) -> FileOutcome {
        if self.tracker.should_skip(&candidate.name).await {
            warn!("连续失败次数过多，跳过: {}", candidate.name);
            return FileOutcome::Poisoned;
        }

        let dedup = match self.dedup.check(candidate, destination).await {
            Ok(result) => result,
            Err(e) => return self.fail(candidate, e).await,
        };

        if !dedup.should_upload {
            info!("云端已存在，跳过: {}", candidate.name);
            self.watermark.advance(candidate.created).await;
            self.tracker.clear_if_tracked(&candidate.name).await;
            return FileOutcome::Duplicate;
        }

        match self.uploader.upload(candidate, destination).await {
            Ok(_) => {
                self.tracker.clear_if_tracked(&candidate.name).await;
                FileOutcome::Uploaded
            }
            Err(e) => self.fail(candidate, e).await,
        }
    }

    async fn fail(&self, candidate: &CandidateFile, err: BackupError) -> FileOutcome {
        let detail = err.to_failure_detail(&candidate.name);
        error!("备份失败，结束本次运行: {}", detail);
        self.tracker.on_failure(&candidate.name).await;
        FileOutcome::Failed(detail)
    }

    /// 失败时重试一次
    async fn ensure_temp_dir(&self) -> bool {
        let dir = self.temp.temp_dir();
        for attempt in 1..=2 {
            match self.ctx.fs.ensure_dir(dir).await {
                Ok(()) => return true,
                Err(e) => warn!("创建暂存目录失败 (第 {} 次): {:?} - {}", attempt, dir, e),
            }
        }
        error!("暂存目录不可用，本次跳过: {:?}", dir);
        false
    }

    async fn sweep_stale_temp_files(&self) {
        let max_age = Duration::from_secs(self.ctx.config.stale_temp_max_age_secs);
        match self.temp.cleanup_old(max_age).await {
            Ok(0) => {}
            Ok(n) => info!("清理了 {} 个残留暂存文件", n),
            Err(e) => warn!("清理残留暂存文件失败: {}", e),
        }
    }
}

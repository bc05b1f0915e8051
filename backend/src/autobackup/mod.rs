//! 相机自动备份模块
//!
//! 把本地相册中新拍摄的文件增量备份到云端固定目录：
//! - 水位线发现（只看创建时间不早于上次进度的文件）
//! - 指纹去重（按目标目录判断，回收站中的副本不算）
//! - 暂存上传（先复制到私有目录再续传）
//! - 单文件失败计数（反复失败的文件被跳过）

pub mod common;
pub mod context;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod localfs;
pub mod manager;
pub mod resolver;
pub mod tracker;
pub mod uploader;
pub mod watermark;

pub use common::{TempFileGuard, TempFileManager};
pub use context::BackupContext;
pub use dedup::{DedupEngine, DedupReason, DedupResult};
pub use discovery::{CandidateFile, FileDiscovery};
pub use error::{BackupError, ErrorCategory, FailureDetail, RetryPolicy};
pub use localfs::{LocalFileEntry, LocalFileSystem, TokioFileSystem};
pub use manager::{CameraBackup, RunOutcome, RunReport, LAST_RUN_REPORT_KEY};
pub use resolver::DestinationResolver;
pub use tracker::{FailureRecord, FailureTracker, TrackerState};
pub use uploader::{StagedUploader, UploadReceipt};
pub use watermark::WatermarkStore;

// 基于水位线的文件发现

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::localfs::{LocalFileEntry, LocalFileSystem};
use crate::config::FilterConfig;

/// 待处理的本地文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub name: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl CandidateFile {
    /// 修改时间（Unix 秒），指纹和上传都用它
    pub fn mtime_secs(&self) -> i64 {
        self.modified.timestamp()
    }
}

impl From<LocalFileEntry> for CandidateFile {
    fn from(entry: LocalFileEntry) -> Self {
        Self {
            path: entry.path,
            name: entry.name,
            created: entry.created,
            modified: entry.modified,
            size: entry.size,
        }
    }
}

/// 文件发现
#[derive(Clone)]
pub struct FileDiscovery {
    fs: Arc<dyn LocalFileSystem>,
    filter: FilterConfig,
}

impl FileDiscovery {
    pub fn new(fs: Arc<dyn LocalFileSystem>, filter: FilterConfig) -> Self {
        Self { fs, filter }
    }

    /// 列出创建时间不早于 `watermark` 的候选文件，按创建时间升序
    ///
    /// 任何目录列举失败（包括目录不存在）都使本次发现返回空集，从不只返回部分目录
    pub async fn discover(
        &self,
        watermark: DateTime<Utc>,
        folders: &[PathBuf],
    ) -> Vec<CandidateFile> {
        let mut candidates = Vec::new();

        for folder in folders {
            match self.scan_folder(folder, watermark).await {
                Ok(mut found) => candidates.append(&mut found),
                Err(e) => {
                    error!("扫描目录失败，本次不处理任何文件: {:?}, 错误: {}", folder, e);
                    return Vec::new();
                }
            }
        }

        sort_by_creation(&mut candidates);
        info!(
            "发现 {} 个新文件 (水位线: {})",
            candidates.len(),
            watermark.to_rfc3339()
        );
        candidates
    }

    async fn scan_folder(
        &self,
        folder: &Path,
        watermark: DateTime<Utc>,
    ) -> std::io::Result<Vec<CandidateFile>> {
        let entries = self.fs.list_files(folder).await?;

        let total = entries.len();
        let mut files: Vec<CandidateFile> = entries
            .into_iter()
            .filter(|entry| self.filter.accepts(&entry.name, entry.size))
            .map(CandidateFile::from)
            .collect();

        // 目录列举顺序不可靠
        sort_by_creation(&mut files);
        files.retain(|file| file.created >= watermark);

        debug!("扫描目录 {:?}: {} 个文件, {} 个待处理", folder, total, files.len());
        Ok(files)
    }
}

fn sort_by_creation(files: &mut [CandidateFile]) {
    files.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
}

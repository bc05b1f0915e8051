// 测试用的内存云端与可控本地文件系统

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;
use tempfile::TempDir;

use crate::autobackup::error::{BackupError, FailureDetail};
use crate::autobackup::localfs::{LocalFileEntry, LocalFileSystem, TokioFileSystem};
use crate::netdisk::{Fingerprint, NodeKind, RemoteNode, RemoteStorage, UploadRequest};

/// UTC 零点
pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single().unwrap()
}

// ==================== 本地文件系统 ====================

/// 真实文件放在临时目录里，创建时间由测试指定
pub struct FakeFileSystem {
    dir: TempDir,
    inner: TokioFileSystem,
    created: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
    broken_dirs: Mutex<HashSet<PathBuf>>,
    fail_copies: AtomicBool,
    ensure_dir_failures: AtomicUsize,
    copies: AtomicUsize,
}

impl FakeFileSystem {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            inner: TokioFileSystem::new(),
            created: Mutex::new(HashMap::new()),
            broken_dirs: Mutex::new(HashSet::new()),
            fail_copies: AtomicBool::new(false),
            ensure_dir_failures: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn folder(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    /// 写入文件，创建时间和修改时间都设为 `created`
    pub fn add_file(
        &self,
        folder: &Path,
        name: &str,
        content: &[u8],
        created: DateTime<Utc>,
    ) -> PathBuf {
        let path = folder.join(name);
        std::fs::write(&path, content).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::from(created)).unwrap();
        self.created.lock().insert(path.clone(), created);
        path
    }

    pub fn fail_listing(&self, folder: &Path) {
        self.broken_dirs.lock().insert(folder.to_path_buf());
    }

    pub fn fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    /// 接下来 `n` 次 ensure_dir 失败
    pub fn fail_ensure_dir(&self, n: usize) {
        self.ensure_dir_failures.store(n, Ordering::SeqCst);
    }

    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalFileSystem for FakeFileSystem {
    async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        let remaining = self.ensure_dir_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.ensure_dir_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::Other, "injected mkdir failure"));
        }
        self.inner.ensure_dir(path).await
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<LocalFileEntry>> {
        if self.broken_dirs.lock().contains(dir) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected listing failure"));
        }

        let mut files = self.inner.list_files(dir).await?;
        let created = self.created.lock();
        for file in &mut files {
            if let Some(time) = created.get(&file.path) {
                file.created = *time;
            }
        }
        Ok(files)
    }

    async fn copy_with_flush(
        &self,
        from: &Path,
        to: &Path,
        buffer_size: usize,
    ) -> io::Result<u64> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected copy failure"));
        }
        self.inner.copy_with_flush(from, to, buffer_size).await
    }
}

// ==================== 云端 ====================

/// 一次成功上传的记录
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub parent_handle: String,
    pub content: Vec<u8>,
    pub mtime: i64,
    /// 上传时暂存文件的路径
    pub staged_path: PathBuf,
}

#[derive(Default)]
struct RemoteState {
    nodes: Vec<RemoteNode>,
    next_id: u64,
    uploads: Vec<UploadedFile>,
}

/// 内存中的云端节点树
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    fail_root: AtomicBool,
    fail_create_folder: AtomicBool,
    fail_lookup: AtomicBool,
    fail_uploads: AtomicBool,
    failing_names: Mutex<HashSet<String>>,
    warm_calls: AtomicUsize,
}

pub const ROOT_HANDLE: &str = "root";

impl MemoryRemote {
    pub fn new() -> Self {
        let root = RemoteNode {
            handle: ROOT_HANDLE.to_string(),
            parent_handle: None,
            name: String::new(),
            kind: NodeKind::Folder,
            fingerprint: None,
            mtime: None,
            size: 0,
            in_rubbish: false,
        };
        Self {
            state: Mutex::new(RemoteState {
                nodes: vec![root],
                next_id: 1,
                uploads: Vec::new(),
            }),
            fail_root: AtomicBool::new(false),
            fail_create_folder: AtomicBool::new(false),
            fail_lookup: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            failing_names: Mutex::new(HashSet::new()),
            warm_calls: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> RemoteNode {
        self.state.lock().nodes[0].clone()
    }

    fn insert(
        &self,
        parent: &str,
        name: &str,
        kind: NodeKind,
        fingerprint: Option<String>,
        in_rubbish: bool,
    ) -> RemoteNode {
        let mut state = self.state.lock();
        let node = RemoteNode {
            handle: format!("h{}", state.next_id),
            parent_handle: Some(parent.to_string()),
            name: name.to_string(),
            kind,
            fingerprint,
            mtime: None,
            size: 0,
            in_rubbish,
        };
        state.next_id += 1;
        state.nodes.push(node.clone());
        node
    }

    pub fn add_folder(&self, parent: &RemoteNode, name: &str) -> RemoteNode {
        self.insert(&parent.handle, name, NodeKind::Folder, None, parent.in_rubbish)
    }

    pub fn add_file(
        &self,
        parent: &RemoteNode,
        name: &str,
        fingerprint: &Fingerprint,
        in_rubbish: bool,
    ) -> RemoteNode {
        self.insert(
            &parent.handle,
            name,
            NodeKind::File,
            Some(fingerprint.as_str().to_string()),
            in_rubbish,
        )
    }

    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.state.lock().uploads.clone()
    }

    pub fn folders_named(&self, name: &str) -> usize {
        self.state
            .lock()
            .nodes
            .iter()
            .filter(|n| n.is_folder() && n.name.eq_ignore_ascii_case(name))
            .count()
    }

    pub fn warm_calls(&self) -> usize {
        self.warm_calls.load(Ordering::SeqCst)
    }

    pub fn fail_root(&self, fail: bool) {
        self.fail_root.store(fail, Ordering::SeqCst);
    }

    pub fn fail_create_folder(&self, fail: bool) {
        self.fail_create_folder.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// 只让指定文件名的上传失败
    pub fn fail_upload_of(&self, name: &str, fail: bool) {
        let mut names = self.failing_names.lock();
        if fail {
            names.insert(name.to_string());
        } else {
            names.remove(name);
        }
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemote {
    async fn root_node(&self) -> Result<RemoteNode> {
        if self.fail_root.load(Ordering::SeqCst) {
            return Err(BackupError::NetworkError("root unavailable".to_string()).into());
        }
        Ok(self.root())
    }

    async fn children(&self, parent: &RemoteNode) -> Result<Vec<RemoteNode>> {
        Ok(self
            .state
            .lock()
            .nodes
            .iter()
            .filter(|n| n.is_direct_child_of(parent))
            .cloned()
            .collect())
    }

    async fn create_folder(&self, parent: &RemoteNode, name: &str) -> Result<RemoteNode> {
        if self.fail_create_folder.load(Ordering::SeqCst) {
            return Err(BackupError::ApiError {
                code: 500,
                message: "mkdir failed".to_string(),
            }
            .into());
        }
        Ok(self.add_folder(parent, name))
    }

    async fn nodes_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<RemoteNode>> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(BackupError::NetworkError("lookup failed".to_string()).into());
        }
        Ok(self
            .state
            .lock()
            .nodes
            .iter()
            .filter(|n| n.fingerprint.as_deref() == Some(fingerprint.as_str()))
            .cloned()
            .collect())
    }

    async fn upload(&self, request: &UploadRequest) -> Result<RemoteNode> {
        let failing = self.fail_uploads.load(Ordering::SeqCst)
            || self.failing_names.lock().contains(&request.file_name);
        if failing {
            return Err(BackupError::Transfer(FailureDetail::new(
                request.file_name.clone(),
                "HTTP 500",
            ))
            .into());
        }

        let content = tokio::fs::read(&request.local_path).await?;
        let fingerprint = Fingerprint::compute(&request.local_path, request.mtime).await?;
        let node = self.insert(
            &request.parent_handle,
            &request.file_name,
            NodeKind::File,
            Some(fingerprint.as_str().to_string()),
            false,
        );

        self.state.lock().uploads.push(UploadedFile {
            name: request.file_name.clone(),
            parent_handle: request.parent_handle.clone(),
            content,
            mtime: request.mtime,
            staged_path: request.local_path.clone(),
        });
        Ok(node)
    }

    async fn retry_pending_connections(&self) -> Result<()> {
        self.warm_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

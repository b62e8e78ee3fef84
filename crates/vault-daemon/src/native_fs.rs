//! Native filesystem implementation using tokio::fs.

use crate::watcher::{FileWatcher, WatchConfig};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::debug;
use vault_core::events::{Listener, Subscription};
use vault_core::fs::{FileEntry, FileStat, FileSystem, FsError, Result};
use vault_core::paths;

/// A directory on disk exposed as a vault tree.
pub struct NativeFs {
    base_path: PathBuf,
    watch_config: WatchConfig,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self::with_watch_config(base_path, WatchConfig::default())
    }

    pub fn with_watch_config(base_path: PathBuf, watch_config: WatchConfig) -> Self {
        Self {
            base_path,
            watch_config,
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let relative = paths::normalize(path);
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(relative)
        }
    }
}

/// Map an IO error for `path` onto the tree error taxonomy.
fn io_error(path: &str, err: io::Error) -> FsError {
    let path = paths::normalize(path);
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path),
        io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path),
        io::ErrorKind::IsADirectory => FsError::IsDirectory(path),
        io::ErrorKind::NotADirectory => FsError::NotDirectory(path),
        io::ErrorKind::DirectoryNotEmpty => FsError::NotEmpty(path),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            FsError::ReadOnly(path)
        }
        _ => FsError::Io(format!("{}: {}", path, err)),
    }
}

fn millis(time: io::Result<std::time::SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        if fs::metadata(&full_path).await.is_ok_and(|m| m.is_dir()) {
            return Err(FsError::IsDirectory(paths::normalize(path)));
        }
        fs::read(&full_path).await.map_err(|e| io_error(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        if full_path == self.base_path {
            return Err(FsError::IsDirectory("/".to_string()));
        }

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(&paths::parent(path), e))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let full_path = self.full_path(path);
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await.map_err(|e| io_error(path, e))?;

            entries.push(FileEntry {
                name,
                is_dir: metadata.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;

        if metadata.is_dir() {
            fs::remove_dir(&full_path)
                .await
                .map_err(|e| io_error(path, e))
        } else {
            fs::remove_file(&full_path)
                .await
                .map_err(|e| io_error(path, e))
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;

        let mut stat = FileStat::local(metadata.len(), millis(metadata.modified()), metadata.is_dir());
        if metadata.is_dir() {
            stat.size = 0;
        }
        // Some platforms have no birth time; the mtime stands in.
        if let Ok(created) = metadata.created() {
            stat.ctime_millis = millis(Ok(created));
        }
        Ok(stat)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        if fs::metadata(&full_path).await.is_ok_and(|m| !m.is_dir()) {
            return Err(FsError::AlreadyExists(paths::normalize(path)));
        }
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| io_error(path, e))
    }

    fn watch(&self, on_change: Listener<String>) -> Result<Subscription> {
        let watcher = FileWatcher::new(self.base_path.clone(), self.watch_config, move |event| {
            on_change(event.path)
        })
        .map_err(|e| FsError::Io(format!("watch {:?}: {}", self.base_path, e)))?;

        let root = watcher.root().to_path_buf();
        let slot = Arc::new(Mutex::new(Some(watcher)));
        Ok(Subscription::new(move || {
            slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            debug!("Stopped watching {:?}", root);
        }))
    }

    fn base_path(&self) -> Option<PathBuf> {
        Some(self.base_path.clone())
    }
}

//! FileSystem trait abstraction for tree operations.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `Archive` - A versioned vault backed by block feeds
//! - `Vault` - Either of the above behind one handle
//! - `NativeFs` (in vault-daemon) - Uses tokio::fs
//!
//! Paths are vault paths (`/a/b.txt`); the leading slash is optional.

use crate::events::{EventBus, Listener, Subscription};
use crate::paths;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Block size used to report block counts for plain filesystems.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Read-only: {0}")]
    ReadOnly(String),

    #[error("Content not available locally: {0}")]
    Unavailable(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Modification time in milliseconds since epoch
    pub mtime_millis: u64,
    /// Creation time in milliseconds since epoch
    pub ctime_millis: u64,
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
    /// First content block (vaults only, zero otherwise)
    pub offset: u64,
    /// Number of content blocks
    pub blocks: u64,
    /// Number of content blocks present locally
    pub downloaded: u64,
}

impl FileStat {
    /// Stat for a plain filesystem node, where every block is local.
    pub fn local(size: u64, mtime_millis: u64, is_dir: bool) -> Self {
        let blocks = if is_dir { 0 } else { size.div_ceil(DEFAULT_CHUNK_SIZE) };
        Self {
            mtime_millis,
            ctime_millis: mtime_millis,
            size,
            is_dir,
            offset: 0,
            blocks,
            downloaded: blocks,
        }
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir
    }

    pub fn is_fully_downloaded(&self) -> bool {
        self.downloaded >= self.blocks
    }
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Tree filesystem abstraction shared by every backend.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Delete file or empty directory
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Report raw change notifications for any path under the root.
    ///
    /// The callback receives the changed path relative to the root, as the
    /// backend reports it (separators are not normalized). Dropping the
    /// returned subscription stops the watch.
    fn watch(&self, on_change: Listener<String>) -> Result<Subscription> {
        let _ = on_change;
        Err(FsError::Unsupported("watch"))
    }

    /// On-disk root, for backends that have one.
    fn base_path(&self) -> Option<PathBuf> {
        None
    }
}

#[derive(Default)]
struct MemoryTree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    /// Tracks file modification times (key -> mtime in ms)
    mtimes: HashMap<String, u64>,
}

impl MemoryTree {
    fn has_children(&self, key: &str) -> bool {
        let prefix = if key.is_empty() { String::new() } else { format!("{}/", key) };
        self.files.keys().any(|k| k.starts_with(&prefix) && k != key)
            || self.dirs.iter().any(|k| !k.is_empty() && k.starts_with(&prefix) && k != key)
    }
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    tree: RwLock<MemoryTree>,
    changes: Arc<EventBus<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut tree = MemoryTree::default();
        tree.dirs.insert(String::new()); // Root directory
        Self {
            tree: RwLock::new(tree),
            changes: Arc::new(EventBus::new()),
        }
    }

    /// Set a specific mtime for testing "latest wins" scenarios
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        let key = paths::key(path);
        self.tree
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .mtimes
            .insert(key, mtime);
    }

    fn read_tree(&self) -> std::sync::RwLockReadGuard<'_, MemoryTree> {
        self.tree.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tree(&self) -> std::sync::RwLockWriteGuard<'_, MemoryTree> {
        self.tree.write().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, key: &str) {
        self.changes.emit(format!("/{}", key));
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = paths::key(path);
        let tree = self.read_tree();
        if tree.dirs.contains(&key) {
            return Err(FsError::IsDirectory(paths::normalize(path)));
        }
        tree.files
            .get(&key)
            .cloned()
            .ok_or_else(|| FsError::NotFound(paths::normalize(path)))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let key = paths::key(path);
        if key.is_empty() {
            return Err(FsError::IsDirectory("/".to_string()));
        }

        // Create parent directories
        self.mkdir(&paths::parent(path)).await?;

        {
            let mut tree = self.write_tree();
            if tree.dirs.contains(&key) {
                return Err(FsError::IsDirectory(paths::normalize(path)));
            }
            tree.files.insert(key.clone(), content.to_vec());
            tree.mtimes.insert(key.clone(), current_time_ms());
        }

        self.notify(&key);
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let key = paths::key(path);
        let tree = self.read_tree();
        if !tree.dirs.contains(&key) {
            if tree.files.contains_key(&key) {
                return Err(FsError::NotDirectory(paths::normalize(path)));
            }
            return Err(FsError::NotFound(paths::normalize(path)));
        }

        let prefix = if key.is_empty() { String::new() } else { format!("{}/", key) };
        let direct_child = |candidate: &String| -> Option<String> {
            let rest = candidate.strip_prefix(&prefix)?;
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };

        let mut entries: Vec<FileEntry> = tree
            .dirs
            .iter()
            .filter_map(direct_child)
            .map(|name| FileEntry { name, is_dir: true })
            .collect();
        entries.extend(
            tree.files
                .keys()
                .filter_map(direct_child)
                .map(|name| FileEntry { name, is_dir: false }),
        );
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = paths::key(path);
        {
            let mut tree = self.write_tree();
            if tree.files.remove(&key).is_some() {
                tree.mtimes.remove(&key);
            } else if tree.dirs.contains(&key) && !key.is_empty() {
                if tree.has_children(&key) {
                    return Err(FsError::NotEmpty(paths::normalize(path)));
                }
                tree.dirs.remove(&key);
            } else {
                return Err(FsError::NotFound(paths::normalize(path)));
            }
        }

        self.notify(&key);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = paths::key(path);
        let tree = self.read_tree();
        Ok(tree.files.contains_key(&key) || tree.dirs.contains(&key))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let key = paths::key(path);
        let tree = self.read_tree();

        if let Some(content) = tree.files.get(&key) {
            let mtime = tree.mtimes.get(&key).copied().unwrap_or(0);
            return Ok(FileStat::local(content.len() as u64, mtime, false));
        }

        if tree.dirs.contains(&key) {
            return Ok(FileStat::local(0, 0, true));
        }

        Err(FsError::NotFound(paths::normalize(path)))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let key = paths::key(path);
        if key.is_empty() {
            return Ok(()); // Root always exists
        }

        // Create parent first
        Box::pin(self.mkdir(&paths::parent(path))).await?;

        let created = {
            let mut tree = self.write_tree();
            if tree.files.contains_key(&key) {
                return Err(FsError::AlreadyExists(paths::normalize(path)));
            }
            tree.dirs.insert(key.clone())
        };

        if created {
            self.notify(&key);
        }
        Ok(())
    }

    fn watch(&self, on_change: Listener<String>) -> Result<Subscription> {
        Ok(self.changes.subscribe_listener(on_change))
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows sharing a filesystem between multiple vault handles in tests
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }

    fn watch(&self, on_change: Listener<String>) -> Result<Subscription> {
        (**self).watch(on_change)
    }

    fn base_path(&self) -> Option<PathBuf> {
        (**self).base_path()
    }
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn current_time_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Vault: the handle every tree operation takes.

use crate::archive::Archive;
use crate::events::{Listener, Subscription};
use crate::fs::{FileEntry, FileStat, FileSystem, Result};
use crate::key::VaultKey;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// A tree root: either a plain filesystem or an archive.
#[derive(Clone)]
pub enum Vault {
    Filesystem(Arc<dyn FileSystem>),
    Archive(Arc<Archive>),
}

impl Vault {
    pub fn filesystem(fs: impl FileSystem + 'static) -> Self {
        Vault::Filesystem(Arc::new(fs))
    }

    /// Whether the vault has a key of its own (is an archive).
    pub fn is_remote(&self) -> bool {
        matches!(self, Vault::Archive(_))
    }

    /// Plain filesystems are always writable; archives only for their writer.
    pub fn is_writable(&self) -> bool {
        match self {
            Vault::Filesystem(_) => true,
            Vault::Archive(archive) => archive.is_writable(),
        }
    }

    pub fn key(&self) -> Option<VaultKey> {
        self.as_archive().map(|archive| archive.key())
    }

    pub fn as_archive(&self) -> Option<&Arc<Archive>> {
        match self {
            Vault::Archive(archive) => Some(archive),
            Vault::Filesystem(_) => None,
        }
    }

    fn inner(&self) -> &dyn FileSystem {
        match self {
            Vault::Filesystem(fs) => &**fs,
            Vault::Archive(archive) => &**archive,
        }
    }
}

impl From<Arc<Archive>> for Vault {
    fn from(archive: Arc<Archive>) -> Self {
        Vault::Archive(archive)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vault::Filesystem(fs) => f
                .debug_tuple("Filesystem")
                .field(&fs.base_path())
                .finish(),
            Vault::Archive(archive) => f.debug_tuple("Archive").field(&archive.key()).finish(),
        }
    }
}

#[async_trait]
impl FileSystem for Vault {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner().read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        self.inner().write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.inner().list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner().delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner().exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        self.inner().stat(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.inner().mkdir(path).await
    }

    fn watch(&self, on_change: Listener<String>) -> Result<Subscription> {
        self.inner().watch(on_change)
    }

    fn base_path(&self) -> Option<PathBuf> {
        self.inner().base_path()
    }
}

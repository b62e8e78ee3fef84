use crate::error::{Result, VaultError};
use crate::fs::{FileStat, FileSystem, FsError};
use crate::paths;
use crate::vault::Vault;

/// Stat an entry, including how many of its content blocks are local.
///
/// Plain filesystems always report every block as downloaded.
pub async fn stat(vault: &Vault, path: &str) -> Result<FileStat> {
    Ok(vault.stat(path).await?)
}

/// Stat, with a missing entry as `None`.
pub(crate) async fn try_stat(fs: &dyn FileSystem, path: &str) -> crate::fs::Result<Option<FileStat>> {
    match fs.stat(path).await {
        Ok(stat) => Ok(Some(stat)),
        Err(FsError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub(super) fn ensure_writable(vault: &Vault) -> Result<()> {
    if vault.is_writable() {
        Ok(())
    } else {
        Err(VaultError::VaultNotWritable)
    }
}

pub(super) fn ensure_valid(path: &str) -> Result<()> {
    if paths::is_valid_path(path) {
        Ok(())
    } else {
        Err(VaultError::invalid_path(path, "path contains invalid characters"))
    }
}

/// The parent of `path` must be an existing folder.
pub(super) async fn ensure_parent_folder(vault: &Vault, path: &str) -> Result<()> {
    let parent = paths::parent(path);
    if parent == "/" {
        return Ok(());
    }
    match try_stat(vault, &parent).await? {
        Some(stat) if stat.is_dir => Ok(()),
        _ => Err(VaultError::ParentFolderDoesntExist(parent)),
    }
}

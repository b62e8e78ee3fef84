//! Errors of the file-tree API.

use crate::archive::ArchiveError;
use crate::feed::FeedError;
use crate::fs::FsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("The entry {0} was not found in the vault")]
    NotFound(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not a folder: {0}")]
    NotAFolder(String),

    #[error("Destination directory is not empty: {0}")]
    DestDirectoryNotEmpty(String),

    #[error("Vault is not writable")]
    VaultNotWritable,

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Entry already exists: {0}")]
    EntryAlreadyExists(String),

    #[error("Parent folder does not exist: {0}")]
    ParentFolderDoesntExist(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    #[error("Filesystem error: {0}")]
    Fs(FsError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl From<FsError> for VaultError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound(path) => VaultError::NotFound(path),
            FsError::ReadOnly(_) => VaultError::VaultNotWritable,
            FsError::NotEmpty(path) => VaultError::DestDirectoryNotEmpty(path),
            other => VaultError::Fs(other),
        }
    }
}

impl VaultError {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        VaultError::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_errors_map_to_taxonomy() {
        assert!(matches!(
            VaultError::from(FsError::NotFound("/a".into())),
            VaultError::NotFound(p) if p == "/a"
        ));
        assert!(matches!(
            VaultError::from(FsError::ReadOnly("abc".into())),
            VaultError::VaultNotWritable
        ));
        assert!(matches!(
            VaultError::from(FsError::Io("disk".into())),
            VaultError::Fs(FsError::Io(_))
        ));
    }
}

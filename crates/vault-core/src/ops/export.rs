//! Bulk copies between a vault and another tree.
//!
//! All three exports share one walker: the source is visited depth first in
//! name order, folders are created (replacing files) on the destination, and
//! files are written (replacing folders). Ignore patterns are matched against
//! source paths.

use super::lookup::{ensure_writable, try_stat};
use crate::diff::remove_all;
use crate::error::{Result, VaultError};
use crate::fs::{FileStat, FileSystem, FsError};
use crate::paths;
use crate::pattern::PathMatcher;
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Paths skipped unless `ExportOptions::ignore` says otherwise.
pub const DEFAULT_IGNORE: &[&str] = &["**/.vault", "**/.git"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Source subtree
    pub src_path: String,
    /// Destination folder
    pub dst_path: String,
    /// Glob patterns of source paths to leave out
    pub ignore: Vec<String>,
    /// Import a source folder's contents directly into `dst_path` instead of
    /// into a subfolder named after it
    pub inplace_import: bool,
    /// Compute stats without touching the destination
    pub dry_run: bool,
    /// Allow exporting into a non-empty destination folder
    pub overwrite_existing: bool,
    /// Leave out files whose content is not fully local
    pub skip_undownloaded_files: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            src_path: "/".to_string(),
            dst_path: "/".to_string(),
            ignore: DEFAULT_IGNORE.iter().map(|p| p.to_string()).collect(),
            inplace_import: false,
            dry_run: false,
            overwrite_existing: false,
            skip_undownloaded_files: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStats {
    pub added_files: Vec<String>,
    pub updated_files: Vec<String>,
    /// Ignored entries plus files skipped as undownloaded
    pub skip_count: u64,
    pub file_count: u64,
    pub total_size: u64,
}

/// Copy a subtree of a plain filesystem into a vault.
pub async fn export_filesystem_to_vault(
    src: &dyn FileSystem,
    dst: &Vault,
    options: &ExportOptions,
) -> Result<ExportStats> {
    if !options.dry_run {
        ensure_writable(dst)?;
    }

    let src_path = paths::normalize(&options.src_path);
    let source = match src.stat(&src_path).await {
        Ok(stat) => stat,
        Err(FsError::NotFound(_)) => return Err(VaultError::SourceNotFound(src_path)),
        Err(e) => return Err(e.into()),
    };

    let mut dst_path = paths::normalize(&options.dst_path);
    if source.is_dir && !options.inplace_import {
        dst_path = paths::join(&dst_path, &paths::file_name(&src_path));
    }
    let dst_path = place_into_folder(dst, &src_path, &source, dst_path).await?;

    let mut export = Export::new(src, dst, options)?;
    export.visit(&src_path, &dst_path).await?;
    Ok(export.finish("filesystem", "vault"))
}

/// Copy a subtree of a vault onto a plain filesystem.
pub async fn export_vault_to_filesystem(
    src: &Vault,
    dst: &dyn FileSystem,
    options: &ExportOptions,
) -> Result<ExportStats> {
    let dst_path = paths::normalize(&options.dst_path);
    if !options.overwrite_existing {
        // A missing destination is created by the walk.
        let occupied = dst
            .list(&dst_path)
            .await
            .is_ok_and(|entries| !entries.is_empty());
        if occupied {
            return Err(VaultError::DestDirectoryNotEmpty(dst_path));
        }
    }

    let mut export = Export::new(src, dst, options)?;
    export.visit(&paths::normalize(&options.src_path), &dst_path).await?;
    Ok(export.finish("vault", "filesystem"))
}

/// Copy a subtree of one vault into another.
pub async fn export_vault_to_vault(
    src: &Vault,
    dst: &Vault,
    options: &ExportOptions,
) -> Result<ExportStats> {
    ensure_writable(dst)?;

    let src_path = paths::normalize(&options.src_path);
    let source = src.stat(&src_path).await?;
    let dst_path =
        place_into_folder(dst, &src_path, &source, paths::normalize(&options.dst_path)).await?;

    let mut export = Export::new(src, dst, options)?;
    export.visit(&src_path, &dst_path).await?;
    Ok(export.finish("vault", "vault"))
}

/// Resolve where the source lands: `dst_path` itself or its parent must be a
/// folder, and a single file exported onto an existing folder goes inside it.
async fn place_into_folder(
    dst: &Vault,
    src_path: &str,
    source: &FileStat,
    dst_path: String,
) -> Result<String> {
    let existing = try_stat(dst, &dst_path).await?;
    let folder = match &existing {
        Some(stat) => stat.is_dir,
        None => try_stat(dst, &paths::parent(&dst_path))
            .await?
            .is_some_and(|stat| stat.is_dir),
    };
    if !folder {
        return Err(VaultError::ParentFolderDoesntExist(dst_path));
    }

    if !source.is_dir && existing.is_some_and(|stat| stat.is_dir) {
        return Ok(paths::join(&dst_path, &paths::file_name(src_path)));
    }
    Ok(dst_path)
}

struct Export<'a> {
    src: &'a dyn FileSystem,
    dst: &'a dyn FileSystem,
    ignore: Option<PathMatcher>,
    skip_undownloaded_files: bool,
    dry_run: bool,
    stats: ExportStats,
}

impl<'a> Export<'a> {
    fn new(src: &'a dyn FileSystem, dst: &'a dyn FileSystem, options: &ExportOptions) -> Result<Self> {
        // An empty matcher matches everything, so no patterns means no ignores.
        let ignore = if options.ignore.is_empty() {
            None
        } else {
            Some(PathMatcher::new(&options.ignore)?)
        };
        Ok(Self {
            src,
            dst,
            ignore,
            skip_undownloaded_files: options.skip_undownloaded_files,
            dry_run: options.dry_run,
            stats: ExportStats::default(),
        })
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignore.as_ref().is_some_and(|m| m.is_match(path))
    }

    async fn visit(&mut self, src_path: &str, dst_path: &str) -> Result<()> {
        if self.is_ignored(src_path) {
            self.stats.skip_count += 1;
            return Ok(());
        }

        let stat = self.src.stat(src_path).await?;
        if stat.is_dir {
            Box::pin(self.export_dir(src_path, dst_path)).await
        } else {
            self.export_file(src_path, &stat, dst_path).await
        }
    }

    async fn export_file(&mut self, src_path: &str, stat: &FileStat, dst_path: &str) -> Result<()> {
        if self.skip_undownloaded_files && !stat.is_fully_downloaded() {
            debug!("Skipping undownloaded file {}", src_path);
            self.stats.skip_count += 1;
            return Ok(());
        }

        let existing = try_stat(self.dst, dst_path).await?;
        self.stats.file_count += 1;
        self.stats.total_size += stat.size;
        match existing {
            Some(target) if target.is_dir => {
                if !self.dry_run {
                    remove_all(self.dst, dst_path).await?;
                }
                self.stats.added_files.push(dst_path.to_string());
            }
            Some(_) => self.stats.updated_files.push(dst_path.to_string()),
            None => self.stats.added_files.push(dst_path.to_string()),
        }

        if self.dry_run {
            return Ok(());
        }
        let data = self.src.read(src_path).await?;
        self.dst.write(dst_path, &data).await?;
        Ok(())
    }

    async fn export_dir(&mut self, src_path: &str, dst_path: &str) -> Result<()> {
        if !self.dry_run {
            match try_stat(self.dst, dst_path).await? {
                None => self.dst.mkdir(dst_path).await?,
                Some(target) if !target.is_dir => {
                    self.dst.delete(dst_path).await?;
                    self.dst.mkdir(dst_path).await?;
                }
                Some(_) => {}
            }
        }

        let mut children = self.src.list(src_path).await?;
        children.sort_by(|a, b| a.name.cmp(&b.name));
        for child in children {
            self.visit(
                &paths::join(src_path, &child.name),
                &paths::join(dst_path, &child.name),
            )
            .await?;
        }
        Ok(())
    }

    fn finish(self, from: &str, to: &str) -> ExportStats {
        info!(
            "Exported {} file(s) ({} bytes) from {} to {}: {} added, {} updated, {} skipped",
            self.stats.file_count,
            self.stats.total_size,
            from,
            to,
            self.stats.added_files.len(),
            self.stats.updated_files.len(),
            self.stats.skip_count
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, ArchiveOptions};
    use crate::fs::InMemoryFs;
    use crate::ops::readdir;
    use std::sync::Arc;

    async fn source_tree() -> InMemoryFs {
        let fs = InMemoryFs::new();
        fs.write("/project/a.txt", b"aaa").await.unwrap();
        fs.write("/project/sub/b.txt", b"bb").await.unwrap();
        fs.write("/project/.git/HEAD", b"ref").await.unwrap();
        fs
    }

    #[tokio::test]
    async fn test_filesystem_to_vault_into_subfolder() {
        let src = source_tree().await;
        let dst = Vault::from(Archive::create(ArchiveOptions::default()).unwrap());
        let options = ExportOptions {
            src_path: "/project".into(),
            ..Default::default()
        };

        let stats = export_filesystem_to_vault(&src, &dst, &options).await.unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_size, 5);
        assert_eq!(stats.skip_count, 1);
        assert_eq!(
            stats.added_files,
            vec!["/project/a.txt", "/project/sub/b.txt"]
        );
        assert_eq!(
            readdir(&dst, "/", true).await.unwrap(),
            vec!["project", "project/a.txt", "project/sub", "project/sub/b.txt"]
        );
    }

    #[tokio::test]
    async fn test_filesystem_to_vault_inplace_and_updates() {
        let src = source_tree().await;
        let dst = Vault::from(Archive::create(ArchiveOptions::default()).unwrap());
        dst.write("/a.txt", b"old").await.unwrap();
        let options = ExportOptions {
            src_path: "/project".into(),
            inplace_import: true,
            ..Default::default()
        };

        let stats = export_filesystem_to_vault(&src, &dst, &options).await.unwrap();
        assert_eq!(stats.updated_files, vec!["/a.txt"]);
        assert_eq!(stats.added_files, vec!["/sub/b.txt"]);
        assert_eq!(dst.read("/a.txt").await.unwrap(), b"aaa");
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let src = source_tree().await;
        let writer = Archive::create(ArchiveOptions::default()).unwrap();
        let replica = Vault::from(Archive::open_remote(writer.key(), ArchiveOptions::default()));
        let options = ExportOptions {
            src_path: "/project".into(),
            inplace_import: true,
            dry_run: true,
            ..Default::default()
        };

        let stats = export_filesystem_to_vault(&src, &replica, &options).await.unwrap();
        assert_eq!(stats.file_count, 2);
        assert!(!replica.exists("/a.txt").await.unwrap());

        let options = ExportOptions { dry_run: false, ..options };
        assert!(matches!(
            export_filesystem_to_vault(&src, &replica, &options).await,
            Err(VaultError::VaultNotWritable)
        ));
    }

    #[tokio::test]
    async fn test_missing_source_and_destination() {
        let src = source_tree().await;
        let dst = Vault::filesystem(InMemoryFs::new());

        let options = ExportOptions {
            src_path: "/nope".into(),
            ..Default::default()
        };
        assert!(matches!(
            export_filesystem_to_vault(&src, &dst, &options).await,
            Err(VaultError::SourceNotFound(_))
        ));

        let options = ExportOptions {
            src_path: "/project/a.txt".into(),
            dst_path: "/x/y".into(),
            ..Default::default()
        };
        assert!(matches!(
            export_filesystem_to_vault(&src, &dst, &options).await,
            Err(VaultError::ParentFolderDoesntExist(_))
        ));
    }

    #[tokio::test]
    async fn test_single_file_lands_inside_folder() {
        let src = source_tree().await;
        let dst = Vault::filesystem(InMemoryFs::new());
        dst.mkdir("/inbox").await.unwrap();
        let options = ExportOptions {
            src_path: "/project/a.txt".into(),
            dst_path: "/inbox".into(),
            ..Default::default()
        };

        let stats = export_filesystem_to_vault(&src, &dst, &options).await.unwrap();
        assert_eq!(stats.added_files, vec!["/inbox/a.txt"]);
    }

    #[tokio::test]
    async fn test_vault_to_filesystem_requires_empty_target() {
        let src = Vault::filesystem(source_tree().await);
        let dst = InMemoryFs::new();
        dst.write("/existing.txt", b"x").await.unwrap();

        assert!(matches!(
            export_vault_to_filesystem(&src, &dst, &ExportOptions::default()).await,
            Err(VaultError::DestDirectoryNotEmpty(_))
        ));

        let options = ExportOptions {
            overwrite_existing: true,
            ..Default::default()
        };
        let stats = export_vault_to_filesystem(&src, &dst, &options).await.unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(dst.read("/project/sub/b.txt").await.unwrap(), b"bb");
        assert!(!dst.exists("/project/.git").await.unwrap());
    }

    #[tokio::test]
    async fn test_vault_to_vault_skips_undownloaded() {
        let writer = Archive::create(ArchiveOptions::default()).unwrap();
        writer.write("/a.txt", b"aaa").await.unwrap();
        writer.write("/b.txt", b"bbb").await.unwrap();
        let replica = Archive::open_remote(writer.key(), ArchiveOptions::thin());
        Archive::replicate(&writer, &replica).unwrap();
        replica.read("/a.txt").await.unwrap();

        let src = Vault::from(Arc::clone(&replica));
        let dst = Vault::from(Archive::create(ArchiveOptions::default()).unwrap());
        let options = ExportOptions {
            skip_undownloaded_files: true,
            ..Default::default()
        };

        let stats = export_vault_to_vault(&src, &dst, &options).await.unwrap();
        assert_eq!(stats.added_files, vec!["/a.txt"]);
        assert_eq!(stats.skip_count, 1);
        assert!(!dst.exists("/b.txt").await.unwrap());
    }
}

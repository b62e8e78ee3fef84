use super::delete::remove_tree;
use super::lookup::{ensure_parent_folder, ensure_valid, ensure_writable, try_stat};
use crate::error::{Result, VaultError};
use crate::fs::FileSystem;
use crate::paths;
use crate::vault::Vault;
use tracing::debug;

/// Create or overwrite a file. Overwriting keeps the original ctime.
pub async fn write_file(vault: &Vault, path: &str, data: &[u8]) -> Result<()> {
    ensure_writable(vault)?;
    if path.ends_with('/') {
        return Err(VaultError::invalid_path(path, "files can not have a trailing slash"));
    }
    ensure_valid(path)?;

    let name = paths::normalize(path);
    if try_stat(vault, &name).await?.is_some_and(|st| st.is_dir) {
        return Err(VaultError::EntryAlreadyExists(name));
    }
    ensure_parent_folder(vault, &name).await?;

    vault.write(&name, data).await?;
    Ok(())
}

/// Create one folder. Its parent must already exist.
pub async fn mkdir(vault: &Vault, path: &str) -> Result<()> {
    ensure_writable(vault)?;
    ensure_valid(path)?;

    let name = paths::normalize(path);
    if name == "/" || try_stat(vault, &name).await?.is_some() {
        return Err(VaultError::EntryAlreadyExists(name));
    }
    ensure_parent_folder(vault, &name).await?;

    vault.mkdir(&name).await?;
    Ok(())
}

/// Copy a file or a whole folder within the vault.
///
/// Folders merge into an existing folder at the target. A file is never
/// copied onto a folder, nor a folder onto a file.
pub async fn copy(vault: &Vault, from: &str, to: &str) -> Result<()> {
    ensure_writable(vault)?;
    ensure_valid(to)?;

    let target = paths::normalize(to);
    ensure_parent_folder(vault, &target).await?;
    copy_tree(vault, &paths::normalize(from), &target).await
}

async fn copy_tree(vault: &Vault, from: &str, to: &str) -> Result<()> {
    let source = vault.stat(from).await?;
    let existing = try_stat(vault, to).await?;

    match existing {
        Some(target) if !source.is_dir && target.is_dir => {
            return Err(VaultError::EntryAlreadyExists(to.to_string()));
        }
        Some(target) if source.is_dir && !target.is_dir => {
            return Err(VaultError::EntryAlreadyExists(to.to_string()));
        }
        None if source.is_dir => vault.mkdir(to).await?,
        _ => {}
    }

    if !source.is_dir {
        let data = vault.read(from).await?;
        vault.write(to, &data).await?;
        return Ok(());
    }

    let mut children = vault.list(from).await?;
    children.sort_by(|a, b| a.name.cmp(&b.name));
    for child in children {
        Box::pin(copy_tree(
            vault,
            &paths::join(from, &child.name),
            &paths::join(to, &child.name),
        ))
        .await?;
    }
    Ok(())
}

/// Move an entry. The target must not exist yet.
pub async fn rename(vault: &Vault, from: &str, to: &str) -> Result<()> {
    let target = paths::normalize(to);
    if target == "/" || try_stat(vault, &target).await?.is_some() {
        return Err(VaultError::EntryAlreadyExists(target));
    }

    copy(vault, from, &target).await?;
    remove_tree(vault, &paths::normalize(from)).await?;

    debug!("Renamed {} to {}", paths::normalize(from), target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, ArchiveOptions};
    use crate::fs::InMemoryFs;
    use crate::ops::{read_file, readdir};
    use std::sync::Arc;

    fn memory_vault() -> Vault {
        Vault::filesystem(InMemoryFs::new())
    }

    #[tokio::test]
    async fn test_write_file_checks() {
        let vault = memory_vault();
        write_file(&vault, "/a.txt", b"one").await.unwrap();
        assert_eq!(read_file(&vault, "/a.txt").await.unwrap(), b"one");

        assert!(matches!(
            write_file(&vault, "/dir/", b"x").await,
            Err(VaultError::InvalidPath { .. })
        ));
        assert!(matches!(
            write_file(&vault, "/bad<name>.txt", b"x").await,
            Err(VaultError::InvalidPath { .. })
        ));
        assert!(matches!(
            write_file(&vault, "/missing/b.txt", b"x").await,
            Err(VaultError::ParentFolderDoesntExist(p)) if p == "/missing"
        ));

        mkdir(&vault, "/dir").await.unwrap();
        assert!(matches!(
            write_file(&vault, "/dir", b"x").await,
            Err(VaultError::EntryAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_write_file_keeps_ctime() {
        let archive = Archive::create(ArchiveOptions::default()).unwrap();
        let vault = Vault::from(Arc::clone(&archive));

        write_file(&vault, "/a.txt", b"one").await.unwrap();
        let before = vault.stat("/a.txt").await.unwrap();
        write_file(&vault, "/a.txt", b"two!").await.unwrap();
        let after = vault.stat("/a.txt").await.unwrap();

        assert_eq!(after.ctime_millis, before.ctime_millis);
        assert_eq!(after.size, 4);
    }

    #[tokio::test]
    async fn test_not_writable() {
        let writer = Archive::create(ArchiveOptions::default()).unwrap();
        let replica = Archive::open_remote(writer.key(), ArchiveOptions::default());
        let vault = Vault::from(replica);

        assert!(matches!(
            write_file(&vault, "/a.txt", b"x").await,
            Err(VaultError::VaultNotWritable)
        ));
        assert!(matches!(
            mkdir(&vault, "/dir").await,
            Err(VaultError::VaultNotWritable)
        ));
    }

    #[tokio::test]
    async fn test_mkdir_checks() {
        let vault = memory_vault();
        mkdir(&vault, "/dir").await.unwrap();

        assert!(matches!(mkdir(&vault, "/").await, Err(VaultError::EntryAlreadyExists(_))));
        assert!(matches!(mkdir(&vault, "/dir").await, Err(VaultError::EntryAlreadyExists(_))));
        assert!(matches!(
            mkdir(&vault, "/a/b").await,
            Err(VaultError::ParentFolderDoesntExist(_))
        ));
    }

    #[tokio::test]
    async fn test_copy_tree() {
        let vault = memory_vault();
        write_file(&vault, "/a.txt", b"a").await.unwrap();
        mkdir(&vault, "/src").await.unwrap();
        write_file(&vault, "/src/b.txt", b"b").await.unwrap();
        mkdir(&vault, "/src/sub").await.unwrap();
        write_file(&vault, "/src/sub/c.txt", b"c").await.unwrap();

        copy(&vault, "/src", "/dst").await.unwrap();
        assert_eq!(
            readdir(&vault, "/dst", true).await.unwrap(),
            vec!["b.txt", "sub", "sub/c.txt"]
        );
        assert_eq!(read_file(&vault, "/dst/sub/c.txt").await.unwrap(), b"c");

        assert!(matches!(
            copy(&vault, "/a.txt", "/dst").await,
            Err(VaultError::EntryAlreadyExists(_))
        ));
        assert!(matches!(
            copy(&vault, "/src", "/a.txt").await,
            Err(VaultError::EntryAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_rename() {
        let vault = memory_vault();
        mkdir(&vault, "/src").await.unwrap();
        write_file(&vault, "/src/b.txt", b"b").await.unwrap();
        write_file(&vault, "/taken.txt", b"t").await.unwrap();

        rename(&vault, "/src", "/moved").await.unwrap();
        assert!(!vault.exists("/src").await.unwrap());
        assert_eq!(read_file(&vault, "/moved/b.txt").await.unwrap(), b"b");

        assert!(matches!(
            rename(&vault, "/moved/b.txt", "/taken.txt").await,
            Err(VaultError::EntryAlreadyExists(_))
        ));
    }
}

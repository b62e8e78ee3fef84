use super::lookup::ensure_writable;
use crate::error::{Result, VaultError};
use crate::fs::FileSystem;
use crate::paths;
use crate::vault::Vault;

/// Delete a file.
pub async fn unlink(vault: &Vault, path: &str) -> Result<()> {
    ensure_writable(vault)?;
    let name = paths::normalize(path);
    if vault.stat(&name).await?.is_dir {
        return Err(VaultError::NotAFile(name));
    }
    vault.delete(&name).await?;
    Ok(())
}

/// Delete a folder. Without `recursive` the folder must be empty.
pub async fn rmdir(vault: &Vault, path: &str, recursive: bool) -> Result<()> {
    ensure_writable(vault)?;
    let name = paths::normalize(path);
    if !vault.stat(&name).await?.is_dir {
        return Err(VaultError::NotAFolder(name));
    }

    if recursive {
        return remove_tree(vault, &name).await;
    }
    if !vault.list(&name).await?.is_empty() {
        return Err(VaultError::DestDirectoryNotEmpty(name));
    }
    vault.delete(&name).await?;
    Ok(())
}

/// Delete an entry and everything beneath it, children first.
pub(super) async fn remove_tree(vault: &Vault, path: &str) -> Result<()> {
    let st = vault.stat(path).await?;
    if st.is_dir {
        for child in vault.list(path).await? {
            Box::pin(remove_tree(vault, &paths::join(path, &child.name))).await?;
        }
        // The root cannot be removed; emptying it is enough.
        if path == "/" {
            return Ok(());
        }
    }

    vault.delete(path).await?;
    Ok(())
}

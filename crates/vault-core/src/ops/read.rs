use crate::error::{Result, VaultError};
use crate::fs::FileSystem;
use crate::paths;
use crate::vault::Vault;

/// Read a whole file. Missing content blocks are fetched from peers.
pub async fn read_file(vault: &Vault, path: &str) -> Result<Vec<u8>> {
    let st = vault.stat(path).await?;
    if st.is_dir {
        return Err(VaultError::NotAFile(paths::normalize(path)));
    }
    Ok(vault.read(path).await?)
}

/// Names in a folder, sorted. With `recursive`, every descendant is listed
/// as a path relative to `path`, each folder before its contents.
pub async fn readdir(vault: &Vault, path: &str, recursive: bool) -> Result<Vec<String>> {
    let root = paths::normalize(path);
    let st = vault.stat(&root).await?;
    if !st.is_dir {
        return Err(VaultError::NotAFolder(root));
    }

    let mut names = Vec::new();
    collect(vault, &root, "", recursive, &mut names).await?;
    Ok(names)
}

async fn collect(
    vault: &Vault,
    dir: &str,
    prefix: &str,
    recursive: bool,
    out: &mut Vec<String>,
) -> Result<()> {
    let mut entries = vault.list(dir).await?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries {
        let relative = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", prefix, entry.name)
        };
        out.push(relative.clone());
        if recursive && entry.is_dir {
            let child = paths::join(dir, &entry.name);
            Box::pin(collect(vault, &child, &relative, recursive, out)).await?;
        }
    }
    Ok(())
}

/// Total byte size of a file, or of every file under a folder.
pub async fn read_size(vault: &Vault, path: &str) -> Result<u64> {
    let st = vault.stat(path).await?;
    if !st.is_dir {
        return Ok(st.size);
    }

    let mut size = 0;
    for entry in vault.list(path).await? {
        size += Box::pin(read_size(vault, &paths::join(path, &entry.name))).await?;
    }
    Ok(size)
}

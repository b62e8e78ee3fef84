use crate::entry::BlockRange;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::paths;
use crate::vault::Vault;
use tracing::debug;

/// Fetch a file's content from peers, or the content of every file under a
/// folder. Plain filesystems hold everything already.
pub async fn download(vault: &Vault, path: &str) -> Result<()> {
    let Some(archive) = vault.as_archive() else {
        return Ok(());
    };

    let name = paths::normalize(path);
    let st = vault.stat(&name).await?;
    if st.is_dir {
        for child in vault.list(&name).await? {
            Box::pin(download(vault, &paths::join(&name, &child.name))).await?;
        }
        return Ok(());
    }

    if st.blocks == 0 {
        return Ok(());
    }
    let range = BlockRange::new(st.offset, st.blocks);
    let present = archive.download(range)?;
    if present < range.len() {
        debug!(
            "Downloaded {} of {} blocks of {}; no peer has the rest",
            present,
            range.len(),
            name
        );
    }
    Ok(())
}

//! Local residency of content block ranges.

use crate::entry::BlockRange;
use crate::feed::Feed;
use crate::vault::Vault;

/// Whether every block of `range` is present in `content`.
///
/// A missing or unopened feed holds nothing. An empty range is always
/// resident. Only local presence is checked.
pub fn is_resident(content: Option<&dyn Feed>, range: BlockRange) -> bool {
    let Some(content) = content else {
        return false;
    };
    if !content.is_opened() {
        return false;
    }
    range.iter().all(|index| content.has(index))
}

/// `is_resident` against a vault's content feed. Plain filesystems have no
/// content feed.
pub fn vault_is_resident(vault: &Vault, range: BlockRange) -> bool {
    match vault {
        Vault::Archive(archive) => archive.is_resident(range),
        Vault::Filesystem(_) => false,
    }
}

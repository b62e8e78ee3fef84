//! File-tree operations over a `Vault`.
//!
//! These sit on top of the `FileSystem` implementation of either vault kind
//! and add the checks callers rely on: writability, path validity, existing
//! entries, and parent folders.

mod delete;
mod export;
mod lookup;
mod network;
mod read;
mod write;

pub use delete::{rmdir, unlink};
pub use export::{
    DEFAULT_IGNORE, ExportOptions, ExportStats, export_filesystem_to_vault,
    export_vault_to_filesystem, export_vault_to_vault,
};
pub use lookup::stat;
pub use network::download;
pub use read::{read_file, read_size, readdir};
pub use write::{copy, mkdir, rename, write_file};

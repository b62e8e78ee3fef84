//! vault-core: change detection and download tracking for versioned file trees.
//!
//! This crate provides:
//! - An in-process storage engine: sparse block feeds and archives built on them
//! - Change subscriptions (`watch`) for plain filesystems and archives
//! - Network activity subscriptions for archives
//! - Diff and merge between two vault subtrees
//! - File-tree operations and bulk export over a `Vault`

pub mod activity;
pub mod archive;
pub mod diff;
pub mod entry;
pub mod error;
pub mod events;
pub mod feed;
pub mod fs;
pub mod key;
pub mod locator;
pub mod ops;
pub mod paths;
pub mod pattern;
pub mod residency;
pub mod vault;
pub mod watch;

pub use activity::{ActivityEvent, ActivityStream, subscribe_activity};
pub use archive::{Archive, ArchiveError, ArchiveOptions};
pub use diff::{ChangeKind, DiffError, DiffOp, DiffOptions, NodeType, diff, merge};
pub use entry::{BlockRange, Entry, EntryKind};
pub use error::VaultError;
pub use events::{EventBus, EventStream, Listener, Subscription};
pub use feed::{Feed, FeedEvent, FeedKind, MemoryFeed};
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use key::VaultKey;
pub use locator::{LocatedEntry, find_entry_for_block};
pub use residency::{is_resident, vault_is_resident};
pub use vault::Vault;
pub use watch::{ChangeEvent, ChangeStream, WatchError, watch};

//! Metadata records and the entries they decode to.
//!
//! Block 0 of every metadata feed is a header naming the content feed. Every
//! later block is a `Put` (file or directory stat) or a `Del` tombstone.
//! Later records for the same name supersede earlier ones; both stay in the
//! log.

use crate::key::VaultKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, RecordError>;

/// Half-open interval `[start, end)` of block indices in one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// Range of `blocks` blocks starting at `offset`.
    pub fn new(offset: u64, blocks: u64) -> Self {
        Self {
            start: offset,
            end: offset.saturating_add(blocks),
        }
    }

    pub fn contains(&self, index: u64) -> bool {
        self.start <= index && index < self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn iter(&self) -> std::ops::Range<u64> {
        self.start..self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

/// On-log encoding of one metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Header {
        content_key: VaultKey,
    },
    Put {
        name: String,
        kind: NodeKind,
        size: u64,
        mtime_millis: u64,
        ctime_millis: u64,
        offset: u64,
        blocks: u64,
    },
    Del {
        name: String,
    },
}

impl Record {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| RecordError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| RecordError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Deleted,
}

/// A decoded file-tree record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Absolute vault path
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_millis: u64,
    pub ctime_millis: u64,
    /// Slice of the content feed holding a file's bytes. `None` for
    /// directories and tombstones.
    pub content: Option<BlockRange>,
}

impl Entry {
    pub fn is_deleted(&self) -> bool {
        self.kind == EntryKind::Deleted
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

impl Record {
    /// The entry this record describes, or `None` for the header.
    pub fn into_entry(self) -> Option<Entry> {
        match self {
            Record::Header { .. } => None,
            Record::Put {
                name,
                kind,
                size,
                mtime_millis,
                ctime_millis,
                offset,
                blocks,
            } => Some(Entry {
                name,
                kind: match kind {
                    NodeKind::File => EntryKind::File,
                    NodeKind::Directory => EntryKind::Directory,
                },
                size,
                mtime_millis,
                ctime_millis,
                content: (kind == NodeKind::File).then(|| BlockRange::new(offset, blocks)),
            }),
            Record::Del { name } => Some(Entry {
                name,
                kind: EntryKind::Deleted,
                size: 0,
                mtime_millis: 0,
                ctime_millis: 0,
                content: None,
            }),
        }
    }
}

/// Decode one metadata block. The header decodes to `None`.
pub fn decode_entry(bytes: &[u8]) -> Result<Option<Entry>> {
    Ok(Record::decode(bytes)?.into_entry())
}

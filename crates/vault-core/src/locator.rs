//! Maps content block indices back to the metadata record that owns them.

use crate::entry::{BlockRange, Entry, decode_entry};
use crate::feed::Feed;
use tracing::debug;

/// A record that claims a content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedEntry {
    /// Index of the record in the metadata feed
    pub record: u64,
    pub entry: Entry,
    pub range: BlockRange,
}

/// Decode the record at `index`, if it is present locally and describes an
/// entry. Decode failures are logged and treated as nothing.
pub fn decode_at(metadata: &dyn Feed, index: u64) -> Option<Entry> {
    let bytes = metadata.get(index)?;
    match decode_entry(&bytes) {
        Ok(entry) => entry,
        Err(e) => {
            debug!("Ignoring metadata block {}: {}", index, e);
            None
        }
    }
}

/// Find the entry whose content range contains `block`.
///
/// Scans locally present records from newest to oldest. Directories and
/// tombstones never match. Returns `None` for a block nothing claims.
pub fn find_entry_for_block(metadata: &dyn Feed, block: u64) -> Option<LocatedEntry> {
    (0..metadata.len()).rev().find_map(|record| {
        let entry = decode_at(metadata, record)?;
        let range = entry.content?;
        range.contains(block).then_some(LocatedEntry {
            record,
            entry,
            range,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{NodeKind, Record};
    use crate::feed::MemoryFeed;
    use crate::key::VaultKey;

    fn put(name: &str, offset: u64, blocks: u64) -> Vec<u8> {
        Record::Put {
            name: name.into(),
            kind: NodeKind::File,
            size: blocks,
            mtime_millis: 0,
            ctime_millis: 0,
            offset,
            blocks,
        }
        .encode()
        .unwrap()
    }

    fn metadata() -> std::sync::Arc<MemoryFeed> {
        let feed = MemoryFeed::writer();
        let header = Record::Header {
            content_key: VaultKey::generate(),
        };
        feed.append(header.encode().unwrap()).unwrap();
        feed.append(put("/a.txt", 0, 2)).unwrap();
        feed.append(Record::Del { name: "/gone.txt".into() }.encode().unwrap())
            .unwrap();
        feed.append(put("/b.txt", 2, 1)).unwrap();
        feed.append(put("/empty.txt", 3, 0)).unwrap();
        feed
    }

    #[test]
    fn test_finds_owner() {
        let feed = metadata();

        let found = find_entry_for_block(&*feed, 1).unwrap();
        assert_eq!(found.record, 1);
        assert_eq!(found.entry.name, "/a.txt");
        assert_eq!(found.range, BlockRange::new(0, 2));

        let found = find_entry_for_block(&*feed, 2).unwrap();
        assert_eq!(found.entry.name, "/b.txt");
    }

    #[test]
    fn test_orphan_block_is_not_found() {
        let feed = metadata();
        assert_eq!(find_entry_for_block(&*feed, 3), None);
        assert_eq!(find_entry_for_block(&*feed, 100), None);
    }

    #[test]
    fn test_skips_garbage_records() {
        let feed = metadata();
        feed.append(vec![0xff, 0xff]).unwrap();
        assert_eq!(find_entry_for_block(&*feed, 0).unwrap().entry.name, "/a.txt");
        assert_eq!(decode_at(&*feed, 5), None);
    }

    #[test]
    fn test_missing_records_are_skipped() {
        let writer = metadata();
        let replica = MemoryFeed::replica(writer.key(), true);
        MemoryFeed::connect(&writer, &replica).unwrap();

        assert_eq!(find_entry_for_block(&*replica, 0), None);
        replica.download(BlockRange::new(1, 1));
        assert_eq!(find_entry_for_block(&*replica, 0).unwrap().record, 1);
    }
}

//! Append-only block logs.
//!
//! A vault stores its tree in two feeds: a metadata feed of encoded records
//! and a content feed of file chunks. Only the writer appends. Replicas learn
//! the writer's length from connected peers and fetch blocks either eagerly
//! or on demand (`sparse`), so any block of a replica may be missing locally.
//!
//! Every state change is published as a `FeedEvent` to listeners registered
//! with `subscribe`. Events are emitted after the feed's own lock is
//! released, so listeners may call back into the feed.

use crate::entry::BlockRange;
use crate::events::{EventBus, Listener, Subscription};
use crate::key::VaultKey;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed {0} is not writable")]
    NotWritable(String),

    #[error("Feed {0} is closed")]
    Closed(String),

    #[error("Cannot connect feeds with different keys ({0} vs {1})")]
    KeyMismatch(String, String),
}

pub type Result<T> = std::result::Result<T, FeedError>;

/// Which of a vault's two feeds an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Metadata,
    Content,
}

/// Low-level feed activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The local writer appended a block.
    Append { index: u64 },
    /// A block arrived from a peer.
    Download { index: u64, bytes: usize },
    /// A block was served to a peer.
    Upload { index: u64, bytes: usize },
    /// Every known block is now present locally.
    Sync,
    PeerAdd,
    PeerRemove,
}

/// Read-side contract of a block log.
pub trait Feed: Send + Sync {
    fn key(&self) -> VaultKey;

    /// Number of blocks known to exist (present locally or not).
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_opened(&self) -> bool;

    /// Whether block `index` is present locally. Never touches the network.
    fn has(&self, index: u64) -> bool;

    /// Local bytes of block `index`, if present.
    fn get(&self, index: u64) -> Option<Vec<u8>>;

    /// How many blocks of `range` are present locally.
    fn downloaded(&self, range: BlockRange) -> u64 {
        range.iter().filter(|&index| self.has(index)).count() as u64
    }

    fn peer_count(&self) -> usize;

    fn subscribe(&self, listener: Listener<FeedEvent>) -> Subscription;
}

#[derive(Default)]
struct FeedState {
    blocks: Vec<Option<Vec<u8>>>,
    peers: Vec<Weak<MemoryFeed>>,
}

impl FeedState {
    fn live_peers(&self) -> Vec<Arc<MemoryFeed>> {
        self.peers.iter().filter_map(Weak::upgrade).collect()
    }

    fn is_complete(&self) -> bool {
        self.blocks.iter().all(Option::is_some)
    }
}

/// In-process feed. Replicas connect directly to each other's handles.
pub struct MemoryFeed {
    key: VaultKey,
    writable: bool,
    sparse: bool,
    opened: AtomicBool,
    state: Mutex<FeedState>,
    events: Arc<EventBus<FeedEvent>>,
}

impl MemoryFeed {
    /// A new writable feed with a fresh key.
    pub fn writer() -> Arc<Self> {
        Self::build(VaultKey::generate(), true, false)
    }

    /// A read-only replica of `key`. A sparse replica only fetches blocks
    /// when asked to via `download`.
    pub fn replica(key: VaultKey, sparse: bool) -> Arc<Self> {
        Self::build(key, false, sparse)
    }

    fn build(key: VaultKey, writable: bool, sparse: bool) -> Arc<Self> {
        Arc::new(Self {
            key,
            writable,
            sparse,
            opened: AtomicBool::new(true),
            state: Mutex::new(FeedState::default()),
            events: Arc::new(EventBus::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Append a block and announce the new length to peers.
    pub fn append(&self, data: Vec<u8>) -> Result<u64> {
        if !self.writable {
            return Err(FeedError::NotWritable(self.key.short()));
        }
        if !self.is_opened() {
            return Err(FeedError::Closed(self.key.short()));
        }

        let (index, peers) = {
            let mut state = self.lock();
            state.blocks.push(Some(data));
            (state.blocks.len() as u64 - 1, state.live_peers())
        };

        trace!("Feed {} appended block {}", self.key.short(), index);
        self.events.emit(FeedEvent::Append { index });

        for peer in peers {
            peer.announce(index + 1);
        }
        Ok(index)
    }

    /// Fetch every missing block of `range` that a peer can serve.
    /// Returns how many blocks of the range are present afterwards.
    pub fn download(&self, range: BlockRange) -> u64 {
        let end = range.end.min(self.len());
        (range.start..end).filter(|&index| self.fetch(index)).count() as u64
    }

    /// Connect two replicas of the same feed. Connecting an already
    /// connected pair does nothing.
    pub fn connect(a: &Arc<Self>, b: &Arc<Self>) -> Result<()> {
        if a.key != b.key {
            return Err(FeedError::KeyMismatch(a.key.short(), b.key.short()));
        }
        if Arc::ptr_eq(a, b) || a.is_connected_to(b) {
            return Ok(());
        }

        a.lock().peers.push(Arc::downgrade(b));
        b.lock().peers.push(Arc::downgrade(a));
        debug!("Feed {} connected to a peer", a.key.short());

        a.events.emit(FeedEvent::PeerAdd);
        b.events.emit(FeedEvent::PeerAdd);

        a.announce(b.len());
        b.announce(a.len());
        Ok(())
    }

    /// Drop the connection between two replicas, if any.
    pub fn disconnect(a: &Arc<Self>, b: &Arc<Self>) {
        if !a.is_connected_to(b) {
            return;
        }

        a.lock().peers.retain(|p| !std::ptr::eq(p.as_ptr(), Arc::as_ptr(b)));
        b.lock().peers.retain(|p| !std::ptr::eq(p.as_ptr(), Arc::as_ptr(a)));
        debug!("Feed {} disconnected from a peer", a.key.short());

        a.events.emit(FeedEvent::PeerRemove);
        b.events.emit(FeedEvent::PeerRemove);
    }

    /// Stop serving and accepting blocks. Local blocks stay readable.
    pub fn close(&self) {
        if !self.opened.swap(false, Ordering::SeqCst) {
            return;
        }
        let peers = std::mem::take(&mut self.lock().peers);
        for peer in peers.iter().filter_map(Weak::upgrade) {
            peer.lock()
                .peers
                .retain(|p| !std::ptr::eq(p.as_ptr(), self as *const Self));
            peer.events.emit(FeedEvent::PeerRemove);
        }
        debug!("Feed {} closed", self.key.short());
    }

    fn is_connected_to(&self, other: &Arc<Self>) -> bool {
        self.lock()
            .peers
            .iter()
            .any(|p| std::ptr::eq(p.as_ptr(), Arc::as_ptr(other)))
    }

    /// A peer reports that it knows of `len` blocks.
    fn announce(&self, len: u64) {
        let grew = {
            let mut state = self.lock();
            let known = state.blocks.len() as u64;
            if len > known {
                state.blocks.resize(len as usize, None);
                true
            } else {
                false
            }
        };

        if !self.sparse && (grew || !self.lock().is_complete()) {
            self.download(BlockRange { start: 0, end: len });
        }
    }

    fn fetch(&self, index: u64) -> bool {
        if self.has(index) {
            return true;
        }
        if !self.is_opened() {
            return false;
        }

        let peers = self.lock().live_peers();
        for peer in peers {
            if let Some(bytes) = peer.serve(index) {
                self.store(index, bytes);
                return true;
            }
        }
        false
    }

    fn serve(&self, index: u64) -> Option<Vec<u8>> {
        if !self.is_opened() {
            return None;
        }
        let bytes = self.get(index)?;
        self.events.emit(FeedEvent::Upload {
            index,
            bytes: bytes.len(),
        });
        Some(bytes)
    }

    fn store(&self, index: u64, bytes: Vec<u8>) {
        let size = bytes.len();
        let complete = {
            let mut state = self.lock();
            let Some(slot) = state.blocks.get_mut(index as usize) else {
                return;
            };
            if slot.is_some() {
                return;
            }
            *slot = Some(bytes);
            state.is_complete()
        };

        trace!("Feed {} downloaded block {}", self.key.short(), index);
        self.events.emit(FeedEvent::Download { index, bytes: size });
        if complete {
            self.events.emit(FeedEvent::Sync);
        }
    }
}

impl Feed for MemoryFeed {
    fn key(&self) -> VaultKey {
        self.key
    }

    fn len(&self) -> u64 {
        self.lock().blocks.len() as u64
    }

    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn has(&self, index: u64) -> bool {
        matches!(self.lock().blocks.get(index as usize), Some(Some(_)))
    }

    fn get(&self, index: u64) -> Option<Vec<u8>> {
        self.lock().blocks.get(index as usize).cloned().flatten()
    }

    fn peer_count(&self) -> usize {
        self.lock().live_peers().len()
    }

    fn subscribe(&self, listener: Listener<FeedEvent>) -> Subscription {
        self.events.subscribe_listener(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(feed: &MemoryFeed) -> (Arc<Mutex<Vec<FeedEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = feed.subscribe(Arc::new(move |event: FeedEvent| seen_clone.lock().unwrap().push(event)));
        (seen, sub)
    }

    #[test]
    fn test_append_requires_writer() {
        let writer = MemoryFeed::writer();
        assert_eq!(writer.append(b"a".to_vec()).unwrap(), 0);
        assert_eq!(writer.append(b"b".to_vec()).unwrap(), 1);
        assert_eq!(writer.len(), 2);

        let replica = MemoryFeed::replica(writer.key(), false);
        assert!(matches!(replica.append(vec![]), Err(FeedError::NotWritable(_))));
    }

    #[test]
    fn test_eager_replica_fetches_everything() {
        let writer = MemoryFeed::writer();
        writer.append(b"one".to_vec()).unwrap();

        let replica = MemoryFeed::replica(writer.key(), false);
        let (writer_events, _w) = record(&writer);
        let (replica_events, _r) = record(&replica);

        MemoryFeed::connect(&writer, &replica).unwrap();
        writer.append(b"four".to_vec()).unwrap();

        assert_eq!(replica.get(0).unwrap(), b"one");
        assert_eq!(replica.get(1).unwrap(), b"four");
        assert_eq!(replica.peer_count(), 1);

        assert_eq!(
            *replica_events.lock().unwrap(),
            vec![
                FeedEvent::PeerAdd,
                FeedEvent::Download { index: 0, bytes: 3 },
                FeedEvent::Sync,
                FeedEvent::Download { index: 1, bytes: 4 },
                FeedEvent::Sync,
            ]
        );
        assert_eq!(
            *writer_events.lock().unwrap(),
            vec![
                FeedEvent::PeerAdd,
                FeedEvent::Upload { index: 0, bytes: 3 },
                FeedEvent::Append { index: 1 },
                FeedEvent::Upload { index: 1, bytes: 4 },
            ]
        );
    }

    #[test]
    fn test_sparse_replica_fetches_on_demand() {
        let writer = MemoryFeed::writer();
        for block in ["a", "b", "c"] {
            writer.append(block.as_bytes().to_vec()).unwrap();
        }

        let replica = MemoryFeed::replica(writer.key(), true);
        MemoryFeed::connect(&writer, &replica).unwrap();

        assert_eq!(replica.len(), 3);
        assert!(!replica.has(1));

        assert_eq!(replica.download(BlockRange { start: 1, end: 2 }), 1);
        assert!(replica.has(1));
        assert_eq!(replica.downloaded(BlockRange { start: 0, end: 3 }), 1);
    }

    #[test]
    fn test_connect_is_idempotent_and_checks_keys() {
        let writer = MemoryFeed::writer();
        let replica = MemoryFeed::replica(writer.key(), false);
        let (events, _sub) = record(&replica);

        MemoryFeed::connect(&writer, &replica).unwrap();
        MemoryFeed::connect(&replica, &writer).unwrap();
        assert_eq!(*events.lock().unwrap(), vec![FeedEvent::PeerAdd]);

        let stranger = MemoryFeed::writer();
        assert!(matches!(
            MemoryFeed::connect(&writer, &stranger),
            Err(FeedError::KeyMismatch(_, _))
        ));
    }

    #[test]
    fn test_disconnect_and_close() {
        let writer = MemoryFeed::writer();
        let replica = MemoryFeed::replica(writer.key(), true);
        writer.append(b"a".to_vec()).unwrap();
        MemoryFeed::connect(&writer, &replica).unwrap();

        MemoryFeed::disconnect(&writer, &replica);
        assert_eq!(writer.peer_count(), 0);
        assert_eq!(replica.download(BlockRange { start: 0, end: 1 }), 0);

        MemoryFeed::connect(&writer, &replica).unwrap();
        writer.close();
        assert!(!writer.is_opened());
        assert_eq!(replica.peer_count(), 0);
        assert!(matches!(writer.append(vec![]), Err(FeedError::Closed(_))));
    }
}

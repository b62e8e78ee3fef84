//! Change notification for vault paths.
//!
//! `watch` picks one of three strategies from the vault's kind:
//!
//! - Plain filesystem: forward the backend's raw change notifications.
//! - Writable archive: every metadata append is a finished write, so each
//!   decoded record is reported as `Changed` straight away.
//! - Replica: a downloaded metadata record is `Invalidated` at once and
//!   becomes `Changed` when its content is fully resident. Content may land
//!   before, after, or interleaved with the record, so both feeds are
//!   watched and every record is reported `Changed` exactly once.
//!
//! Replica events are funnelled through one queue and handled by a task that
//! owns all per-subscription state.

use crate::archive::Archive;
use crate::events::{EventSink, EventStream, channel};
use crate::feed::{Feed, FeedEvent, MemoryFeed};
use crate::fs::{FileSystem, FsError};
use crate::locator::{decode_at, find_entry_for_block};
use crate::pattern::PathMatcher;
use crate::paths;
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Invalid watch pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    #[error("Cannot watch filesystem: {0}")]
    Fs(#[from] FsError),

    #[error("Watching a replica requires a Tokio runtime")]
    NoRuntime,

    #[error("Only archives report network activity")]
    NotAnArchive,
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// A change to one vault path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeEvent {
    /// The path's metadata changed; its content may not be local yet.
    Invalidated { path: String },
    /// The path's content is fully local, or the path was removed.
    Changed { path: String },
}

impl ChangeEvent {
    pub fn path(&self) -> &str {
        match self {
            ChangeEvent::Invalidated { path } | ChangeEvent::Changed { path } => path,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, ChangeEvent::Changed { .. })
    }
}

pub type ChangeStream = EventStream<ChangeEvent>;

/// Subscribe to changes under `vault`, limited to paths matching any of
/// `patterns` (all paths when empty).
///
/// Replica subscriptions spawn a task and must be opened inside a Tokio
/// runtime.
pub fn watch<S: AsRef<str>>(vault: &Vault, patterns: &[S]) -> Result<ChangeStream> {
    let matcher = PathMatcher::new(patterns)?;
    match vault {
        Vault::Filesystem(fs) => watch_filesystem(&**fs, matcher),
        Vault::Archive(archive) if archive.is_writable() => Ok(watch_local(archive, matcher)),
        Vault::Archive(archive) => watch_remote(archive, matcher),
    }
}

fn watch_filesystem(fs: &dyn FileSystem, matcher: PathMatcher) -> Result<ChangeStream> {
    let (sink, stream) = channel();
    let base = fs
        .base_path()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tx = sink.clone();
    let subscription = fs.watch(Arc::new(move |raw: String| {
        let path = paths::fix_reported_path(&paths::tonix(&raw), &base);
        if matcher.is_match(&path) {
            tx.send(ChangeEvent::Changed { path });
        }
    }))?;
    sink.guard().hold(subscription);

    debug!("Watching filesystem at {:?}", fs.base_path());
    Ok(stream)
}

fn watch_local(archive: &Arc<Archive>, matcher: PathMatcher) -> ChangeStream {
    let (sink, stream) = channel();
    let metadata = Arc::downgrade(archive.metadata_feed());

    let tx = sink.clone();
    let subscription = archive.metadata_feed().subscribe(Arc::new(move |event: FeedEvent| {
        let FeedEvent::Append { index } = event else {
            return;
        };
        let Some(metadata) = metadata.upgrade() else {
            return;
        };
        let Some(entry) = decode_at(&*metadata, index) else {
            return;
        };
        if matcher.is_match(&entry.name) {
            tx.send(ChangeEvent::Changed { path: entry.name });
        }
    }));
    sink.guard().hold(subscription);

    debug!("Watching local archive {}", archive.key().short());
    stream
}

/// A download observed on one of a replica's feeds.
#[derive(Debug, Clone, Copy)]
enum Tick {
    Metadata(u64),
    Content(u64),
}

fn watch_remote(archive: &Arc<Archive>, matcher: PathMatcher) -> Result<ChangeStream> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
    let (sink, stream) = channel();
    let (ticks, tick_rx) = mpsc::unbounded_channel();
    let guard = Arc::clone(sink.guard());

    let metadata = archive.metadata_feed();
    let tx = ticks.clone();
    guard.hold(metadata.subscribe(Arc::new(move |event: FeedEvent| {
        if let FeedEvent::Download { index, .. } = event {
            let _ = tx.send(Tick::Metadata(index));
        }
    })));

    // Snapshot after listening, so no record falls between the two. Records
    // present here never get a metadata tick; one that arrived in between
    // gets both, and `changed` keeps it to a single `Changed`.
    let baseline = metadata.len();
    let missing_at_start: HashSet<u64> = (0..baseline).filter(|&i| !metadata.has(i)).collect();

    archive.attach_content(&guard, move |content| {
        let tx = ticks.clone();
        content.subscribe(Arc::new(move |event: FeedEvent| {
            if let FeedEvent::Download { index, .. } = event {
                let _ = tx.send(Tick::Content(index));
            }
        }))
    });

    let mut state = RemoteWatch {
        archive: Arc::clone(archive),
        matcher,
        sink,
        baseline,
        missing_at_start,
        seen: HashSet::new(),
        changed: HashSet::new(),
        deferred: Vec::new(),
    };
    guard.set_task(runtime.spawn(async move { state.run(tick_rx).await }));

    debug!("Watching replica {}", archive.key().short());
    Ok(stream)
}

struct RemoteWatch {
    archive: Arc<Archive>,
    matcher: PathMatcher,
    sink: EventSink<ChangeEvent>,
    /// Metadata length when the subscription opened
    baseline: u64,
    missing_at_start: HashSet<u64>,
    /// Records whose metadata tick has been handled
    seen: HashSet<u64>,
    /// Records already reported as changed
    changed: HashSet<u64>,
    /// `Changed` events held back until the current tick settles
    deferred: Vec<ChangeEvent>,
}

impl RemoteWatch {
    async fn run(&mut self, mut ticks: mpsc::UnboundedReceiver<Tick>) {
        while let Some(tick) = ticks.recv().await {
            match tick {
                Tick::Metadata(index) => self.on_metadata(index),
                Tick::Content(block) => self.on_content(block),
            }

            if !self.deferred.is_empty() {
                tokio::task::yield_now().await;
                for event in self.deferred.drain(..) {
                    self.sink.send(event);
                }
            }
        }
    }

    fn on_metadata(&mut self, index: u64) {
        if !self.changed.contains(&index) {
            self.seen.insert(index);
        }
        let metadata: &MemoryFeed = self.archive.metadata_feed();
        let Some(entry) = decode_at(metadata, index) else {
            return;
        };
        if !self.matcher.is_match(&entry.name) {
            return;
        }

        self.sink.send(ChangeEvent::Invalidated {
            path: entry.name.clone(),
        });

        let ready = match entry.content {
            None => true,
            Some(range) => self.archive.is_resident(range),
        };
        if ready && self.mark_changed(index) {
            self.sink.send(ChangeEvent::Changed { path: entry.name });
        }
    }

    fn on_content(&mut self, block: u64) {
        let metadata: &MemoryFeed = self.archive.metadata_feed();
        let Some(found) = find_entry_for_block(metadata, block) else {
            trace!("No entry claims content block {}", block);
            return;
        };

        // A record whose metadata tick is still queued checks residency itself.
        if !self.is_known(found.record) || self.changed.contains(&found.record) {
            return;
        }
        if !self.matcher.is_match(&found.entry.name) || !self.archive.is_resident(found.range) {
            return;
        }

        self.mark_changed(found.record);
        self.deferred.push(ChangeEvent::Changed {
            path: found.entry.name,
        });
    }

    /// Record `record` as reported. `seen` is only consulted for records not
    /// yet in `changed`, so the entry moves over.
    fn mark_changed(&mut self, record: u64) -> bool {
        self.seen.remove(&record);
        self.changed.insert(record)
    }

    fn is_known(&self, record: u64) -> bool {
        self.seen.contains(&record)
            || (record < self.baseline && !self.missing_at_start.contains(&record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveOptions;
    use crate::fs::InMemoryFs;

    #[tokio::test]
    async fn test_filesystem_strategy() {
        let fs = Arc::new(InMemoryFs::new());
        let vault = Vault::Filesystem(fs.clone());
        let mut stream = watch(&vault, &["/a.txt"]).unwrap();

        fs.write("/b.txt", b"one").await.unwrap();
        fs.write("/a.txt", b"one").await.unwrap();

        assert_eq!(
            stream.recv().await,
            Some(ChangeEvent::Changed {
                path: "/a.txt".into()
            })
        );
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn test_local_strategy_reports_each_write() {
        let archive = Archive::create(ArchiveOptions::default()).unwrap();
        let vault = Vault::from(Arc::clone(&archive));
        let mut stream = watch::<&str>(&vault, &[]).unwrap();

        archive.write("/a.txt", b"one").await.unwrap();
        archive.write("/a.txt", b"two").await.unwrap();

        assert_eq!(stream.try_recv().map(|e| e.path().to_string()), Some("/a.txt".into()));
        assert_eq!(stream.try_recv().map(|e| e.path().to_string()), Some("/a.txt".into()));
        assert_eq!(stream.try_recv(), None);
    }

    fn remote_state(archive: &Arc<Archive>) -> (RemoteWatch, ChangeStream) {
        let (sink, stream) = channel();
        let metadata = archive.metadata_feed();
        let state = RemoteWatch {
            archive: Arc::clone(archive),
            matcher: PathMatcher::default(),
            sink,
            baseline: metadata.len(),
            missing_at_start: HashSet::new(),
            seen: HashSet::new(),
            changed: HashSet::new(),
            deferred: Vec::new(),
        };
        (state, stream)
    }

    #[tokio::test]
    async fn test_record_in_snapshot_and_ticked_changes_once() {
        let src = Archive::create(ArchiveOptions::default()).unwrap();
        src.write("/a.txt", b"one").await.unwrap();
        let dst = Archive::open_remote(src.key(), ArchiveOptions::default());
        Archive::replicate(&src, &dst).unwrap();

        // Record 1 is inside the baseline and also gets both ticks.
        let (mut state, mut stream) = remote_state(&dst);
        state.on_content(0);
        state.on_metadata(1);
        state.on_content(0);
        for event in state.deferred.drain(..) {
            state.sink.send(event);
        }

        let changed = |path: &str| ChangeEvent::Changed { path: path.into() };
        let invalidated = ChangeEvent::Invalidated {
            path: "/a.txt".into(),
        };
        assert_eq!(stream.try_recv(), Some(invalidated));
        assert_eq!(stream.try_recv(), Some(changed("/a.txt")));
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn test_changed_records_leave_seen() {
        let src = Archive::create(ArchiveOptions::default()).unwrap();
        src.write("/a.txt", b"one").await.unwrap();
        src.write("/b.txt", b"two").await.unwrap();
        let dst = Archive::open_remote(src.key(), ArchiveOptions::thin());
        Archive::replicate(&src, &dst).unwrap();

        let (mut state, _stream) = remote_state(&dst);
        state.baseline = 0;
        state.on_metadata(0);
        state.on_metadata(1);
        state.on_metadata(2);
        assert_eq!(state.seen, HashSet::from([0, 1, 2]));

        let range = dst.lookup("/b.txt").unwrap().content.unwrap();
        dst.download(range).unwrap();
        state.on_content(range.start);
        assert_eq!(state.seen, HashSet::from([0, 1]));
        assert!(state.changed.contains(&2));

        // A repeated metadata tick does not bring it back.
        state.on_metadata(2);
        assert_eq!(state.seen, HashSet::from([0, 1]));
    }

    #[test]
    fn test_remote_strategy_needs_runtime() {
        let replica = Archive::open_remote(crate::VaultKey::generate(), ArchiveOptions::default());
        let result = watch::<&str>(&Vault::from(replica), &[]);
        assert!(matches!(result, Err(WatchError::NoRuntime)));
    }

    #[test]
    fn test_invalid_pattern() {
        let vault = Vault::filesystem(InMemoryFs::new());
        assert!(matches!(
            watch(&vault, &["/a[.txt"]),
            Err(WatchError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_change_event_json() {
        let event = ChangeEvent::Invalidated {
            path: "/a.txt".into(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"kind":"invalidated","path":"/a.txt"}"#
        );
    }
}

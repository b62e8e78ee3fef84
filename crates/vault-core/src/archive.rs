//! Archive: a versioned file tree stored in a metadata feed and a content feed.
//!
//! The writer appends file chunks to the content feed and then a record
//! describing the file to the metadata feed. Replicas connect to the writer
//! (or to other replicas) with `Archive::replicate`. A replica only learns
//! its content feed's key from the metadata header, so its content feed opens
//! some time after the archive itself; `on_content_ready` reports that.

use crate::entry::{BlockRange, Entry, NodeKind, Record, RecordError};
use crate::events::{EventBus, Listener, StreamGuard, Subscription};
use crate::feed::{Feed, FeedError, FeedEvent, MemoryFeed};
use crate::fs::{FileEntry, FileStat, FileSystem, FsError, current_time_ms};
use crate::key::VaultKey;
use crate::paths;
use crate::residency;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive {0} is not writable")]
    NotWritable(String),

    #[error("Cannot replicate archives with different keys ({0} vs {1})")]
    KeyMismatch(String, String),

    #[error("Content feed of archive {0} is not open yet")]
    ContentNotReady(String),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<ArchiveError> for FsError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::NotWritable(key) => FsError::ReadOnly(key),
            ArchiveError::ContentNotReady(key) => FsError::Unavailable(key),
            other => FsError::Io(other.to_string()),
        }
    }
}

/// Archive tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Bytes per content block
    pub chunk_size: usize,
    /// Fetch content only when asked to (replicas only)
    pub thin: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            thin: false,
        }
    }
}

impl ArchiveOptions {
    pub fn thin() -> Self {
        Self {
            thin: true,
            ..Self::default()
        }
    }
}

pub struct Archive {
    options: ArchiveOptions,
    metadata: Arc<MemoryFeed>,
    content: RwLock<Option<Arc<MemoryFeed>>>,
    content_ready: Arc<EventBus<()>>,
    peers: Mutex<Vec<Weak<Archive>>>,
    /// Latest record per path, tombstones included. Value is (record index, entry).
    index: RwLock<BTreeMap<String, (u64, Entry)>>,
    /// Serializes appends so a file's blocks stay contiguous.
    writer: Mutex<()>,
    metadata_listener: Mutex<Option<Subscription>>,
}

impl Archive {
    /// Create a new writable archive.
    pub fn create(options: ArchiveOptions) -> Result<Arc<Self>> {
        let content = MemoryFeed::writer();
        let archive = Self::build(MemoryFeed::writer(), Some(Arc::clone(&content)), options);

        let header = Record::Header {
            content_key: content.key(),
        };
        archive.metadata.append(header.encode()?)?;

        info!("Created archive {}", archive.key().short());
        Ok(archive)
    }

    /// Open a read-only replica of the archive identified by `key`.
    /// It stays empty until replicated with a peer.
    pub fn open_remote(key: VaultKey, options: ArchiveOptions) -> Arc<Self> {
        let archive = Self::build(MemoryFeed::replica(key, false), None, options);
        info!(
            "Opened replica of archive {} ({})",
            key.short(),
            if options.thin { "thin" } else { "full" }
        );
        archive
    }

    fn build(
        metadata: Arc<MemoryFeed>,
        content: Option<Arc<MemoryFeed>>,
        options: ArchiveOptions,
    ) -> Arc<Self> {
        let archive = Arc::new(Self {
            options,
            metadata,
            content: RwLock::new(content),
            content_ready: Arc::new(EventBus::new()),
            peers: Mutex::new(Vec::new()),
            index: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
            metadata_listener: Mutex::new(None),
        });

        // Registered before anyone else can subscribe, so the index and the
        // content feed are up to date by the time other listeners run.
        let weak = Arc::downgrade(&archive);
        let listener = archive.metadata.subscribe(Arc::new(move |event: FeedEvent| {
            let Some(archive) = weak.upgrade() else {
                return;
            };
            match event {
                FeedEvent::Append { index } | FeedEvent::Download { index, .. } => {
                    archive.ingest(index)
                }
                _ => {}
            }
        }));
        *archive
            .metadata_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);

        archive
    }

    pub fn key(&self) -> VaultKey {
        self.metadata.key()
    }

    pub fn is_writable(&self) -> bool {
        self.metadata.is_writable()
    }

    pub fn options(&self) -> ArchiveOptions {
        self.options
    }

    pub fn metadata_feed(&self) -> &Arc<MemoryFeed> {
        &self.metadata
    }

    /// The content feed, once it has been opened.
    pub fn content_feed(&self) -> Option<Arc<MemoryFeed>> {
        self.content
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Notify `listener` when the content feed opens. Fires at most once per
    /// archive; check `content_feed()` after subscribing.
    pub fn on_content_ready(&self, listener: Listener<()>) -> Subscription {
        self.content_ready.subscribe_listener(listener)
    }

    /// Run `attach` against the content feed as soon as it exists, keeping
    /// the subscription it returns in `guard`. Attaches at most once.
    pub(crate) fn attach_content<F>(self: &Arc<Self>, guard: &Arc<StreamGuard>, attach: F)
    where
        F: Fn(&Arc<MemoryFeed>) -> Subscription + Send + Sync + 'static,
    {
        let attached = Arc::new(AtomicBool::new(false));
        let attach = Arc::new(move |archive: &Archive, guard: &StreamGuard| {
            let Some(content) = archive.content_feed() else {
                return;
            };
            if attached.swap(true, Ordering::SeqCst) {
                return;
            }
            guard.hold(attach(&content));
        });

        let archive = Arc::downgrade(self);
        let ready_guard = Arc::downgrade(guard);
        let on_ready = Arc::clone(&attach);
        guard.hold(self.on_content_ready(Arc::new(move |()| {
            if let (Some(archive), Some(guard)) = (archive.upgrade(), ready_guard.upgrade()) {
                on_ready(&archive, &guard);
            }
        })));

        attach(self, guard);
    }

    /// Whether every block of `range` is present in the local content feed.
    pub fn is_resident(&self, range: BlockRange) -> bool {
        let content = self.content_feed();
        residency::is_resident(content.as_deref().map(|feed| feed as &dyn Feed), range)
    }

    /// Fetch content blocks from peers. Returns how many blocks of `range`
    /// are present afterwards.
    pub fn download(&self, range: BlockRange) -> Result<u64> {
        let content = self
            .content_feed()
            .ok_or_else(|| ArchiveError::ContentNotReady(self.key().short()))?;
        Ok(content.download(range))
    }

    /// Connect two copies of the same archive.
    pub fn replicate(a: &Arc<Self>, b: &Arc<Self>) -> Result<()> {
        if a.key() != b.key() {
            return Err(ArchiveError::KeyMismatch(a.key().short(), b.key().short()));
        }

        a.add_peer(b);
        b.add_peer(a);

        MemoryFeed::connect(&a.metadata, &b.metadata)?;
        if let (Some(ac), Some(bc)) = (a.content_feed(), b.content_feed()) {
            MemoryFeed::connect(&ac, &bc)?;
        }

        debug!("Replicating archive {}", a.key().short());
        Ok(())
    }

    /// Undo `replicate`.
    pub fn disconnect(a: &Arc<Self>, b: &Arc<Self>) {
        a.remove_peer(b);
        b.remove_peer(a);

        MemoryFeed::disconnect(&a.metadata, &b.metadata);
        if let (Some(ac), Some(bc)) = (a.content_feed(), b.content_feed()) {
            MemoryFeed::disconnect(&ac, &bc);
        }
    }

    /// Close both feeds. The local tree stays readable.
    pub fn close(&self) {
        self.metadata.close();
        if let Some(content) = self.content_feed() {
            content.close();
        }
    }

    fn add_peer(&self, other: &Arc<Self>) {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        if !peers.iter().any(|p| std::ptr::eq(p.as_ptr(), Arc::as_ptr(other))) {
            peers.push(Arc::downgrade(other));
        }
    }

    fn remove_peer(&self, other: &Arc<Self>) {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p| !std::ptr::eq(p.as_ptr(), Arc::as_ptr(other)));
    }

    /// Latest live entry for `path`.
    pub fn lookup(&self, path: &str) -> Option<Entry> {
        let name = paths::normalize(path);
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name)
            .filter(|(_, entry)| !entry.is_deleted())
            .map(|(_, entry)| entry.clone())
    }

    fn children(&self, dir: &str) -> Vec<Entry> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(_, entry)| {
                !entry.is_deleted() && entry.name != "/" && paths::parent(&entry.name) == dir
            })
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn ingest(&self, index: u64) {
        let Some(bytes) = self.metadata.get(index) else {
            return;
        };

        match Record::decode(&bytes) {
            Ok(Record::Header { content_key }) => self.open_content(content_key),
            Ok(record) => {
                let Some(entry) = record.into_entry() else {
                    return;
                };
                let mut tree = self.index.write().unwrap_or_else(|e| e.into_inner());
                let newer = tree
                    .get(&entry.name)
                    .is_none_or(|(existing, _)| *existing < index);
                if newer {
                    tree.insert(entry.name.clone(), (index, entry));
                }
            }
            Err(e) => warn!("Skipping undecodable metadata block {}: {}", index, e),
        }
    }

    fn open_content(&self, content_key: VaultKey) {
        let content = {
            let mut slot = self.content.write().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return;
            }
            let content = MemoryFeed::replica(content_key, self.options.thin);
            *slot = Some(Arc::clone(&content));
            content
        };

        debug!("Content feed ready for archive {}", self.key().short());
        self.content_ready.emit(());

        // Listeners are attached now, so blocks fetched below are observed.
        let peers: Vec<Arc<Archive>> = self
            .peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for theirs in peers.iter().filter_map(|peer| peer.content_feed()) {
            if let Err(e) = MemoryFeed::connect(&content, &theirs) {
                warn!("Failed to connect content feeds: {}", e);
            }
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(ArchiveError::NotWritable(self.key().short()))
        }
    }

    fn append_record(&self, record: Record) -> Result<u64> {
        Ok(self.metadata.append(record.encode()?)?)
    }

    fn append_file(&self, name: &str, data: &[u8], ctime_millis: Option<u64>) -> Result<()> {
        let content = self
            .content_feed()
            .ok_or_else(|| ArchiveError::ContentNotReady(self.key().short()))?;

        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let offset = content.len();
        let mut blocks = 0;
        for chunk in data.chunks(self.options.chunk_size.max(1)) {
            content.append(chunk.to_vec())?;
            blocks += 1;
        }

        let now = current_time_ms();
        self.append_record(Record::Put {
            name: name.to_string(),
            kind: NodeKind::File,
            size: data.len() as u64,
            mtime_millis: now,
            ctime_millis: ctime_millis.unwrap_or(now),
            offset,
            blocks,
        })?;
        Ok(())
    }

    fn append_dir(&self, name: &str) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let now = current_time_ms();
        self.append_record(Record::Put {
            name: name.to_string(),
            kind: NodeKind::Directory,
            size: 0,
            mtime_millis: now,
            ctime_millis: now,
            offset: 0,
            blocks: 0,
        })?;
        Ok(())
    }

    fn append_del(&self, name: &str) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.append_record(Record::Del {
            name: name.to_string(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl FileSystem for Archive {
    async fn read(&self, path: &str) -> crate::fs::Result<Vec<u8>> {
        let name = paths::normalize(path);
        let entry = self
            .lookup(&name)
            .ok_or_else(|| FsError::NotFound(name.clone()))?;
        let Some(range) = entry.content else {
            return Err(FsError::IsDirectory(name));
        };

        let content = self
            .content_feed()
            .ok_or_else(|| FsError::Unavailable(name.clone()))?;
        if !self.is_resident(range) {
            content.download(range);
        }

        let mut data = Vec::with_capacity(entry.size as usize);
        for index in range.iter() {
            let block = content
                .get(index)
                .ok_or_else(|| FsError::Unavailable(name.clone()))?;
            data.extend_from_slice(&block);
        }
        Ok(data)
    }

    async fn write(&self, path: &str, content: &[u8]) -> crate::fs::Result<()> {
        self.ensure_writable()?;
        let name = paths::normalize(path);
        if name == "/" {
            return Err(FsError::IsDirectory(name));
        }

        self.mkdir(&paths::parent(&name)).await?;

        let existing = self.lookup(&name);
        if existing.as_ref().is_some_and(Entry::is_dir) {
            return Err(FsError::IsDirectory(name));
        }

        self.append_file(&name, content, existing.map(|e| e.ctime_millis))?;
        Ok(())
    }

    async fn list(&self, path: &str) -> crate::fs::Result<Vec<FileEntry>> {
        let name = paths::normalize(path);
        if name != "/" {
            match self.lookup(&name) {
                None => return Err(FsError::NotFound(name)),
                Some(entry) if !entry.is_dir() => return Err(FsError::NotDirectory(name)),
                Some(_) => {}
            }
        }

        Ok(self
            .children(&name)
            .into_iter()
            .map(|entry| FileEntry {
                is_dir: entry.is_dir(),
                name: paths::file_name(&entry.name),
            })
            .collect())
    }

    async fn delete(&self, path: &str) -> crate::fs::Result<()> {
        self.ensure_writable()?;
        let name = paths::normalize(path);
        let entry = self
            .lookup(&name)
            .ok_or_else(|| FsError::NotFound(name.clone()))?;

        if entry.is_dir() && !self.children(&name).is_empty() {
            return Err(FsError::NotEmpty(name));
        }

        self.append_del(&name)?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> crate::fs::Result<bool> {
        let name = paths::normalize(path);
        Ok(name == "/" || self.lookup(&name).is_some())
    }

    async fn stat(&self, path: &str) -> crate::fs::Result<FileStat> {
        let name = paths::normalize(path);
        if name == "/" {
            return Ok(FileStat::local(0, 0, true));
        }

        let entry = self
            .lookup(&name)
            .ok_or_else(|| FsError::NotFound(name.clone()))?;
        let range = entry.content.unwrap_or(BlockRange { start: 0, end: 0 });
        let downloaded = self
            .content_feed()
            .map(|content| content.downloaded(range))
            .unwrap_or(0);

        Ok(FileStat {
            mtime_millis: entry.mtime_millis,
            ctime_millis: entry.ctime_millis,
            size: entry.size,
            is_dir: entry.is_dir(),
            offset: range.start,
            blocks: range.len(),
            downloaded,
        })
    }

    async fn mkdir(&self, path: &str) -> crate::fs::Result<()> {
        let name = paths::normalize(path);
        if name == "/" {
            return Ok(());
        }

        match self.lookup(&name) {
            Some(entry) if entry.is_dir() => return Ok(()),
            Some(_) => return Err(FsError::AlreadyExists(name)),
            None => {}
        }

        self.ensure_writable()?;
        Box::pin(self.mkdir(&paths::parent(&name))).await?;
        self.append_dir(&name)?;
        Ok(())
    }
}

//! File watcher with debouncing for vault directories.
//!
//! Uses notify-debouncer-mini for efficient file change detection.

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use std::collections::HashMap;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Default quiet period before a burst of events is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path below the watched root with a leading separator, using the
    /// platform's separators
    pub path: String,
    /// Type of event
    pub kind: FileEventKind,
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// Created or modified
    Modified,
    /// Deleted
    Deleted,
}

/// Track last seen mtime to filter spurious events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

/// Recursive watch on one directory. Events stop when this is dropped.
pub struct FileWatcher {
    root: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl FileWatcher {
    /// Watch `root` recursively, handing each debounced change to `on_event`
    /// on the watcher's own thread.
    pub fn new<F>(root: PathBuf, config: WatchConfig, on_event: F) -> notify::Result<Self>
    where
        F: Fn(FileEvent) + Send + 'static,
    {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let root = root.canonicalize().unwrap_or(root);
        let root_clone = root.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            config.debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event.path, &root_clone, &mtime_cache) {
                            on_event(file_event);
                        }
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
        )?;

        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
        debug!("Watching {:?} (debounce {:?})", root, config.debounce);

        Ok(Self {
            root,
            _debouncer: debouncer,
        })
    }

    /// Watch `root` and deliver events through a channel.
    pub fn channel(
        root: PathBuf,
        config: WatchConfig,
    ) -> notify::Result<(Self, mpsc::UnboundedReceiver<FileEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Self::new(root, config, move |event| {
            // Receiver dropped
            let _ = tx.send(event);
        })?;
        Ok((watcher, rx))
    }

    /// The canonical watched directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Process the path of a single debounced event, returning a FileEvent if
    /// relevant. Whether the path still exists decides the kind.
    fn process_event(path: &Path, root: &Path, mtime_cache: &MtimeCache) -> Option<FileEvent> {
        let relative = path.strip_prefix(root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }

        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        // Uses relative path as key so cache is bounded by vault size
        let relative_path = relative.to_path_buf();
        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            FileEventKind::Modified => {
                let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
                if let Some(mtime) = mtime {
                    // Mtime unchanged - spurious event, skip it
                    if cache.get(&relative_path) == Some(&mtime) {
                        return None;
                    }
                    cache.insert(relative_path, mtime);
                }
            }
            FileEventKind::Deleted => {
                cache.remove(&relative_path);
            }
        }
        drop(cache);

        let reported = format!("{}{}", MAIN_SEPARATOR, relative.to_string_lossy());
        debug!("File event: {:?} - {}", kind, reported);
        Some(FileEvent { path: reported, kind })
    }
}

//! Network activity of an archive: block transfers, sync completion, and
//! peer count changes on both feeds.

use crate::archive::Archive;
use crate::events::{EventSink, EventStream, channel};
use crate::feed::{Feed, FeedEvent, FeedKind, MemoryFeed};
use crate::vault::Vault;
use crate::watch::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ActivityEvent {
    Download {
        feed: FeedKind,
        block: u64,
        bytes: usize,
    },
    Upload {
        feed: FeedKind,
        block: u64,
        bytes: usize,
    },
    /// Every known block of `feed` is local.
    Sync { feed: FeedKind },
    /// Peer count of the metadata feed changed.
    NetworkChanged { connections: usize },
}

pub type ActivityStream = EventStream<ActivityEvent>;

/// Subscribe to transfer activity on `vault`'s feeds.
///
/// The content feed is tracked from the moment it opens. Plain filesystems
/// have no feeds and are rejected.
pub fn subscribe_activity(vault: &Vault) -> Result<ActivityStream> {
    let archive = vault.as_archive().ok_or(WatchError::NotAnArchive)?;
    Ok(subscribe_archive(archive))
}

fn subscribe_archive(archive: &Arc<Archive>) -> ActivityStream {
    let (sink, stream) = channel();
    let guard = Arc::clone(sink.guard());

    let metadata = archive.metadata_feed();
    guard.hold(metadata.subscribe(forward(
        FeedKind::Metadata,
        sink.clone(),
        Some(Arc::downgrade(metadata)),
    )));

    let content_sink = sink.clone();
    archive.attach_content(&guard, move |content| {
        content.subscribe(forward(FeedKind::Content, content_sink.clone(), None))
    });

    debug!("Tracking activity of archive {}", archive.key().short());
    stream
}

/// Translate one feed's events. Peer changes are only reported for the feed
/// passed as `peers`.
fn forward(
    feed: FeedKind,
    sink: EventSink<ActivityEvent>,
    peers: Option<Weak<MemoryFeed>>,
) -> Arc<dyn Fn(FeedEvent) + Send + Sync> {
    Arc::new(move |event: FeedEvent| {
        let activity = match event {
            FeedEvent::Download { index, bytes } => ActivityEvent::Download {
                feed,
                block: index,
                bytes,
            },
            FeedEvent::Upload { index, bytes } => ActivityEvent::Upload {
                feed,
                block: index,
                bytes,
            },
            FeedEvent::Sync => ActivityEvent::Sync { feed },
            FeedEvent::PeerAdd | FeedEvent::PeerRemove => {
                let Some(owner) = peers.as_ref().and_then(Weak::upgrade) else {
                    return;
                };
                ActivityEvent::NetworkChanged {
                    connections: owner.peer_count(),
                }
            }
            FeedEvent::Append { .. } => return,
        };
        sink.send(activity);
    })
}

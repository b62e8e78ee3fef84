//! Change subscriptions across the three vault kinds.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use vault_core::archive::{Archive, ArchiveOptions};
use vault_core::fs::{FileSystem, InMemoryFs};
use vault_core::ops;
use vault_core::{ChangeEvent, ChangeStream, Vault, watch};

const WAIT: Duration = Duration::from_secs(5);

async fn next(stream: &mut ChangeStream) -> ChangeEvent {
    timeout(WAIT, stream.recv())
        .await
        .expect("Timed out waiting for a change event")
        .expect("Stream closed")
}

/// Wait for `count` events and return them.
async fn take(stream: &mut ChangeStream, count: usize) -> Vec<ChangeEvent> {
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        events.push(next(stream).await);
    }
    events
}

/// Let the processing task drain its queue, then assert nothing else arrived.
async fn assert_quiet(stream: &mut ChangeStream) {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(stream.try_recv(), None);
}

fn invalidated(path: &str) -> ChangeEvent {
    ChangeEvent::Invalidated { path: path.into() }
}

fn changed(path: &str) -> ChangeEvent {
    ChangeEvent::Changed { path: path.into() }
}

async fn write_sequence(archive: &Archive) {
    for (name, body) in [
        ("/a.txt", "one"),
        ("/b.txt", "one"),
        ("/a.txt", "two"),
        ("/a.txt", "three"),
        ("/b.txt", "two"),
        ("/c.txt", "one"),
    ] {
        archive.write(name, body.as_bytes()).await.unwrap();
    }
}

#[tokio::test]
async fn test_filesystem_vault_reports_changes() {
    let fs = Arc::new(InMemoryFs::new());
    let vault = Vault::Filesystem(fs.clone());
    let mut stream = watch::<&str>(&vault, &[]).unwrap();

    fs.write("/a.txt", b"one").await.unwrap();
    fs.mkdir("/sub").await.unwrap();
    fs.delete("/a.txt").await.unwrap();

    assert_eq!(
        take(&mut stream, 3).await,
        vec![changed("/a.txt"), changed("/sub"), changed("/a.txt")]
    );
}

#[tokio::test]
async fn test_local_archive_reports_every_record() {
    let archive = Archive::create(ArchiveOptions::default()).unwrap();
    let vault = Vault::from(Arc::clone(&archive));
    let mut stream = watch(&vault, &["/a.txt", "/c.txt"]).unwrap();

    write_sequence(&archive).await;
    archive.delete("/a.txt").await.unwrap();

    assert_eq!(
        take(&mut stream, 5).await,
        vec![
            changed("/a.txt"),
            changed("/a.txt"),
            changed("/a.txt"),
            changed("/c.txt"),
            changed("/a.txt"),
        ]
    );
    assert_quiet(&mut stream).await;
}

#[tokio::test]
async fn test_thin_replica_changes_follow_downloads() {
    let src = Archive::create(ArchiveOptions::default()).unwrap();
    write_sequence(&src).await;

    let dst = Archive::open_remote(src.key(), ArchiveOptions::thin());
    let vault = Vault::from(Arc::clone(&dst));
    let mut stream = watch::<&str>(&vault, &[]).unwrap();

    Archive::replicate(&src, &dst).unwrap();

    // Metadata arrives eagerly; content stays remote.
    let invalidations = take(&mut stream, 6).await;
    assert_eq!(
        invalidations,
        vec![
            invalidated("/a.txt"),
            invalidated("/b.txt"),
            invalidated("/a.txt"),
            invalidated("/a.txt"),
            invalidated("/b.txt"),
            invalidated("/c.txt"),
        ]
    );
    assert_quiet(&mut stream).await;

    for path in ["/a.txt", "/c.txt", "/b.txt"] {
        ops::download(&vault, path).await.unwrap();
        assert_eq!(next(&mut stream).await, changed(path));
    }
    assert_quiet(&mut stream).await;
}

#[tokio::test]
async fn test_full_replica_reports_each_record_once() {
    let src = Archive::create(ArchiveOptions::default()).unwrap();
    write_sequence(&src).await;

    let dst = Archive::open_remote(src.key(), ArchiveOptions::default());
    let vault = Vault::from(Arc::clone(&dst));
    let mut stream = watch::<&str>(&vault, &[]).unwrap();

    Archive::replicate(&src, &dst).unwrap();
    let mut events = take(&mut stream, 12).await;

    src.delete("/a.txt").await.unwrap();
    events.extend(take(&mut stream, 2).await);
    assert_quiet(&mut stream).await;

    let expected: Vec<ChangeEvent> = ["/a.txt", "/b.txt", "/a.txt", "/a.txt", "/b.txt", "/c.txt", "/a.txt"]
        .into_iter()
        .flat_map(|path| [invalidated(path), changed(path)])
        .collect();
    assert_eq!(events, expected);
}

#[tokio::test]
async fn test_replica_patterns_filter_both_kinds() {
    let src = Archive::create(ArchiveOptions::default()).unwrap();
    write_sequence(&src).await;

    let dst = Archive::open_remote(src.key(), ArchiveOptions::thin());
    let vault = Vault::from(Arc::clone(&dst));
    let mut stream = watch(&vault, &["/c.txt"]).unwrap();

    Archive::replicate(&src, &dst).unwrap();
    assert_eq!(next(&mut stream).await, invalidated("/c.txt"));

    ops::download(&vault, "/a.txt").await.unwrap();
    ops::download(&vault, "/c.txt").await.unwrap();
    assert_eq!(next(&mut stream).await, changed("/c.txt"));
    assert_quiet(&mut stream).await;
}

#[tokio::test]
async fn test_records_present_before_subscribing_still_complete() {
    let src = Archive::create(ArchiveOptions::default()).unwrap();
    write_sequence(&src).await;

    let dst = Archive::open_remote(src.key(), ArchiveOptions::thin());
    Archive::replicate(&src, &dst).unwrap();

    // Subscribe after the metadata is already local.
    let vault = Vault::from(Arc::clone(&dst));
    let mut stream = watch::<&str>(&vault, &[]).unwrap();

    ops::download(&vault, "/c.txt").await.unwrap();
    assert_eq!(next(&mut stream).await, changed("/c.txt"));
    assert_quiet(&mut stream).await;
}

#[tokio::test]
async fn test_closed_stream_reports_nothing() {
    let src = Archive::create(ArchiveOptions::default()).unwrap();
    let dst = Archive::open_remote(src.key(), ArchiveOptions::default());
    let vault = Vault::from(Arc::clone(&dst));

    let mut stream = watch::<&str>(&vault, &[]).unwrap();
    stream.close();
    stream.close();

    Archive::replicate(&src, &dst).unwrap();
    src.write("/a.txt", b"one").await.unwrap();

    assert!(stream.is_closed());
    assert_eq!(stream.recv().await, None);
}

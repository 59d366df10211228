// Blob store behavior across containers and concurrent uploads.

mod common;

use bytes::Bytes;
use common::{FailingBackend, chunked, seeded_bytes};
use futures::{StreamExt, TryStreamExt};
use parcel_core::{Checksum, UploadState};
use parcel_storage::{BlobStore, BlobStoreError, FilesystemBackend, ObjectStore};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

async fn fs_container(root: &TempDir, name: &str) -> Arc<dyn ObjectStore> {
    Arc::new(FilesystemBackend::new(root.path(), name).await.unwrap())
}

async fn read_all(store: &BlobStore, name: &str) -> Bytes {
    let opened = store.open(name).await.unwrap();
    let parts: Vec<Bytes> = opened.stream.try_collect().await.unwrap();
    Bytes::from(parts.concat())
}

#[tokio::test]
async fn large_upload_is_byte_identical() {
    let root = TempDir::new().unwrap();
    let store = BlobStore::new(fs_container(&root, "archives").await, vec![]);
    let data = seeded_bytes(7, 3 * 1024 * 1024 + 17);

    let name = store
        .put("big", chunked(data.clone(), 64 * 1024), data.len() as i64)
        .await
        .unwrap();

    let stored = read_all(&store, &name).await;
    assert_eq!(Checksum::compute(&stored), Checksum::compute(&data));

    let status = store.status(&name).await.unwrap();
    assert_eq!(status.status, UploadState::Done);
    assert_eq!(status.n, status.size);
    assert_eq!(status.size, data.len() as i64);
}

#[tokio::test]
async fn broken_fallback_error_surfaces_when_nothing_found() {
    let root = TempDir::new().unwrap();
    let failing = FailingBackend::new();
    let store = BlobStore::new(
        fs_container(&root, "archives").await,
        vec![failing.clone() as Arc<dyn ObjectStore>],
    );

    assert_eq!(
        store.open("ghost").await.err(),
        Some(BlobStoreError::Retrieval)
    );
    assert_eq!(
        store.status("ghost").await.unwrap_err(),
        BlobStoreError::Retrieval
    );
    assert!(failing.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn hit_in_write_container_skips_broken_fallback() {
    let root = TempDir::new().unwrap();
    let failing = FailingBackend::new();
    let store = BlobStore::new(
        fs_container(&root, "archives").await,
        vec![failing.clone() as Arc<dyn ObjectStore>],
    );
    store
        .put("fn", chunked(Bytes::from_static(b"payload"), 2), 7)
        .await
        .unwrap();

    assert_eq!(read_all(&store, "fn").await, Bytes::from_static(b"payload"));
    assert_eq!(failing.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn hit_in_later_fallback_wins_over_earlier_error() {
    let root = TempDir::new().unwrap();
    let legacy = fs_container(&root, "legacy").await;
    BlobStore::new(legacy.clone(), vec![])
        .put("old", chunked(Bytes::from_static(b"v1"), 1), 2)
        .await
        .unwrap();

    let store = BlobStore::new(
        fs_container(&root, "archives").await,
        vec![FailingBackend::new() as Arc<dyn ObjectStore>, legacy],
    );
    assert_eq!(read_all(&store, "old").await, Bytes::from_static(b"v1"));
}

#[tokio::test]
async fn unwritable_container_fails_put_and_clears_registry() {
    let store = BlobStore::new(FailingBackend::new(), vec![]);

    let err = store
        .put("fn", chunked(Bytes::from_static(b"abc"), 1), 3)
        .await
        .unwrap_err();
    assert_eq!(err, BlobStoreError::Write);
    assert!(store.uploads().get("fn").is_none());
}

#[tokio::test]
async fn concurrent_uploads_track_independently() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(BlobStore::new(fs_container(&root, "archives").await, vec![]));

    let tasks: Vec<_> = (0..8u64)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let data = seeded_bytes(i, 10_000 + i as usize);
                let name = format!("fn-{i}");
                store
                    .put(&name, chunked(data.clone(), 1000), data.len() as i64)
                    .await
                    .unwrap();
                (name, data)
            })
        })
        .collect();

    for task in tasks {
        let (name, data) = task.await.unwrap();
        assert_eq!(read_all(&store, &name).await, data);
    }
    assert!(store.uploads().is_empty());
}

#[tokio::test]
async fn in_flight_status_reflects_consumed_bytes() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(BlobStore::new(fs_container(&root, "archives").await, vec![]));

    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, std::io::Error>>();
    let writer = {
        let store = store.clone();
        tokio::spawn(async move { store.put("slow", rx, 6).await })
    };

    tx.unbounded_send(Ok(Bytes::from_static(b"abc"))).unwrap();
    let status = loop {
        // The writer may not have declared the upload yet.
        if let Ok(status) = store.status("slow").await
            && status.n == 3
        {
            break status;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(status.status, UploadState::Pending);
    assert_eq!(status.size, 6);

    tx.unbounded_send(Ok(Bytes::from_static(b"def"))).unwrap();
    drop(tx);
    assert_eq!(writer.await.unwrap().unwrap(), "slow");
    assert_eq!(store.status("slow").await.unwrap().status, UploadState::Done);
}

#[tokio::test]
async fn listing_streams_every_page() {
    let root = TempDir::new().unwrap();
    let store = BlobStore::new(fs_container(&root, "archives").await, vec![]);
    for i in 0..25 {
        store
            .put(&format!("fn-{i:02}"), chunked(Bytes::from_static(b"x"), 1), 1)
            .await
            .unwrap();
    }

    let mut cursor = parcel_storage::Cursor::Start;
    let mut seen = Vec::new();
    while !cursor.is_end() {
        let page = store.list("fn-", &cursor, 10, |_| true).await.unwrap();
        assert!(page.items.len() <= 10);
        seen.extend(page.items.into_iter().map(|i| i.key));
        cursor = page.next;
    }
    let expected: Vec<_> = (0..25).map(|i| format!("fn-{i:02}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn cancelled_upload_releases_registry_and_temp_file() {
    let root = TempDir::new().unwrap();
    let store = BlobStore::new(fs_container(&root, "archives").await, vec![]);

    let stream = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"abc"))])
        .chain(futures::stream::pending());
    let mut put = Box::pin(store.put("fn-drop", stream, 10));

    let counter = tokio::select! {
        _ = &mut put => panic!("upload finished without end of data"),
        _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
            let (counter, size) = store.uploads().get("fn-drop").unwrap();
            assert_eq!(size, 10);
            assert_eq!(counter.snapshot().n, 3);
            counter
        }
    };
    drop(put);

    assert!(store.uploads().is_empty());
    let progress = counter.snapshot();
    assert!(progress.is_terminal());
    assert!(!progress.is_done());
    assert_eq!(
        store.status("fn-drop").await.unwrap_err(),
        BlobStoreError::NotFound
    );
    let leftovers: Vec<_> = std::fs::read_dir(root.path().join("archives"))
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());
}

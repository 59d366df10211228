use async_trait::async_trait;
use parcel_storage::error::{StorageError, StorageResult};
use parcel_storage::traits::{
    ByteStream, ContinuationToken, Cursor, ListedItem, ListingPage, ObjectMeta, ObjectStore,
    StreamingUpload, normalize_page_size,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend whose every call fails with an I/O error.
#[allow(dead_code)]
pub struct FailingBackend {
    pub calls: AtomicUsize,
}

#[allow(dead_code)]
impl FailingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn fail<T>(&self) -> StorageResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Io(std::io::Error::other("disk on fire")))
    }
}

#[async_trait]
impl ObjectStore for FailingBackend {
    async fn head(&self, _key: &str) -> StorageResult<ObjectMeta> {
        self.fail()
    }

    async fn get_stream(&self, _key: &str) -> StorageResult<ByteStream> {
        self.fail()
    }

    async fn put_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        self.fail()
    }

    async fn list_page(
        &self,
        _prefix: &str,
        _cursor: &Cursor,
        _page_size: usize,
    ) -> StorageResult<ListingPage> {
        self.fail()
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }

    fn container(&self) -> &str {
        "broken"
    }
}

/// Read-only backend listing synthetic keys without storing them.
#[allow(dead_code)]
pub struct MockLargeListingBackend {
    pub total_keys: usize,
    pub pages_served: AtomicUsize,
}

#[allow(dead_code)]
impl MockLargeListingBackend {
    pub fn new(total_keys: usize) -> Arc<Self> {
        Arc::new(Self {
            total_keys,
            pages_served: AtomicUsize::new(0),
        })
    }

    pub fn key(i: usize) -> String {
        format!("artifact-{i:08}")
    }
}

#[async_trait]
impl ObjectStore for MockLargeListingBackend {
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn put_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Err(StorageError::InvalidKey("mock backend is read-only".to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn list_page(
        &self,
        _prefix: &str,
        cursor: &Cursor,
        page_size: usize,
    ) -> StorageResult<ListingPage> {
        let start = match cursor {
            Cursor::Start => 0,
            Cursor::Next(token) => token.as_str()?.parse::<usize>().map_err(|e| {
                StorageError::InvalidContinuationToken(e.to_string())
            })?,
            Cursor::End => self.total_keys,
        };
        let end = (start + normalize_page_size(page_size)).min(self.total_keys);
        self.pages_served.fetch_add(1, Ordering::SeqCst);

        let items = (start..end)
            .map(|i| ListedItem {
                key: Self::key(i),
                size: i as u64,
                last_modified: None,
            })
            .collect();
        let next = if end < self.total_keys {
            Cursor::Next(ContinuationToken::from_string(end.to_string())?)
        } else {
            Cursor::End
        };
        Ok(ListingPage { items, next })
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }

    fn container(&self) -> &str {
        "synthetic"
    }
}

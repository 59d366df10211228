//! Local filesystem storage backend.
//!
//! A container is a subdirectory of the backend root. Objects are written
//! to a hidden temp file and renamed into place, so readers never observe
//! a partially written artifact.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, ContinuationToken, Cursor, ListedItem, ListingPage, ObjectMeta, ObjectStore,
    StreamingUpload, normalize_page_size,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Filename prefix marking in-flight uploads; such files are never listed.
const TEMP_PREFIX: &str = ".tmp.";

/// A container directory on the local filesystem.
pub struct FilesystemBackend {
    dir: PathBuf,
    container: String,
}

impl FilesystemBackend {
    /// Resolve `container` under `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>, container: &str) -> StorageResult<Self> {
        if container.is_empty() || !is_plain_relative(container) {
            return Err(StorageError::Config(format!(
                "invalid container name: {container:?}"
            )));
        }
        let dir = root.as_ref().join(container);
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            container: container.to_string(),
        })
    }

    /// Directory holding this container's objects.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a key to a path inside the container.
    ///
    /// Runs the symlink checks on the blocking pool since they stat and
    /// canonicalize.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let dir = self.dir.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&dir, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Reject keys that would escape the container, including through
    /// symlinks planted inside it.
    fn key_path_sync(dir: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || !is_plain_relative(key) {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        let path = dir.join(key);
        let dir_canonical = dir.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize container: {e}"),
            ))
        })?;

        // Check the path itself if it exists, otherwise its nearest existing
        // ancestor, so a symlinked directory cannot redirect a new write.
        let mut probe = path.as_path();
        loop {
            match std::fs::symlink_metadata(probe) {
                Ok(meta) => {
                    let canonical = probe.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&dir_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
            match probe.parent() {
                Some(parent) => probe = parent,
                None => return Ok(path),
            }
        }
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Walk the container and collect every visible object under `prefix`.
    async fn collect_items(&self, prefix: &str) -> StorageResult<Vec<ListedItem>> {
        let mut items = Vec::new();
        let mut stack = vec![self.dir.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks; links are never listed.
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file()
                    || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
                {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.dir) else {
                    continue;
                };
                let key = rel.to_string_lossy().replace('\\', "/");
                if !key.starts_with(prefix) {
                    continue;
                }
                let meta = entry.metadata().await?;
                items.push(ListedItem {
                    key,
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(Into::into),
                });
            }
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }
}

fn is_plain_relative(key: &str) -> bool {
    !key.starts_with('\\')
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn map_not_found(key: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem", container = %self.container))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(|e| map_not_found(key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(Into::into),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem", container = %self.container))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.key_path(key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| map_not_found(key, e))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem", container = %self.container))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        // Unique temp name so concurrent writers of one key never collide.
        let temp_name = format!("{TEMP_PREFIX}{}", Uuid::new_v4());
        let temp_path = path.with_file_name(temp_name);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            temp: TempFile::new(temp_path),
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem", container = %self.container))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| map_not_found(key, e))
    }

    #[instrument(skip(self, cursor), fields(backend = "filesystem", container = %self.container))]
    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        page_size: usize,
    ) -> StorageResult<ListingPage> {
        let after = match cursor {
            Cursor::End => {
                return Ok(ListingPage {
                    items: Vec::new(),
                    next: Cursor::End,
                });
            }
            Cursor::Start => None,
            Cursor::Next(token) => Some(token.as_str()?.to_string()),
        };
        let page_size = normalize_page_size(page_size);

        // Keys are sorted, so the last key of a page is a stable resume point
        // even when objects are deleted between pages.
        let mut items: Vec<ListedItem> = self
            .collect_items(prefix)
            .await?
            .into_iter()
            .filter(|item| after.as_deref().is_none_or(|after| item.key.as_str() > after))
            .collect();

        let next = if items.len() > page_size {
            items.truncate(page_size);
            match items.last() {
                Some(last) => Cursor::Next(ContinuationToken::from_string(last.key.clone())?),
                None => Cursor::End,
            }
        } else {
            Cursor::End
        };

        Ok(ListingPage { items, next })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    fn container(&self) -> &str {
        &self.container
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.dir).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("container not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("container is not a directory: {:?}", self.dir),
            )));
        }

        Ok(())
    }
}

/// Deletes an uncommitted temp file when dropped.
struct TempFile {
    path: PathBuf,
    committed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Streaming upload for filesystem backend.
///
/// Dropping the upload without `finish` removes its temp file.
struct FilesystemUpload {
    file: fs::File,
    temp: TempFile,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let FilesystemUpload {
            file,
            mut temp,
            final_path,
            bytes_written,
        } = *self;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp.path, &final_path).await?;
        temp.committed = true;
        Ok(bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let FilesystemUpload { file, temp, .. } = *self;
        drop(file);
        let _ = fs::remove_file(&temp.path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn put(backend: &FilesystemBackend, key: &str, data: &'static [u8]) {
        let mut upload = backend.put_stream(key).await.unwrap();
        upload.write(Bytes::from_static(data)).await.unwrap();
        upload.finish().await.unwrap();
    }

    async fn read_all(backend: &FilesystemBackend, key: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = backend
            .get_stream(key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn container_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();
        assert!(dir.path().join("archives").is_dir());
        assert_eq!(backend.container(), "archives");
        backend.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_traversal_container() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FilesystemBackend::new(dir.path(), "../up").await.is_err());
        assert!(FilesystemBackend::new(dir.path(), "").await.is_err());
    }

    #[tokio::test]
    async fn streaming_put_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();

        put(&backend, "fn-a", b"hello world").await;

        assert_eq!(read_all(&backend, "fn-a").await, b"hello world");
        assert_eq!(backend.head("fn-a").await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn aborted_upload_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();

        let mut upload = backend.put_stream("partial").await.unwrap();
        upload.write(Bytes::from_static(b"half")).await.unwrap();
        upload.abort().await.unwrap();

        assert!(backend.head("partial").await.unwrap_err().is_not_found());
        let page = backend.list_page("", &Cursor::Start, 10).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn dropped_upload_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();

        let mut upload = backend.put_stream("gone").await.unwrap();
        upload.write(Bytes::from_static(b"half")).await.unwrap();
        drop(upload);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("archives"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn in_flight_temp_files_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();

        put(&backend, "done", b"x").await;
        let _pending = backend.put_stream("pending").await.unwrap();

        let page = backend.list_page("", &Cursor::Start, 10).await.unwrap();
        let keys: Vec<_> = page.items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["done"]);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();
        assert!(backend.delete("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_page_resumes_after_last_key() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();
        for key in ["c", "a", "b", "d", "e"] {
            put(&backend, key, b"1").await;
        }

        let mut cursor = Cursor::Start;
        let mut pages = Vec::new();
        while !cursor.is_end() {
            let page = backend.list_page("", &cursor, 2).await.unwrap();
            pages.push(
                page.items
                    .iter()
                    .map(|i| i.key.clone())
                    .collect::<Vec<_>>(),
            );
            cursor = page.next;
        }

        assert_eq!(
            pages,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()],
                vec!["e".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn list_page_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();
        put(&backend, "fn-one", b"1").await;
        put(&backend, "other", b"1").await;

        let page = backend.list_page("fn-", &Cursor::Start, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].key, "fn-one");
        assert!(page.next.is_end());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();

        assert!(backend.head("../escape").await.unwrap_err().to_string().contains("traversal"));
        assert!(matches!(
            backend.head("/absolute/path").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            backend.head("foo/../../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(backend.head("valid/nested/key").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let outside_file = outside_dir.path().join("secret.txt");
        std::fs::write(&outside_file, "secret data").unwrap();

        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();
        symlink(&outside_file, backend.dir().join("malicious_link")).unwrap();

        match backend.get_stream("malicious_link").await {
            Err(StorageError::InvalidKey(msg)) => {
                assert!(msg.contains("escapes storage root"), "{msg}")
            }
            Err(other) => panic!("expected InvalidKey error, got: {other:?}"),
            Ok(_) => panic!("symlink traversal should be rejected"),
        }

        // Symlinks are skipped by listings as well.
        let page = backend.list_page("", &Cursor::Start, 10).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_ancestor_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path(), "archives").await.unwrap();
        symlink(outside_dir.path(), backend.dir().join("escape")).unwrap();

        let result = backend.put_stream("escape/nested/deep/file.txt").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside_dir.path().join("nested").exists());
    }
}

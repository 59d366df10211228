//! In-memory index of in-flight uploads.

use crate::progress::{ProgressCounter, ProgressReader};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Most early extras buffered at once; the oldest is evicted beyond this.
pub const DEFAULT_EARLY_EXTRA_CAPACITY: usize = 1024;

/// How long an early extra waits for its upload to be declared.
pub const DEFAULT_EARLY_EXTRA_TTL: Duration = Duration::from_secs(300);

/// Failure recorded on an upload whose writer went away mid-stream.
const CANCELLED: &str = "upload cancelled";

struct PendingUpload {
    counter: Arc<ProgressCounter>,
    size: i64,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<String, PendingUpload>,
    /// Extras set before their upload was declared.
    early_extras: HashMap<String, EarlyExtra>,
    early_seq: u64,
}

struct EarlyExtra {
    value: serde_json::Value,
    buffered_at: Instant,
    seq: u64,
}

impl RegistryState {
    fn expire_early_extras(&mut self, now: Instant, ttl: Duration) {
        self.early_extras
            .retain(|_, early| now.duration_since(early.buffered_at) < ttl);
    }

    fn evict_oldest_early_extra(&mut self) {
        let oldest = self
            .early_extras
            .iter()
            .min_by_key(|(_, early)| early.seq)
            .map(|(name, _)| name.clone());
        if let Some(name) = oldest {
            self.early_extras.remove(&name);
        }
    }
}

/// Tracks uploads by name while their bytes are flowing.
///
/// Every operation runs under one readers-writer lock, so status reads
/// never observe a half-applied declare or remove.
///
/// Early extras are bounded: entries older than the TTL are dropped on the
/// next `declare` or `set_extra`, and once the buffer is full the oldest
/// entry makes room for a new name.
pub struct UploadRegistry {
    state: RwLock<RegistryState>,
    early_capacity: usize,
    early_ttl: Duration,
}

impl Default for UploadRegistry {
    fn default() -> Self {
        Self::with_limits(DEFAULT_EARLY_EXTRA_CAPACITY, DEFAULT_EARLY_EXTRA_TTL)
    }
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(early_capacity: usize, early_ttl: Duration) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            early_capacity: early_capacity.max(1),
            early_ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `stream` under `name`.
    ///
    /// A buffered early extra for `name` moves onto the new counter. A
    /// previous upload with the same name is superseded.
    pub fn declare<S>(&self, name: &str, size: i64, stream: S) -> ProgressReader<S> {
        let counter = Arc::new(ProgressCounter::new());
        let mut state = self.write();
        state.expire_early_extras(Instant::now(), self.early_ttl);
        if let Some(early) = state.early_extras.remove(name) {
            counter.set_extra(early.value);
        }
        state.pending.insert(
            name.to_string(),
            PendingUpload {
                counter: counter.clone(),
                size,
            },
        );
        ProgressReader::with_counter(stream, counter)
    }

    /// The counter and declared size of a pending upload.
    pub fn get(&self, name: &str) -> Option<(Arc<ProgressCounter>, i64)> {
        self.read()
            .pending
            .get(name)
            .map(|upload| (upload.counter.clone(), upload.size))
    }

    /// Stop tracking `name` if it is still tracked by `counter`.
    ///
    /// Returns false when a newer declare owns the name.
    pub fn remove(&self, name: &str, counter: &Arc<ProgressCounter>) -> bool {
        let mut state = self.write();
        match state.pending.get(name) {
            Some(upload) if Arc::ptr_eq(&upload.counter, counter) => {
                state.pending.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Hold `name` in the registry until the returned guard is dropped.
    pub fn guard(&self, name: &str, counter: Arc<ProgressCounter>) -> PendingGuard<'_> {
        PendingGuard {
            registry: self,
            name: name.to_string(),
            counter,
        }
    }

    /// Attach `extra` to a pending upload, or buffer it until `declare`.
    ///
    /// Concurrent calls resolve last-write-wins.
    pub fn set_extra(&self, name: &str, extra: serde_json::Value) {
        let mut state = self.write();
        if let Some(upload) = state.pending.get(name) {
            upload.counter.set_extra(extra);
            return;
        }

        let now = Instant::now();
        state.expire_early_extras(now, self.early_ttl);
        if !state.early_extras.contains_key(name) && state.early_extras.len() >= self.early_capacity
        {
            state.evict_oldest_early_extra();
        }
        state.early_seq += 1;
        let seq = state.early_seq;
        state.early_extras.insert(
            name.to_string(),
            EarlyExtra {
                value: extra,
                buffered_at: now,
                seq,
            },
        );
    }

    /// Number of pending uploads.
    pub fn len(&self) -> usize {
        self.read().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a pending upload from the registry when dropped.
///
/// Runs on every exit from the writer, including cancellation. An upload
/// that has not reached a terminal state is marked failed first, so event
/// streams holding its counter end.
pub struct PendingGuard<'a> {
    registry: &'a UploadRegistry,
    name: String,
    counter: Arc<ProgressCounter>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fail(CANCELLED);
        self.registry.remove(&self.name, &self.counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declare_then_get_returns_size() {
        let registry = UploadRegistry::new();
        let reader = registry.declare("fn", 128, ());

        let (counter, size) = registry.get("fn").unwrap();
        assert_eq!(size, 128);
        assert!(Arc::ptr_eq(&counter, reader.counter()));
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn remove_with_foreign_counter_is_noop() {
        let registry = UploadRegistry::new();
        let _reader = registry.declare("fn", 1, ());

        let stranger = Arc::new(ProgressCounter::new());
        assert!(!registry.remove("fn", &stranger));
        assert!(registry.get("fn").is_some());
    }

    #[test]
    fn stale_remove_does_not_evict_newer_declare() {
        let registry = UploadRegistry::new();
        let old = registry.declare("fn", 1, ());
        let new = registry.declare("fn", 2, ());

        assert!(!registry.remove("fn", old.counter()));
        assert_eq!(registry.get("fn").unwrap().1, 2);
        assert!(registry.remove("fn", new.counter()));
        assert!(registry.is_empty());
    }

    #[test]
    fn early_extra_applies_on_declare_once() {
        let registry = UploadRegistry::new();
        registry.set_extra("fn", json!({"stage": "build"}));

        let first = registry.declare("fn", 1, ());
        assert_eq!(first.counter().snapshot().extra, json!({"stage": "build"}));

        registry.remove("fn", first.counter());
        let second = registry.declare("fn", 1, ());
        assert!(second.counter().snapshot().extra.is_null());
    }

    #[test]
    fn set_extra_on_pending_upload_is_immediate() {
        let registry = UploadRegistry::new();
        let reader = registry.declare("fn", 1, ());
        registry.set_extra("fn", json!(1));
        registry.set_extra("fn", json!(2));
        assert_eq!(reader.counter().snapshot().extra, json!(2));
    }

    #[test]
    fn early_extras_are_capped_oldest_first() {
        let registry = UploadRegistry::with_limits(2, DEFAULT_EARLY_EXTRA_TTL);
        registry.set_extra("a", json!("a"));
        registry.set_extra("b", json!("b"));
        registry.set_extra("a", json!("a2"));
        registry.set_extra("c", json!("c"));

        assert_eq!(registry.read().early_extras.len(), 2);
        assert!(registry.declare("b", 1, ()).counter().snapshot().extra.is_null());
        assert_eq!(registry.declare("a", 1, ()).counter().snapshot().extra, json!("a2"));
        assert_eq!(registry.declare("c", 1, ()).counter().snapshot().extra, json!("c"));
    }

    #[test]
    fn unclaimed_early_extras_do_not_accumulate() {
        let registry = UploadRegistry::new();
        for i in 0..(DEFAULT_EARLY_EXTRA_CAPACITY * 4) {
            registry.set_extra(&format!("never-{i}"), json!(i));
        }
        assert_eq!(registry.read().early_extras.len(), DEFAULT_EARLY_EXTRA_CAPACITY);
    }

    #[test]
    fn expired_early_extra_is_not_applied() {
        let registry = UploadRegistry::with_limits(8, Duration::ZERO);
        registry.set_extra("fn", json!({"stage": "build"}));

        let reader = registry.declare("fn", 1, ());
        assert!(reader.counter().snapshot().extra.is_null());
        assert!(registry.read().early_extras.is_empty());
    }

    #[test]
    fn dropped_guard_releases_and_fails_upload() {
        let registry = UploadRegistry::new();
        let reader = registry.declare("fn", 10, ());
        let guard = registry.guard("fn", reader.counter().clone());
        assert!(registry.get("fn").is_some());

        drop(guard);
        assert!(registry.get("fn").is_none());
        let progress = reader.counter().snapshot();
        assert!(progress.is_terminal());
        assert!(!progress.is_done());
    }
}

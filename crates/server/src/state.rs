//! Application state shared across handlers.

use parcel_core::config::StorageServiceConfig;
use parcel_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<StorageServiceConfig>,
    /// Artifact storage and upload registry.
    pub store: Arc<BlobStore>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Validation runs in the binary before any container is resolved.
    pub fn new(config: StorageServiceConfig, store: Arc<BlobStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// Cadence of the status event stream.
    pub fn events_interval(&self) -> Duration {
        self.config.server.events_interval()
    }
}

//! In-sandbox fetcher agent for parcel.
//!
//! The agent prepares a sandbox for a function:
//! - Downloads or unpacks the function's package into the shared volume
//! - Writes referenced secrets and config maps to disk
//! - Signals the runtime to load the function, retrying while it starts
//! - Archives and uploads build output to the storage service

pub mod archive;
pub mod docker;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod resources;
pub mod routes;
pub mod specialize;
pub mod state;
pub mod storage_client;
pub mod tarextract;

pub use docker::DockerBlobFetcher;
pub use error::{FetchError, FetchResult};
pub use fetcher::Fetcher;
pub use resources::{HttpResourceClient, ResourceClient, ResourceError};
pub use routes::create_router;
pub use specialize::{
    FailureClass, HttpSpecializeTransport, RetryPolicy, SpecializeCall, SpecializeError,
    SpecializeTransport,
};
pub use state::{AppState, Readiness};
pub use storage_client::{StorageClient, StorageClientError};

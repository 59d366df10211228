//! HTTP storage service for parcel archives.
//!
//! This crate provides the network-facing side of the blob store:
//! - Streaming multipart archive uploads with sha256 verification
//! - Archive download and delete
//! - Upload status polling and server-sent status events
//! - Background pruning of unreferenced archives

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod multipart;
pub mod pruner;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use pruner::{ArchivePruner, HttpReachabilityOracle, PruneStats, ReachabilityOracle};
pub use routes::create_router;
pub use state::AppState;

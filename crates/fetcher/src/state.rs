//! Application state shared across handlers.

use crate::fetcher::Fetcher;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the agent may receive traffic.
#[derive(Clone, Debug)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn ready() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Not ready until [`Readiness::mark_ready`] is called.
    pub fn pending() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<Fetcher>,
    pub readiness: Readiness,
}

impl AppState {
    pub fn new(fetcher: Arc<Fetcher>, readiness: Readiness) -> Self {
        Self { fetcher, readiness }
    }
}

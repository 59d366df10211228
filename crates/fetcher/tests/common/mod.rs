//! Common test utilities and fixtures.

pub mod agent;
pub mod fixtures;

#[allow(unused_imports)]
pub use agent::*;
#[allow(unused_imports)]
pub use fixtures::*;

//! HTTP request handlers.

pub mod archive;
pub mod common;
pub mod status;

pub use archive::*;
pub use common::*;
pub use status::*;

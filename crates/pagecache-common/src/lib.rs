//! # pagecache-common
//!
//! Common types and constants shared across the pagecache workspace.
//!
//! This crate provides the foundational pieces used by the storage and
//! server crates:
//!
//! - **Types**: typed identifiers (`PageNo`, `Lsn`)
//! - **Constants**: page size classes, memory bounds, socket limits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

pub use types::{Lsn, PageNo};

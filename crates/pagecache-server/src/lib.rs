//! # pagecache-server
//!
//! The network-facing half of the page cache: a local stream socket
//! server that frames binary page requests and dispatches them onto the
//! cache engine.
//!
//! This crate provides:
//!
//! - **Protocol**: the fixed 9-byte request header and response framing
//! - **Dispatcher**: accept loop, per-connection workers, graceful drain
//! - **Config**: server configuration, loadable from TOML

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Server configuration.
pub mod config;

/// Connection handling and request dispatch.
pub mod dispatcher;

/// Wire protocol framing.
pub mod protocol;

pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use protocol::{MsgType, ProtocolError, RequestHeader};

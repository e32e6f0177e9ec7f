//! LSP server - layered session core for the Language Server Protocol
//!
//! - **Framing**: Content-Length message framing
//! - **Protocol**: JSON-RPC 2.0 message types and decoding
//! - **Connection**: single I/O task that serializes writes
//! - **Session**: lifecycle state machine and termination signal
//! - **Registry / Handlers**: method table and the built-in handlers
//! - **Dispatcher / Server**: routing and the session loop
//!
//! The transport itself lives in the generic I/O layer (`crate::io`).

pub mod capabilities;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod handlers;
pub mod jsonrpc_utils;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

#[cfg(test)]
pub mod testing;

pub use handlers::default_registry;
pub use server::LspServer;

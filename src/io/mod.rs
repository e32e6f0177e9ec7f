//! I/O layer - Generic abstractions for byte-stream transport
//!
//! This module provides the transport abstraction the protocol layer sits on.
//! It knows nothing about message framing or JSON-RPC:
//!
//! - **Transport**: bidirectional exchange of raw text chunks
//! - **StreamTransport**: any tokio reader/writer pair (stdio, pipes, duplex)
//! - **MockTransport**: scripted input and recorded output for tests

pub mod transport;

pub use transport::StreamTransport;

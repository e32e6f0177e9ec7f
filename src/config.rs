//! Server configuration
//!
//! Values come from environment variables and can be overridden on the
//! command line, mirroring [`crate::logging::LogConfig`].

use crate::lsp::framing::DEFAULT_MAX_MESSAGE_SIZE;
use std::env;
use tracing::warn;

/// Runtime settings for the protocol session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Log every frame body in both directions to the log side channel
    pub trace_messages: bool,
    /// Upper bound on a single inbound message body, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            trace_messages: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Create ServerConfig from environment variables
    ///
    /// - `LSP_TRACE_MESSAGES=true`
    /// - `LSP_MAX_MESSAGE_SIZE=<bytes>`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unusable values keep defaults
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup("LSP_TRACE_MESSAGES") {
            config.trace_messages = value == "true" || value == "1";
        }

        if let Some(value) = lookup("LSP_MAX_MESSAGE_SIZE") {
            match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => config.max_message_size = size,
                _ => warn!(
                    "Ignoring LSP_MAX_MESSAGE_SIZE={:?}, using {} bytes",
                    value, config.max_message_size
                ),
            }
        }

        config
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, trace_messages: bool, max_message_size: Option<usize>) -> Self {
        self.trace_messages |= trace_messages;
        if let Some(size) = max_message_size.filter(|size| *size > 0) {
            self.max_message_size = size;
        }
        self
    }
}

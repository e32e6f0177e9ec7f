//! LSP message framing layer
//!
//! Handles LSP-specific message framing using Content-Length headers
//! as specified in the Language Server Protocol specification.
//!
//! LSP message framing format:
//! Content-Length: <length>\r\n[Content-Type: <type>\r\n]\r\n<content>
//!
//! `<length>` counts bytes of the UTF-8 encoded content, not characters.

use crate::io::transport::Transport;
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::trace;

/// Error types for LSP framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error("Invalid LSP message format: {0}")]
    InvalidFormat(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Incomplete message: expected {expected} bytes, got {actual}")]
    IncompleteMessage { expected: usize, actual: usize },

    #[error("Stream ended inside a message header ({buffered} bytes buffered)")]
    TruncatedHeader { buffered: usize },
}

/// Maximum message size to prevent memory exhaustion
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Headers longer than this without a terminating blank line are rejected
const MAX_HEADER_SIZE: usize = 8 * 1024;

const HEADER_TERMINATOR: &str = "\r\n\r\n";

/// LSP message framing wrapper
///
/// Wraps any transport to handle LSP message framing with Content-Length headers.
/// The underlying transport works with raw text chunks of arbitrary size while
/// this wrapper yields exactly one message body per `receive`.
pub struct LspFraming<T: Transport> {
    /// Underlying transport
    transport: T,

    /// Buffer for accumulating partial messages
    receive_buffer: String,

    /// Queue of complete messages ready to be returned
    message_queue: VecDeque<String>,

    /// Upper bound on a single message body
    max_message_size: usize,
}

#[allow(dead_code)]
impl<T: Transport> LspFraming<T> {
    /// Create a new LSP framing wrapper around a transport
    pub fn new(transport: T) -> Self {
        Self::with_max_message_size(transport, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a framing wrapper with a custom body size limit
    pub fn with_max_message_size(transport: T, max_message_size: usize) -> Self {
        Self {
            transport,
            receive_buffer: String::new(),
            message_queue: VecDeque::new(),
            max_message_size,
        }
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Frame a message body with its Content-Length header
    pub fn frame(message: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", message.len(), message)
    }

    /// Parse one LSP message from the receive buffer
    ///
    /// Returns Some(message) if a complete message was parsed,
    /// None if more data is needed.
    fn try_parse_message(&mut self) -> Result<Option<String>, FramingError<T::Error>> {
        let Some(header_end) = self.receive_buffer.find(HEADER_TERMINATOR) else {
            if self.receive_buffer.len() > MAX_HEADER_SIZE {
                return Err(FramingError::InvalidFormat(format!(
                    "no header terminator within {MAX_HEADER_SIZE} bytes"
                )));
            }
            return Ok(None);
        };

        let content_length = self.parse_content_length(&self.receive_buffer[..header_end])?;
        let content_start = header_end + HEADER_TERMINATOR.len();
        let content_end = content_start + content_length;

        let available_content = self.receive_buffer.len() - content_start;
        if available_content < content_length {
            trace!(
                "LspFraming: Incomplete message - need {} more bytes",
                content_length - available_content
            );
            return Ok(None);
        }

        // A length that splits a multi-byte character cannot be valid UTF-8
        let message = self
            .receive_buffer
            .get(content_start..content_end)
            .ok_or_else(|| {
                FramingError::InvalidFormat(format!(
                    "Content-Length {content_length} does not end on a UTF-8 boundary"
                ))
            })?
            .to_string();

        self.receive_buffer.drain(..content_end);

        trace!(
            "LspFraming: Parsed complete message ({} bytes)",
            content_length
        );
        Ok(Some(message))
    }

    /// Parse Content-Length from LSP headers
    fn parse_content_length(&self, header: &str) -> Result<usize, FramingError<T::Error>> {
        if !header.is_ascii() {
            return Err(FramingError::InvalidFormat(
                "Header contains non-ASCII bytes".to_string(),
            ));
        }

        let mut content_length = None;

        for line in header.split("\r\n") {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                FramingError::InvalidFormat(format!("Malformed header line: {line:?}"))
            })?;

            // Content-Type and unknown headers are accepted and ignored
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                let length = value
                    .parse::<usize>()
                    .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
                content_length = Some(length);
            }
        }

        let length = content_length.ok_or_else(|| {
            FramingError::InvalidFormat("Missing Content-Length header".to_string())
        })?;

        if length == 0 {
            return Err(FramingError::InvalidContentLength("0".to_string()));
        }

        if length > self.max_message_size {
            return Err(FramingError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            });
        }

        Ok(length)
    }

    /// Describe what was left unread when the stream ended
    fn truncation_error(&self) -> FramingError<T::Error> {
        if let Some(header_end) = self.receive_buffer.find(HEADER_TERMINATOR) {
            let content_start = header_end + HEADER_TERMINATOR.len();
            if let Ok(expected) = self.parse_content_length(&self.receive_buffer[..header_end]) {
                return FramingError::IncompleteMessage {
                    expected,
                    actual: self.receive_buffer.len() - content_start,
                };
            }
        }

        FramingError::TruncatedHeader {
            buffered: self.receive_buffer.len(),
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for LspFraming<T> {
    type Error = FramingError<T::Error>;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        trace!(
            "LspFraming: Sending framed message ({} bytes content)",
            message.len()
        );

        // One transport write per message keeps frames from interleaving
        self.transport
            .send(&Self::frame(message))
            .await
            .map_err(FramingError::Transport)
    }

    async fn receive(&mut self) -> Result<Option<String>, Self::Error> {
        loop {
            if let Some(message) = self.message_queue.pop_front() {
                return Ok(Some(message));
            }

            let chunk = self
                .transport
                .receive()
                .await
                .map_err(FramingError::Transport)?;

            match chunk {
                Some(data) => {
                    self.receive_buffer.push_str(&data);
                    while let Some(message) = self.try_parse_message()? {
                        self.message_queue.push_back(message);
                    }
                }
                None if self.receive_buffer.is_empty() => {
                    trace!("LspFraming: End of stream");
                    return Ok(None);
                }
                None => return Err(self.truncation_error()),
            }
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.transport
            .close()
            .await
            .map_err(FramingError::Transport)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

//! Transport layer - Pure I/O abstraction for message exchange
//!
//! This module provides the core transport abstraction that moves raw text
//! chunks in and out of a duplex byte stream without knowledge of message
//! boundaries or protocol semantics.

use async_trait::async_trait;
#[cfg(test)]
use std::collections::VecDeque;
use std::io;
#[cfg(test)]
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for inbound reading operations
const READ_BUFFER_SIZE: usize = 4096;

/// Default capacity for UTF-8 accumulation buffer
const UTF8_ACCUMULATION_BUFFER_CAPACITY: usize = 8192;

/// Core transport trait for bidirectional message exchange
#[async_trait]
#[allow(dead_code)]
pub trait Transport: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a chunk of text. The whole chunk is written before returning.
    async fn send(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Receive the next chunk of text, or `None` once the peer has closed
    /// its end of the stream.
    async fn receive(&mut self) -> Result<Option<String>, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stream Transport Implementation
// ============================================================================

/// Error types for stream transport
#[derive(Debug, thiserror::Error)]
pub enum StreamTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Transport over any async reader/writer pair
///
/// Reading happens on a background task so that `receive` is cancel-safe;
/// writes go straight to the writer so failures surface on the call that
/// caused them.
pub struct StreamTransport {
    /// Outbound half of the stream
    writer: Option<BoxedWriter>,

    /// Channel for receiving decoded text from the reader task
    inbound: Option<mpsc::UnboundedReceiver<io::Result<String>>>,

    /// Background reader task
    reader_task: Option<JoinHandle<()>>,

    /// Connection status
    connected: bool,
}

/// Internal state for the reader task that handles byte accumulation
struct InboundReaderState {
    /// Buffer for accumulating raw bytes before UTF-8 conversion
    byte_buffer: Vec<u8>,

    /// Buffer capacity to avoid frequent reallocations
    buffer_capacity: usize,
}

impl InboundReaderState {
    /// Create new reader state with default capacity
    fn new() -> Self {
        Self {
            byte_buffer: Vec::with_capacity(UTF8_ACCUMULATION_BUFFER_CAPACITY),
            buffer_capacity: UTF8_ACCUMULATION_BUFFER_CAPACITY,
        }
    }

    /// Add new bytes to the accumulation buffer
    fn add_bytes(&mut self, bytes: &[u8]) {
        self.byte_buffer.extend_from_slice(bytes);
    }

    /// Take the longest valid UTF-8 prefix out of the buffer
    ///
    /// A trailing incomplete sequence stays buffered until more bytes arrive.
    /// Bytes that can never form valid UTF-8 are an error, reported only once
    /// the valid text in front of them has been handed out.
    fn extract_valid_utf8(&mut self) -> io::Result<Option<String>> {
        if self.byte_buffer.is_empty() {
            return Ok(None);
        }

        let valid_end = match std::str::from_utf8(&self.byte_buffer) {
            Ok(_) => self.byte_buffer.len(),
            Err(e) if e.error_len().is_some() && e.valid_up_to() == 0 => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "invalid UTF-8 sequence in {} buffered bytes",
                        self.byte_buffer.len()
                    ),
                ));
            }
            Err(e) => e.valid_up_to(),
        };

        if valid_end == 0 {
            return Ok(None);
        }

        let bytes: Vec<u8> = self.byte_buffer.drain(..valid_end).collect();
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Shrink the buffer back after a large message went through
    fn compact(&mut self) {
        if self.byte_buffer.capacity() > self.buffer_capacity * 2 {
            self.byte_buffer.shrink_to(self.buffer_capacity);
        }
    }
}

impl StreamTransport {
    /// Create a transport over an arbitrary reader/writer pair
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(Self::reader_task(reader, inbound_sender));

        Self {
            writer: Some(Box::new(writer)),
            inbound: Some(inbound_receiver),
            reader_task: Some(reader_task),
            connected: true,
        }
    }

    /// Create a transport over the process's standard input and output
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Background task that reads the inbound stream with byte-safe UTF-8 handling
    async fn reader_task<R>(reader: R, sender: mpsc::UnboundedSender<io::Result<String>>)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut state = InboundReaderState::new();
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            match reader.read(read_buffer.as_mut()).await {
                Ok(0) => {
                    Self::handle_eof(&mut state, &sender);
                    break;
                }
                Ok(n) => {
                    state.add_bytes(&read_buffer[..n]);

                    loop {
                        match state.extract_valid_utf8() {
                            Ok(Some(data)) => {
                                if sender.send(Ok(data)).is_err() {
                                    trace!("StreamTransport: receiver dropped, stopping reader");
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                error!("StreamTransport: {}", e);
                                let _ = sender.send(Err(e));
                                return;
                            }
                        }
                    }

                    state.compact();
                }
                Err(e) => {
                    error!("Failed to read from input stream: {}", e);
                    let _ = sender.send(Err(e));
                    break;
                }
            }
        }

        trace!("StreamTransport: reader task finished");
    }

    /// Handle EOF: a dangling partial UTF-8 sequence means the stream was cut
    fn handle_eof(
        state: &mut InboundReaderState,
        sender: &mpsc::UnboundedSender<io::Result<String>>,
    ) {
        trace!("StreamTransport: input stream reached EOF");

        if !state.byte_buffer.is_empty() {
            error!(
                "StreamTransport: {} incomplete bytes remaining at EOF",
                state.byte_buffer.len()
            );
            let _ = sender.send(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a UTF-8 sequence",
            )));
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Error = StreamTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(StreamTransportError::Disconnected);
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or(StreamTransportError::Disconnected)?;

        trace!("StreamTransport: Writing {} bytes", message.len());
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>, Self::Error> {
        if !self.connected {
            return Err(StreamTransportError::Disconnected);
        }

        let receiver = self
            .inbound
            .as_mut()
            .ok_or(StreamTransportError::Disconnected)?;

        match receiver.recv().await {
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(e)) => Err(StreamTransportError::Io(e)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.inbound.take();
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Error type for mock transport
#[cfg(test)]
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
}

/// Mock transport for testing - allows controlling sent/received chunks
///
/// Once the scripted input is exhausted `receive` reports end of stream.
#[cfg(test)]
pub struct MockTransport {
    /// Chunks that were sent via this transport
    sent_messages: Arc<Mutex<Vec<String>>>,

    /// Scripted chunks to return when receive() is called
    responses: Arc<Mutex<VecDeque<String>>>,

    /// Connection status
    connected: bool,
}

#[cfg(test)]
impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self {
            sent_messages: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            connected: true,
        }
    }

    /// Create a mock transport with scripted input
    pub fn with_responses(responses: Vec<String>) -> Self {
        let transport = Self::new();
        transport.responses.lock().unwrap().extend(responses);
        transport
    }

    /// Get all chunks that were sent via this transport
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent_messages.lock().unwrap().clone()
    }

    /// Shared handle to the sent chunks, usable after the transport moved into a task
    pub fn sent_messages_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent_messages)
    }
}

#[cfg(test)]
impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        self.sent_messages.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        Ok(self.responses.lock().unwrap().pop_front())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================

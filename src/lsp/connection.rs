//! Framed channel I/O task
//!
//! A single task owns the framed transport. Outbound messages reach it through
//! an unbounded channel, so writes from any number of producers are serialized
//! and frames never interleave. Inbound frame bodies are forwarded to the
//! session loop unparsed; this layer has no protocol semantics.

use crate::config::ServerConfig;
use crate::io::transport::Transport;
use crate::lsp::error::ServerError;
use crate::lsp::framing::LspFraming;
use crate::lsp::protocol::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, trace};

/// What the I/O task reports to the session loop
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// One complete frame body
    Frame(String),
    /// The peer closed the stream between messages
    Closed,
    /// Framing or I/O failure; the channel is unusable
    Failed(String),
}

/// Cloneable handle for queueing outbound messages
#[derive(Debug, Clone)]
pub struct Outbound {
    sender: mpsc::UnboundedSender<String>,
}

impl Outbound {
    /// Create a handle together with the receiving end the writer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Encode and queue a message for writing
    pub fn send(&self, message: impl Into<Message>) -> Result<(), ServerError> {
        let body = message
            .into()
            .encode()
            .map_err(|e| ServerError::Internal(format!("failed to encode message: {e}")))?;

        self.sender
            .send(body)
            .map_err(|_| ServerError::TransportDisconnected)
    }

    #[allow(dead_code)]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Running framed channel
pub struct Connection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: Outbound,
    shutdown: CancellationToken,
    io_task: JoinHandle<()>,
}

impl Connection {
    /// Wrap `transport` in LSP framing and start the I/O task
    pub fn spawn<T: Transport + 'static>(transport: T, config: &ServerConfig) -> Self {
        let framing = LspFraming::with_max_message_size(transport, config.max_message_size);
        let (outbound, outbound_receiver) = Outbound::channel();
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let io_task = tokio::spawn(Self::io_task(
            framing,
            outbound_receiver,
            inbound_sender,
            shutdown.clone(),
            config.trace_messages,
        ));

        Self {
            inbound,
            outbound,
            shutdown,
            io_task,
        }
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Next inbound event; a finished I/O task reads as `Closed`
    pub async fn recv(&mut self) -> Inbound {
        self.inbound.recv().await.unwrap_or(Inbound::Closed)
    }

    /// Flush queued outbound messages, close the transport and stop the task
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.io_task.await {
            error!("Connection I/O task failed: {}", e);
        }
    }

    async fn io_task<T: Transport>(
        mut framing: LspFraming<T>,
        mut outbound: mpsc::UnboundedReceiver<String>,
        inbound: mpsc::UnboundedSender<Inbound>,
        shutdown: CancellationToken,
        trace_messages: bool,
    ) {
        let mut reading = true;

        loop {
            tokio::select! {
                biased;

                // Outbound messages (prioritized)
                Some(message) = outbound.recv() => {
                    let written = Self::write_frame(&mut framing, &message, trace_messages).await;
                    if let Err(e) = written {
                        error!("Failed to send message: {}", e);
                        let _ = inbound.send(Inbound::Failed(e));
                        break;
                    }
                }

                // Inbound frames
                result = framing.receive(), if reading => {
                    match result {
                        Ok(Some(body)) => {
                            if trace_messages {
                                crate::log_lsp_message!(Level::INFO, "editor", body);
                            } else {
                                trace!("Connection: received frame ({} bytes)", body.len());
                            }
                            if inbound.send(Inbound::Frame(body)).is_err() {
                                reading = false;
                            }
                        }
                        Ok(None) => {
                            debug!("Connection: peer closed the stream");
                            let _ = inbound.send(Inbound::Closed);
                            reading = false;
                        }
                        Err(e) => {
                            error!("Failed to receive message: {}", e);
                            let _ = inbound.send(Inbound::Failed(e.to_string()));
                            reading = false;
                        }
                    }
                }

                _ = shutdown.cancelled() => {
                    while let Ok(message) = outbound.try_recv() {
                        let written =
                            Self::write_frame(&mut framing, &message, trace_messages).await;
                        if let Err(e) = written {
                            error!("Failed to flush message: {}", e);
                            break;
                        }
                    }
                    break;
                }
            }
        }

        if let Err(e) = framing.close().await {
            debug!("Connection: error closing transport: {}", e);
        }
        trace!("Connection I/O task finished");
    }

    async fn write_frame<T: Transport>(
        framing: &mut LspFraming<T>,
        message: &str,
        trace_messages: bool,
    ) -> Result<(), String> {
        if trace_messages {
            crate::log_lsp_message!(Level::INFO, "server", message);
        }
        framing.send(message).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::MockTransport;
    use crate::lsp::protocol::JsonRpcNotification;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
    }

    #[tokio::test]
    async fn test_forwards_frames_then_closed() {
        let body = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let transport = MockTransport::with_responses(vec![frame(body)]);
        let mut connection = Connection::spawn(transport, &ServerConfig::default());

        assert_eq!(connection.recv().await, Inbound::Frame(body.to_string()));
        assert_eq!(connection.recv().await, Inbound::Closed);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_reports_framing_failure() {
        let transport = MockTransport::with_responses(vec!["Content-Length: 0\r\n\r\n".into()]);
        let mut connection = Connection::spawn(transport, &ServerConfig::default());

        assert!(matches!(connection.recv().await, Inbound::Failed(_)));
        connection.close().await;
    }

    #[tokio::test]
    async fn test_close_flushes_queued_messages() {
        let transport = MockTransport::new();
        let sent = transport.sent_messages_handle();
        let mut connection = Connection::spawn(transport, &ServerConfig::default());

        let outbound = connection.outbound();
        for i in 0..3 {
            outbound
                .send(JsonRpcNotification::new("window/logMessage", Some(serde_json::json!(i))))
                .unwrap();
        }

        assert_eq!(connection.recv().await, Inbound::Closed);
        connection.close().await;

        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        for (i, chunk) in sent.iter().enumerate() {
            let body = format!(r#"{{"jsonrpc":"2.0","method":"window/logMessage","params":{i}}}"#);
            assert_eq!(chunk, &frame(&body));
        }
        assert!(outbound.send(JsonRpcNotification::new("late", None)).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_producers_never_interleave() {
        let transport = MockTransport::new();
        let sent = transport.sent_messages_handle();
        let connection = Connection::spawn(transport, &ServerConfig::default());

        let mut producers = Vec::new();
        for producer in 0..8 {
            let outbound = connection.outbound();
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    let params = serde_json::json!({"producer": producer, "seq": i});
                    outbound
                        .send(JsonRpcNotification::new("$/progress", Some(params)))
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        connection.close().await;

        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 200);
        for chunk in sent {
            let (header, body) = chunk.split_once("\r\n\r\n").unwrap();
            assert_eq!(header, format!("Content-Length: {}", body.len()));
            assert!(Message::decode(body).is_ok());
        }
    }
}

//! In-process editor for driving a server in tests
//!
//! The server runs on one end of an in-memory duplex stream; [`TestClient`]
//! writes frames to the other end and reads the server's output back through
//! the same framing layer the server uses.

use crate::config::ServerConfig;
use crate::io::transport::{StreamTransport, Transport};
use crate::lsp::framing::LspFraming;
use crate::lsp::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
};
use crate::lsp::registry::HandlerRegistry;
use crate::lsp::server::LspServer;
use crate::lsp::session::{ExitReason, Termination};
use serde_json::Value;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::task::JoinHandle;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const DUPLEX_BUFFER: usize = 64 * 1024;

pub struct TestClient {
    writer: Option<WriteHalf<DuplexStream>>,
    reader: LspFraming<StreamTransport>,
    server: Option<JoinHandle<ExitReason>>,
    termination: Termination,
    next_id: i64,
}

impl TestClient {
    pub fn start(registry: HandlerRegistry) -> Self {
        Self::with_config(registry, ServerConfig::default())
    }

    pub fn with_config(registry: HandlerRegistry, config: ServerConfig) -> Self {
        let (editor, server_end) = tokio::io::duplex(DUPLEX_BUFFER);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (editor_read, editor_write) = tokio::io::split(editor);

        let server = LspServer::new(
            StreamTransport::new(server_read, server_write),
            registry,
            config,
        );
        let termination = server.termination();
        let server = tokio::spawn(server.run());

        Self {
            writer: Some(editor_write),
            reader: LspFraming::new(StreamTransport::new(editor_read, tokio::io::sink())),
            server: Some(server),
            termination,
            next_id: 1,
        }
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    /// Write raw bytes to the server, bypassing framing
    pub async fn try_send_bytes(&mut self, raw: impl AsRef<[u8]>) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        writer.write_all(raw.as_ref()).await?;
        writer.flush().await
    }

    pub async fn send_bytes(&mut self, raw: impl AsRef<[u8]>) {
        self.try_send_bytes(raw).await.expect("write to server failed");
    }

    /// Frame and send an arbitrary body
    pub async fn send_raw(&mut self, body: &str) {
        self.send_bytes(&LspFraming::<StreamTransport>::frame(body)).await;
    }

    pub async fn try_send(&mut self, message: impl Into<Message>) -> io::Result<()> {
        let body = message.into().encode().map_err(io::Error::other)?;
        self.try_send_bytes(&LspFraming::<StreamTransport>::frame(&body))
            .await
    }

    pub async fn send(&mut self, message: impl Into<Message>) {
        self.try_send(message).await.expect("write to server failed");
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(JsonRpcNotification::new(method, Some(params)))
            .await;
    }

    /// Next message from the server; `None` once the server closed its output
    pub async fn recv(&mut self) -> Option<Message> {
        let body = tokio::time::timeout(RECV_TIMEOUT, self.reader.receive())
            .await
            .expect("timed out waiting for the server")
            .expect("server output is not valid framing")?;
        Some(Message::decode(&body).expect("server sent an undecodable message"))
    }

    /// Next response, skipping any notifications or requests in between
    pub async fn recv_response(&mut self) -> JsonRpcResponse {
        loop {
            match self.recv().await {
                Some(Message::Response(response)) => return response,
                Some(_) => continue,
                None => panic!("server closed its output before responding"),
            }
        }
    }

    /// Everything the server sends until it closes its output
    pub async fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.recv().await {
            messages.push(message);
        }
        messages
    }

    /// Send a request and wait for the response with the same id
    pub async fn request(&mut self, method: &str, params: Value) -> JsonRpcResponse {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        self.send(JsonRpcRequest::new(id.clone(), method, Some(params)))
            .await;
        loop {
            let response = self.recv_response().await;
            if response.id.as_ref() == Some(&id) {
                return response;
            }
        }
    }

    /// Run the `initialize` / `initialized` handshake
    pub async fn initialize(&mut self) -> JsonRpcResponse {
        let response = self
            .request("initialize", serde_json::json!({"capabilities": {}}))
            .await;
        assert!(response.error().is_none(), "initialize failed: {response:?}");
        self.notify("initialized", serde_json::json!({})).await;
        response
    }

    /// Close the editor's output so the server sees end of stream
    pub async fn close_input(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Wait for the server task to finish and return its exit reason
    pub async fn finish(&mut self) -> ExitReason {
        let server = self.server.take().expect("server already finished");
        tokio::time::timeout(RECV_TIMEOUT, server)
            .await
            .expect("timed out waiting for the server to exit")
            .expect("server task panicked")
    }
}

//! Session loop
//!
//! Reads frames from the connection, decodes them and hands them to the
//! dispatcher until the session reaches `Exited`.
//!
//! Lifecycle messages run inline, in arrival order, after every request that
//! arrived before them has been answered. Other requests run as tasks so the
//! loop keeps reading (and can see `$/cancelRequest`) while they wait for the
//! session.

use crate::config::ServerConfig;
use crate::io::transport::Transport;
use crate::lsp::client::Client;
use crate::lsp::connection::{Connection, Inbound, Outbound};
use crate::lsp::dispatcher::Dispatcher;
use crate::lsp::jsonrpc_utils::error_response;
use crate::lsp::protocol::{DecodeError, JsonRpcResponse, Message};
use crate::lsp::registry::HandlerRegistry;
use crate::lsp::session::{ExitReason, Session, Termination};
use lsp_types::notification::{Exit, Notification as _};
use lsp_types::request::{Initialize, Request as _, Shutdown};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Methods that must observe everything received before them
const LIFECYCLE_METHODS: [&str; 3] = [Initialize::METHOD, Shutdown::METHOD, Exit::METHOD];

/// Language server bound to one transport
pub struct LspServer<T: Transport + 'static> {
    transport: T,
    registry: Arc<HandlerRegistry>,
    config: ServerConfig,
    session: Session,
}

impl<T: Transport + 'static> LspServer<T> {
    pub fn new(transport: T, registry: HandlerRegistry, config: ServerConfig) -> Self {
        Self {
            transport,
            registry: Arc::new(registry),
            config,
            session: Session::new(),
        }
    }

    /// Observer that resolves once the session has exited
    ///
    /// Take it before calling [`run`](Self::run).
    pub fn termination(&self) -> Termination {
        self.session.termination()
    }

    /// Serve the session until exit, disconnect or transport failure
    pub async fn run(self) -> ExitReason {
        let termination = self.session.termination();
        debug!(
            "{} handlers registered: {:?}",
            self.registry.len(),
            self.registry.methods()
        );
        let mut connection = Connection::spawn(self.transport, &self.config);
        let outbound = connection.outbound();
        let dispatcher = Dispatcher::new(
            self.registry,
            Arc::new(Mutex::new(self.session)),
            Client::new(outbound.clone()),
        );
        let mut tasks = JoinSet::new();

        info!(
            "LSP session started (max message size {} bytes)",
            self.config.max_message_size
        );

        loop {
            let body = match connection.recv().await {
                Inbound::Frame(body) => body,
                Inbound::Closed => {
                    dispatcher.terminate(ExitReason::Disconnected).await;
                    break;
                }
                Inbound::Failed(e) => {
                    dispatcher.terminate(ExitReason::TransportFailure(e)).await;
                    break;
                }
            };

            match Message::decode(&body) {
                Err(DecodeError { id, error }) => {
                    warn!("Rejecting message: {}", error);
                    send_response(&outbound, error_response(id, &error));
                }
                Ok(message) if is_lifecycle(&message) => {
                    drain(&mut tasks).await;
                    if let Some(response) = dispatcher.dispatch(message).await {
                        send_response(&outbound, response);
                    }
                }
                Ok(Message::Request(request)) => {
                    let pending = dispatcher.prepare_request(request);
                    let outbound = outbound.clone();
                    tasks.spawn(async move {
                        if let Some(response) = pending.await {
                            send_response(&outbound, response);
                        }
                    });
                }
                Ok(message) => {
                    if let Some(response) = dispatcher.dispatch(message).await {
                        send_response(&outbound, response);
                    }
                }
            }

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!("Request task failed: {}", e);
                }
            }

            if termination.is_terminated() {
                break;
            }
        }

        dispatcher.release().await;
        tasks.shutdown().await;
        connection.close().await;

        let reason = termination.reason().unwrap_or(ExitReason::Disconnected);
        info!("LSP session ended: {}", reason);
        reason
    }
}

fn is_lifecycle(message: &Message) -> bool {
    message
        .method()
        .is_some_and(|method| LIFECYCLE_METHODS.contains(&method))
}

/// Wait for every spawned request to finish
async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Request task failed: {}", e);
        }
    }
}

/// Queue a response, logging instead of failing if the channel is gone
fn send_response(outbound: &Outbound, response: JsonRpcResponse) {
    if let Err(e) = outbound.send(response) {
        debug!("Dropping response: {}", e);
    }
}

//! Message dispatch
//!
//! Routes decoded messages to registered handlers under the session lock,
//! applying the lifecycle guard first. Requests always produce exactly one
//! response unless the session has already exited.

use crate::lsp::client::Client;
use crate::lsp::error::ServerError;
use crate::lsp::jsonrpc_utils::response_from_result;
use crate::lsp::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
};
use crate::lsp::registry::{
    HandlerContext, HandlerEntry, HandlerKind, HandlerRegistry, HandlerResult,
};
use crate::lsp::session::{ExitReason, Session, SessionState};
use lsp_types::notification::{Cancel, Notification as _};
use lsp_types::{CancelParams, NumberOrString};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Cancellation tokens of requests that have not produced a response yet
type InFlight = Arc<std::sync::Mutex<HashMap<RequestId, CancellationToken>>>;

/// Cancellation token of one request
///
/// Only the first request with a given id is registered; a duplicate that
/// arrives while it is in flight gets a token nobody else can cancel.
struct Tracked {
    token: CancellationToken,
    registered: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    session: Arc<Mutex<Session>>,
    client: Client,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        session: Arc<Mutex<Session>>,
        client: Client,
    ) -> Self {
        Self {
            registry,
            session,
            client,
            in_flight: Arc::default(),
        }
    }

    #[allow(dead_code)]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Dispatch one message, returning the response to send, if any
    pub async fn dispatch(&self, message: Message) -> Option<JsonRpcResponse> {
        match message {
            Message::Request(request) => {
                let tracked = self.track(&request.id);
                self.handle_request(request, tracked).await
            }
            Message::Notification(notification) => {
                self.handle_notification(notification).await;
                None
            }
            Message::Response(response) => {
                self.handle_response(response).await;
                None
            }
        }
    }

    /// Mark a request in flight now and return the future that answers it
    ///
    /// A `$/cancelRequest` read after this call finds the request even if the
    /// returned future has not been polled yet.
    pub fn prepare_request(
        &self,
        request: JsonRpcRequest,
    ) -> impl Future<Output = Option<JsonRpcResponse>> + Send + 'static {
        let tracked = self.track(&request.id);
        let dispatcher = self.clone();
        async move { dispatcher.handle_request(request, tracked).await }
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        tracked: Tracked,
    ) -> Option<JsonRpcResponse> {
        let JsonRpcRequest { id, method, params, .. } = request;

        let result = {
            let mut session = self.session.lock().await;
            if session.is_exited() {
                debug!("Dropping request {} ({}) after exit", id, method);
                self.untrack(&id, &tracked);
                return None;
            }
            self.run_request(&mut session, &method, params, &tracked.token)
        };
        self.untrack(&id, &tracked);

        if let Err(e) = &result {
            debug!("Request {} ({}) failed: {}", id, method, e);
        }
        Some(response_from_result(id, result))
    }

    fn run_request(
        &self,
        session: &mut Session,
        method: &str,
        params: Option<Value>,
        token: &CancellationToken,
    ) -> HandlerResult {
        if token.is_cancelled() {
            return Err(ServerError::RequestCancelled);
        }
        session.admit_request(method)?;

        let entry = self
            .registry
            .lookup_kind(method, HandlerKind::Request)
            .ok_or_else(|| ServerError::MethodNotFound(method.to_string()))?;

        trace!("Dispatching request {}", method);
        self.invoke(entry, session, method, params, token)
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        // Cancellation must not wait for the lock the target request may be queued on
        if method == Cancel::METHOD {
            self.cancel_request(params);
            return;
        }

        let mut session = self.session.lock().await;
        if !session.admit_notification(&method) {
            debug!(
                "Ignoring notification {} in state {:?}",
                method,
                session.state()
            );
            return;
        }

        let Some(entry) = self.registry.lookup_kind(&method, HandlerKind::Notification) else {
            if method.starts_with("$/") {
                debug!("Ignoring optional notification {}", method);
            } else {
                warn!("No handler for notification {}", method);
            }
            return;
        };

        let token = CancellationToken::new();
        if let Err(e) = self.invoke(entry, &mut session, &method, params, &token) {
            warn!("Notification {} failed: {}", method, e);
        }
    }

    async fn handle_response(&self, response: JsonRpcResponse) {
        let id = response.id.clone();
        if !self.client.pending().resolve(response).await {
            warn!(
                "Response for unknown request {}",
                id.map(|id| id.to_string()).unwrap_or_else(|| "null".into())
            );
        }
    }

    fn cancel_request(&self, params: Option<Value>) {
        let params: CancelParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                debug!("$/cancelRequest without params");
                return;
            }
            Err(e) => {
                debug!("Malformed $/cancelRequest: {}", e);
                return;
            }
        };

        let id = match params.id {
            NumberOrString::Number(id) => RequestId::Number(id.into()),
            NumberOrString::String(id) => RequestId::String(id),
        };

        match self.lock_in_flight().get(&id) {
            Some(token) => {
                debug!("Cancelling request {}", id);
                token.cancel();
            }
            None => trace!("Cancel for request {} that is not in flight", id),
        }
    }

    /// Run a handler, turning a panic into an internal error
    fn invoke(
        &self,
        entry: &HandlerEntry,
        session: &mut Session,
        method: &str,
        params: Option<Value>,
        token: &CancellationToken,
    ) -> HandlerResult {
        let mut ctx = HandlerContext::new(method, session, &self.registry, &self.client, token);
        catch_unwind(AssertUnwindSafe(|| entry.handler().handle(&mut ctx, params)))
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!("Handler for {} panicked: {}", method, message);
                Err(ServerError::Internal(format!("handler panicked: {message}")))
            })
    }

    /// Drive the session to `Exited` if it is not there already
    pub async fn terminate(&self, reason: ExitReason) -> ExitReason {
        self.session.lock().await.terminate(reason)
    }

    /// Cancel whatever is still outstanding in either direction
    pub async fn release(&self) {
        let tokens: Vec<_> = self.lock_in_flight().drain().collect();
        for (id, token) in tokens {
            debug!("Releasing in-flight request {}", id);
            token.cancel();
        }

        let cancelled = self.client.pending().cancel_all().await;
        if cancelled > 0 {
            debug!("Cancelled {} outstanding server requests", cancelled);
        }
    }

    #[allow(dead_code)]
    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    fn track(&self, id: &RequestId) -> Tracked {
        let token = CancellationToken::new();
        let mut in_flight = self.lock_in_flight();
        if in_flight.contains_key(id) {
            warn!("Request id {} reused while still in flight", id);
            return Tracked {
                token,
                registered: false,
            };
        }
        in_flight.insert(id.clone(), token.clone());
        Tracked {
            token,
            registered: true,
        }
    }

    fn untrack(&self, id: &RequestId, tracked: &Tracked) {
        if tracked.registered {
            self.lock_in_flight().remove(id);
        }
    }

    fn lock_in_flight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

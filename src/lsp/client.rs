//! Server-to-client messaging
//!
//! Lets handlers and server code send notifications to the editor and issue
//! requests whose responses are correlated by id as they come back in.

use crate::lsp::connection::Outbound;
use crate::lsp::error::ServerError;
use crate::lsp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use lsp_types::notification::{LogMessage, Notification as _};
use lsp_types::{LogMessageParams, MessageType};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

/// Timeout applied by [`Client::request`]
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outstanding server-to-client requests keyed by id
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>,
}

#[allow(dead_code)]
impl PendingRequests {
    async fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (sender, receiver) = oneshot::channel();
        self.inner.lock().await.insert(id, sender);
        receiver
    }

    async fn remove(&self, id: &RequestId) {
        self.inner.lock().await.remove(id);
    }

    /// Hand a response to whoever is waiting for it
    ///
    /// Returns false if no request with that id is outstanding.
    pub async fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            return false;
        };

        let Some(sender) = self.inner.lock().await.remove(&id) else {
            return false;
        };

        if sender.send(response).is_err() {
            debug!("Response receiver dropped for request {}", id);
        }
        true
    }

    /// Abandon every outstanding request; waiting callers see `RequestCancelled`
    pub async fn cancel_all(&self) -> usize {
        let mut pending = self.inner.lock().await;
        let count = pending.len();
        for (id, sender) in pending.drain() {
            debug!("Cancelling pending request {}", id);
            drop(sender);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Handle for talking to the editor
///
/// Handlers run synchronously under the session lock. One that needs an
/// answer from the editor clones the handle and awaits [`Client::request`]
/// on a spawned task; none of the built-in handlers do.
#[derive(Debug, Clone)]
pub struct Client {
    outbound: Outbound,
    pending: PendingRequests,
    next_id: Arc<AtomicI64>,
}

#[allow(dead_code)]
impl Client {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            pending: PendingRequests::default(),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Send a notification
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), ServerError> {
        let params = serde_json::to_value(params)
            .map_err(|e| ServerError::Internal(format!("failed to encode params: {e}")))?;
        debug!("Client: Sending notification {}", method);
        self.outbound
            .send(JsonRpcNotification::new(method, Some(params)))
    }

    /// Show a message in the editor's log (`window/logMessage`)
    pub fn log_message(
        &self,
        typ: MessageType,
        message: impl Into<String>,
    ) -> Result<(), ServerError> {
        self.notify(
            LogMessage::METHOD,
            LogMessageParams {
                typ,
                message: message.into(),
            },
        )
    }

    /// Send a request with the default timeout (30 seconds)
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R, ServerError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.request_with_timeout(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Send a request and wait for the matching response
    ///
    /// Timeouts and session termination both surface as `RequestCancelled`.
    pub async fn request_with_timeout<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R, ServerError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| ServerError::Internal(format!("failed to encode params: {e}")))?;
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let receiver = self.pending.register(id.clone()).await;

        debug!("Client: Sending request {} ({})", id, method);
        if let Err(e) = self
            .outbound
            .send(JsonRpcRequest::new(id.clone(), method, Some(params)))
        {
            self.pending.remove(&id).await;
            return Err(e);
        }

        let response = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ServerError::RequestCancelled),
            Err(_) => {
                debug!("Client: Request {} timed out", id);
                self.pending.remove(&id).await;
                return Err(ServerError::RequestCancelled);
            }
        };

        let result = response.into_result()?;
        serde_json::from_value(result).map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::jsonrpc_utils::{error_response, success_response};
    use crate::lsp::protocol::Message;
    use serde_json::{Value, json};

    fn sent_request(body: &str) -> JsonRpcRequest {
        match Message::decode(body).unwrap() {
            Message::Request(request) => request,
            other => panic!("Expected request, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_resolves_with_matching_response() {
        let (outbound, mut wire) = Outbound::channel();
        let client = Client::new(outbound);

        let caller = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request::<_, Value>("workspace/configuration", json!({"items": []}))
                    .await
            })
        };

        let request = sent_request(&wire.recv().await.unwrap());
        assert_eq!(request.method, "workspace/configuration");

        assert!(
            client
                .pending()
                .resolve(success_response(request.id, json!([{"x": 1}])))
                .await
        );
        assert_eq!(caller.await.unwrap(), Ok(json!([{"x": 1}])));
        assert_eq!(client.pending().len().await, 0);
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let (outbound, mut wire) = Outbound::channel();
        let client = Client::new(outbound);

        for _ in 0..2 {
            let client = client.clone();
            tokio::spawn(async move {
                let _ = client.request::<_, Value>("client/registerCapability", json!({})).await;
            });
        }

        let first = sent_request(&wire.recv().await.unwrap());
        let second = sent_request(&wire.recv().await.unwrap());
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_error_response_maps_to_remote_error() {
        let (outbound, mut wire) = Outbound::channel();
        let client = Client::new(outbound);

        let caller = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request::<_, Value>("window/showMessageRequest", json!({}))
                    .await
            })
        };

        let request = sent_request(&wire.recv().await.unwrap());
        client
            .pending()
            .resolve(error_response(
                Some(request.id),
                &ServerError::MethodNotFound("window/showMessageRequest".into()),
            ))
            .await;

        match caller.await.unwrap() {
            Err(ServerError::Remote { code, .. }) => assert_eq!(code, -32601),
            other => panic!("Expected remote error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_response_is_reported() {
        let (outbound, _wire) = Outbound::channel();
        let client = Client::new(outbound);
        assert!(
            !client
                .pending()
                .resolve(success_response(RequestId::Number(99), Value::Null))
                .await
        );
    }

    #[tokio::test]
    async fn test_cancel_all_resolves_waiters() {
        let (outbound, mut wire) = Outbound::channel();
        let client = Client::new(outbound);

        let caller = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request::<_, Value>("workspace/applyEdit", json!({}))
                    .await
            })
        };
        wire.recv().await.unwrap();

        assert_eq!(client.pending().cancel_all().await, 1);
        assert_eq!(caller.await.unwrap(), Err(ServerError::RequestCancelled));
    }

    #[tokio::test]
    async fn test_request_timeout_cleans_up() {
        let (outbound, _wire) = Outbound::channel();
        let client = Client::new(outbound);

        let result = client
            .request_with_timeout::<_, Value>(
                "workspace/applyEdit",
                json!({}),
                Duration::from_millis(10),
            )
            .await;
        assert_eq!(result, Err(ServerError::RequestCancelled));
        assert_eq!(client.pending().len().await, 0);
    }

    #[tokio::test]
    async fn test_request_on_closed_channel() {
        let (outbound, wire) = Outbound::channel();
        drop(wire);
        let client = Client::new(outbound);

        let result = client.request::<_, Value>("workspace/applyEdit", json!({})).await;
        assert_eq!(result, Err(ServerError::TransportDisconnected));
        assert_eq!(client.pending().len().await, 0);
    }

    #[tokio::test]
    async fn test_log_message_notification() {
        let (outbound, mut wire) = Outbound::channel();
        let client = Client::new(outbound);

        client.log_message(MessageType::INFO, "ready").unwrap();

        let body: Value = serde_json::from_str(&wire.recv().await.unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "jsonrpc": "2.0",
                "method": "window/logMessage",
                "params": {"type": 3, "message": "ready"}
            })
        );
    }
}

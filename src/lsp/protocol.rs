//! JSON-RPC 2.0 protocol layer
//!
//! Message types exchanged over the framed channel and the decoding rules
//! that sort an incoming body into request, notification or response.

use crate::lsp::error::ServerError;
use crate::lsp::jsonrpc_utils::JSONRPC_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// Request identifier: JSON-RPC allows integers and strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(id) => write!(f, "{id}"),
            RequestId::String(id) => write!(f, "{id:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier
    pub id: RequestId,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (matches the request); null when it could not be read
    pub id: Option<RequestId>,

    /// Either `result` or `error`
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

#[allow(dead_code)]
impl JsonRpcResponse {
    /// Error carried by this response, if it is a failure
    pub fn error(&self) -> Option<&JsonRpcErrorObject> {
        match &self.payload {
            ResponsePayload::Error { error } => Some(error),
            ResponsePayload::Result { .. } => None,
        }
    }

    /// Convert into the outcome a waiting caller sees
    pub fn into_result(self) -> Result<Value, ServerError> {
        match self.payload {
            ResponsePayload::Result { result } => Ok(result),
            ResponsePayload::Error { error } => Err(error.into()),
        }
    }
}

/// Outcome half of a response. `result: null` is a valid success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Result { result: Value },
    Error { error: JsonRpcErrorObject },
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Optional additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Messages
// ============================================================================

/// Any message that travels over the channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

/// A body that could not be decoded into a [`Message`]
///
/// Carries the id when one could be recovered, so the error response can be
/// correlated by the peer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct DecodeError {
    pub id: Option<RequestId>,
    pub error: ServerError,
}

impl DecodeError {
    fn invalid(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            error: ServerError::InvalidRequest(reason.into()),
        }
    }
}

impl Message {
    /// Decode a frame body
    ///
    /// Invalid JSON is a parse error; valid JSON that is not a JSON-RPC 2.0
    /// request, notification or response is an invalid request.
    pub fn decode(body: &str) -> Result<Message, DecodeError> {
        let value: Value = serde_json::from_str(body).map_err(|e| DecodeError {
            id: None,
            error: ServerError::Parse(e.to_string()),
        })?;

        let Value::Object(object) = &value else {
            return Err(DecodeError::invalid(None, "expected a JSON object"));
        };

        let id = object
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
        let version_ok = object.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION);
        let has_method = object.contains_key("method");
        let has_id = object.contains_key("id");
        let has_outcome = object.contains_key("result") || object.contains_key("error");

        if !version_ok {
            return Err(DecodeError::invalid(id, "jsonrpc must be \"2.0\""));
        }

        let decoded = if has_method && has_id {
            serde_json::from_value(value).map(Message::Request)
        } else if has_method {
            serde_json::from_value(value).map(Message::Notification)
        } else if has_id && has_outcome {
            serde_json::from_value(value).map(Message::Response)
        } else {
            return Err(DecodeError::invalid(
                id,
                "message has neither a method nor a result/error",
            ));
        };

        decoded.map_err(|e| DecodeError::invalid(id, e.to_string()))
    }

    /// Encode as a frame body
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(request: JsonRpcRequest) -> Self {
        Message::Request(request)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(notification: JsonRpcNotification) -> Self {
        Message::Notification(notification)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(response: JsonRpcResponse) -> Self {
        Message::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::{MockTransport, Transport};
    use crate::lsp::framing::LspFraming;
    use crate::lsp::jsonrpc_utils::{error_response, success_response};
    use serde_json::json;

    /// Push a message through one framing layer and read it back through another
    async fn round_trip(message: &Message) -> Message {
        let mut sender = LspFraming::new(MockTransport::new());
        sender.send(&message.encode().unwrap()).await.unwrap();
        let wire = sender.transport().sent_messages();

        let mut receiver = LspFraming::new(MockTransport::with_responses(wire));
        let body = receiver.receive().await.unwrap().unwrap();
        Message::decode(&body).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_integer_and_string_ids() {
        let messages = vec![
            Message::from(JsonRpcRequest::new(1, "initialize", Some(json!({})))),
            Message::from(JsonRpcRequest::new("req-1", "shutdown", None)),
            Message::from(JsonRpcNotification::new("exit", None)),
            Message::from(success_response(RequestId::Number(-3), json!({"a": [1, 2]}))),
            Message::from(success_response(RequestId::String("x".into()), Value::Null)),
            Message::from(error_response(
                Some(RequestId::String("y".into())),
                &ServerError::ServerNotInitialized,
            )),
        ];

        for message in messages {
            assert_eq!(round_trip(&message).await, message);
        }
    }

    #[test]
    fn test_decode_request() {
        let message =
            Message::decode(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
                .unwrap();
        match message {
            Message::Request(request) => {
                assert_eq!(request.id, RequestId::Number(1));
                assert_eq!(request.method, "initialize");
                assert_eq!(request.params, Some(json!({})));
            }
            other => panic!("Expected request, got: {other:?}"),
        }
    }

    #[test]
    fn test_decode_notification_without_params() {
        let message = Message::decode(r#"{"jsonrpc":"2.0","method":"exit"}"#).unwrap();
        assert_eq!(message, Message::from(JsonRpcNotification::new("exit", None)));
        assert_eq!(message.method(), Some("exit"));
    }

    #[test]
    fn test_decode_response_variants() {
        let ok = Message::decode(r#"{"jsonrpc":"2.0","id":"a","result":null}"#).unwrap();
        let Message::Response(ok) = ok else {
            panic!("Expected response");
        };
        assert_eq!(ok.clone().into_result(), Ok(Value::Null));

        let err = Message::decode(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        let Message::Response(err) = err else {
            panic!("Expected response");
        };
        assert_eq!(err.error().map(|e| e.code), Some(-32601));
    }

    #[test]
    fn test_decode_invalid_json_is_parse_error() {
        let error = Message::decode(r#"{"jsonrpc":"2.0","id":1"#).unwrap_err();
        assert_eq!(error.id, None);
        assert!(matches!(error.error, ServerError::Parse(_)));
    }

    #[test]
    fn test_decode_wrong_version_keeps_id() {
        let error = Message::decode(r#"{"jsonrpc":"1.0","id":9,"method":"x"}"#).unwrap_err();
        assert_eq!(error.id, Some(RequestId::Number(9)));
        assert!(matches!(error.error, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn test_decode_rejects_non_messages() {
        for body in [
            "[]",
            "42",
            r#"{"jsonrpc":"2.0"}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","id":null,"method":"x"}"#,
            r#"{"jsonrpc":"2.0","id":1.5,"method":"x"}"#,
            r#"{"jsonrpc":"2.0","method":7}"#,
        ] {
            let error = Message::decode(body).unwrap_err();
            assert!(
                matches!(error.error, ServerError::InvalidRequest(_)),
                "{body} decoded to {error:?}"
            );
        }
    }

    #[test]
    fn test_encode_field_order() {
        let response = success_response(RequestId::Number(1), json!({"capabilities": {}}));
        assert_eq!(
            Message::from(response).encode().unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}"#
        );
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId::Number(4).to_string(), "4");
        assert_eq!(RequestId::String("abc".into()).to_string(), "\"abc\"");
    }
}

use crate::lsp::jsonrpc_utils::error_codes;
use crate::lsp::protocol::JsonRpcErrorObject;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced to the peer as JSON-RPC error responses
///
/// Everything here is recoverable at the session level; channel failures are
/// reported through [`crate::lsp::framing::FramingError`] and end the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Server not initialized")]
    ServerNotInitialized,

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("Remote error ({code}): {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },
}

impl ServerError {
    /// JSON-RPC / LSP error code for this error
    pub fn code(&self) -> i32 {
        match self {
            ServerError::Parse(_) => error_codes::PARSE_ERROR,
            ServerError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            ServerError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            ServerError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            ServerError::Internal(_) => error_codes::INTERNAL_ERROR,
            ServerError::ServerNotInitialized => error_codes::SERVER_NOT_INITIALIZED,
            ServerError::RequestCancelled => error_codes::REQUEST_CANCELLED,
            ServerError::TransportDisconnected => error_codes::INTERNAL_ERROR,
            ServerError::Remote { code, .. } => *code,
        }
    }

    /// Build the error object carried by a response
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        let data = match self {
            ServerError::Remote { data, .. } => data.clone(),
            _ => None,
        };

        JsonRpcErrorObject {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }
}

impl From<JsonRpcErrorObject> for ServerError {
    fn from(error: JsonRpcErrorObject) -> Self {
        ServerError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

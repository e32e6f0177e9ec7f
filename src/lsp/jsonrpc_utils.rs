//! JSON-RPC 2.0 protocol utilities
//!
//! Provides constants and response builders for working with
//! JSON-RPC 2.0 as per https://www.jsonrpc.org/specification
//! plus the error codes LSP reserves on top of it.

use crate::lsp::error::ServerError;
use crate::lsp::protocol::{JsonRpcResponse, RequestId, ResponsePayload};
use serde_json::Value;

// ============================================================================
// JSON-RPC 2.0 Constants
// ============================================================================

/// JSON-RPC 2.0 version identifier
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 and LSP error codes
/// https://www.jsonrpc.org/specification#error_object
#[allow(dead_code)]
pub mod error_codes {
    /// Parse error - Invalid JSON was received by the server.
    pub const PARSE_ERROR: i32 = -32700;

    /// Invalid Request - The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;

    /// Method not found - The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid params - Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal error - Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// LSP: a request arrived before `initialize`.
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;

    /// LSP: the request was cancelled by `$/cancelRequest`.
    pub const REQUEST_CANCELLED: i32 = -32800;
}

// ============================================================================
// JSON-RPC Response Builders
// ============================================================================

/// Create a successful JSON-RPC response
pub fn success_response(id: RequestId, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(id),
        payload: ResponsePayload::Result { result },
    }
}

/// Create a JSON-RPC error response
///
/// `id` is `None` only when the offending message's id could not be read.
pub fn error_response(id: Option<RequestId>, error: &ServerError) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        payload: ResponsePayload::Error {
            error: error.to_error_object(),
        },
    }
}

/// Turn a handler outcome into the response for request `id`
pub fn response_from_result(id: RequestId, result: Result<Value, ServerError>) -> JsonRpcResponse {
    match result {
        Ok(value) => success_response(id, value),
        Err(error) => error_response(Some(id), &error),
    }
}

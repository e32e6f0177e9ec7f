//! Built-in method handlers
//!
//! The lifecycle set (`initialize`, `initialized`, `shutdown`, `exit`) plus the
//! document features this server advertises. There is no analysis engine
//! behind the document features: requests are validated and answered with
//! `null`, which the protocol defines as "no result".

use crate::lsp::capabilities::server_capabilities;
use crate::lsp::error::ServerError;
use crate::lsp::registry::{HandlerContext, HandlerRegistry, HandlerResult, parse_params};
use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Exit,
    Initialized, Notification as _,
};
use lsp_types::request::{
    DocumentHighlightRequest, DocumentSymbolRequest, Formatting, GotoDefinition, HoverRequest,
    Initialize, References, Rename, Request as _, SemanticTokensFullRequest, Shutdown,
};
use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, DocumentFormattingParams, DocumentHighlightParams,
    DocumentSymbolParams, GotoDefinitionParams, HoverParams, InitializeParams, InitializeResult,
    InitializedParams, ReferenceParams, RenameParams, SemanticTokensParams,
    ServerInfo,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registry with only the lifecycle handlers
pub fn bootstrap_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .request(Initialize::METHOD, initialize)
        .notification(Initialized::METHOD, initialized)
        .request(Shutdown::METHOD, shutdown)
        .notification(Exit::METHOD, exit)
}

/// Lifecycle handlers plus the advertised document features
pub fn default_registry() -> HandlerRegistry {
    register_document_features(bootstrap_registry())
}

/// Add text synchronization and the document request stubs
pub fn register_document_features(registry: HandlerRegistry) -> HandlerRegistry {
    registry
        .notification(DidOpenTextDocument::METHOD, document_event::<DidOpenTextDocumentParams>)
        .notification(DidChangeTextDocument::METHOD, document_event::<DidChangeTextDocumentParams>)
        .notification(DidSaveTextDocument::METHOD, document_event::<DidSaveTextDocumentParams>)
        .notification(DidCloseTextDocument::METHOD, document_event::<DidCloseTextDocumentParams>)
        .request(HoverRequest::METHOD, no_result::<HoverParams>)
        .request(GotoDefinition::METHOD, no_result::<GotoDefinitionParams>)
        .request(References::METHOD, no_result::<ReferenceParams>)
        .request(DocumentHighlightRequest::METHOD, no_result::<DocumentHighlightParams>)
        .request(DocumentSymbolRequest::METHOD, no_result::<DocumentSymbolParams>)
        .request(Formatting::METHOD, no_result::<DocumentFormattingParams>)
        .request(Rename::METHOD, no_result::<RenameParams>)
        .request(SemanticTokensFullRequest::METHOD, no_result::<SemanticTokensParams>)
}

fn initialize(ctx: &mut HandlerContext<'_>, params: Option<Value>) -> HandlerResult {
    ctx.session.begin_initialize()?;

    // Params are informational only; an empty object is accepted
    match params.as_ref().map(InitializeParams::deserialize) {
        Some(Ok(params)) => match params.client_info {
            Some(client) => info!(
                "Initializing for {} {}",
                client.name,
                client.version.unwrap_or_default()
            ),
            None => info!("Initializing for unnamed client"),
        },
        Some(Err(e)) => debug!("Lenient initialize params: {}", e),
        None => debug!("initialize sent without params"),
    }

    let capabilities = server_capabilities(ctx.registry);
    let result = InitializeResult {
        capabilities: capabilities.clone(),
        server_info: Some(ServerInfo {
            name: SERVER_NAME.to_string(),
            version: Some(SERVER_VERSION.to_string()),
        }),
    };

    let value = match serde_json::to_value(&result) {
        Ok(value) => value,
        Err(e) => {
            ctx.session.abort_initialize();
            return Err(ServerError::Internal(format!(
                "failed to encode initialize result: {e}"
            )));
        }
    };

    if let Err(e) = ctx.session.complete_initialize(capabilities) {
        ctx.session.abort_initialize();
        return Err(e);
    }

    Ok(value)
}

fn initialized(_ctx: &mut HandlerContext<'_>, params: Option<Value>) -> HandlerResult {
    let _: Option<InitializedParams> = parse_params(params)?;
    info!("Client confirmed initialization");
    Ok(Value::Null)
}

fn shutdown(ctx: &mut HandlerContext<'_>, _params: Option<Value>) -> HandlerResult {
    ctx.session.begin_shutdown()?;
    Ok(Value::Null)
}

fn exit(ctx: &mut HandlerContext<'_>, _params: Option<Value>) -> HandlerResult {
    let reason = ctx.session.exit();
    info!("exit received: {} (status {})", reason, reason.exit_code());
    Ok(Value::Null)
}

/// Validate params for a document request that has nothing to report
fn no_result<P: DeserializeOwned>(
    ctx: &mut HandlerContext<'_>,
    params: Option<Value>,
) -> HandlerResult {
    let _: P = parse_params(params)?;
    ctx.check_cancelled()?;
    debug!("{}: no analysis engine, answering null", ctx.method);
    Ok(Value::Null)
}

/// Validate and log a text synchronization notification
fn document_event<P: DeserializeOwned>(
    ctx: &mut HandlerContext<'_>,
    params: Option<Value>,
) -> HandlerResult {
    let uri = params
        .as_ref()
        .and_then(|p| p.pointer("/textDocument/uri"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let _: P = parse_params(params)?;
    debug!("{}: {}", ctx.method, uri.as_deref().unwrap_or("<unknown>"));
    Ok(Value::Null)
}

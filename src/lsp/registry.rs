//! Method name → handler mapping
//!
//! Built once at startup and shared read-only for the life of the process.

use crate::lsp::client::Client;
use crate::lsp::error::ServerError;
use crate::lsp::session::Session;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type HandlerResult = Result<Value, ServerError>;

/// Everything a handler may look at or change while it runs
///
/// Handlers run while the session lock is held, so `session` can be mutated
/// without further synchronization.
#[allow(dead_code)]
pub struct HandlerContext<'a> {
    /// Method being handled
    pub method: &'a str,
    pub session: &'a mut Session,
    pub registry: &'a HandlerRegistry,
    pub client: &'a Client,
    cancellation: &'a CancellationToken,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        method: &'a str,
        session: &'a mut Session,
        registry: &'a HandlerRegistry,
        client: &'a Client,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            method,
            session,
            registry,
            client,
            cancellation,
        }
    }

    /// Whether the peer asked to cancel this request
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Bail out with `RequestCancelled` if the peer cancelled this request
    pub fn check_cancelled(&self) -> Result<(), ServerError> {
        if self.is_cancelled() {
            Err(ServerError::RequestCancelled)
        } else {
            Ok(())
        }
    }
}

/// A request or notification handler
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &mut HandlerContext<'_>, params: Option<Value>) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut HandlerContext<'_>, Option<Value>) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &mut HandlerContext<'_>, params: Option<Value>) -> HandlerResult {
        self(ctx, params)
    }
}

/// Whether a method is answered (request) or fire-and-forget (notification)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Request,
    Notification,
}

#[derive(Clone)]
pub struct HandlerEntry {
    kind: HandlerKind,
    handler: Arc<dyn Handler>,
}

impl HandlerEntry {
    #[allow(dead_code)]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler, replacing any previous one for `method`
    pub fn request(self, method: &str, handler: impl Handler + 'static) -> Self {
        self.insert(method, HandlerKind::Request, Arc::new(handler))
    }

    /// Register a notification handler, replacing any previous one for `method`
    pub fn notification(self, method: &str, handler: impl Handler + 'static) -> Self {
        self.insert(method, HandlerKind::Notification, Arc::new(handler))
    }

    fn insert(mut self, method: &str, kind: HandlerKind, handler: Arc<dyn Handler>) -> Self {
        if self
            .handlers
            .insert(method.to_string(), HandlerEntry { kind, handler })
            .is_some()
        {
            debug!("HandlerRegistry: replaced handler for {}", method);
        }
        self
    }

    pub fn lookup(&self, method: &str) -> Option<&HandlerEntry> {
        self.handlers.get(method)
    }

    /// Handler for `method` if it is registered with the given kind
    pub fn lookup_kind(&self, method: &str, kind: HandlerKind) -> Option<&HandlerEntry> {
        self.lookup(method).filter(|entry| entry.kind == kind)
    }

    pub fn handles_request(&self, method: &str) -> bool {
        self.lookup_kind(method, HandlerKind::Request).is_some()
    }

    pub fn handles_notification(&self, method: &str) -> bool {
        self.lookup_kind(method, HandlerKind::Notification).is_some()
    }

    /// Registered methods, sorted by name
    pub fn methods(&self) -> Vec<(&str, HandlerKind)> {
        let mut methods: Vec<_> = self
            .handlers
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.kind))
            .collect();
        methods.sort_unstable_by_key(|(name, _)| *name);
        methods
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Deserialize handler params, treating absent params as `null`
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ServerError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ServerError::InvalidParams(e.to_string()))
}

//! LSP session lifecycle
//!
//! Tracks where the session is in the protocol lifecycle and enforces which
//! messages may be processed in each state:
//!
//! ```text
//! Uninitialized --initialize--> Initializing --capabilities--> Initialized
//! Initialized --shutdown--> ShuttingDown --exit--> Exited
//! any state --exit / disconnect / transport failure--> Exited
//! ```
//!
//! Reaching `Exited` publishes an [`ExitReason`] on a watch channel. Any number
//! of [`Termination`] handles can wait for it.

use crate::lsp::error::ServerError;
use lsp_types::ServerCapabilities;
use lsp_types::notification::{Exit, Notification as _};
use lsp_types::request::{Initialize, Request as _};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
    Exited,
}

/// Why the session reached `Exited`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// `exit` after `shutdown`
    Clean,
    /// `exit` without a preceding `shutdown`
    ExitWithoutShutdown,
    /// The peer closed the stream
    Disconnected,
    /// Framing or I/O failure on the channel
    TransportFailure(String),
}

impl ExitReason {
    /// Process exit status for this reason
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Clean => 0,
            _ => 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, ExitReason::Clean)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Clean => write!(f, "exit after shutdown"),
            ExitReason::ExitWithoutShutdown => write!(f, "exit received before shutdown"),
            ExitReason::Disconnected => write!(f, "peer disconnected"),
            ExitReason::TransportFailure(e) => write!(f, "transport failure: {e}"),
        }
    }
}

/// Observer side of the termination signal
#[derive(Debug, Clone)]
pub struct Termination {
    receiver: watch::Receiver<Option<ExitReason>>,
}

impl Termination {
    /// Wait until the session has exited
    ///
    /// Returns immediately if it already has. A session dropped without ever
    /// exiting reads as a disconnect.
    pub async fn wait(&self) -> ExitReason {
        let mut receiver = self.receiver.clone();
        let reason = match receiver.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        reason
            .or_else(|| receiver.borrow().clone())
            .unwrap_or(ExitReason::Disconnected)
    }

    /// The exit reason, if the session has exited
    pub fn reason(&self) -> Option<ExitReason> {
        self.receiver.borrow().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.receiver.borrow().is_some()
    }
}

/// Mutable session state: lifecycle position plus negotiated capabilities
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    capabilities: Option<Arc<ServerCapabilities>>,
    exit_signal: watch::Sender<Option<ExitReason>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (exit_signal, _) = watch::channel(None);
        Self {
            state: SessionState::Uninitialized,
            capabilities: None,
            exit_signal,
        }
    }

    /// New observer of this session's termination
    pub fn termination(&self) -> Termination {
        Termination {
            receiver: self.exit_signal.subscribe(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_exited(&self) -> bool {
        self.state == SessionState::Exited
    }

    /// Capabilities negotiated by `initialize`, once it has completed
    #[allow(dead_code)]
    pub fn capabilities(&self) -> Option<Arc<ServerCapabilities>> {
        self.capabilities.clone()
    }

    /// Lifecycle guard for an incoming request
    pub fn admit_request(&self, method: &str) -> Result<(), ServerError> {
        match self.state {
            SessionState::Uninitialized if method == Initialize::METHOD => Ok(()),
            SessionState::Uninitialized => Err(ServerError::ServerNotInitialized),
            SessionState::Initializing => Err(ServerError::InvalidRequest(
                "server is initializing".to_string(),
            )),
            SessionState::Initialized => Ok(()),
            SessionState::ShuttingDown => Err(ServerError::InvalidRequest(
                "server is shutting down".to_string(),
            )),
            SessionState::Exited => Err(ServerError::InvalidRequest(
                "session has exited".to_string(),
            )),
        }
    }

    /// Lifecycle guard for an incoming notification
    ///
    /// `exit` is always admitted until the session has exited; everything else
    /// needs an initialized, running session.
    pub fn admit_notification(&self, method: &str) -> bool {
        match self.state {
            SessionState::Exited => false,
            _ if method == Exit::METHOD => true,
            SessionState::Initialized => true,
            SessionState::Uninitialized
            | SessionState::Initializing
            | SessionState::ShuttingDown => false,
        }
    }

    /// Uninitialized → Initializing
    pub fn begin_initialize(&mut self) -> Result<(), ServerError> {
        if self.state != SessionState::Uninitialized {
            return Err(ServerError::InvalidRequest(
                "server already initialized".to_string(),
            ));
        }
        self.state = SessionState::Initializing;
        debug!("Session: Initializing");
        Ok(())
    }

    /// Initializing → Initialized, storing the capability snapshot
    pub fn complete_initialize(
        &mut self,
        capabilities: ServerCapabilities,
    ) -> Result<Arc<ServerCapabilities>, ServerError> {
        if self.state != SessionState::Initializing {
            return Err(ServerError::Internal(format!(
                "cannot complete initialization from state {:?}",
                self.state
            )));
        }
        let capabilities = Arc::new(capabilities);
        self.capabilities = Some(Arc::clone(&capabilities));
        self.state = SessionState::Initialized;
        info!("Session: Initialized");
        Ok(capabilities)
    }

    /// Roll a failed initialization back to Uninitialized
    pub fn abort_initialize(&mut self) {
        if self.state == SessionState::Initializing {
            warn!("Session: initialization aborted");
            self.state = SessionState::Uninitialized;
            self.capabilities = None;
        }
    }

    /// Initialized → ShuttingDown
    pub fn begin_shutdown(&mut self) -> Result<(), ServerError> {
        match self.state {
            SessionState::Initialized => {
                self.state = SessionState::ShuttingDown;
                info!("Session: Shutting down");
                Ok(())
            }
            SessionState::Uninitialized | SessionState::Initializing => {
                Err(ServerError::ServerNotInitialized)
            }
            SessionState::ShuttingDown => Err(ServerError::InvalidRequest(
                "shutdown already requested".to_string(),
            )),
            SessionState::Exited => Err(ServerError::InvalidRequest(
                "session has exited".to_string(),
            )),
        }
    }

    /// Handle `exit`: clean only if shutdown came first
    pub fn exit(&mut self) -> ExitReason {
        let reason = if self.state == SessionState::ShuttingDown {
            ExitReason::Clean
        } else {
            ExitReason::ExitWithoutShutdown
        };
        self.terminate(reason)
    }

    /// Move to Exited from any state and publish the reason
    ///
    /// The first reason wins; later calls return it unchanged.
    pub fn terminate(&mut self, reason: ExitReason) -> ExitReason {
        if self.state == SessionState::Exited {
            return self.exit_signal.borrow().clone().unwrap_or(reason);
        }

        if reason.is_clean() {
            info!("Session: Exited ({})", reason);
        } else {
            warn!("Session: Exited ({})", reason);
        }

        self.state = SessionState::Exited;
        self.exit_signal.send_replace(Some(reason.clone()));
        reason
    }
}

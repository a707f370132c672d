//! Request-scoped cancellation tied to transport liveness.

use crate::{Error, Result};
use compact_str::CompactString;
use futures_util::future::BoxFuture;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tokio::sync::mpsc;

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const CLOSED: u8 = 2;

/// State of a [`CancelToken`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Generation may continue
    Active,
    /// The client went away or the caller cancelled
    Cancelled,
    /// The owning scope exited
    Closed,
}

/// A one-way cancellation flag for one request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicU8>);

impl CancelToken {
    /// A fresh active token
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state
    pub fn state(&self) -> TokenState {
        match self.0.load(Ordering::Acquire) {
            ACTIVE => TokenState::Active,
            CANCELLED => TokenState::Cancelled,
            _ => TokenState::Closed,
        }
    }

    /// Whether the token left the active state
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) != ACTIVE
    }

    /// Move from active to cancelled. Returns false if it already left
    /// the active state.
    pub fn cancel(&self) -> bool {
        self.0
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Close the token
    pub fn close(&self) {
        self.0.fetch_max(CLOSED, Ordering::AcqRel);
    }
}

/// The connection a request arrived on.
pub trait Transport: Send + Sync {
    /// Whether the client is still there to receive frames
    fn is_connected(&self) -> bool;

    /// Resolves once the client is gone.
    ///
    /// Transports that cannot signal closure never resolve and are only
    /// checked through [`Transport::is_connected`].
    fn closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(std::future::pending())
    }
}

/// The sending half of a response body channel: once the body is dropped,
/// the receiver closes and the client is gone.
impl<T: Send> Transport for mpsc::Sender<T> {
    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    fn closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(mpsc::Sender::closed(self))
    }
}

/// Binds one generation to the liveness of its transport.
///
/// Without a transport the scope never cancels on its own. Dropping the
/// scope closes its token.
pub struct CancelScope {
    id: CompactString,
    token: CancelToken,
    transport: Option<Arc<dyn Transport>>,
}

impl CancelScope {
    /// Enter a scope for one request
    pub fn enter(transport: Option<Arc<dyn Transport>>) -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        tracing::debug!(scope = %id, transport = transport.is_some(), "cancel scope entered");
        Self {
            id: id.into(),
            token: CancelToken::new(),
            transport,
        }
    }

    /// A scope with no transport
    pub fn detached() -> Self {
        Self::enter(None)
    }

    /// Short id used in logs
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A handle on this scope's token
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Cancel explicitly
    pub fn cancel(&self) {
        if self.token.cancel() {
            tracing::debug!(scope = %self.id, "cancel scope cancelled by caller");
        }
    }

    /// Whether the scope was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Yield to the scheduler, then check liveness. Returns true once the
    /// scope is cancelled; the caller must stop producing.
    pub async fn wait(&self) -> bool {
        tokio::task::yield_now().await;
        if self.token.is_cancelled() {
            return true;
        }

        match &self.transport {
            Some(transport) if !transport.is_connected() => {
                if self.token.cancel() {
                    tracing::debug!(scope = %self.id, "client disconnected");
                }
                true
            }
            _ => false,
        }
    }

    /// Resolves once the transport closes, cancelling the scope. Never
    /// resolves for a scope without a transport.
    pub async fn closed(&self) {
        match &self.transport {
            Some(transport) => {
                transport.closed().await;
                if self.token.cancel() {
                    tracing::debug!(scope = %self.id, "client disconnected while idle");
                }
            }
            None => std::future::pending().await,
        }
    }

    /// Leave the scope, treating cancellation as a normal early end
    pub fn exit<T>(self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(Error::Cancelled) => {
                tracing::debug!(scope = %self.id, "generation cancelled");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        self.token.close();
        tracing::debug!(scope = %self.id, "cancel scope closed");
    }
}

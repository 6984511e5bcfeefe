//! The seam between the client and whatever carries lite server queries.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::tl::{LiteRequest, LiteResponse};

/// Cancellation and deadline of a single query.
///
/// Cloning a context shares its cancellation token, so canceling any clone
/// cancels them all.
#[derive(Clone, Debug, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// A context that is never canceled and has no deadline of its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    /// Sets the deadline.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Ties this context to an existing cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The deadline, if any.
    pub fn get_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token of this context.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel()
    }

    /// Whether the context was canceled.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Errors a transport reports.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TransportError {
    /// The deadline passed before a response arrived.
    #[error("Query timed out!")]
    Timeout,

    /// The query was canceled.
    #[error("Query was canceled!")]
    Canceled,

    /// The connection to the server failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server sent something that could not be framed or parsed.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Sends a typed request to a lite server and waits for the typed response.
///
/// Implementations should honor `ctx` themselves where they can. The client
/// also races every query against `ctx`, so a transport that ignores it is
/// still abandoned on cancellation or timeout.
pub trait LiteTransport: Send + Sync {
    /// Performs one round trip.
    fn query(
        &self,
        ctx: &QueryContext,
        req: LiteRequest,
    ) -> impl Future<Output = Result<LiteResponse, TransportError>> + Send;
}

impl<T: LiteTransport> LiteTransport for std::sync::Arc<T> {
    fn query(
        &self,
        ctx: &QueryContext,
        req: LiteRequest,
    ) -> impl Future<Output = Result<LiteResponse, TransportError>> + Send {
        (**self).query(ctx, req)
    }
}

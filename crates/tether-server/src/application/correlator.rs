//! Command dispatch and call/response correlation.
//!
//! Three ways to run a command in a peer:
//!
//! | Operation | Wire kind  | Answer                                   |
//! |-----------|------------|------------------------------------------|
//! | `execute` | `execute`  | none                                     |
//! | `query`   | `evaluate` | one value, delivered to a [`PendingQuery`] |
//! | `listen`  | `listen`   | any number of values, via a [`Subscription`] |
//!
//! Every operation is synchronous up to the point where the frame is handed
//! to the session's outbound channel, and is annotated `#[track_caller]` so
//! that in debug mode the diagnostic record points at application code.
//!
//! A query's pending entry is removed exactly once: when the answer arrives,
//! when its timeout elapses, when the session is torn down, or when the
//! [`PendingQuery`] is dropped unanswered.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::FusedFuture;
use futures_util::stream::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tracing::{debug, trace};

use tether_core::{
    encode_outbound, CallbackId, DiagnosticToken, DispatchAction, OriginTrace, OutboundMessage,
    SessionId,
};

use super::callbacks::{PendingCallback, QueryReply};
use super::error::{DispatchError, InboundError, QueryError};
use super::registry::SessionRegistry;
use super::session::Session;

// ── Correlator ────────────────────────────────────────────────────────────────

pub struct Correlator {
    registry: Arc<SessionRegistry>,
    diagnostics: bool,
    query_timeout: Option<Duration>,
}

impl Correlator {
    /// `diagnostics` enables origin capture for every command;
    /// `query_timeout` bounds how long a query waits (`None` waits forever).
    pub fn new(
        registry: Arc<SessionRegistry>,
        diagnostics: bool,
        query_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            diagnostics,
            query_timeout,
        }
    }

    /// Sends a fire-and-forget command.
    #[track_caller]
    pub fn execute(&self, session_id: &SessionId, command: &str) -> Result<(), DispatchError> {
        let session = self.session(session_id)?;
        let token = self.record(&session, command, DispatchAction::Executing);
        let message = OutboundMessage::execute(session_id.clone(), command, token.clone());
        send(&session, &message).map_err(|e| {
            forget_token(&session, token.as_ref());
            e
        })
    }

    /// Sends a command whose value the peer sends back once.
    ///
    /// Dispatch failures are reported through the returned future, so the
    /// call site reads the same whether or not the session exists.
    #[track_caller]
    pub fn query(&self, session_id: &SessionId, command: &str) -> PendingQuery<String> {
        self.query_map(session_id, command, |text| text)
    }

    /// Like [`Correlator::query`], transforming the raw answer with `mapper`.
    #[track_caller]
    pub fn query_map<T, F>(
        &self,
        session_id: &SessionId,
        command: &str,
        mapper: F,
    ) -> PendingQuery<T>
    where
        F: FnOnce(String) -> T + Send + 'static,
    {
        let session = match self.session(session_id) {
            Ok(session) => session,
            Err(e) => return PendingQuery::failed(e.into()),
        };
        let id = session.next_callback_id();
        let token = self.record(&session, command, DispatchAction::Evaluating);
        let (reply, receiver) = oneshot::channel();
        session.callbacks().register(
            id,
            PendingCallback::Once {
                reply,
                token: token.clone(),
            },
        );
        let guard = PendingGuard::new(&session, id, token.clone());
        let message = OutboundMessage::evaluate(session_id.clone(), command, id, token);
        if let Err(e) = send(&session, &message) {
            return PendingQuery::failed(e.into());
        }
        trace!(session = %session_id, callback = id, "query dispatched");
        PendingQuery::waiting(receiver, Box::new(mapper), self.query_timeout, guard)
    }

    /// Sends a command that may call `emit(value)` any number of times.
    ///
    /// The command text runs as a function body with `emit` in scope.  The
    /// subscription stays registered until the returned [`Subscription`] is
    /// dropped or the session ends.
    #[track_caller]
    pub fn listen(&self, session_id: &SessionId, command: &str) -> Result<Subscription, DispatchError> {
        let session = self.session(session_id)?;
        let id = session.next_callback_id();
        let token = if self.diagnostics {
            Some(session.diagnostics().record_pinned(
                command,
                DispatchAction::ExecutingWithCallback,
                OriginTrace::capture(),
            ))
        } else {
            None
        };
        let (tx, rx) = mpsc::unbounded_channel();
        session.callbacks().register(id, PendingCallback::Stream(tx));
        let guard = PendingGuard::new(&session, id, token.clone());
        let message = OutboundMessage::listen(session_id.clone(), command, id, token);
        send(&session, &message)?;
        Ok(Subscription {
            id,
            receiver: rx,
            _guard: guard,
        })
    }

    /// Delivers an answer from the peer to whoever is waiting on `id`.
    ///
    /// A missing result is delivered as the empty string.
    pub fn resolve(
        &self,
        session: &Session,
        id: CallbackId,
        result: Option<String>,
    ) -> Result<(), InboundError> {
        let value = result.unwrap_or_default();
        match session.callbacks().fire(id) {
            None => Err(InboundError::UnknownCallback {
                session: session.id().clone(),
                id,
            }),
            Some(PendingCallback::Once { reply, token }) => {
                forget_token(session, token.as_ref());
                if reply.send(Ok(value)).is_err() {
                    debug!(session = %session.id(), callback = id, "query abandoned before its answer arrived");
                }
                Ok(())
            }
            Some(PendingCallback::Stream(tx)) => {
                if tx.send(value).is_err() {
                    debug!(session = %session.id(), callback = id, "subscription dropped before delivery");
                }
                Ok(())
            }
        }
    }

    fn session(&self, id: &SessionId) -> Result<Arc<Session>, DispatchError> {
        self.registry
            .get(id)
            .ok_or_else(|| DispatchError::UnknownSession(id.clone()))
    }

    #[track_caller]
    fn record(
        &self,
        session: &Session,
        command: &str,
        action: DispatchAction,
    ) -> Option<DiagnosticToken> {
        if self.diagnostics {
            Some(
                session
                    .diagnostics()
                    .record(command, action, OriginTrace::capture()),
            )
        } else {
            None
        }
    }
}

fn send(session: &Session, message: &OutboundMessage) -> Result<(), DispatchError> {
    let frame = encode_outbound(message)?;
    session
        .channel()
        .send(frame)
        .map_err(|source| DispatchError::Channel {
            session: session.id().clone(),
            source,
        })
}

fn forget_token(session: &Session, token: Option<&DiagnosticToken>) {
    if let Some(token) = token {
        session.diagnostics().discard(token);
    }
}

// ── Pending entry guard ───────────────────────────────────────────────────────

/// Removes a callback entry and its diagnostic record when dropped, unless
/// disarmed first.
struct PendingGuard {
    session: Weak<Session>,
    id: CallbackId,
    token: Option<DiagnosticToken>,
    armed: bool,
}

impl PendingGuard {
    fn new(session: &Arc<Session>, id: CallbackId, token: Option<DiagnosticToken>) -> Self {
        Self {
            session: Arc::downgrade(session),
            id,
            token,
            armed: true,
        }
    }

    /// The entry is already gone; nothing to clean up.
    fn disarm(&mut self) {
        self.armed = false;
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.armed, false) {
            return;
        }
        if let Some(session) = self.session.upgrade() {
            session.callbacks().forget(self.id);
            forget_token(&session, self.token.as_ref());
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ── PendingQuery ──────────────────────────────────────────────────────────────

type Mapper<T> = Box<dyn FnOnce(String) -> T + Send>;

/// Future resolving to a query's answer.
///
/// Once it has resolved, polling again stays pending; use
/// [`FusedFuture::is_terminated`] to tell.  Dropping it before completion unregisters the query; a late answer is
/// then reported as an unknown callback.
#[must_use = "a query does nothing useful unless awaited"]
pub struct PendingQuery<T> {
    state: QueryState<T>,
}

enum QueryState<T> {
    Failed(QueryError),
    Waiting {
        receiver: oneshot::Receiver<QueryReply>,
        mapper: Mapper<T>,
        timeout: Option<Duration>,
        deadline: Option<Pin<Box<Sleep>>>,
        guard: PendingGuard,
    },
    Done,
}

impl<T> PendingQuery<T> {
    fn failed(error: QueryError) -> Self {
        Self {
            state: QueryState::Failed(error),
        }
    }

    fn waiting(
        receiver: oneshot::Receiver<QueryReply>,
        mapper: Mapper<T>,
        timeout: Option<Duration>,
        guard: PendingGuard,
    ) -> Self {
        Self {
            state: QueryState::Waiting {
                receiver,
                mapper,
                timeout,
                deadline: None,
                guard,
            },
        }
    }

    /// Callback id on the wire, or `None` if dispatch already failed.
    pub fn callback_id(&self) -> Option<CallbackId> {
        match &self.state {
            QueryState::Waiting { guard, .. } => Some(guard.id),
            _ => None,
        }
    }
}

impl<T> Future for PendingQuery<T> {
    type Output = Result<T, QueryError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            QueryState::Failed(_) => None,
            QueryState::Waiting {
                receiver,
                timeout,
                deadline,
                guard,
                ..
            } => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(reply)) => {
                    guard.disarm();
                    Some(reply)
                }
                Poll::Ready(Err(_)) => {
                    guard.disarm();
                    Some(Err(QueryError::Disconnected))
                }
                Poll::Pending => {
                    let Some(limit) = *timeout else {
                        return Poll::Pending;
                    };
                    let sleep = deadline.get_or_insert_with(|| Box::pin(tokio::time::sleep(limit)));
                    if sleep.as_mut().poll(cx).is_pending() {
                        return Poll::Pending;
                    }
                    guard.release();
                    Some(Err(QueryError::TimedOut(limit)))
                }
            },
            QueryState::Done => return Poll::Pending,
        };
        match (std::mem::replace(&mut this.state, QueryState::Done), outcome) {
            (QueryState::Failed(e), _) => Poll::Ready(Err(e)),
            (QueryState::Waiting { mapper, .. }, Some(Ok(text))) => Poll::Ready(Ok(mapper(text))),
            (_, Some(Err(e))) => Poll::Ready(Err(e)),
            (_, _) => Poll::Ready(Err(QueryError::Disconnected)),
        }
    }
}

impl<T> FusedFuture for PendingQuery<T> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, QueryState::Done)
    }
}

// ── Subscription ──────────────────────────────────────────────────────────────

/// Values emitted by a `listen` command, in arrival order.
///
/// The stream ends when the session is torn down.  Dropping the
/// subscription unregisters it; later emissions from the peer are rejected.
pub struct Subscription {
    id: CallbackId,
    receiver: mpsc::UnboundedReceiver<String>,
    _guard: PendingGuard,
}

impl Subscription {
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Waits for the next emitted value; `None` once the session has ended.
    pub async fn next_value(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

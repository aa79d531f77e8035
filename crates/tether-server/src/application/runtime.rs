//! The application-facing handle: [`Tether`].
//!
//! `Tether` owns the session registry and exposes everything an application
//! does with peers (execute, query, listen, refresh) plus the two entry
//! points the infrastructure layer drives: rendering a page for a new
//! session and routing each inbound frame.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use tether_core::{decode_inbound, CallbackId, InboundMessage, RemoteFailure, SessionId};

use super::broadcast::{self, RefreshSummary};
use super::correlator::{Correlator, PendingQuery, Subscription};
use super::diagnostics::{self, log_every_failure, ErrorHook, ErrorReport};
use super::error::{DispatchError, InboundError, QueryError};
use super::outbound::PeerTransport;
use super::plugins::{PluginError, PluginSet};
use super::registry::SessionRegistry;
use super::session::Session;
use super::watchdog::{watch_page_build, BuildSite, SlowBuild};
use crate::domain::{PageTemplate, ServerConfig};

// ── Page building ─────────────────────────────────────────────────────────────

/// The parts of an HTTP request a page builder may look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub path: String,
}

/// Application hook that fills in the page for a fresh session.
///
/// Commands issued against `session` while building are buffered and run
/// by the peer as soon as it connects.  Awaiting a query here stalls the
/// page; spawn a task for that instead.
#[async_trait]
pub trait PageBuilder: Send + Sync {
    async fn build(
        &self,
        tether: Arc<Tether>,
        request: &PageRequest,
        session: &SessionId,
        page: &mut PageTemplate,
    );

    /// Name shown when a build overruns the watchdog threshold.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Builder that leaves the page as the plugins made it.
pub struct BlankPage;

#[async_trait]
impl PageBuilder for BlankPage {
    async fn build(&self, _: Arc<Tether>, _: &PageRequest, _: &SessionId, _: &mut PageTemplate) {}
}

/// A page ready to be served.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub session: SessionId,
    pub html: String,
    /// Set when the build overran the watchdog threshold.
    pub slow_build: Option<SlowBuild>,
}

// ── Inbound routing outcome ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum InboundOutcome {
    /// Hello: the transport is now live for `session`.
    Attached { session: SessionId, flushed: usize },
    /// Callback delivered to its waiter.
    Resolved { session: SessionId, id: CallbackId },
    /// Error matched to its diagnostic record.  A query dispatched with the
    /// same token has already been failed with [`QueryError::Remote`].
    RemoteFailure(ErrorReport),
    /// Error for a waiting query whose diagnostic record had already expired.
    QueryFailed {
        session: SessionId,
        id: CallbackId,
        failure: RemoteFailure,
    },
}

// ── Tether ────────────────────────────────────────────────────────────────────

pub struct Tether {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    correlator: Correlator,
    error_hook: ErrorHook,
    pages: Arc<dyn PageBuilder>,
    plugins: PluginSet,
}

impl Tether {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.diagnostic_retention));
        let correlator = Correlator::new(Arc::clone(&registry), config.debug, config.query_timeout);
        Self {
            config: Arc::new(config),
            registry,
            correlator,
            error_hook: log_every_failure(),
            pages: Arc::new(BlankPage),
            plugins: PluginSet::new(),
        }
    }

    pub fn with_page_builder(mut self, pages: Arc<dyn PageBuilder>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_plugins(mut self, plugins: PluginSet) -> Self {
        self.plugins = plugins;
        self
    }

    /// Replaces the hook that decides whether remote failures are logged.
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = hook;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Application API ───────────────────────────────────────────────────

    /// Registers a new session in buffering mode.
    pub fn create_session(&self) -> Arc<Session> {
        self.registry.create()
    }

    #[track_caller]
    pub fn execute(&self, session: &SessionId, command: &str) -> Result<(), DispatchError> {
        self.correlator.execute(session, command)
    }

    #[track_caller]
    pub fn query(&self, session: &SessionId, command: &str) -> PendingQuery<String> {
        self.correlator.query(session, command)
    }

    #[track_caller]
    pub fn query_map<T, F>(&self, session: &SessionId, command: &str, mapper: F) -> PendingQuery<T>
    where
        F: FnOnce(String) -> T + Send + 'static,
    {
        self.correlator.query_map(session, command, mapper)
    }

    #[track_caller]
    pub fn listen(&self, session: &SessionId, command: &str) -> Result<Subscription, DispatchError> {
        self.correlator.listen(session, command)
    }

    /// Asks every page currently registered to reload itself.
    pub fn refresh_all(&self) -> RefreshSummary {
        broadcast::refresh_all(&self.registry)
    }

    // ── Driven by the front door ──────────────────────────────────────────

    /// Creates a session and renders its page: plugins first, then the page
    /// builder under the watchdog.
    ///
    /// # Errors
    ///
    /// A plugin dependency cycle; the session is discarded.
    pub async fn render_page(self: &Arc<Self>, request: PageRequest) -> Result<RenderedPage, PluginError> {
        let session = self.create_session();
        let id = session.id().clone();
        let mut page = PageTemplate::new("tether");
        if let Err(e) = self.plugins.apply_all(&mut page) {
            self.disconnect(&id);
            return Err(e);
        }
        let site = BuildSite {
            builder: self.pages.name(),
            path: request.path.clone(),
        };
        let build = self.pages.build(Arc::clone(self), &request, &id, &mut page);
        let (_, slow_build) =
            watch_page_build(&session, &site, self.config.watchdog_threshold(), build).await;
        let html = page.render(&id, &self.config.ws_path);
        debug!(session = %id, path = %request.path, bytes = html.len(), "page rendered");
        Ok(RenderedPage {
            session: id,
            html,
            slow_build,
        })
    }

    /// Decodes and routes one text frame from a peer transport.
    pub fn handle_frame(
        &self,
        text: &str,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<InboundOutcome, InboundError> {
        let message = decode_inbound(text)?;
        self.handle_inbound(message, transport)
    }

    /// Routes a decoded inbound message.
    ///
    /// - `Hello` flushes the session's buffer onto `transport` and goes live.
    /// - `Callback` resolves the matching query or feeds the subscription.
    /// - `Error` is matched to its diagnostic record and reported.
    pub fn handle_inbound(
        &self,
        message: InboundMessage,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<InboundOutcome, InboundError> {
        let session = self
            .registry
            .get(message.session())
            .ok_or_else(|| InboundError::UnknownSession(message.session().clone()))?;
        match message {
            InboundMessage::Hello { session: id } => {
                let flushed = session
                    .channel()
                    .drain_and_switch(Arc::clone(transport))
                    .map_err(|source| InboundError::Channel {
                        session: id.clone(),
                        source,
                    })?;
                info!(session = %id, flushed, "peer attached");
                Ok(InboundOutcome::Attached {
                    session: id,
                    flushed,
                })
            }
            InboundMessage::Callback {
                session: id,
                id: callback,
                result,
            } => {
                self.correlator.resolve(&session, callback, result)?;
                Ok(InboundOutcome::Resolved { session: id, id: callback })
            }
            InboundMessage::Error {
                session: id,
                token,
                failure,
            } => {
                let failed_query = session
                    .callbacks()
                    .fail_by_token(&token, QueryError::Remote(failure.clone()));
                match (session.diagnostics().claim(&token), failed_query) {
                    (Some(record), _) => {
                        let report =
                            diagnostics::report_failure(&id, token, failure, record, &self.error_hook);
                        Ok(InboundOutcome::RemoteFailure(report))
                    }
                    (None, Some(callback)) => {
                        debug!(session = %id, callback, %failure, "query failed after its record expired");
                        Ok(InboundOutcome::QueryFailed {
                            session: id,
                            id: callback,
                            failure,
                        })
                    }
                    (None, None) => Err(InboundError::UnknownDiagnosticToken {
                        session: id,
                        token,
                        failure,
                    }),
                }
            }
        }
    }

    /// Tears a session down and unregisters it.  Returns `false` if it was
    /// not registered.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        match self.registry.remove(id) {
            Some(session) => {
                session.teardown();
                true
            }
            None => false,
        }
    }

    /// Discards sessions whose peer never connected within the handshake
    /// timeout.  Returns how many were discarded.
    pub fn reap_abandoned(&self) -> usize {
        self.registry
            .reap_abandoned(self.config.handshake_timeout)
            .len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::outbound::{tests::RecordingTransport, ChannelMode};
    use crate::application::plugins::Plugin;
    use tether_core::protocol::{decode_outbound, encode_inbound};

    fn transport() -> (Arc<RecordingTransport>, Arc<dyn PeerTransport>) {
        let recording = Arc::new(RecordingTransport::default());
        let dynamic: Arc<dyn PeerTransport> = recording.clone();
        (recording, dynamic)
    }

    fn debug_tether() -> Tether {
        Tether::new(ServerConfig {
            debug: true,
            ..ServerConfig::default()
        })
    }

    #[test]
    fn test_hello_flushes_buffered_commands() {
        // Arrange
        let tether = Tether::new(ServerConfig::default());
        let id = tether.create_session().id().clone();
        tether.execute(&id, "a()").unwrap();
        tether.execute(&id, "b()").unwrap();
        let (recording, transport) = transport();

        // Act
        let outcome = tether
            .handle_inbound(InboundMessage::Hello { session: id.clone() }, &transport)
            .unwrap();

        // Assert
        assert!(matches!(outcome, InboundOutcome::Attached { flushed: 2, .. }));
        let commands: Vec<String> = recording
            .frames()
            .iter()
            .map(|f| decode_outbound(f).unwrap().command().to_string())
            .collect();
        assert_eq!(commands, vec!["a()", "b()"]);
    }

    #[test]
    fn test_second_hello_is_rejected() {
        let tether = Tether::new(ServerConfig::default());
        let id = tether.create_session().id().clone();
        let (_, transport) = transport();
        let hello = InboundMessage::Hello { session: id.clone() };
        tether.handle_inbound(hello.clone(), &transport).unwrap();

        let result = tether.handle_inbound(hello, &transport);

        assert!(matches!(result, Err(InboundError::Channel { .. })));
    }

    #[test]
    fn test_unknown_session_is_rejected() {
        let tether = Tether::new(ServerConfig::default());
        let (_, transport) = transport();
        let result = tether.handle_inbound(
            InboundMessage::Hello {
                session: SessionId::from("ghost"),
            },
            &transport,
        );
        assert_eq!(
            result.unwrap_err(),
            InboundError::UnknownSession(SessionId::from("ghost"))
        );
    }

    #[test]
    fn test_malformed_frame_is_a_protocol_error() {
        let tether = Tether::new(ServerConfig::default());
        let (_, transport) = transport();
        let result = tether.handle_frame("{not json", &transport);
        assert!(matches!(result, Err(InboundError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_callback_frame_resolves_query() {
        // Arrange
        let tether = Tether::new(ServerConfig::default());
        let id = tether.create_session().id().clone();
        let (_, transport) = transport();
        tether
            .handle_inbound(InboundMessage::Hello { session: id.clone() }, &transport)
            .unwrap();
        let pending = tether.query(&id, "document.title");
        let callback = pending.callback_id().unwrap();
        let frame = encode_inbound(&InboundMessage::Callback {
            session: id.clone(),
            id: callback,
            result: Some("Home".into()),
        })
        .unwrap();

        // Act
        let outcome = tether.handle_frame(&frame, &transport).unwrap();

        // Assert
        assert!(matches!(outcome, InboundOutcome::Resolved { .. }));
        assert_eq!(pending.await, Ok("Home".to_string()));
    }

    #[test]
    fn test_error_is_reported_against_the_dispatching_call_site() {
        // Arrange
        let tether = debug_tether();
        let id = tether.create_session().id().clone();
        let (recording, transport) = transport();
        tether
            .handle_inbound(InboundMessage::Hello { session: id.clone() }, &transport)
            .unwrap();
        let line = line!() + 1;
        tether.execute(&id, "undefinedFn()").unwrap();
        let sent = decode_outbound(&recording.frames()[0]).unwrap();
        let token = sent.token().cloned().unwrap();

        // Act
        let outcome = tether
            .handle_inbound(
                InboundMessage::Error {
                    session: id.clone(),
                    token: token.clone(),
                    failure: RemoteFailure::new("ReferenceError", "undefinedFn is not defined"),
                },
                &transport,
            )
            .unwrap();

        // Assert
        let InboundOutcome::RemoteFailure(report) = outcome else {
            panic!("expected a remote failure report");
        };
        assert!(report.logged);
        assert_eq!(report.record.source(), "undefinedFn()");
        assert_eq!(report.record.origin().location().line(), line);
        assert!(report.to_string().contains("while executing `undefinedFn()`"));

        // A token is read at most once.
        let again = tether.handle_inbound(
            InboundMessage::Error {
                session: id,
                token,
                failure: RemoteFailure::new("ReferenceError", "again"),
            },
            &transport,
        );
        assert!(matches!(again, Err(InboundError::UnknownDiagnosticToken { .. })));
        // The rejection carries the failure so one log line is enough.
        assert!(again
            .unwrap_err()
            .to_string()
            .contains("ReferenceError: again"));
    }

    #[test]
    fn test_error_hook_can_silence_reports() {
        let tether = debug_tether().with_error_hook(Arc::new(|_, _| false));
        let session = tether.create_session();
        let id = session.id().clone();
        let (recording, transport) = transport();
        tether.execute(&id, "x()").unwrap();
        tether
            .handle_inbound(InboundMessage::Hello { session: id.clone() }, &transport)
            .unwrap();
        let token = decode_outbound(&recording.frames()[0])
            .unwrap()
            .token()
            .cloned()
            .unwrap();
        let outcome = tether
            .handle_inbound(
                InboundMessage::Error {
                    session: id,
                    token,
                    failure: RemoteFailure::new("Error", "quiet"),
                },
                &transport,
            )
            .unwrap();
        assert!(matches!(outcome, InboundOutcome::RemoteFailure(ErrorReport { logged: false, .. })));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_waiters_and_unregisters() {
        // Arrange
        let tether = Tether::new(ServerConfig::default());
        let session = tether.create_session();
        let id = session.id().clone();
        let pending = tether.query(&id, "slow()");

        // Act
        assert!(tether.disconnect(&id));

        // Assert
        assert_eq!(pending.await, Err(QueryError::Disconnected));
        assert!(tether.registry().get(&id).is_none());
        assert_eq!(session.channel().mode(), ChannelMode::Closed);
        assert!(!tether.disconnect(&id));
        assert!(matches!(
            tether.execute(&id, "late()"),
            Err(DispatchError::UnknownSession(_))
        ));
    }

    struct Greeting;

    #[async_trait]
    impl PageBuilder for Greeting {
        async fn build(
            &self,
            tether: Arc<Tether>,
            _: &PageRequest,
            session: &SessionId,
            page: &mut PageTemplate,
        ) {
            page.title = "Hello".into();
            tether.execute(session, "greet()").unwrap();
        }
    }

    struct Banner;

    impl Plugin for Banner {
        fn name(&self) -> &str {
            "banner"
        }

        fn apply(&self, page: &mut PageTemplate) {
            page.add_body("<header>banner</header>");
        }
    }

    #[tokio::test]
    async fn test_render_page_runs_plugins_and_builder() {
        // Arrange
        let tether = Arc::new(
            Tether::new(ServerConfig::default())
                .with_page_builder(Arc::new(Greeting))
                .with_plugins(PluginSet::new().with(Arc::new(Banner))),
        );

        // Act
        let page = tether
            .render_page(PageRequest { path: "/".into() })
            .await
            .unwrap();

        // Assert
        assert!(page.html.contains("<title>Hello</title>"));
        assert!(page.html.contains("<header>banner</header>"));
        assert!(page.html.contains(page.session.as_str()));
        let session = tether.registry().get(&page.session).unwrap();
        assert_eq!(session.channel().mode(), ChannelMode::Buffering { pending: 1 });
    }

    #[tokio::test]
    async fn test_reap_discards_sessions_that_never_connect() {
        let tether = Tether::new(ServerConfig {
            handshake_timeout: std::time::Duration::ZERO,
            ..ServerConfig::default()
        });
        tether.create_session();
        assert_eq!(tether.reap_abandoned(), 1);
        assert!(tether.registry().is_empty());
    }
}

//! Protocol router shared by the HTTP fallback and WebSocket transports.
//!
//! The handler owns no transport itself: `infra::http::reactive` adapts axum
//! requests and sockets onto [`ReactiveHandler::handle_http_action`] and
//! [`ReactiveHandler::handle_frame`].

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    dispatch::{DispatchOutcome, dispatch},
    protocol::{ActionReply, ActionRequest, DispatchError},
    registry::{ComponentRegistry, SharedComponent},
    session::{DEFAULT_MAX_PENDING_COMPONENTS, Outbound, ReactiveSession, SessionRegistry},
};

const METRIC_ACTION_TOTAL: &str = "tessera_action_total";
const OUTBOUND_CAPACITY: usize = 64;

pub const DEFAULT_WEBSOCKET_PATH: &str = "/_reactive/ws";
pub const DEFAULT_ACTION_PATH_PREFIX: &str = "/_reactive/actions";
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Routing options, fixed at handler construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactiveConfig {
    pub websocket_path: String,
    pub action_path_prefix: String,
    pub enable_http_fallback: bool,
    pub max_payload_bytes: usize,
    /// Unresolved ids a session may hold before the oldest is dropped.
    pub max_pending_components: usize,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            websocket_path: DEFAULT_WEBSOCKET_PATH.to_string(),
            action_path_prefix: DEFAULT_ACTION_PATH_PREFIX.to_string(),
            enable_http_fallback: true,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_pending_components: DEFAULT_MAX_PENDING_COMPONENTS,
        }
    }
}

impl From<&crate::config::ReactiveSettings> for ReactiveConfig {
    fn from(settings: &crate::config::ReactiveSettings) -> Self {
        Self {
            websocket_path: settings.websocket_path.clone(),
            action_path_prefix: settings.action_path_prefix.trim_end_matches('/').to_string(),
            enable_http_fallback: settings.enable_http_fallback,
            max_payload_bytes: settings.max_payload_bytes,
            max_pending_components: settings.max_pending_components,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    WebSocket,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::WebSocket => "websocket",
        }
    }
}

pub struct ReactiveHandler {
    config: ReactiveConfig,
    registry: Arc<ComponentRegistry>,
    sessions: SessionRegistry,
}

impl ReactiveHandler {
    pub fn new(config: ReactiveConfig, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            config,
            registry,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn config(&self) -> &ReactiveConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn is_websocket_path(&self, path: &str) -> bool {
        path == self.config.websocket_path
    }

    /// Whether `method path` belongs to the HTTP fallback endpoint.
    ///
    /// Only POSTs are claimed; anything else under the prefix is left to the
    /// next handler.
    pub fn is_action_request(&self, method: &Method, path: &str) -> bool {
        if !self.config.enable_http_fallback || method != Method::POST {
            return false;
        }
        let prefix = self.config.action_path_prefix.as_str();
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Run one HTTP fallback action against the global registry.
    #[instrument(skip(self, body), fields(transport = "http"))]
    pub async fn handle_http_action(&self, body: &[u8]) -> (StatusCode, ActionReply) {
        let result = match ActionRequest::parse(body) {
            Ok(request) => {
                let resolved = self.registry.get(&request.component_id);
                self.execute(Transport::Http, None, resolved, request).await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(reply) => {
                record_action(Transport::Http, "ok");
                (StatusCode::OK, reply)
            }
            Err(err) => {
                record_action(Transport::Http, err.kind());
                debug!(error = %err, status = err.status().as_u16(), "action rejected");
                (err.status(), err.to_reply())
            }
        }
    }

    /// Run one inbound WebSocket frame for `session`. Resolution goes through
    /// the session first, falling back to (and binding from) the global
    /// registry.
    #[instrument(skip(self, session, text), fields(transport = "websocket", session_id = %session.id()))]
    pub async fn handle_frame(&self, session: &ReactiveSession, text: &str) -> ActionReply {
        let result = match ActionRequest::parse(text.as_bytes()) {
            Ok(request) => {
                let resolved = session.resolve(&self.registry, &request.component_id);
                self.execute(Transport::WebSocket, Some(session.id()), resolved, request)
                    .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(reply) => {
                record_action(Transport::WebSocket, "ok");
                reply
            }
            Err(err) => {
                record_action(Transport::WebSocket, err.kind());
                debug!(error = %err, "frame rejected");
                err.to_reply()
            }
        }
    }

    async fn execute(
        &self,
        transport: Transport,
        origin: Option<Uuid>,
        component: Option<SharedComponent>,
        request: ActionRequest,
    ) -> Result<ActionReply, DispatchError> {
        let Some(component) = component else {
            return Err(DispatchError::NotFound {
                component_id: request.component_id,
            });
        };

        // Actions and renders are synchronous and may hold the component lock
        // for a while; keep them off the async workers.
        let method = request.method.clone();
        let (request, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = dispatch(&component, &request);
            (request, outcome)
        })
        .await
        .map_err(|err| {
            warn!(method = %method, error = %err, "dispatch worker aborted");
            DispatchError::Aborted { method }
        })?;
        let DispatchOutcome { html, changed } = outcome?;

        if changed {
            let notified = self.sessions.propagate(&request.component_id, &html, origin);
            if notified > 0 {
                debug!(
                    transport = transport.as_str(),
                    component_id = %request.component_id,
                    notified,
                    "propagated component update"
                );
            }
        }

        Ok(ActionReply::ok(request.component_id, html))
    }

    /// Create and track a session; the receiver feeds the socket writer.
    pub fn open_session(&self) -> (Arc<ReactiveSession>, mpsc::Receiver<Outbound>) {
        let (session, rx) = ReactiveSession::channel(OUTBOUND_CAPACITY);
        let session = Arc::new(session.with_pending_limit(self.config.max_pending_components));
        self.sessions.insert(session.clone());
        info!(
            target: "tessera::reactive",
            session_id = %session.id(),
            sessions = self.sessions.len(),
            "session opened"
        );
        (session, rx)
    }

    pub fn close_session(&self, session: &ReactiveSession) {
        session.cleanup();
        if self.sessions.remove(session.id()).is_none() {
            warn!(session_id = %session.id(), "closing an untracked session");
        }
        info!(
            target: "tessera::reactive",
            session_id = %session.id(),
            sessions = self.sessions.len(),
            "session closed"
        );
    }

    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}

fn record_action(transport: Transport, outcome: &'static str) {
    counter!(
        METRIC_ACTION_TOTAL,
        "transport" => transport.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;
    use serde_json::{Value, json};

    use super::*;
    use crate::domain::{
        actions::ActionTable,
        component::{Attributes, Component, ComponentId},
        error::{ActionError, RenderError},
        reactive::{Reactive, StateCell},
    };

    struct Meter {
        id: ComponentId,
        attributes: Attributes,
        state: StateCell<u32>,
    }

    fn bump(meter: &mut Meter, _event: &Value) -> Result<(), ActionError> {
        meter.state.update(|n| *n += 1);
        Ok(())
    }

    fn jam(_meter: &mut Meter, _event: &Value) -> Result<(), ActionError> {
        panic!("meter jammed");
    }

    static METER_ACTIONS: Lazy<ActionTable<Meter>> = Lazy::new(|| {
        ActionTable::new("Meter")
            .action("bump", bump)
            .action("jam", jam)
    });

    impl Component for Meter {
        fn id(&self) -> &ComponentId {
            &self.id
        }

        fn type_name(&self) -> &'static str {
            "Meter"
        }

        fn attributes(&self) -> &Attributes {
            &self.attributes
        }

        fn render_content(&self) -> Result<String, RenderError> {
            Ok(format!("<meter>{}</meter>", self.state.get()))
        }
    }

    impl Reactive for Meter {
        type State = u32;

        fn actions() -> &'static ActionTable<Self> {
            &METER_ACTIONS
        }

        fn state(&self) -> &StateCell<u32> {
            &self.state
        }

        fn state_mut(&mut self) -> &mut StateCell<u32> {
            &mut self.state
        }
    }

    fn handler() -> ReactiveHandler {
        let registry = Arc::new(ComponentRegistry::new());
        registry
            .register_component(Meter {
                id: ComponentId::from("m-1"),
                attributes: Attributes::new(),
                state: StateCell::new(0),
            })
            .expect("register");
        ReactiveHandler::new(ReactiveConfig::default(), registry)
    }

    #[test]
    fn claims_only_its_paths() {
        let handler = handler();

        assert!(handler.is_websocket_path("/_reactive/ws"));
        assert!(!handler.is_websocket_path("/_reactive/ws/extra"));
        assert!(handler.is_action_request(&Method::POST, "/_reactive/actions"));
        assert!(handler.is_action_request(&Method::POST, "/_reactive/actions/m-1"));
        assert!(!handler.is_action_request(&Method::GET, "/_reactive/actions"));
        assert!(!handler.is_action_request(&Method::POST, "/_reactive/actionsx"));
        assert!(!handler.is_action_request(&Method::POST, "/"));
    }

    #[test]
    fn disabled_fallback_claims_nothing() {
        let config = ReactiveConfig {
            enable_http_fallback: false,
            ..ReactiveConfig::default()
        };
        let handler = ReactiveHandler::new(config, Arc::new(ComponentRegistry::new()));
        assert!(!handler.is_action_request(&Method::POST, "/_reactive/actions"));
    }

    #[tokio::test]
    async fn http_action_increments() {
        let handler = handler();
        let body = br#"{"componentId":"m-1","method":"bump","event":{}}"#;

        let (status, reply) = handler.handle_http_action(body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.html.as_deref(), Some("<meter>1</meter>"));

        let (_, reply) = handler.handle_http_action(body).await;
        assert_eq!(reply.html.as_deref(), Some("<meter>2</meter>"));
    }

    #[tokio::test]
    async fn http_action_status_codes() {
        let handler = handler();

        let (status, reply) = handler
            .handle_http_action(br#"{"componentId":"ghost","method":"bump"}"#)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(reply.error.as_deref(), Some("Component not found"));

        let (status, _) = handler.handle_http_action(b"{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, reply) = handler
            .handle_http_action(br#"{"componentId":"m-1","method":"melt"}"#)
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!reply.success);
    }

    #[tokio::test]
    async fn frame_binds_and_propagates_to_other_sessions() {
        let handler = handler();
        let (actor, _actor_rx) = handler.open_session();
        let (watcher, mut watcher_rx) = handler.open_session();
        watcher.resolve(handler.registry(), &ComponentId::from("m-1"));

        let reply = handler
            .handle_frame(&actor, r#"{"componentId":"m-1","method":"bump","event":{}}"#)
            .await;
        assert!(reply.success);
        assert!(actor.is_bound(&ComponentId::from("m-1")));

        let Some(Outbound::Text(frame)) = watcher_rx.recv().await else {
            panic!("watcher should be notified");
        };
        let frame: Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(
            frame,
            json!({"type": "batch", "updates": [{"componentId": "m-1", "html": "<meter>1</meter>"}]})
        );

        handler.close_session(&actor);
        handler.close_session(&watcher);
        assert!(handler.sessions().is_empty());
    }

    #[tokio::test]
    async fn unknown_frame_id_stays_pending() {
        let handler = handler();
        let (session, _rx) = handler.open_session();

        let reply = handler
            .handle_frame(&session, r#"{"componentId":"later","method":"bump"}"#)
            .await;
        assert_eq!(reply.error.as_deref(), Some("Component not found"));
        assert!(session.is_pending(&ComponentId::from("later")));
    }

    #[tokio::test]
    async fn stalled_watcher_does_not_block_actions() {
        let handler = handler();
        let (watcher, mut watcher_rx) = handler.open_session();
        watcher.resolve(handler.registry(), &ComponentId::from("m-1"));
        let mut queued = 0;
        while watcher.try_push(&json!({"filler": queued})) {
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_CAPACITY);

        let body = br#"{"componentId":"m-1","method":"bump","event":{}}"#;
        let (status, reply) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            handler.handle_http_action(body),
        )
        .await
        .expect("action should not wait on a full watcher queue");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.html.as_deref(), Some("<meter>1</meter>"));

        let mut drained = 0;
        while watcher_rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, OUTBOUND_CAPACITY);
    }

    #[tokio::test]
    async fn session_pending_cap_follows_config() {
        let config = ReactiveConfig {
            max_pending_components: 3,
            ..ReactiveConfig::default()
        };
        let handler = ReactiveHandler::new(config, Arc::new(ComponentRegistry::new()));
        let (session, _rx) = handler.open_session();

        for n in 0..50 {
            let frame = format!(r#"{{"componentId":"ghost-{n}","method":"bump"}}"#);
            let reply = handler.handle_frame(&session, &frame).await;
            assert!(!reply.success);
        }
        assert_eq!(session.pending_len(), 3);
        assert_eq!(session.len(), 3);
    }

    #[tokio::test]
    async fn panicking_action_is_reported_and_component_recovers() {
        let handler = handler();

        let (status, reply) = handler
            .handle_http_action(br#"{"componentId":"m-1","method":"jam"}"#)
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reply.error.as_deref(), Some("Action `jam` aborted"));

        let (status, reply) = handler
            .handle_http_action(br#"{"componentId":"m-1","method":"bump"}"#)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.html.as_deref(), Some("<meter>1</meter>"));
    }
}

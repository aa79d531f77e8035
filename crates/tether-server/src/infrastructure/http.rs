//! HTTP front door: one axum router for pages and the peer bridge.
//!
//! | Route              | Handler  | Result                             |
//! |--------------------|----------|------------------------------------|
//! | `GET {ws_path}`    | `bridge` | WebSocket upgrade to the transport |
//! | `GET /favicon.ico` | inline   | 404                                |
//! | `GET /`, `GET /*`  | `page`   | page for a brand-new session       |
//!
//! Any other method is answered 405 by the router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{debug, error, info};

use crate::application::{PageRequest, Tether};
use crate::infrastructure::transport::serve_connection;

/// Builds the router for `tether`, with the bridge at its configured path.
pub fn router(tether: Arc<Tether>) -> Router {
    let ws_path = tether.config().ws_path.clone();
    Router::new()
        .route(&ws_path, get(bridge))
        .route("/favicon.ico", get(|| async { StatusCode::NOT_FOUND }))
        .route("/", get(page))
        .route("/*path", get(page))
        .with_state(tether)
}

async fn bridge(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(tether): State<Arc<Tether>>,
) -> impl IntoResponse {
    debug!("peer upgrade from {peer_addr}");
    let ping_interval = tether.config().ping_interval;
    ws.on_upgrade(move |socket| async move {
        serve_connection(socket, peer_addr, tether, ping_interval).await;
    })
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

async fn page(uri: Uri, headers: HeaderMap, State(tether): State<Arc<Tether>>) -> Response {
    let path = uri.path().to_owned();
    if is_upgrade(&headers) {
        return (StatusCode::NOT_FOUND, format!("no WebSocket endpoint at {path}\n")).into_response();
    }
    match tether.render_page(PageRequest { path }).await {
        Ok(page) => {
            info!(session = %page.session, "page served");
            ([(header::CACHE_CONTROL, "no-store")], Html(page.html)).into_response()
        }
        Err(e) => {
            error!("page could not be built: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "page could not be built\n").into_response()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use crate::application::{Plugin, PluginSet};
    use crate::domain::{PageTemplate, ServerConfig};

    fn tether() -> Arc<Tether> {
        Arc::new(Tether::new(ServerConfig::default()))
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_get_serves_a_page_for_a_new_session() {
        // Arrange
        let tether = tether();
        let app = router(Arc::clone(&tether));

        // Act
        let response = app.oneshot(request(Method::GET, "/app?x=1")).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        let html = body_text(response).await;
        assert!(html.contains("/bridge"));
        assert_eq!(tether.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_other_methods_are_not_allowed() {
        let tether = tether();
        let app = router(Arc::clone(&tether));

        let response = app.oneshot(request(Method::POST, "/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(tether.registry().is_empty());
    }

    #[tokio::test]
    async fn test_favicon_does_not_create_a_session() {
        let tether = tether();
        let app = router(Arc::clone(&tether));

        let response = app.oneshot(request(Method::GET, "/favicon.ico")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(tether.registry().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_off_the_bridge_path_is_not_found() {
        // Arrange
        let tether = tether();
        let app = router(Arc::clone(&tether));
        let upgrade = Request::builder()
            .uri("/elsewhere")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();

        // Act
        let response = app.oneshot(upgrade).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("/elsewhere"));
        assert!(tether.registry().is_empty());
    }

    /// Depends on a fresh copy of itself, which shares its name.
    struct SelfDependent;

    impl Plugin for SelfDependent {
        fn name(&self) -> &str {
            "self-dependent"
        }

        fn dependencies(&self) -> Vec<Arc<dyn Plugin>> {
            vec![Arc::new(SelfDependent)]
        }

        fn apply(&self, _: &mut PageTemplate) {}
    }

    #[tokio::test]
    async fn test_plugin_cycle_is_a_server_error() {
        // Arrange
        let plugins = PluginSet::new().with(Arc::new(SelfDependent));
        let tether = Arc::new(Tether::new(ServerConfig::default()).with_plugins(plugins));

        // Act
        let response = router(Arc::clone(&tether))
            .oneshot(request(Method::GET, "/"))
            .await
            .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(tether.registry().is_empty());
    }
}

//! HTTP surface of the gateway.
//!
//! Three ingress routes plus liveness and the OpenAPI document:
//!
//! - `GET /health`, unauthenticated liveness probe
//! - `ALL /http?dst&port&path`, authenticated one-shot HTTP forwarding
//! - `GET /ws?dst&port&path&token`, authenticated WebSocket upgrades,
//!   dispatched to the VNC bridge or the generic WebSocket proxy by port
//!
//! Both proxy routes run the same screen: credential first, destination
//! second. Nothing is dialed before both pass.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use utoipa::OpenApi as UtoipaOpenApi;

use crate::auth;
use crate::config::{self, GatewayConfig};
use crate::errors::{ErrorBody, GatewayError, GatewayResult};
use crate::forward::{self, MAX_FORWARD_BODY_BYTES};
use crate::models::{ForwardQuery, HealthResponse, UpgradeQuery};
use crate::validate::{validate_destination, Target};
use crate::vnc_bridge::BridgeSession;
use crate::ws_proxy;

#[derive(UtoipaOpenApi)]
#[openapi(
    paths(health, proxy_http, proxy_upgrade),
    components(schemas(HealthResponse, ErrorBody)),
    tags((name = "rangex-gateway", description = "Session-scoped ingress into challenge networks"))
)]
pub struct ApiDoc;

/// Shared state handed to every handler. Cheap to clone; the config is
/// immutable for the process lifetime.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub http: reqwest::Client,
    pub started: Instant,
    bridge_permits: Option<Arc<Semaphore>>,
    forward_permits: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let bridge_permits =
            (config.max_bridges > 0).then(|| Arc::new(Semaphore::new(config.max_bridges)));
        let forward_permits =
            (config.max_forwards > 0).then(|| Arc::new(Semaphore::new(config.max_forwards)));
        Self {
            config: Arc::new(config),
            http: reqwest::Client::builder()
                .http1_only()
                // 3xx responses are relayed to the client, never followed
                // from the gateway.
                .redirect(reqwest::redirect::Policy::none())
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            started: Instant::now(),
            bridge_permits,
            forward_permits,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/http", any(proxy_http))
        .route("/ws", any(proxy_upgrade))
        .route("/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::max(MAX_FORWARD_BODY_BYTES))
        .with_state(state)
}

/// Route taken by an accepted upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeRoute {
    VncBridge,
    WsProxy,
}

/// Admission chain for `/ws`, run in full before the 101 is committed:
/// credential, then destination screen, then route selection by port
/// family. Pure so both outcomes are unit-testable.
pub fn screen_upgrade(
    config: &GatewayConfig,
    headers: &HeaderMap,
    query: &UpgradeQuery,
) -> GatewayResult<(Target, UpgradeRoute)> {
    if !auth::upgrade_authorized(config, headers, query.token.as_deref()) {
        return Err(GatewayError::Unauthorized);
    }
    let target = validate_destination(config, &query.dst, &query.port)
        .map_err(GatewayError::InvalidDestination)?;
    let route = if config::is_vnc_port(target.port) {
        UpgradeRoute::VncBridge
    } else {
        UpgradeRoute::WsProxy
    };
    Ok((target, route))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "rangex-gateway",
    responses((status = 200, description = "Gateway is alive", body = HealthResponse))
)]
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.started.elapsed().as_secs_f64(),
        timestamp: Utc::now(),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/http",
    tag = "rangex-gateway",
    params(
        ("dst" = String, Query, description = "Destination hostname or in-VPC address"),
        ("port" = String, Query, description = "Destination port, must be on the allowlist"),
        ("path" = Option<String>, Query, description = "Upstream request path, defaults to /")
    ),
    responses(
        (status = 200, description = "Upstream response, relayed as-is"),
        (status = 400, description = "Destination rejected", body = ErrorBody),
        (status = 401, description = "Missing or wrong proxy key", body = ErrorBody),
        (status = 502, description = "Upstream unreachable", body = ErrorBody)
    )
)]
async fn proxy_http(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ForwardQuery>,
    req: Request,
) -> Response {
    let method = req.method().clone();
    match handle_forward(&state, &query, req).await {
        Ok(resp) => {
            tracing::info!(
                client = %peer,
                %method,
                dst = %query.dst,
                port = %query.port,
                status = %resp.status(),
                "http forward"
            );
            resp
        }
        Err(err) => {
            tracing::warn!(
                client = %peer,
                %method,
                dst = %query.dst,
                port = %query.port,
                error = %err,
                "http forward rejected"
            );
            err.into_response()
        }
    }
}

async fn handle_forward(
    state: &AppState,
    query: &ForwardQuery,
    req: Request,
) -> GatewayResult<Response> {
    if !auth::header_key_matches(&state.config, req.headers()) {
        return Err(GatewayError::Unauthorized);
    }
    let target = validate_destination(&state.config, &query.dst, &query.port)
        .map_err(GatewayError::InvalidDestination)?;
    let _permit = acquire(&state.forward_permits)?;
    forward::forward_http(&state.http, &target, query.path_or_root(), req).await
}

#[utoipa::path(
    get,
    path = "/ws",
    tag = "rangex-gateway",
    params(
        ("dst" = String, Query, description = "Destination hostname or in-VPC address"),
        ("port" = String, Query, description = "Destination port; VNC ports select the raw TCP bridge"),
        ("path" = Option<String>, Query, description = "Upstream WebSocket path, defaults to /"),
        ("token" = Option<String>, Query, description = "Session token, accepted instead of the proxy key header")
    ),
    responses(
        (status = 101, description = "Upgrade accepted, connection switches protocols"),
        (status = 400, description = "Destination rejected", body = ErrorBody),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 426, description = "Request is not a WebSocket upgrade")
    )
)]
async fn proxy_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // A plain GET lands here too; only upgrades proceed.
    let Ok(ws) = ws else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };
    let (target, route) = match screen_upgrade(&state.config, &headers, &query) {
        Ok(screened) => screened,
        Err(err) => {
            tracing::warn!(
                client = %peer,
                dst = %query.dst,
                port = %query.port,
                error = %err,
                "upgrade rejected"
            );
            return close_after_write(err.into_response());
        }
    };
    match route {
        UpgradeRoute::VncBridge => {
            let permit = match acquire(&state.bridge_permits) {
                Ok(permit) => permit,
                Err(err) => {
                    tracing::warn!(client = %peer, target = %target, error = %err, "bridge refused");
                    return close_after_write(err.into_response());
                }
            };
            tracing::info!(client = %peer, target = %target, "vnc bridge upgrade");
            ws.on_upgrade(move |socket| async move {
                let _permit = permit;
                match BridgeSession::connect(socket, target).await {
                    Ok(session) => session.run().await,
                    Err(err) => {
                        tracing::warn!(client = %peer, error = %err, "vnc bridge setup failed")
                    }
                }
            })
        }
        UpgradeRoute::WsProxy => {
            let path = query.path_or_root().to_string();
            tracing::info!(client = %peer, target = %target, path = %path, "websocket proxy upgrade");
            ws.on_upgrade(move |socket| async move {
                if let Err(err) = ws_proxy::proxy_websocket(socket, &target, &path).await {
                    tracing::warn!(client = %peer, error = %err, "websocket proxy failed");
                }
            })
        }
    }
}

/// Rejected handshakes should not linger on a reusable connection. The
/// client sees the status line and then the socket goes away.
fn close_after_write(mut resp: Response) -> Response {
    resp.headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    resp
}

/// Takes a slot from an optional cap. `None` means the cap is unlimited.
fn acquire(permits: &Option<Arc<Semaphore>>) -> GatewayResult<Option<OwnedSemaphorePermit>> {
    match permits {
        Some(sem) => match sem.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => Err(GatewayError::AtCapacity),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PROXY_KEY_HEADER;
    use crate::config::DEFAULT_ALLOWED_PORTS;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn secret_config() -> GatewayConfig {
        GatewayConfig::new(
            Some("gateway-secret".to_string()),
            "10.".to_string(),
            DEFAULT_ALLOWED_PORTS.into_iter().collect(),
            0,
            0,
        )
    }

    fn test_app(config: GatewayConfig) -> Router {
        build_router(AppState::new(config))
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 52000))))
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok_and_uptime() {
        let app = test_app(GatewayConfig::default());
        let resp = app
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert!(body["uptime_secs"].as_f64().unwrap() >= 0.0);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn health_needs_no_credential() {
        // Secret configured, none supplied.
        let app = test_app(secret_config());
        let resp = app
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forward_without_key_is_unauthorized() {
        let app = test_app(secret_config());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/http?dst=web&port=80")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "unauthorized");
    }

    #[tokio::test]
    async fn forward_with_wrong_key_is_unauthorized() {
        let app = test_app(secret_config());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/http?dst=web&port=80")
                    .header(PROXY_KEY_HEADER, "not-the-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unset_secret_locks_out_http_entirely() {
        let app = test_app(GatewayConfig::default());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/http?dst=web&port=80")
                    .header(PROXY_KEY_HEADER, "anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn credential_is_checked_before_destination() {
        // Bad destination and missing key: the 401 wins.
        let app = test_app(secret_config());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/http?dst=evil.example.com&port=9999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forward_rejects_out_of_scope_destination() {
        let app = test_app(secret_config());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/http?dst=8.8.8.8&port=80")
                    .header(PROXY_KEY_HEADER, "gateway-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "invalid_destination");
        // The response must not echo which rule failed.
        assert!(!body["message"].as_str().unwrap().contains("8.8.8.8"));
    }

    #[tokio::test]
    async fn forward_rejects_bad_port() {
        for query in ["dst=web&port=abc", "dst=web&port=4444", "dst=web&port="] {
            let resp = test_app(secret_config())
                .oneshot(
                    HttpRequest::builder()
                        .uri(format!("/http?{query}"))
                        .header(PROXY_KEY_HEADER, "gateway-secret")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{query}");
        }
    }

    #[tokio::test]
    async fn forward_defaults_missing_params_to_empty() {
        let app = test_app(secret_config());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/http")
                    .header(PROXY_KEY_HEADER, "gateway-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_upgrade_required() {
        let app = test_app(secret_config());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/ws?dst=web&port=5900")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = test_app(GatewayConfig::default());
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert!(body["openapi"].is_string());
        assert!(body["paths"]["/health"].is_object());
        assert!(body["paths"]["/http"].is_object());
    }

    #[test]
    fn screen_routes_vnc_family_to_bridge() {
        let config = GatewayConfig::default();
        let headers = HeaderMap::new();
        let token = "a".repeat(48);
        for port in ["5900", "5901", "6901"] {
            let query = UpgradeQuery {
                dst: "kali-target".to_string(),
                port: port.to_string(),
                path: None,
                token: Some(token.clone()),
            };
            let (target, route) = screen_upgrade(&config, &headers, &query).unwrap();
            assert_eq!(route, UpgradeRoute::VncBridge, "{port}");
            assert_eq!(target.host, "kali-target");
        }
    }

    #[test]
    fn screen_routes_other_ports_to_ws_proxy() {
        let config = GatewayConfig::default();
        let query = UpgradeQuery {
            dst: "web".to_string(),
            port: "8080".to_string(),
            path: Some("/socket".to_string()),
            token: Some("a".repeat(48)),
        };
        let (_, route) = screen_upgrade(&config, &HeaderMap::new(), &query).unwrap();
        assert_eq!(route, UpgradeRoute::WsProxy);
    }

    #[test]
    fn screen_checks_credential_before_destination() {
        let config = GatewayConfig::default();
        let query = UpgradeQuery {
            dst: "totally.invalid.example".to_string(),
            port: "9999".to_string(),
            path: None,
            token: Some("too-short".to_string()),
        };
        let err = screen_upgrade(&config, &HeaderMap::new(), &query).unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized));
    }

    #[test]
    fn screen_rejects_bad_destination_after_valid_token() {
        let config = GatewayConfig::default();
        let query = UpgradeQuery {
            dst: "evil.example.com".to_string(),
            port: "5900".to_string(),
            path: None,
            token: Some("a".repeat(48)),
        };
        let err = screen_upgrade(&config, &HeaderMap::new(), &query).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidDestination(_)));
    }

    #[test]
    fn screen_accepts_header_key_without_token() {
        let config = secret_config();
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_KEY_HEADER, HeaderValue::from_static("gateway-secret"));
        let query = UpgradeQuery {
            dst: "web".to_string(),
            port: "80".to_string(),
            path: None,
            token: None,
        };
        assert!(screen_upgrade(&config, &headers, &query).is_ok());
    }

    #[test]
    fn acquire_enforces_the_cap() {
        let permits = Some(Arc::new(Semaphore::new(1)));
        let first = acquire(&permits).unwrap();
        assert!(first.is_some());
        let second = acquire(&permits);
        assert!(matches!(second, Err(GatewayError::AtCapacity)));
        drop(first);
        assert!(acquire(&permits).unwrap().is_some());
    }

    #[test]
    fn acquire_with_no_cap_always_succeeds() {
        assert!(acquire(&None).unwrap().is_none());
    }
}

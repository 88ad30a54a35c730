//! HTTP forwarding engine.
//!
//! Takes a request that already passed auth and destination screening,
//! replays it against `http://dst:port{path}` and maps the upstream answer
//! back onto the client connection. Bodies are buffered, not streamed, which
//! keeps error mapping simple and caps what a session can push through the
//! gateway in one request.

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;

use crate::auth::PROXY_KEY_HEADER;
use crate::errors::{GatewayError, GatewayResult};
use crate::validate::Target;

/// Largest request body the gateway will buffer for forwarding.
pub const MAX_FORWARD_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Connection-scoped headers that must not travel end to end.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers forwarded upstream: everything except hop-by-hop headers
/// and the gateway's own credential.
fn should_forward_request_header(name: &str) -> bool {
    !HOP_BY_HOP.contains(&name) && !name.eq_ignore_ascii_case(PROXY_KEY_HEADER)
}

/// Response headers relayed to the client. Content-Length is dropped along
/// with the hop-by-hop set since the body is re-buffered on the way back.
fn should_relay_response_header(name: &str) -> bool {
    !HOP_BY_HOP.contains(&name) && !name.eq_ignore_ascii_case("content-length")
}

/// Composes the upstream URL and pins it to the screened target. `path` is
/// client input appended after the authority; URL syntax such as
/// `@host:port` in it would otherwise move the dial to a host:port the
/// screen never saw. The parsed URL must still address exactly the
/// validated host and port.
fn upstream_url(target: &Target, path: &str) -> GatewayResult<reqwest::Url> {
    let composed = format!("http://{}{}", target.authority(), path);
    let url: reqwest::Url = composed
        .parse()
        .map_err(|e| GatewayError::BadRequest(format!("upstream url '{composed}': {e}")))?;
    let host_ok = url
        .host_str()
        .map(|host| host.eq_ignore_ascii_case(&target.host))
        .unwrap_or(false);
    if !host_ok || url.port_or_known_default() != Some(target.port) {
        return Err(GatewayError::InvalidDestination(format!(
            "path '{path}' rewrites the upstream authority away from {target}"
        )));
    }
    Ok(url)
}

/// Replays `req` against the target and returns the upstream response.
pub async fn forward_http(
    client: &reqwest::Client,
    target: &Target,
    path: &str,
    req: Request,
) -> GatewayResult<Response> {
    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_FORWARD_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("failed to read request body: {e}")))?;

    let url = upstream_url(target, path)?;
    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut upstream = client.request(method, url);

    for (key, value) in parts.headers.iter() {
        if !should_forward_request_header(key.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(key.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            upstream = upstream.header(name, value);
        }
    }
    if let Some(host) = parts.headers.get(axum::http::header::HOST) {
        if let Ok(host) = host.to_str() {
            upstream = upstream.header("x-forwarded-host", host);
        }
    }
    upstream = upstream.header("x-forwarded-proto", "http");
    upstream = upstream.body(body_bytes);

    let resp = upstream
        .send()
        .await
        .map_err(|e| GatewayError::Upstream(format!("dial {}: {e}", target.authority())))?;

    let status =
        StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (key, value) in resp.headers().iter() {
        if !should_relay_response_header(key.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(key.as_str().as_bytes()),
            axum::http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder = builder.header(name, value);
        }
    }
    let resp_bytes = resp
        .bytes()
        .await
        .map_err(|e| GatewayError::Upstream(format!("reading response from {}: {e}", target)))?;
    builder
        .body(Body::from(resp_bytes))
        .map_err(|e| GatewayError::Internal(format!("assembling proxied response: {e}")))
}

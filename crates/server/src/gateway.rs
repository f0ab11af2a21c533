//! # Gateway
//!
//! Fallback handler. Every request not claimed by the `/_harbor` API goes
//! through the cache manager. Whatever it does not intercept is proxied to
//! the upstream origin or to an allow-listed font origin. Any other target
//! is refused with 403.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use harbor_core::cache::{CachedResponse, FetchRequest, Interception};
use harbor_core::HarborConfig;
use reqwest::Url;

use crate::SharedState;

/// Largest request body forwarded upstream
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that describe a single hop and are never forwarded
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

/// Absolute URL a request is aimed at
///
/// Origin-form requests (`GET /path`) target the upstream; absolute-form
/// requests (`GET https://fonts.gstatic.com/...`) keep their own origin.
pub fn resolve_target(upstream: &Url, uri: &Uri) -> Result<Url, String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string()).map_err(|e| e.to_string());
    }
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    upstream.join(path).map_err(|e| e.to_string())
}

/// Whether a pass-through request to `target` may be forwarded by the gateway
pub fn may_forward(upstream: &Url, config: &HarborConfig, target: &Url) -> bool {
    let origin = target.origin().ascii_serialization();
    origin == upstream.origin().ascii_serialization() || config.is_font_origin(&origin)
}

pub async fn intercept(State(state): State<SharedState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let target = match resolve_target(state.manager.origin(), &parts.uri) {
        Ok(target) => target,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Invalid target: {}", e)).into_response(),
    };
    let method = match reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) {
        Ok(method) => method,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Invalid method: {}", e)).into_response(),
    };

    let fetch = FetchRequest::get(target.clone()).with_method(method.clone());

    match state.manager.handle_fetch(&fetch).await {
        Ok(Interception::Respond(cached)) => cached_response(cached),
        Ok(Interception::Missing) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Asset missing from cache").into_response()
        }
        Ok(Interception::PassThrough) => {
            if !may_forward(state.manager.origin(), state.manager.config(), &target) {
                tracing::debug!(url = %target, "Refusing to forward cross-origin request");
                return (StatusCode::FORBIDDEN, "Cross-origin target not allowed").into_response();
            }
            let body = match to_bytes(body, MAX_BODY_BYTES).await {
                Ok(body) => body,
                Err(e) => {
                    return (StatusCode::PAYLOAD_TOO_LARGE, format!("Request body: {}", e))
                        .into_response()
                }
            };
            proxy(&state.client, method, target, &parts.headers, body.to_vec()).await
        }
        Err(e) => {
            tracing::warn!(url = %target, error = %e, "Intercepted request failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Turn a cached response into an HTTP response
fn cached_response(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut builder = axum::http::Response::builder()
        .status(status)
        .header("x-harbor-cache", "hit");

    for (name, value) in &cached.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
}

/// Forward a request to the network and stream the answer back
async fn proxy(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: Url,
    headers: &HeaderMap,
    body: Vec<u8>,
) -> Response {
    let mut builder = client.request(method, url.clone());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            builder = builder.header(name.as_str(), value.as_bytes());
        }
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }

    let upstream = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Pass-through request failed");
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = axum::http::Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name.as_str(), value.as_bytes());
        }
    }

    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_origin_form() {
        let upstream = Url::parse("http://127.0.0.1:5173").unwrap();
        let uri: Uri = "/about?tab=1".parse().unwrap();
        assert_eq!(
            resolve_target(&upstream, &uri).unwrap().as_str(),
            "http://127.0.0.1:5173/about?tab=1"
        );
    }

    #[test]
    fn test_resolve_absolute_form() {
        let upstream = Url::parse("http://127.0.0.1:5173").unwrap();
        let uri: Uri = "https://fonts.gstatic.com/s/inter.woff2".parse().unwrap();
        let target = resolve_target(&upstream, &uri).unwrap();
        assert_eq!(target.origin().ascii_serialization(), "https://fonts.gstatic.com");
        assert_eq!(target.path(), "/s/inter.woff2");
    }

    #[test]
    fn test_only_upstream_and_font_origins_are_forwarded() {
        let upstream = Url::parse("http://127.0.0.1:5173").unwrap();
        let config = HarborConfig::default();
        let allowed = |uri: &str| {
            let target = resolve_target(&upstream, &uri.parse::<Uri>().unwrap()).unwrap();
            may_forward(&upstream, &config, &target)
        };

        assert!(allowed("/_app/version.json"));
        assert!(allowed("http://127.0.0.1:5173/api/notes"));
        assert!(allowed("https://fonts.gstatic.com/s/inter.woff2"));
        assert!(!allowed("http://169.254.169.254/latest/meta-data/"));
        assert!(!allowed("http://127.0.0.1:6379/"));
        assert!(!allowed("https://cdn.example.net/lib.js"));
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("content-type"));
    }

    #[test]
    fn test_cached_response_conversion() {
        let response = cached_response(
            CachedResponse::new(200, "body")
                .with_header("content-type", "text/html")
                .with_header("Transfer-Encoding", "chunked"),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert_eq!(response.headers()["x-harbor-cache"], "hit");
        assert!(response.headers().get("transfer-encoding").is_none());
    }
}

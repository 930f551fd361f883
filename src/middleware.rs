use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use tracing::info;
use uuid::Uuid;

use crate::handlers::SharedState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Forwarding headers consulted, in order, when proxy headers are trusted
const FORWARDED_HEADERS: [&str; 2] = ["x-forwarded-for", "x-real-ip"];

/// Address the rate limiter keys on.
///
/// Resolved once by [`logging_middleware`]; outside that middleware only the
/// socket peer is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(resolved) = parts.extensions.get::<ClientIp>() {
            return Ok(resolved.clone());
        }
        Ok(ClientIp(client_ip(&parts.headers, peer_addr(&parts.extensions), false)))
    }
}

fn peer_addr(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Logging middleware for request/response tracking.
///
/// Only the path is logged; query strings can carry locations and are left
/// out.
pub async fn logging_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = client_ip(
        request.headers(),
        peer_addr(request.extensions()),
        state.config.trust_proxy_headers,
    );
    let request_id = Uuid::new_v4().to_string();

    info!(
        target: "crime_proxy::middleware",
        request_id = %request_id,
        method = %method,
        path = %path,
        client_ip = %client_ip,
        "Incoming request"
    );

    request.extensions_mut().insert(ClientIp(client_ip));
    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "crime_proxy::middleware",
        request_id = %request_id,
        method = %method,
        path = %path,
        status = %status,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Forwarding headers are only honoured when `trust_proxy_headers` is set,
/// and only when they carry a parseable address. Otherwise the socket peer
/// is the client.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        for name in FORWARDED_HEADERS {
            let forwarded = headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

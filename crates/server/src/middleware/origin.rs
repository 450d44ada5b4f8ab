use crate::config::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Reject browser requests from non-loopback origins (DNS rebinding guard).
/// Requests without an `Origin` header are not browser initiated and pass.
pub async fn require_local_origin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.transport.allow_remote_origins {
        if let Err((status, message)) = check_origin(request.headers()) {
            tracing::warn!(
                origin = ?request.headers().get(header::ORIGIN),
                "Rejected request from disallowed origin"
            );
            return (status, message).into_response();
        }
    }

    next.run(request).await
}

pub fn check_origin(headers: &HeaderMap) -> Result<(), (StatusCode, &'static str)> {
    let Some(origin) = headers
        .get(header::ORIGIN)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.trim().is_empty())
    else {
        return Ok(());
    };

    let url = url::Url::parse(origin).map_err(|_| (StatusCode::FORBIDDEN, "invalid origin"))?;
    let host = url.host().ok_or((StatusCode::FORBIDDEN, "invalid origin"))?;
    let is_loopback = match host {
        url::Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
        url::Host::Ipv4(ip) => ip.is_loopback(),
        url::Host::Ipv6(ip) => ip.is_loopback(),
    };
    if !is_loopback {
        return Err((StatusCode::FORBIDDEN, "origin not allowed"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_origin(origin: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static(origin));
        headers
    }

    #[test]
    fn test_loopback_origins_pass() {
        assert!(check_origin(&HeaderMap::new()).is_ok());
        assert!(check_origin(&with_origin("http://localhost:6274")).is_ok());
        assert!(check_origin(&with_origin("http://127.0.0.1:3001")).is_ok());
        assert!(check_origin(&with_origin("http://[::1]:8080")).is_ok());
    }

    #[test]
    fn test_remote_and_garbage_origins_fail() {
        assert_eq!(
            check_origin(&with_origin("https://evil.example")).unwrap_err().0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            check_origin(&with_origin("not a url")).unwrap_err().1,
            "invalid origin"
        );
        assert!(check_origin(&with_origin("http://localhost.evil.example")).is_err());
    }
}

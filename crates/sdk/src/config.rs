//! Configuration types for the everything SDK.

use std::time::Duration;
use url::Url;

/// Configuration for the MCP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL of the MCP endpoint, e.g. `http://127.0.0.1:3001/mcp`.
    pub endpoint: Url,
    /// Request timeout. Does not apply to the SSE stream.
    pub timeout: Duration,
    /// Name reported in `clientInfo`.
    pub client_name: String,
    /// Version reported in `clientInfo`.
    pub client_version: String,
}

impl ClientConfig {
    /// Create a new configuration for the given endpoint.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_secs(30),
            client_name: "everything-sdk".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration for an interactive authorization-code round trip.
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// Authorization endpoint of the authorization server.
    pub authorization_endpoint: Url,
    /// Client identifier registered with the authorization server.
    pub client_id: String,
    /// Requested scope, space separated.
    pub scope: Option<String>,
    /// Loopback port for the redirect listener. `None` picks a free port.
    pub redirect_port: Option<u16>,
    /// Path the authorization server redirects to.
    pub callback_path: String,
    /// How long to wait for the browser to come back.
    pub timeout: Duration,
}

impl AuthorizationConfig {
    /// Create a configuration with default redirect settings.
    pub fn new(authorization_endpoint: Url, client_id: impl Into<String>) -> Self {
        Self {
            authorization_endpoint,
            client_id: client_id.into(),
            scope: None,
            redirect_port: None,
            callback_path: "/callback".to_string(),
            timeout: Duration::from_secs(180),
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = Some(port);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let url = Url::parse("http://127.0.0.1:3001/mcp").unwrap();
        let config = ClientConfig::new(url.clone());

        assert_eq!(config.endpoint, url);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.client_name, "everything-sdk");
    }

    #[test]
    fn test_authorization_config_builders() {
        let url = Url::parse("https://auth.example.com/authorize").unwrap();
        let config = AuthorizationConfig::new(url, "client-1")
            .scope("mcp:read")
            .redirect_port(1179)
            .timeout(Duration::from_secs(5));

        assert_eq!(config.client_id, "client-1");
        assert_eq!(config.scope.as_deref(), Some("mcp:read"));
        assert_eq!(config.redirect_port, Some(1179));
        assert_eq!(config.callback_path, "/callback");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}

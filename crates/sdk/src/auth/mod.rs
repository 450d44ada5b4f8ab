//! Interactive authorization-code flow with PKCE.
//!
//! [`authorize`] binds a [`RedirectCapture`], sends the user to the
//! authorization endpoint and returns the code the browser brings back,
//! together with the verifier needed to redeem it. Redeeming the code is
//! left to the caller.

pub mod browser;
pub mod pkce;
pub mod redirect;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use pkce::{generate_pkce, generate_state, PkcePair};
pub use redirect::{CaptureOutcome, RedirectCapture, COMPLETION_PAGE};

use crate::config::AuthorizationConfig;
use crate::error::{ClientError, ClientResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

/// Result of a successful authorization round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub code: String,
    pub code_verifier: String,
    /// Must be sent again, unchanged, when redeeming the code.
    pub redirect_uri: String,
}

/// Build the URL the user is sent to.
pub fn authorization_url(
    config: &AuthorizationConfig,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> Url {
    let mut url = config.authorization_endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
        if let Some(scope) = &config.scope {
            query.append_pair("scope", scope);
        }
    }
    url
}

/// Run one authorization round trip.
///
/// Fails with [`ClientError::Cancelled`] when `cancel` fires or the
/// configured timeout passes first, and with [`ClientError::StateMismatch`]
/// when the redirect does not carry the `state` that was sent.
pub async fn authorize(
    config: &AuthorizationConfig,
    browser: &dyn BrowserLauncher,
    cancel: CancellationToken,
) -> ClientResult<AuthorizationGrant> {
    let capture = RedirectCapture::bind(config.redirect_port, &config.callback_path).await?;
    let redirect_uri = capture.redirect_uri();

    let pkce = generate_pkce();
    let state = generate_state();
    let url = authorization_url(config, &redirect_uri, &state, &pkce.challenge);

    if let Err(e) = browser.open(&url) {
        warn!(error = %e, "Could not open authorization URL");
        println!("Open this URL in your browser:\n\n{}\n", url);
    }

    let (code, returned_state) = capture.wait(cancel, config.timeout).await.into_result()?;
    if returned_state.as_deref() != Some(state.as_str()) {
        return Err(ClientError::StateMismatch);
    }

    info!(redirect_uri = %redirect_uri, "Authorization code received");
    Ok(AuthorizationGrant {
        code,
        code_verifier: pkce.verifier,
        redirect_uri,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Plays the browser and authorization server: follows the URL straight
    /// back to the redirect with the given query.
    struct FakeBrowser {
        reply: fn(&HashMap<String, String>) -> String,
    }

    impl BrowserLauncher for FakeBrowser {
        fn open(&self, url: &Url) -> ClientResult<()> {
            let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
            let target = format!("{}?{}", params["redirect_uri"], (self.reply)(&params));
            tokio::spawn(async move {
                let _ = reqwest::get(target).await;
            });
            Ok(())
        }
    }

    struct NoBrowser;

    impl BrowserLauncher for NoBrowser {
        fn open(&self, _url: &Url) -> ClientResult<()> {
            Err(ClientError::Config("no browser".to_string()))
        }
    }

    fn config() -> AuthorizationConfig {
        AuthorizationConfig::new(
            Url::parse("https://auth.example.com/authorize?audience=mcp").unwrap(),
            "client-1",
        )
        .scope("mcp:read mcp:write")
        .timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_authorization_url() {
        let url = authorization_url(&config(), "http://127.0.0.1:1179/callback", "st", "ch");
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("auth.example.com"));
        assert_eq!(params["audience"], "mcp");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:1179/callback");
        assert_eq!(params["state"], "st");
        assert_eq!(params["code_challenge"], "ch");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["scope"], "mcp:read mcp:write");
    }

    #[tokio::test]
    async fn test_authorize_round_trip() {
        let browser = FakeBrowser {
            reply: |params| format!("code=granted&state={}", params["state"]),
        };

        let grant = authorize(&config(), &browser, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(grant.code, "granted");
        assert_eq!(grant.code_verifier.len(), 43);
        assert!(grant.redirect_uri.starts_with("http://127.0.0.1:"));
        assert!(grant.redirect_uri.ends_with("/callback"));
    }

    #[tokio::test]
    async fn test_authorize_rejects_wrong_state() {
        let browser = FakeBrowser {
            reply: |_| "code=granted&state=forged".to_string(),
        };

        let result = authorize(&config(), &browser, CancellationToken::new()).await;
        assert!(matches!(result, Err(ClientError::StateMismatch)));
    }

    #[tokio::test]
    async fn test_authorize_denied() {
        let browser = FakeBrowser {
            reply: |_| "error=access_denied".to_string(),
        };

        let result = authorize(&config(), &browser, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ClientError::AuthorizationDenied { ref error, .. }) if error == "access_denied"
        ));
    }

    #[tokio::test]
    async fn test_authorize_cancelled_without_browser() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = authorize(&config(), &NoBrowser, cancel).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }
}

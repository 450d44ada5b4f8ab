//! Run an interactive authorization-code round trip.
//!
//! Opens the browser at the authorization endpoint and waits on a loopback
//! listener for the redirect. Prints the code and PKCE verifier; redeeming
//! them at the token endpoint is up to you.
//!
//! Run with: cargo run --example authorize -- <authorization-endpoint> <client-id> [port]

use everything_sdk::auth::{authorize, SystemBrowser};
use everything_sdk::{AuthorizationConfig, ClientError, ClientResult};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ClientResult<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let (Some(endpoint), Some(client_id)) = (args.next(), args.next()) else {
        return Err(ClientError::Config(
            "usage: authorize <authorization-endpoint> <client-id> [port]".to_string(),
        ));
    };

    let mut config = AuthorizationConfig::new(endpoint.parse()?, client_id).scope("mcp");
    if let Some(port) = args.next() {
        let port = port
            .parse()
            .map_err(|_| ClientError::Config(format!("invalid port: {}", port)))?;
        config = config.redirect_port(port);
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let grant = authorize(&config, &SystemBrowser, cancel).await?;
    println!("code:          {}", grant.code);
    println!("code_verifier: {}", grant.code_verifier);
    println!("redirect_uri:  {}", grant.redirect_uri);
    Ok(())
}

//! # Everything SDK
//!
//! Rust client for the MCP everything server, plus the loopback redirect
//! capture used by interactive authorization.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use everything_sdk::{ClientResult, JsonRpcMessage, McpClient};
//!
//! #[tokio::main]
//! async fn main() -> ClientResult<()> {
//!     let client = McpClient::builder()
//!         .endpoint("http://127.0.0.1:3001/mcp")
//!         .build()?;
//!
//!     client.initialize().await?;
//!
//!     // Server-to-client requests only travel on the event stream, so open
//!     // it before anything that may trigger one
//!     let mut events = client.events().await?;
//!     client.subscribe("test://static/resource/1").await?;
//!
//!     while let Some(message) = events.next_event().await {
//!         if let JsonRpcMessage::Notification(n) = message? {
//!             println!("{}: {:?}", n.method, n.params);
//!         }
//!     }
//!
//!     client.close().await
//! }
//! ```
//!
//! ## Authorization
//!
//! ```rust,no_run
//! use everything_sdk::auth::{authorize, SystemBrowser};
//! use everything_sdk::AuthorizationConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> everything_sdk::ClientResult<()> {
//! let config = AuthorizationConfig::new(
//!     "https://auth.example.com/authorize".parse()?,
//!     "my-client-id",
//! );
//! let grant = authorize(&config, &SystemBrowser, CancellationToken::new()).await?;
//! println!("code {} for {}", grant.code, grant.redirect_uri);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use auth::{AuthorizationGrant, CaptureOutcome, RedirectCapture};
pub use client::{McpClient, McpClientBuilder};
pub use config::{AuthorizationConfig, ClientConfig};
pub use error::{ClientError, ClientResult};
pub use transport::EventStream;

// Re-export protocol types for convenience
pub use everything_mcp::protocol::{
    CreateMessageParams, CreateMessageResult, Completion, JsonRpcError, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, LoggingLevel, LoggingMessageParams, Reference,
    ResourceUpdatedParams, Role, SamplingContent,
};

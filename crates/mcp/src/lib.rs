// MCP (Model Context Protocol) session services for the everything server:
// subscriptions, background notifications, logging levels and completions.

pub mod completion;
pub mod config;
pub mod error;
pub mod handler;
pub mod notify;
pub mod peer;
pub mod protocol;
pub mod session;

pub use completion::CompletionResolver;
pub use config::{NotificationConfig, SamplingConfig};
pub use error::McpError;
pub use handler::{RequestContext, RequestHandler};
pub use notify::NotificationLoop;
pub use peer::{DisconnectedPeer, Peer, PeerError};
pub use session::{SessionContext, SessionHandle, SessionHost};

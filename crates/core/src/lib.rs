// Session-scoped state shared by the everything server and its transports

pub mod subscriptions;
pub mod types;

pub use subscriptions::{SubscriptionError, SubscriptionRegistry};
pub use types::SessionId;

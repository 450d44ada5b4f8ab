//! Transport layer for the everything SDK.

pub mod http;
pub mod sse;

pub use http::{HttpTransport, PostOutcome};
pub use sse::EventStream;

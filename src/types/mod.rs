//! Public types for the cloudfetch API.

mod envelope;
mod key;
mod provider;
mod request;

pub use envelope::{DegradeCause, FetchEnvelope, Payload, Source};
pub use key::{CacheKey, Params};
pub use provider::{Provider, ServiceType};
pub use request::FetchRequest;

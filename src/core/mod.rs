//! Core building blocks shared by every layer: the envelope codec, the
//! typed error hierarchy, and the metrics registry.

pub mod envelope;
pub mod error;
pub mod metrics;

pub use envelope::{Envelope, Kind, Payload, Value};
pub use error::{RelayError, RelayResult};
pub use metrics::RelayMetrics;

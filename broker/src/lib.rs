//! Progress & SSE Broker (spec.md §4.K): multiplexes job progress events
//! to subscribers and persists a rate-limited snapshot to the Job Store.

mod registry;

pub use registry::{EventStream, ProgressBroker};

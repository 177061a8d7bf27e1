//! Shared domain types for the Stratum ingestion control plane.
//!
//! Every crate in the workspace depends on this one for the wire/storage
//! shape of jobs, graph entities, and progress events, the same way the
//! platform's services all depend on a single `legacy platform's models` crate.

pub mod artifact;
pub mod chunking;
pub mod concept;
pub mod job;
pub mod progress;
pub mod relationship;
pub mod source;

pub use artifact::*;
pub use chunking::*;
pub use concept::*;
pub use job::*;
pub use progress::*;
pub use relationship::*;
pub use source::*;

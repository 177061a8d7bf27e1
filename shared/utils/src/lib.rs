//! Cross-cutting runtime helpers shared by the Stratum ingestion crates:
//! pooled Postgres/Redis connections, a rate-limited in-memory cache, and
//! the sha256 helpers used for content-hash integrity checks.

pub mod cache_manager;
pub mod connection_pool;
pub mod hash;

pub use cache_manager::*;
pub use connection_pool::*;
pub use hash::*;

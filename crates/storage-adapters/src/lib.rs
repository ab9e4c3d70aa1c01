//! medibook/crates/storage-adapters/src/lib.rs
//!
//! Data-store and shared-counter implementations of the domain ports.
//! The in-memory store is always compiled; the rest is feature-gated.

pub mod memory;

#[cfg(feature = "db-postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis_limit;

pub use memory::MemoryStore;

#[cfg(feature = "db-postgres")]
pub use postgres::PgStore;

#[cfg(feature = "redis")]
pub use redis_limit::RedisRateLimiter;

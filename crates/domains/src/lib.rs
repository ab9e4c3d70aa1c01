//! medibook/crates/domains/src/lib.rs
//!
//! The central domain types and interface definitions for the booking core.
//! No I/O lives here: adapters implement the ports, services consume them.

pub mod clock;
pub mod error;
pub mod models;
pub mod ports;
pub mod time;

// Re-exporting for easier access in other crates
pub use clock::*;
pub use error::*;
pub use models::*;
pub use ports::*;
pub use time::*;

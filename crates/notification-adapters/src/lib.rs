//! medibook/crates/notification-adapters/src/lib.rs
//!
//! Patient notification senders.

pub mod log;
pub mod mail;

pub use log::LogNotifier;
pub use mail::{render_message, MailMessage, MailRelayNotifier};

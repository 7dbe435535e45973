//! Key/value state store with a watchable event log.

pub mod client;
pub mod watch;

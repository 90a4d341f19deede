//! Live-update client for a shared task-list service.
//!
//! Holds a local cache of task lists, tasks, comments and assignment
//! notifications, and keeps it in sync with the backend over a persistent
//! WebSocket channel.
//!
//! - [`connection`] owns the socket, reconnect backoff and teardown.
//! - [`sync`] classifies, deduplicates and applies inbound messages.
//! - [`net`] wires the two together for a presentation layer.
//! - [`api`] is the REST client used for login and the initial load.

pub mod api;
pub mod config;
pub mod connection;
pub mod net;
pub mod session;
pub mod sync;

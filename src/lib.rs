//! tlschat - a multi-user text chat relay over TLS.
//!
//! The server accepts TLS connections, asks each client for a username and
//! rebroadcasts every message to all other connected clients. The client is
//! a thin terminal front end.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tls;

//! `messip`: QNX-style synchronous and asynchronous message passing over TCP/IP.
//!
//! The crate is split along the same seams the manager/library split implies:
//!
//!   - [`wire`] — byte-exact framing shared by the manager and the client library.
//!   - [`client`] — the per-process API: control-link connect, channel lifecycle,
//!     synchronous send/receive/reply, buffered send, ping, timers, death notification.
//!   - [`manager`] — the long-running registry/buffering service (see the `messip-mgr` binary).
//!   - [`config`] — layered configuration shared by both the manager and the client library.
//!   - [`error`] — the crate-wide error taxonomy.

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod wire;

pub use error::{Error, Result};

//! # Transport Layer
//!
//! TCP listener, per-connection sessions and outbound frame delivery.
//!
//! ## Components
//! - **Tcp**: server builder, accept loop, graceful shutdown, client connector
//! - **Session**: connection handle and the read/dispatch loop
//! - **Clients**: live connections keyed by peer address
//! - **Sink**: fire-and-forget outbound queue and writer task
//!
//! ## Shutdown
//! Every connection holds a child of the server's cancellation token, so a
//! single `shutdown()` closes all of them. Sessions get
//! `server.shutdown_timeout` to finish before they are aborted.

pub mod clients;
pub mod session;
pub mod sink;
pub mod tcp;

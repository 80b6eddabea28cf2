//! L2TP server.
//!
//! Binds a UDP socket and drives a [`crate::tunnel::Dispatcher`] from a
//! single tokio task.

#[allow(clippy::module_inception)]
mod server;

pub use server::*;

//! UDP transport.
//!
//! - [`L2tpSocket`]: tokio UDP socket with an owned receive buffer
//! - [`L2tpSocketBuilder`]: socket options
//!
//! The dispatcher queues replies into a `Vec<Outbound>`; the socket flushes
//! that queue after each dispatch step.

mod socket;

pub use socket::*;

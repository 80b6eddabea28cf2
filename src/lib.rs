//! # L2TP Control Plane
//!
//! Control-connection side of an L2TPv2 (RFC 2661) responder:
//!
//! - **Codec**: the 12-byte control header and attribute-value pairs,
//!   big-endian, with a closed attribute registry
//! - **Dispatcher**: per-tunnel sequencing, reliable delivery and the
//!   SCCRQ/SCCRP/SCCCN, ICRQ/ICRP/ICCN, CDN, HELLO and StopCCN exchanges
//! - **Server**: one tokio task per UDP socket driving the dispatcher
//!
//! ## Feature Flags
//!
//! - `transport` (default): tokio UDP socket wrapper
//! - `server` (default): server loop with timers and graceful shutdown
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and the [`Transmit`](core::Transmit) trait
//! - [`frame`]: header, AVP and control message codec
//! - [`tunnel`]: tunnels, sessions and the [`Dispatcher`](tunnel::Dispatcher)
//! - [`config`]: JSON configuration file
//! - [`transport`]: UDP socket (requires `transport` feature)
//! - [`server`]: server loop (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use l2tp_control::prelude::*;
//!
//! let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
//! let mut outbox: Vec<Outbound> = Vec::new();
//!
//! let sccrq = ReplyFrame {
//!     message_type: Some(ControlMessageType::Sccrq),
//!     protocol_version: 2,
//!     tunnel_id: 0,
//!     session_id: 0,
//!     ns: 0,
//!     nr: 0,
//!     avps: vec![
//!         Avp::new(
//!             AttributeType::ProtocolVersion,
//!             AvpValue::Version { version: 1, revision: 0 },
//!         ),
//!         Avp::text(AttributeType::HostName, "lac"),
//!         Avp::u16(AttributeType::AssignedTunnelId, 7),
//!     ],
//!     priority: false,
//! }
//! .encode();
//!
//! let peer = "192.0.2.1:1701".parse().unwrap();
//! dispatcher.handle_datagram(&sccrq, peer, Instant::now(), &mut outbox)?;
//!
//! let reply = ControlMessage::parse(&outbox[0].datagram, peer)?;
//! assert_eq!(reply.message_type()?, ControlMessageType::Sccrp);
//! assert_eq!(reply.tunnel_id(), 7);
//! # Ok::<(), L2tpError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Wire codec
pub mod frame;

// Tunnel state and dispatch
pub mod tunnel;

// Configuration file
pub mod config;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::config::{FileConfig, L2TP_PROTOCOL, ProtocolConfig};
    pub use crate::frame::{
        AttributeType, Avp, AvpValue, ControlMessage, ControlMessageType, Header, ReplyFrame,
        ResultCode,
    };
    pub use crate::tunnel::{
        Dispatcher, DispatcherConfig, RetransmitPolicy, Session, SessionPhase, Tunnel,
        TunnelPhase,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{L2tpSocket, L2tpSocketBuilder};

    #[cfg(feature = "server")]
    pub use crate::server::{L2tpServer, ServerConfig, ServerConfigBuilder, ServerError};
}

// Re-export commonly used items at crate root
pub use core::{CodecError, ConfigError, DispatchError, L2tpError, Outbound, Transmit};
pub use frame::{ControlMessage, ControlMessageType, ReplyFrame};
pub use tunnel::{Dispatcher, DispatcherConfig};

#[cfg(feature = "server")]
pub use server::{L2tpServer, ServerConfig, ServerConfigBuilder};

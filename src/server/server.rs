//! L2TP control-plane server.
//!
//! Provides [`L2tpServer`], which owns one UDP socket and one
//! [`Dispatcher`] and runs them in a single task.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::core::constants::{L2TP_PORT, TIMER_TICK};
use crate::core::{DispatchError, Outbound};
use crate::transport::{DEFAULT_RECV_BUFFER_SIZE, L2tpSocket, L2tpSocketBuilder};
use crate::tunnel::{Dispatcher, DispatcherConfig};

/// Errors that can occur in the L2TP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("bind to {addr} failed: {source}")]
    BindFailed {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Protocol behaviour.
    pub dispatcher: DispatcherConfig,

    /// Period of the retransmit/keepalive timer.
    pub timer_tick: Duration,

    /// Receive buffer size.
    pub recv_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, L2TP_PORT)),
            dispatcher: DispatcherConfig::default(),
            timer_tick: TIMER_TICK,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

/// Builder for a [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the header protocol version.
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.config.dispatcher.protocol_version = version;
        self
    }

    /// Set the advertised host name.
    pub fn host_name(mut self, name: impl Into<String>) -> Self {
        self.config.dispatcher.host_name = name.into();
        self
    }

    /// Set the advertised vendor name.
    pub fn vendor_name(mut self, name: impl Into<String>) -> Self {
        self.config.dispatcher.vendor_name = name.into();
        self
    }

    /// Set the advertised receive window.
    pub fn receive_window_size(mut self, size: u16) -> Self {
        self.config.dispatcher.receive_window_size = size;
        self
    }

    /// Set the keepalive interval.
    pub fn hello_interval(mut self, interval: Duration) -> Self {
        self.config.dispatcher.hello_interval = interval;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatcher.idle_timeout = timeout;
        self
    }

    /// Set the retransmission limit.
    pub fn max_retransmits(mut self, max: u32) -> Self {
        self.config.dispatcher.retransmit.max_retransmits = max;
        self
    }

    /// Set the first retransmission timeout.
    pub fn retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatcher.retransmit.initial_timeout = timeout;
        self
    }

    /// Set the maximum number of tunnels.
    pub fn max_tunnels(mut self, max: usize) -> Self {
        self.config.dispatcher.max_tunnels = max;
        self
    }

    /// Set the timer period.
    pub fn timer_tick(mut self, tick: Duration) -> Self {
        self.config.timer_tick = tick;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An L2TP control-plane server.
///
/// # Example
///
/// ```ignore
/// use l2tp_control::server::{L2tpServer, ServerConfigBuilder};
///
/// let config = ServerConfigBuilder::new()
///     .bind_addr("0.0.0.0:1701".parse()?)
///     .host_name("lns1")
///     .build();
///
/// let server = L2tpServer::bind(config).await?;
/// server.run(tokio::signal::ctrl_c()).await?;
/// ```
#[derive(Debug)]
pub struct L2tpServer {
    /// Server configuration.
    config: ServerConfig,

    /// Bound address.
    local_addr: SocketAddr,

    /// The UDP socket.
    socket: L2tpSocket,

    /// Tunnel state.
    dispatcher: Dispatcher,

    /// Replies waiting to be sent.
    outbox: Vec<Outbound>,
}

impl L2tpServer {
    /// Bind the socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = L2tpSocketBuilder::new()
            .recv_buffer_size(config.recv_buffer_size)
            .bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            dispatcher: Dispatcher::new(config.dispatcher.clone()),
            config,
            local_addr,
            socket,
            outbox: Vec::new(),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve until `shutdown` completes, then stop every tunnel.
    ///
    /// Per-datagram errors are logged and never end the loop.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future,
    {
        let Self {
            config,
            local_addr,
            mut socket,
            mut dispatcher,
            mut outbox,
        } = self;

        let mut ticker = tokio::time::interval(config.timer_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        log::info!(
            "L2TP server listening on {local_addr} (version {})",
            config.dispatcher.protocol_version
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = socket.recv_from() => match received {
                    Ok((datagram, peer)) => {
                        if let Err(e) = dispatcher.handle_datagram(datagram, peer, Instant::now(), &mut outbox) {
                            log_dispatch_error(&e);
                        }
                    }
                    // ICMP errors from earlier sends surface here; keep serving.
                    Err(e) => log::warn!("receive failed: {e}"),
                },
                _ = ticker.tick() => dispatcher.poll_timers(Instant::now(), &mut outbox),
            }
            socket.flush(&mut outbox).await;
        }

        let notified = dispatcher.shutdown(Instant::now(), &mut outbox);
        socket.flush(&mut outbox).await;
        log::info!("L2TP server on {local_addr} stopped ({notified} tunnel(s) notified)");
        Ok(())
    }
}

fn log_dispatch_error(err: &DispatchError) {
    match err {
        DispatchError::UnexpectedMessage { .. } | DispatchError::UnknownSession { .. } => {
            log::debug!("{err}")
        }
        _ => log::warn!("{err}"),
    }
}

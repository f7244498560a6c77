//! Listener configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default port of `fuserpc serve`.
pub const DEFAULT_PORT: u16 = 7420;

/// Configuration for the RPC server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 = auto-assign).
    pub port: u16,
    /// Bind address.
    pub bind_address: IpAddr,
    /// Capacity of each connection's outgoing frame queue.
    pub write_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            write_queue: 64,
        }
    }
}

impl ServerConfig {
    /// Listen on `addr` exactly.
    pub fn listen(addr: SocketAddr) -> Self {
        Self {
            port: addr.port(),
            bind_address: addr.ip(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    #[must_use]
    pub fn write_queue(mut self, frames: usize) -> Self {
        self.write_queue = frames.max(1);
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

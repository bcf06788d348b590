//! Liveness probing: is anything accepting connections on a local port?
//!
//! The answer is best-effort. A port can change state between the probe and
//! the moment the requesting service binds it; the registry hands out names,
//! it never holds the socket.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

/// Default connect timeout for [`TcpProbe`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Answers whether a TCP port on this host is currently held by some process.
pub trait PortProbe: Send + Sync {
    fn is_port_in_use(&self, port: u16) -> bool;
}

/// Probes by connecting to `127.0.0.1:port` with a bounded timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl PortProbe for TcpProbe {
    fn is_port_in_use(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match TcpStream::connect_timeout(&addr, self.timeout) {
            Ok(_) => true,
            Err(e) => {
                tracing::trace!(port, error = %e, "probe found no listener");
                false
            }
        }
    }
}

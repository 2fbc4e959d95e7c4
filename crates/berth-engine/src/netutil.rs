//! Host port probing.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Answers whether something is listening on a host port.
pub trait PortProbe: Send + Sync {
    fn is_active(&self, port: u16) -> bool;
}

/// Probes by connecting to `127.0.0.1:<port>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn is_active(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
    }
}

/// Fixed set of busy ports.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct StaticPortProbe {
    busy: std::collections::BTreeSet<u16>,
}

#[cfg(any(test, feature = "test-utils"))]
impl StaticPortProbe {
    #[must_use]
    pub fn busy(ports: &[u16]) -> Self {
        Self {
            busy: ports.iter().copied().collect(),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl PortProbe for StaticPortProbe {
    fn is_active(&self, port: u16) -> bool {
        self.busy.contains(&port)
    }
}

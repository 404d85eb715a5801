//! UDP forwarder for VesselFinder.
//!
//! Fire-and-forget: one datagram per sentence to a fixed `host:port`,
//! errors are logged and the sentence is dropped.

use std::net::SocketAddr;

use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info, warn};

use super::{SentenceSink, TransportError};

pub struct UdpForwarder {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpForwarder {
    /// Resolve the destination once and bind an ephemeral local socket.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let target = lookup_host((host, port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| TransportError::Resolve(format!("{host}:{port}")))?;

        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local.to_string(),
                source,
            })?;

        info!(%target, "VesselFinder forwarding enabled");
        Ok(UdpForwarder { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send each sentence as its own CRLF-terminated datagram.
    pub async fn forward(&self, lines: &[String]) -> usize {
        let mut sent = 0;
        for line in lines {
            let datagram = format!("{line}\r\n");
            match self.socket.send_to(datagram.as_bytes(), self.target).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(target = %self.target, error = %e, "UDP send failed"),
            }
        }
        debug!(sent, target = %self.target, "VesselFinder forward");
        sent
    }
}

#[async_trait::async_trait]
impl SentenceSink for UdpForwarder {
    async fn send_lines(&self, lines: &[String]) -> usize {
        self.forward(lines).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Transport sinks: TCP broadcast to chartplotters, UDP forward to VesselFinder.

use std::io;

use thiserror::Error;

pub mod tcp;
pub mod udp;

pub use tcp::TcpBroadcaster;
pub use udp::UdpForwarder;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Somewhere sentences can be written.
#[async_trait::async_trait]
pub trait SentenceSink: Send + Sync {
    /// Deliver `lines` (without line terminators). Returns how many
    /// receivers accepted them.
    async fn send_lines(&self, lines: &[String]) -> usize;

    /// True once per client join: reading clears the marker.
    async fn take_joined(&self) -> bool {
        false
    }

    /// Drop every connection. The sink is unusable afterwards.
    async fn close(&self) {}
}

/// Join sentences into one CRLF-terminated block.
pub fn crlf_block(lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 2).sum());
    for line in lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

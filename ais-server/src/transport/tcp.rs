//! TCP NMEA server: every connected client receives every sentence.
//!
//! One accept task registers clients; one watcher task per client reads
//! until EOF and then unregisters it. Both touch the client set only under
//! its async mutex, so a broadcast always sees a consistent list.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{crlf_block, SentenceSink, TransportError};

/// A client that cannot take a cycle's output within this time is dropped.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    addr: SocketAddr,
    writer: OwnedWriteHalf,
    watcher: JoinHandle<()>,
}

#[derive(Default)]
struct ClientSet {
    clients: HashMap<u64, Client>,
    next_id: u64,
    /// Set on every accept, cleared by `take_joined`.
    joined: bool,
}

impl ClientSet {
    fn drop_client(&mut self, id: u64) {
        if let Some(client) = self.clients.remove(&id) {
            client.watcher.abort();
        }
    }
}

pub struct TcpBroadcaster {
    clients: Arc<Mutex<ClientSet>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    write_timeout: Duration,
}

impl TcpBroadcaster {
    /// Bind the listener and start accepting clients.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let clients = Arc::new(Mutex::new(ClientSet::default()));
        let accept_task = tokio::spawn(accept_loop(listener, clients.clone()));

        info!(%local_addr, "NMEA TCP server listening");
        Ok(TcpBroadcaster {
            clients,
            local_addr,
            accept_task,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.clients.len()
    }

    /// Write `lines` to every client concurrently. Clients that fail or
    /// stall are removed; the rest still get the data.
    pub async fn broadcast(&self, lines: &[String]) -> usize {
        if lines.is_empty() {
            return 0;
        }
        let block = crlf_block(lines);
        let bytes = block.as_bytes();
        let write_timeout = self.write_timeout;

        let mut set = self.clients.lock().await;
        let results = join_all(set.clients.iter_mut().map(|(&id, client)| async move {
            let result = timeout(write_timeout, client.writer.write_all(bytes)).await;
            (id, client.addr, result)
        }))
        .await;

        let mut delivered = 0;
        for (id, addr, result) in results {
            match result {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(%addr, error = %e, "client write failed, dropping");
                    set.drop_client(id);
                }
                Err(_) => {
                    warn!(%addr, "client write timed out, dropping");
                    set.drop_client(id);
                }
            }
        }
        debug!(lines = lines.len(), delivered, "TCP broadcast");
        delivered
    }

    /// Stop accepting and close every client socket.
    pub async fn shutdown(&self) {
        self.accept_task.abort();
        let mut set = self.clients.lock().await;
        for (_, mut client) in set.clients.drain() {
            client.watcher.abort();
            if let Err(e) = client.writer.shutdown().await {
                debug!(addr = %client.addr, error = %e, "client shutdown");
            }
        }
        set.joined = false;
        info!("NMEA TCP server stopped");
    }
}

impl Drop for TcpBroadcaster {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait::async_trait]
impl SentenceSink for TcpBroadcaster {
    async fn send_lines(&self, lines: &[String]) -> usize {
        self.broadcast(lines).await
    }

    async fn take_joined(&self) -> bool {
        let mut set = self.clients.lock().await;
        std::mem::take(&mut set.joined)
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn accept_loop(listener: TcpListener, clients: Arc<Mutex<ClientSet>>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%addr, error = %e, "set_nodelay failed");
                }
                let (reader, writer) = stream.into_split();

                let mut set = clients.lock().await;
                let id = set.next_id;
                set.next_id += 1;
                let watcher = tokio::spawn(watch_disconnect(id, addr, reader, clients.clone()));
                set.clients.insert(
                    id,
                    Client {
                        addr,
                        writer,
                        watcher,
                    },
                );
                set.joined = true;
                info!(%addr, clients = set.clients.len(), "client connected");
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Read (and discard) until the peer goes away, then unregister.
async fn watch_disconnect(
    id: u64,
    addr: SocketAddr,
    mut reader: OwnedReadHalf,
    clients: Arc<Mutex<ClientSet>>,
) {
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let mut set = clients.lock().await;
    if set.clients.remove(&id).is_some() {
        info!(%addr, clients = set.clients.len(), "client disconnected");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpStream;

    async fn wait_for_clients(server: &TcpBroadcaster, n: usize) {
        for _ in 0..200 {
            if server.client_count().await == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} clients, have {}", server.client_count().await);
    }

    fn lines() -> Vec<String> {
        vec![
            "!AIVDM,1,1,,B,15M67FC000G?ufbE`FepT@3n00Sa,0*5C".to_string(),
            "!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5C".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_broadcast_reaches_client() {
        let server = TcpBroadcaster::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_clients(&server, 1).await;

        assert!(server.take_joined().await);
        assert!(!server.take_joined().await);

        assert_eq!(server.broadcast(&lines()).await, 1);

        let mut reader = BufReader::new(stream);
        let mut first = String::new();
        reader.read_line(&mut first).await.unwrap();
        assert_eq!(first, format!("{}\r\n", lines()[0]));
        let mut second = String::new();
        reader.read_line(&mut second).await.unwrap();
        assert_eq!(second, format!("{}\r\n", lines()[1]));
    }

    #[tokio::test]
    async fn test_disconnected_client_removed() {
        let server = TcpBroadcaster::bind("127.0.0.1:0").await.unwrap();
        let keep = TcpStream::connect(server.local_addr()).await.unwrap();
        let gone = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_clients(&server, 2).await;

        drop(gone);
        wait_for_clients(&server, 1).await;

        assert_eq!(server.broadcast(&lines()).await, 1);
        let mut reader = BufReader::new(keep);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("!AIVDM"));
    }

    #[tokio::test]
    async fn test_empty_broadcast_is_noop() {
        let server = TcpBroadcaster::bind("127.0.0.1:0").await.unwrap();
        assert_eq!(server.broadcast(&[]).await, 0);
        assert!(!server.take_joined().await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let server = TcpBroadcaster::bind("127.0.0.1:0").await.unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_clients(&server, 1).await;

        server.shutdown().await;
        assert_eq!(server.client_count().await, 0);

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_bind_error() {
        let first = TcpBroadcaster::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().to_string();
        let err = TcpBroadcaster::bind(&addr).await.err().unwrap();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}

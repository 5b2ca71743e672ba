//! # Outbound Router
//!
//! Carries commands to peer nodes. Each peer gets exactly one lazily
//! opened TCP connection; a per-peer async mutex admits one request at a
//! time, so writes reach a peer in issue order. A connection that fails
//! mid-exchange is dropped and reopened on the next call.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::warn;

use skv_common::codec;
use skv_common::{Command, Response};

use crate::topology::{NodeId, Topology};

/// Default bound on waiting for a peer's one-line response.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no route to node {0}")]
    UnknownPeer(NodeId),
    #[error("command is not routable")]
    NotRoutable,
    #[error("peer i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("peer response timed out")]
    Timeout,
    #[error("malformed peer response")]
    BadResponse,
    #[error("peer rejected replication: {0}")]
    Rejected(String),
}

#[derive(Default)]
struct PeerSlot {
    conn: Option<PeerConn>,
}

struct PeerConn {
    reader: BufReader<TcpStream>,
}

/// Outbound client to the rest of the cluster.
pub struct Router {
    local: NodeId,
    topology: Arc<Topology>,
    // NodeId -> connection slot; the inner async mutex serializes use of
    // the single connection, the outer mutex only guards the map.
    peers: Mutex<HashMap<NodeId, Arc<AsyncMutex<PeerSlot>>>>,
    read_timeout: Duration,
}

impl Router {
    pub fn new(local: NodeId, topology: Arc<Topology>) -> Self {
        Self::with_read_timeout(local, topology, DEFAULT_PEER_TIMEOUT)
    }

    pub fn with_read_timeout(local: NodeId, topology: Arc<Topology>, read_timeout: Duration) -> Self {
        Router {
            local,
            topology,
            peers: Mutex::new(HashMap::new()),
            read_timeout,
        }
    }

    /// Relays a client command to the key's primary and returns the
    /// primary's response verbatim.
    ///
    /// Refuses REPL_* input: replication traffic is never forwarded.
    pub async fn forward_to_primary(&self, cmd: &Command) -> Result<Response, RouterError> {
        if cmd.is_internal() {
            return Err(RouterError::NotRoutable);
        }
        let key = cmd.key().ok_or(RouterError::NotRoutable)?;
        let target = self.topology.primary(key);
        self.exchange(target, cmd).await
    }

    /// Mirrors an applied write to the key's replica and awaits the
    /// acknowledgement.
    ///
    /// Accepts only client-form PUT/DELETE; the REPL_* tagging happens
    /// here and nowhere else.
    pub async fn replicate(&self, cmd: &Command) -> Result<(), RouterError> {
        let key = cmd.key().ok_or(RouterError::NotRoutable)?;
        let repl = cmd.as_replication().ok_or(RouterError::NotRoutable)?;
        let target = self.topology.replica(key);
        match self.exchange(target, &repl).await? {
            Response::Ok(_) => Ok(()),
            Response::Error(message) => Err(RouterError::Rejected(message)),
        }
    }

    /// One request/response exchange on the peer's single connection.
    async fn exchange(&self, peer: NodeId, cmd: &Command) -> Result<Response, RouterError> {
        let slot = self.peer_slot(peer)?;
        let mut slot = slot.lock().await;

        if slot.conn.is_none() {
            let addr = self.topology.addr(peer).ok_or(RouterError::UnknownPeer(peer))?;
            slot.conn = Some(PeerConn::open(addr).await?);
        }

        let conn = match slot.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(RouterError::UnknownPeer(peer)),
        };

        match conn.exchange(cmd, self.read_timeout).await {
            Ok(response) => Ok(response),
            Err(err) => {
                // The stream state is unknown; reopen on the next call.
                slot.conn = None;
                warn!(peer, error = %err, "dropping peer connection");
                Err(err)
            }
        }
    }

    fn peer_slot(&self, peer: NodeId) -> Result<Arc<AsyncMutex<PeerSlot>>, RouterError> {
        if peer == self.local || !self.topology.contains(peer) {
            return Err(RouterError::UnknownPeer(peer));
        }
        let mut peers = self.peers.lock();
        Ok(Arc::clone(peers.entry(peer).or_default()))
    }
}

impl PeerConn {
    async fn open(addr: &str) -> Result<Self, RouterError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(PeerConn {
            reader: BufReader::new(stream),
        })
    }

    async fn exchange(&mut self, cmd: &Command, read_timeout: Duration) -> Result<Response, RouterError> {
        let line = codec::format_command(cmd);
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        let mut reply = String::new();
        let read = timeout(read_timeout, self.reader.read_line(&mut reply))
            .await
            .map_err(|_| RouterError::Timeout)??;
        if read == 0 {
            return Err(RouterError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            )));
        }
        codec::parse_response(&reply).map_err(|_| RouterError::BadResponse)
    }
}

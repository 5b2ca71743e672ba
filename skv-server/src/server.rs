//! # TCP Server
//!
//! Accept client connections and run one worker task per connection. Each
//! worker drains complete lines from its read buffer, answers parse errors
//! inline, and closes on QUIT, EOF, or an unrecoverable framing error.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use skv_cluster::{NodeId, Router, Topology, DEFAULT_PEER_TIMEOUT};
use skv_common::{codec, frame, Command, Response, MAX_LINE_LEN};
use skv_store::{Store, SweeperHandle, DEFAULT_MAX_KEYS, DEFAULT_SWEEP_INTERVAL, DEFAULT_SWEEP_SAMPLE};

use crate::dispatch::{dispatch, NodeCtx};

/// How long shutdown waits for open sessions before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("cluster mode requires a topology")]
    MissingTopology,
    #[error("node {0} has no address in the topology")]
    NodeNotInTopology(NodeId),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Startup contract for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node identity; `0` selects standalone mode.
    pub node_id: NodeId,
    /// Entry capacity of the local store.
    pub max_keys: usize,
    /// Cluster table; required when `node_id >= 1`.
    pub topology: Option<Topology>,
    /// Bound on waiting for a peer response.
    pub peer_timeout: Duration,
    /// Background expiry sweep tick; `None` disables the sweeper.
    pub sweep_interval: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: 0,
            max_keys: DEFAULT_MAX_KEYS,
            topology: None,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

/// A bound, not-yet-running node.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<NodeCtx>,
    // Keeps the sweeper thread alive for the server's lifetime.
    _sweeper: Option<SweeperHandle>,
}

impl Server {
    /// Binds the listener and assembles the node state.
    pub async fn bind(addr: &str, config: NodeConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Self::with_listener(listener, config)
    }

    /// Wraps an already-bound std listener. Lets a caller reserve ports
    /// before the topology is assembled (the integration harness does).
    pub fn from_std(listener: std::net::TcpListener, config: NodeConfig) -> Result<Self, ServerError> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        Self::with_listener(listener, config)
    }

    fn with_listener(listener: TcpListener, config: NodeConfig) -> Result<Self, ServerError> {
        let store = Arc::new(Store::with_capacity(config.max_keys));
        let sweeper = config
            .sweep_interval
            .map(|interval| store.start_sweeper(interval, DEFAULT_SWEEP_SAMPLE));

        let (topology, router) = if config.node_id == 0 {
            (None, None)
        } else {
            let topology = Arc::new(config.topology.ok_or(ServerError::MissingTopology)?);
            if !topology.contains(config.node_id) {
                return Err(ServerError::NodeNotInTopology(config.node_id));
            }
            let router =
                Router::with_read_timeout(config.node_id, Arc::clone(&topology), config.peer_timeout);
            (Some(topology), Some(router))
        };

        Ok(Server {
            listener,
            ctx: Arc::new(NodeCtx {
                node_id: config.node_id,
                store,
                topology,
                router,
            }),
            _sweeper: sweeper,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; runs until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Accept loop that also watches a shutdown future.
    ///
    /// When `shutdown` completes, the listener closes immediately and
    /// in-flight connection workers keep running: each finishes its
    /// current command and exits on its session's end, bounded by a grace
    /// period after which the stragglers are aborted.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            ctx,
            _sweeper,
        } = self;
        let addr = listener.local_addr()?;
        info!(node_id = ctx.node_id, %addr, "accepting connections");

        let mut workers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let _ = stream.set_nodelay(true);
                    let ctx = Arc::clone(&ctx);
                    workers.spawn(async move {
                        debug!(%peer, "client connected");
                        match handle_connection(stream, ctx).await {
                            Ok(()) => debug!(%peer, "client disconnected"),
                            Err(err) => debug!(%peer, error = %err, "connection closed on i/o error"),
                        }
                    });
                }
                // Reap finished workers so the set stays small.
                Some(_) = workers.join_next(), if !workers.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }

        // Stop accepting; open sessions drain on their own schedule.
        drop(listener);
        if !workers.is_empty() {
            info!(sessions = workers.len(), "draining open sessions");
            let drained = timeout(SHUTDOWN_GRACE, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(sessions = workers.len(), "grace period expired, aborting sessions");
                workers.shutdown().await;
            }
        }
        Ok(())
    }
}

/// One connection worker: strictly sequential, no pipelining. The next
/// line is not parsed until the previous response has been written.
async fn handle_connection(mut stream: TcpStream, ctx: Arc<NodeCtx>) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        loop {
            match frame::take_line(&mut buffer, MAX_LINE_LEN) {
                Ok(Some(line)) => {
                    let cmd = match codec::parse_command(&line) {
                        Ok(cmd) => cmd,
                        Err(err) => {
                            write_response(&mut stream, &Response::from(err)).await?;
                            continue;
                        }
                    };
                    if matches!(cmd, Command::Quit) {
                        write_response(&mut stream, &Response::bye()).await?;
                        return Ok(());
                    }
                    let response = dispatch(&ctx, cmd).await;
                    write_response(&mut stream, &response).await?;
                }
                Ok(None) => break,
                Err(err) => {
                    // The buffer cannot be resynchronized; reply once and
                    // drop the connection.
                    write_response(&mut stream, &Response::from(err)).await?;
                    return Ok(());
                }
            }
        }

        let read = stream.read_buf(&mut buffer).await?;
        if read == 0 {
            return Ok(());
        }
    }
}

async fn write_response(stream: &mut TcpStream, response: &Response) -> io::Result<()> {
    stream
        .write_all(codec::format_response(response).as_bytes())
        .await?;
    stream.flush().await
}

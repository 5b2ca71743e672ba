//! # Cluster Dispatch
//!
//! The routing policy applied to every parsed command:
//!
//! | command       | primary | replica | action                              |
//! |---------------|---------|---------|-------------------------------------|
//! | GET / EXISTS  | any     | any     | serve locally, else forward         |
//! | PUT / DELETE  | yes     |         | apply locally, replicate, reply OK  |
//! | PUT / DELETE  | no      |         | forward, relay primary's response   |
//! | REPL_*        |         | yes     | apply locally, reply OK, no cascade |
//! | REPL_*        |         | no      | reject                              |
//!
//! Standalone nodes have no topology and serve everything locally.
//! Replication failures are logged and do not fail the client write.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use skv_cluster::{NodeId, Router, Topology};
use skv_common::{Command, KvError, Response};
use skv_store::Store;

/// Shared per-node state handed to every connection worker.
pub(crate) struct NodeCtx {
    pub(crate) node_id: NodeId,
    pub(crate) store: Arc<Store>,
    pub(crate) topology: Option<Arc<Topology>>,
    pub(crate) router: Option<Router>,
}

impl NodeCtx {
    /// GET/EXISTS are answered locally on the shard's primary and replica.
    fn serves_locally(&self, key: &str) -> bool {
        match &self.topology {
            None => true,
            Some(topology) => {
                topology.is_primary(self.node_id, key) || topology.is_replica(self.node_id, key)
            }
        }
    }

    /// Client writes are applied only on the shard's primary.
    fn owns_writes(&self, key: &str) -> bool {
        match &self.topology {
            None => true,
            Some(topology) => topology.is_primary(self.node_id, key),
        }
    }

    /// REPL_* is accepted only from the shard's replica position.
    fn accepts_replication(&self, key: &str) -> bool {
        match &self.topology {
            None => true,
            Some(topology) => topology.is_replica(self.node_id, key),
        }
    }
}

pub(crate) async fn dispatch(ctx: &NodeCtx, cmd: Command) -> Response {
    match cmd {
        Command::Get { key } => {
            if ctx.serves_locally(&key) {
                match ctx.store.get(&key) {
                    Some(value) => Response::value(value),
                    None => Response::from(KvError::KeyNotFound),
                }
            } else {
                forward(ctx, Command::Get { key }).await
            }
        }
        Command::Exists { key } => {
            if ctx.serves_locally(&key) {
                Response::flag(ctx.store.exists(&key))
            } else {
                forward(ctx, Command::Exists { key }).await
            }
        }
        Command::Put { key, value, ttl_secs } => {
            if ctx.owns_writes(&key) {
                ctx.store.put(&key, &value, ttl_from_secs(ttl_secs));
                replicate(ctx, Command::Put { key, value, ttl_secs }).await;
                Response::stored()
            } else {
                forward(ctx, Command::Put { key, value, ttl_secs }).await
            }
        }
        Command::Delete { key } => {
            if ctx.owns_writes(&key) {
                if !ctx.store.delete(&key) {
                    return Response::from(KvError::KeyNotFound);
                }
                replicate(ctx, Command::Delete { key }).await;
                Response::deleted()
            } else {
                forward(ctx, Command::Delete { key }).await
            }
        }
        Command::ReplPut { key, value, ttl_secs } => {
            if !ctx.accepts_replication(&key) {
                return Response::from(KvError::NotReplica);
            }
            ctx.store.put(&key, &value, ttl_from_secs(ttl_secs));
            Response::stored()
        }
        Command::ReplDelete { key } => {
            if !ctx.accepts_replication(&key) {
                return Response::from(KvError::NotReplica);
            }
            // An already-absent key is converged state, not a failure.
            ctx.store.delete(&key);
            Response::deleted()
        }
        Command::Quit => Response::bye(),
    }
}

fn ttl_from_secs(ttl_secs: u32) -> Option<Duration> {
    (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs as u64))
}

async fn forward(ctx: &NodeCtx, cmd: Command) -> Response {
    let router = match &ctx.router {
        Some(router) => router,
        None => return Response::from(KvError::UpstreamUnavailable),
    };
    match router.forward_to_primary(&cmd).await {
        Ok(response) => response,
        Err(err) => {
            warn!(key = cmd.key(), error = %err, "forward to primary failed");
            Response::from(KvError::UpstreamUnavailable)
        }
    }
}

/// Best-effort synchronous replication: the client write already
/// succeeded locally, so a replica failure is logged, never surfaced.
async fn replicate(ctx: &NodeCtx, cmd: Command) {
    let router = match &ctx.router {
        Some(router) => router,
        None => return,
    };
    if let Err(err) = router.replicate(&cmd).await {
        warn!(key = cmd.key(), error = %err, "replication failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone() -> NodeCtx {
        NodeCtx {
            node_id: 0,
            store: Arc::new(Store::with_capacity(16)),
            topology: None,
            router: None,
        }
    }

    /// Node 1 of a cluster whose peers are all unreachable.
    fn cluster_node1() -> NodeCtx {
        let topology = Arc::new(Topology::three_node([
            "127.0.0.1:1",
            "127.0.0.1:1",
            "127.0.0.1:1",
        ]));
        NodeCtx {
            node_id: 1,
            store: Arc::new(Store::with_capacity(16)),
            topology: Some(Arc::clone(&topology)),
            router: Some(Router::new(1, topology)),
        }
    }

    fn key_where(ctx: &NodeCtx, pred: impl Fn(&Topology, &str) -> bool) -> String {
        let topology = ctx.topology.as_ref().expect("cluster ctx");
        (0..)
            .map(|i| format!("key{i}"))
            .find(|key| pred(topology, key))
            .expect("some key matches")
    }

    #[tokio::test]
    async fn standalone_serves_everything_locally() {
        let ctx = standalone();
        let put = Command::Put {
            key: "apple".into(),
            value: "red".into(),
            ttl_secs: 0,
        };
        assert_eq!(dispatch(&ctx, put).await, Response::stored());
        assert_eq!(
            dispatch(&ctx, Command::Get { key: "apple".into() }).await,
            Response::value("red")
        );
        assert_eq!(
            dispatch(&ctx, Command::Exists { key: "apple".into() }).await,
            Response::flag(true)
        );
        assert_eq!(
            dispatch(&ctx, Command::Delete { key: "apple".into() }).await,
            Response::deleted()
        );
        assert_eq!(
            dispatch(&ctx, Command::Get { key: "apple".into() }).await,
            Response::Error("key not found".into())
        );
        assert_eq!(
            dispatch(&ctx, Command::Delete { key: "apple".into() }).await,
            Response::Error("key not found".into())
        );
    }

    #[tokio::test]
    async fn primary_write_succeeds_despite_unreachable_replica() {
        let ctx = cluster_node1();
        let key = key_where(&ctx, |t, k| t.is_primary(1, k));

        let put = Command::Put {
            key: key.clone(),
            value: "v".into(),
            ttl_secs: 0,
        };
        assert_eq!(dispatch(&ctx, put).await, Response::stored());
        assert_eq!(
            dispatch(&ctx, Command::Get { key }).await,
            Response::value("v")
        );
    }

    #[tokio::test]
    async fn non_primary_write_reports_upstream_failure() {
        let ctx = cluster_node1();
        let key = key_where(&ctx, |t, k| !t.is_primary(1, k));

        let put = Command::Put {
            key,
            value: "v".into(),
            ttl_secs: 0,
        };
        assert_eq!(
            dispatch(&ctx, put).await,
            Response::Error("upstream unavailable".into())
        );
    }

    #[tokio::test]
    async fn replica_applies_replication_without_cascading() {
        let ctx = cluster_node1();
        let key = key_where(&ctx, |t, k| t.is_replica(1, k));

        // Every peer address is unreachable, so a reply of OK proves the
        // node produced no outbound traffic for REPL_*.
        let repl = Command::ReplPut {
            key: key.clone(),
            value: "v".into(),
            ttl_secs: 0,
        };
        assert_eq!(dispatch(&ctx, repl).await, Response::stored());
        assert_eq!(
            dispatch(&ctx, Command::Get { key: key.clone() }).await,
            Response::value("v")
        );

        assert_eq!(
            dispatch(&ctx, Command::ReplDelete { key: key.clone() }).await,
            Response::deleted()
        );
        // Replaying the delete still acknowledges.
        assert_eq!(
            dispatch(&ctx, Command::ReplDelete { key }).await,
            Response::deleted()
        );
    }

    #[tokio::test]
    async fn non_replica_rejects_replication() {
        let ctx = cluster_node1();
        let key = key_where(&ctx, |t, k| !t.is_replica(1, k));

        let repl = Command::ReplPut {
            key,
            value: "v".into(),
            ttl_secs: 0,
        };
        assert_eq!(
            dispatch(&ctx, repl).await,
            Response::Error("not a replica for this key".into())
        );
    }

    #[tokio::test]
    async fn quit_is_acknowledged() {
        let ctx = standalone();
        assert_eq!(dispatch(&ctx, Command::Quit).await, Response::bye());
    }
}

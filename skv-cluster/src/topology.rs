//! # Shard Topology
//!
//! Immutable table mapping the keyspace to nodes: `hash(key) mod S` picks
//! a shard, each shard names a primary and a replica, each node has one
//! address. Lookups are pure and lock-free.
//!
//! The shard hash uses fixed seeds so every node of a cluster computes the
//! same `shard(key)` regardless of process or restart.

use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;
use thiserror::Error;

/// Node identity. `0` is reserved for standalone mode and never appears in
/// a topology.
pub type NodeId = u32;

/// Shard index in `[0, shard_count)`.
pub type ShardId = usize;

// Arbitrary but fixed: shard selection must agree across the cluster.
const SHARD_HASH_SEEDS: (u64, u64, u64, u64) = (
    0x736b_765f_7368_6172,
    0x645f_6861_7368_5f31,
    0x9e37_79b9_7f4a_7c15,
    0x2545_f491_4f6c_dd1d,
);

/// Primary and replica for one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRoles {
    pub primary: NodeId,
    pub replica: NodeId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology has no shards")]
    NoShards,
    #[error("shard {shard} assigns the same node as primary and replica")]
    SamePrimaryReplica { shard: ShardId },
    #[error("node {node} is referenced by a shard but has no address")]
    UnknownNode { node: NodeId },
}

/// Static cluster map, immutable after startup.
#[derive(Debug, Clone)]
pub struct Topology {
    shards: Vec<ShardRoles>,
    nodes: BTreeMap<NodeId, String>,
    hash_state: RandomState,
}

impl Topology {
    /// Builds a topology from per-shard roles and per-node addresses.
    pub fn new(
        shards: Vec<ShardRoles>,
        nodes: BTreeMap<NodeId, String>,
    ) -> Result<Self, TopologyError> {
        if shards.is_empty() {
            return Err(TopologyError::NoShards);
        }
        for (shard, roles) in shards.iter().enumerate() {
            if roles.primary == roles.replica {
                return Err(TopologyError::SamePrimaryReplica { shard });
            }
            for node in [roles.primary, roles.replica] {
                if !nodes.contains_key(&node) {
                    return Err(TopologyError::UnknownNode { node });
                }
            }
        }
        Ok(Topology {
            shards,
            nodes,
            hash_state: seeded_state(),
        })
    }

    /// The reference three-node layout: shard 0 → (1,3), shard 1 → (2,1),
    /// shard 2 → (3,2). `addrs[i]` is the address of node `i + 1`.
    pub fn three_node<A: Into<String>>(addrs: [A; 3]) -> Self {
        let shards = vec![
            ShardRoles { primary: 1, replica: 3 },
            ShardRoles { primary: 2, replica: 1 },
            ShardRoles { primary: 3, replica: 2 },
        ];
        let nodes = addrs
            .into_iter()
            .enumerate()
            .map(|(idx, addr)| (idx as NodeId + 1, addr.into()))
            .collect();
        Topology {
            shards,
            nodes,
            hash_state: seeded_state(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Maps a key to its shard.
    pub fn shard(&self, key: &str) -> ShardId {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key.as_bytes());
        (hasher.finish() as usize) % self.shards.len()
    }

    pub fn roles(&self, shard: ShardId) -> ShardRoles {
        self.shards[shard]
    }

    /// The node that accepts client writes for this key.
    pub fn primary(&self, key: &str) -> NodeId {
        self.shards[self.shard(key)].primary
    }

    /// The node that mirrors this key's shard.
    pub fn replica(&self, key: &str) -> NodeId {
        self.shards[self.shard(key)].replica
    }

    pub fn is_primary(&self, node: NodeId, key: &str) -> bool {
        self.primary(key) == node
    }

    pub fn is_replica(&self, node: NodeId, key: &str) -> bool {
        self.replica(key) == node
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn addr(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(String::as_str)
    }
}

fn seeded_state() -> RandomState {
    let (k0, k1, k2, k3) = SHARD_HASH_SEEDS;
    RandomState::with_seeds(k0, k1, k2, k3)
}

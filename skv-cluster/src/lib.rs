//! # Cluster Layer
//!
//! Static shard topology plus the outbound router. The topology decides
//! which node owns a key; the router carries commands to peers over one
//! persistent connection per peer.

mod router;
mod topology;

pub use router::{Router, RouterError, DEFAULT_PEER_TIMEOUT};
pub use topology::{NodeId, ShardId, ShardRoles, Topology, TopologyError};

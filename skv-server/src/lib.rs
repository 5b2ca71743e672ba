//! # ShardKV Node
//!
//! The inbound half of a cache node: accept TCP connections, read command
//! lines, dispatch them through the cluster routing policy, and write
//! response lines. One async task per connection; commands within a
//! connection are handled strictly in order.

mod dispatch;
mod server;

pub use server::{NodeConfig, Server, ServerError};

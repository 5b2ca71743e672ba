//! # ShardKV Sync Client
//!
//! A small blocking client over one persistent connection. Used by the
//! integration suite and handy for scripting against a node.

mod client;

pub use client::{Client, ClientConfig, ClientError, ClientResult};

//! # skv-server Binary
//!
//! Thin launch harness over [`Server`]: parse the startup contract from
//! flags or environment, install logging, build the topology for cluster
//! mode, and serve until a shutdown signal arrives.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skv_cluster::Topology;
use skv_server::{NodeConfig, Server};

/// Built-in three-node table; `--cluster-hosts` overrides it.
const BUILTIN_HOSTS: [&str; 3] = ["kv-node-1:7000", "kv-node-2:7000", "kv-node-3:7000"];

#[derive(Debug, Parser)]
#[command(name = "skv-server", about = "Sharded in-memory key-value cache node")]
struct Args {
    /// Node identity: 1..3 selects cluster mode, 0 standalone.
    #[arg(long, env = "NODE_ID", default_value_t = 0)]
    node_id: u32,

    /// Listening TCP port.
    #[arg(long, env = "PORT", default_value_t = 7000)]
    port: u16,

    /// Maximum number of cached entries.
    #[arg(long, env = "MAX_KEYS", default_value_t = skv_store::DEFAULT_MAX_KEYS)]
    max_keys: usize,

    /// Comma-separated host:port list for nodes 1..3.
    #[arg(long, env = "CLUSTER_HOSTS")]
    cluster_hosts: Option<String>,

    /// Disable the background expiry sweeper.
    #[arg(long, env = "NO_SWEEP", default_value_t = false)]
    no_sweep: bool,
}

fn build_topology(hosts: Option<&str>) -> anyhow::Result<Topology> {
    let addrs: [String; 3] = match hosts {
        Some(list) => {
            let parts: Vec<String> = list.split(',').map(|part| part.trim().to_string()).collect();
            let parts: [String; 3] = parts
                .try_into()
                .map_err(|_| anyhow::anyhow!("cluster hosts must list exactly 3 host:port entries"))?;
            parts
        }
        None => BUILTIN_HOSTS.map(String::from),
    };
    Ok(Topology::three_node(addrs))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let topology = if args.node_id >= 1 {
        Some(build_topology(args.cluster_hosts.as_deref()).context("invalid cluster topology")?)
    } else {
        None
    };

    let config = NodeConfig {
        node_id: args.node_id,
        max_keys: args.max_keys,
        topology,
        sweep_interval: if args.no_sweep {
            None
        } else {
            Some(skv_store::DEFAULT_SWEEP_INTERVAL)
        },
        ..NodeConfig::default()
    };

    let addr = format!("0.0.0.0:{}", args.port);
    let server = Server::bind(&addr, config)
        .await
        .with_context(|| format!("failed to start node {}", args.node_id))?;

    // On SIGINT the listener closes and open sessions drain before exit.
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("accept loop failed")?;
    Ok(())
}

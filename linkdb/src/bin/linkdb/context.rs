use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use linkdb::{ConnectionManager, MemoryLogger, RedisBackend, Topology, TracingLogger};

#[derive(Args, Clone, Debug)]
pub struct TopologyArgs {
    /// Topology file (.toml or .json)
    #[arg(env = "LINKDB_TOPOLOGY")]
    pub topology: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct ConnectArgs {
    /// Redis URL, replaces the topology's default host and port
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Key prefix under which databases are provisioned
    #[arg(long, env = "LINKDB_PREFIX", default_value = "linkdb")]
    pub prefix: String,
}

pub fn load_topology(args: &TopologyArgs) -> Result<Topology> {
    Topology::load(&args.topology)
        .with_context(|| format!("Failed to load topology from {}", args.topology.display()))
}

/// A loaded topology plus a Redis-backed manager whose events are recorded for reporting.
pub struct LinkContext {
    pub topology: Topology,
    pub manager: ConnectionManager,
    pub events: Arc<MemoryLogger>,
}

impl LinkContext {
    pub fn new(topology: &TopologyArgs, connect: &ConnectArgs) -> Result<Self> {
        let mut topology = load_topology(topology)?;
        if let Some(url) = &connect.redis_url {
            apply_redis_url(&mut topology, url)?;
        }

        let events = Arc::new(MemoryLogger::forwarding_to(Arc::new(TracingLogger)));
        let manager = ConnectionManager::builder(Arc::new(RedisBackend::new(connect.prefix.clone())))
            .logger(events.clone())
            .build();

        Ok(Self {
            topology,
            manager,
            events,
        })
    }

    pub fn conflict_messages(&self) -> Vec<String> {
        self.events.conflicts().iter().map(ToString::to_string).collect()
    }
}

fn apply_redis_url(topology: &mut Topology, url: &str) -> Result<()> {
    let parsed = redis::parse_redis_url(url).with_context(|| format!("Invalid REDIS_URL '{url}'"))?;
    if let Some(host) = parsed.host_str() {
        topology.host = host.to_string();
    }
    if let Some(port) = parsed.port() {
        topology.port = port;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_replaces_host_and_port() {
        let mut topology = Topology::default();
        apply_redis_url(&mut topology, "redis://10.1.2.3:7000/").unwrap();
        assert_eq!(topology.host, "10.1.2.3");
        assert_eq!(topology.port, 7000);
    }

    #[test]
    fn garbage_urls_are_rejected() {
        let mut topology = Topology::default();
        assert!(apply_redis_url(&mut topology, "not a url").is_err());
    }
}

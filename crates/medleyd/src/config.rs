//! TOML configuration for the Medley daemon.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use medley_engine::StoreConfig;
use medley_sync::SyncConfig;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub node: NodeSection,
    pub sync: SyncSection,
    pub pairing: PairingSection,
    pub log: LogSection,
}

/// Which side of the record this node is on. Informational only: the root
/// writer is whoever ran `init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Patient,
    Provider,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Patient => f.write_str("patient"),
            Role::Provider => f.write_str("provider"),
        }
    }
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory holding the identity, logs and attachments.
    pub data_dir: PathBuf,
    /// Address `serve` and `invite` listen on.
    pub listen_addr: String,
    pub role: Role,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".medley"))
            .unwrap_or_else(|| PathBuf::from(".medley"));
        Self {
            data_dir,
            listen_addr: "0.0.0.0:4850".to_string(),
            role: Role::Patient,
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Period of the sync timer in peer sessions, in milliseconds.
    pub interval_ms: u64,
    /// Maximum entries per batch.
    pub batch_size: usize,
    /// Peers `serve` keeps a session open with (`host:port`).
    pub peers: Vec<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            batch_size: 64,
            peers: Vec::new(),
        }
    }
}

/// `[pairing]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PairingSection {
    /// Lifetime of a new invite, in seconds.
    pub invite_ttl_secs: u64,
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            invite_ttl_secs: 15 * 60,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Settings for the record store under `[node] data_dir`.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            sync: SyncConfig {
                batch_size: self.sync.batch_size.max(1),
                ..SyncConfig::default()
            },
            sync_interval: Duration::from_millis(self.sync.interval_ms.max(1)),
            invite_ttl: Duration::from_secs(self.pairing.invite_ttl_secs),
            ..StoreConfig::persistent(&self.node.data_dir)
        }
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_addr(&self.node.listen_addr)
    }

    pub fn peer_addrs(&self) -> anyhow::Result<Vec<SocketAddr>> {
        self.sync.peers.iter().map(|p| parse_addr(p)).collect()
    }
}

pub fn parse_addr(s: &str) -> anyhow::Result<SocketAddr> {
    s.parse()
        .with_context(|| format!("invalid address {s:?} (expected host:port)"))
}

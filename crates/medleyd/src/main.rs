//! `medleyd`: the Medley daemon and command-line client.
//!
//! # Usage
//!
//! ```text
//! medleyd init                                # create a store, this node is root
//! medleyd put vitals/bp 120/80                # write a record
//! medleyd put imaging/1 --file scan.dcm       # store an attachment by reference
//! medleyd get vitals/bp
//! medleyd scan vitals/
//! medleyd invite --label "Dr. Okafor"         # print a token, wait for the redeemer
//! medleyd join <token> --peer 10.0.0.5:4850   # redeem a token on a new node
//! medleyd serve --peer 10.0.0.5:4850          # replicate until Ctrl-C
//! medleyd sync --peer 10.0.0.5:4850           # one round, then exit
//! medleyd revoke <writer-id>
//! ```

mod config;
mod server;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use medley_blob::BlobRef;
use medley_engine::{RecordStore, StoreError};
use medley_net::{TcpDiscovery, connect_tcp};
use medley_pairing::InviteMetadata;
use medley_types::WriterId;
use tokio::net::TcpListener;
use tracing::info;

use config::{CliConfig, parse_addr};

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "medleyd", version, about = "Medley replicated record store")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(short, long, global = true, env = "MEDLEY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new store with this node as its root writer.
    Init,

    /// Write a record.
    Put {
        key: String,
        /// Value to store; omit when using `--file`.
        value: Option<String>,
        /// Store this file as an attachment and record its reference.
        #[arg(short, long, conflicts_with = "value")]
        file: Option<PathBuf>,
    },

    /// Read a record.
    Get {
        key: String,
        /// Treat the value as an attachment reference and write the
        /// attachment to this path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a record.
    Delete { key: String },

    /// List records under a prefix.
    Scan {
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Show store status.
    Status,

    /// List writers and their membership.
    Writers,

    /// Create an invite, print its token, and wait for the redeemer.
    Invite {
        /// Who the invite is for.
        #[arg(short, long, default_value = "")]
        label: String,
        /// Role the redeemer is expected to take.
        #[arg(short, long)]
        role: Option<String>,
        /// Override the listen address.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Redeem an invite token and join the issuer's store.
    Join {
        token: String,
        /// Address of the issuing node.
        #[arg(short, long)]
        peer: String,
    },

    /// Revoke a writer's access.
    Revoke { writer: String },

    /// Replicate with peers until interrupted.
    Serve {
        /// Override the listen address.
        #[arg(short, long)]
        listen: Option<String>,
        /// Peer(s) to keep a session with, in addition to `[sync] peers`.
        #[arg(short, long)]
        peer: Vec<String>,
    },

    /// Run one sync round with a peer.
    Sync {
        #[arg(short, long)]
        peer: String,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.node.data_dir = dir;
    }

    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Put { key, value, file } => cmd_put(&config, &key, value, file).await,
        Commands::Get { key, output } => cmd_get(&config, &key, output).await,
        Commands::Delete { key } => {
            open(&config)?.delete(&key)?;
            Ok(())
        }
        Commands::Scan { prefix } => cmd_scan(&config, &prefix),
        Commands::Status => cmd_status(&config),
        Commands::Writers => cmd_writers(&config),
        Commands::Invite {
            label,
            role,
            listen,
        } => {
            if let Some(addr) = listen {
                config.node.listen_addr = addr;
            }
            cmd_invite(&config, InviteMetadata { label, role }).await
        }
        Commands::Join { token, peer } => cmd_join(&config, &token, &peer).await,
        Commands::Revoke { writer } => cmd_revoke(&config, &writer),
        Commands::Serve { listen, peer } => {
            if let Some(addr) = listen {
                config.node.listen_addr = addr;
            }
            config.sync.peers.extend(peer);
            cmd_serve(&config).await
        }
        Commands::Sync { peer } => cmd_sync(&config, &peer).await,
    }
}

fn open(config: &CliConfig) -> Result<RecordStore> {
    let dir = &config.node.data_dir;
    RecordStore::open(config.store_config()).with_context(|| {
        format!(
            "cannot open store at {}. Run `medleyd init` or `medleyd join` first",
            dir.display()
        )
    })
}

// -----------------------------------------------------------------------
// Records
// -----------------------------------------------------------------------

fn cmd_init(config: &CliConfig) -> Result<()> {
    let store = RecordStore::create(config.store_config()).context("failed to create store")?;
    info!(role = %config.node.role, dir = %config.node.data_dir.display(), "store initialized");
    println!("Created store at {}", config.node.data_dir.display());
    println!("Root writer: {}", store.local_id());
    Ok(())
}

async fn cmd_put(
    config: &CliConfig,
    key: &str,
    value: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let store = open(config)?;
    let value = match (value, file) {
        (Some(value), None) => value.into_bytes(),
        (None, Some(path)) => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            let blob = store.put_blob(data).await?;
            println!("Stored attachment {blob}");
            blob.to_string().into_bytes()
        }
        _ => bail!("give either a value or --file"),
    };
    let entry = store.put(key, value)?;
    println!("{key} written (seq {})", entry.seq);
    Ok(())
}

async fn cmd_get(config: &CliConfig, key: &str, output: Option<PathBuf>) -> Result<()> {
    let store = open(config)?;
    let Some(value) = store.get(key) else {
        bail!("{key}: not found");
    };
    match output {
        None => println!("{}", String::from_utf8_lossy(&value)),
        Some(path) => {
            let blob: BlobRef = std::str::from_utf8(&value)
                .ok()
                .and_then(|s| s.parse().ok())
                .with_context(|| format!("{key} does not hold an attachment reference"))?;
            let data = store
                .get_blob(blob)
                .await?
                .with_context(|| format!("attachment {blob} is not stored on this node"))?;
            tokio::fs::write(&path, &data).await?;
            println!("Wrote {} bytes to {}", data.len(), path.display());
        }
    }
    Ok(())
}

fn cmd_scan(config: &CliConfig, prefix: &str) -> Result<()> {
    let store = open(config)?;
    for (key, value) in store.scan(prefix) {
        println!("{key}\t{}", String::from_utf8_lossy(&value));
    }
    Ok(())
}

fn cmd_status(config: &CliConfig) -> Result<()> {
    let status = open(config)?.status();
    println!("Local writer:   {}", status.local);
    match status.root {
        Some(root) => println!("Root writer:    {root}"),
        None => println!("Root writer:    (not paired)"),
    }
    println!("Role:           {}", config.node.role);
    println!("Write access:   {}", if status.local_active { "yes" } else { "no" });
    println!("Writers:        {}", status.writer_count);
    println!("Known logs:     {}", status.known_logs);
    println!("Entries:        {}", status.entry_count);
    println!("Keys:           {}", status.key_count);
    println!("View version:   {}", status.view_version);
    for writer in &status.corrupted_logs {
        println!("Corrupted log:  {writer} (quarantined, not replicated)");
    }
    Ok(())
}

fn cmd_writers(config: &CliConfig) -> Result<()> {
    let store = open(config)?;
    let root = store.root();
    for (writer, info) in store.writers() {
        let state = if info.active { "active" } else { "revoked" };
        let origin = match info.added_by {
            _ if Some(writer) == root => "root".to_string(),
            Some(by) => format!("added by {}", by.short()),
            None => "unknown".to_string(),
        };
        println!("{writer}  {state}  {origin}");
    }
    Ok(())
}

fn cmd_revoke(config: &CliConfig, writer: &str) -> Result<()> {
    let writer: WriterId = writer.parse().context("invalid writer id")?;
    open(config)?.revoke_writer(writer)?;
    println!("Revoked {writer}. Peers stop accepting its writes once they sync.");
    Ok(())
}

// -----------------------------------------------------------------------
// Pairing
// -----------------------------------------------------------------------

async fn cmd_invite(config: &CliConfig, metadata: InviteMetadata) -> Result<()> {
    let store = open(config)?;
    let listen = config.listen_addr()?;
    let token = store.create_invite(metadata)?;

    println!("Invite token (valid {}s):", config.pairing.invite_ttl_secs);
    println!();
    println!("{token}");
    println!();
    println!("On the new node: medleyd join <token> --peer <this-host>:{}", listen.port());

    let discovery = TcpDiscovery::listen(listen);
    let writer = store.wait_for_redeemer(&token, &discovery).await?;
    println!("Admitted writer {writer}");
    Ok(())
}

async fn cmd_join(config: &CliConfig, token: &str, peer: &str) -> Result<()> {
    // A previous failed attempt leaves an unpaired identity behind; reuse it.
    let store = match RecordStore::open(config.store_config()) {
        Ok(store) => store,
        Err(StoreError::NotInitialized(_)) => RecordStore::unpaired(config.store_config())?,
        Err(e) => return Err(e).context("failed to open store"),
    };
    let discovery = TcpDiscovery::dial(parse_addr(peer)?);
    let writer = store
        .redeem_invite(token, &discovery)
        .await
        .context("pairing failed; ask the issuer for a new invite")?;

    let status = store.status();
    println!("Joined as writer {writer}");
    if let Some(root) = status.root {
        println!("Root writer: {root}");
    }
    println!("Replicated {} entries, {} keys", status.entry_count, status.key_count);
    Ok(())
}

// -----------------------------------------------------------------------
// Replication
// -----------------------------------------------------------------------

async fn cmd_serve(config: &CliConfig) -> Result<()> {
    let store = Arc::new(open(config)?);
    let listen = config.listen_addr()?;
    let peers = config.peer_addrs()?;
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot listen on {listen}"))?;

    info!(
        addr = %listen,
        peers = peers.len(),
        writer = %store.local_id().short(),
        role = %config.node.role,
        "serving"
    );

    let (stop, shutdown) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        let _ = stop.send(true);
    });

    server::serve(store, listener, peers, shutdown).await
}

async fn cmd_sync(config: &CliConfig, peer: &str) -> Result<()> {
    let store = open(config)?;
    let addr = parse_addr(peer)?;
    let mut channel = connect_tcp(addr, Duration::from_secs(10))
        .await
        .with_context(|| format!("cannot reach {addr}"))?;
    let report = store.sync(&mut channel).await?;

    println!("Applied {} entries, served {}", report.applied, report.served);
    for (writer, reason) in &report.rejected {
        println!("  rejected entries from {}: {reason}", writer.short());
    }
    Ok(())
}

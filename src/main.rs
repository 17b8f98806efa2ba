//! # gundogd
//!
//! The Gundog CLI: a thin ambient surface over the daemon. Indexing and
//! querying both ultimately go through the wire protocol (§6.3) — this
//! binary only scaffolds a project, runs one ingest, or starts the daemon
//! that serves queries (§10.5). There is intentionally no `search`/`get`
//! subcommand here; a client speaks the WebSocket protocol directly.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gundog::config;
use gundog::embedding;
use gundog::index_builder::IndexBuilder;

#[derive(Parser)]
#[command(name = "gundogd", about = "Gundog — a local semantic retrieval engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a project index: writes `<path>/.gundog/config.yaml` and
    /// registers it with the daemon under `name` (default index if it's
    /// the first one registered).
    Init {
        /// Directory to index. Defaults to the current directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Name this index is registered under in the daemon config.
        #[arg(long)]
        name: Option<String>,

        /// Daemon config file to register the index in.
        #[arg(long)]
        daemon_config: Option<PathBuf>,
    },

    /// Run one ingest against `<path>/.gundog`.
    Ingest {
        /// Directory previously initialized with `gundogd init`. Defaults
        /// to the current directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Wipe the index and reingest every scanned file from scratch.
        #[arg(long)]
        full: bool,
    },

    /// Start the daemon, serving the wire protocol over WebSocket.
    Serve {
        /// Daemon config file. Defaults to `~/.config/gundog/daemon.yaml`.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, name, daemon_config } => {
            let index_root = path.join(".gundog");
            gundog::index_builder::scaffold_config(&index_root, &path)?;

            let daemon_config_path = daemon_config.unwrap_or_else(config::default_daemon_config_path);
            let index_name = name.unwrap_or_else(|| {
                path.canonicalize().unwrap_or(path.clone()).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "default".to_string())
            });
            let absolute_root = index_root.canonicalize().unwrap_or(index_root);
            let mut registry = gundog::registry::IndexRegistry::load(&daemon_config_path)?;
            registry.add(&index_name, absolute_root.clone())?;

            println!("Initialized index '{index_name}' at {}", absolute_root.display());
            println!("Edit {}/config.yaml to adjust sources, then run `gundogd ingest {}`.", absolute_root.display(), path.display());
        }

        Commands::Ingest { path, full } => {
            let index_root = path.join(".gundog");
            let config_path = index_root.join("config.yaml");
            let cfg = config::load_config(&config_path)?;
            let embedder = embedding::build_embedder(&cfg.embedding);
            let builder = IndexBuilder::new(index_root, cfg, embedder);

            let stats = builder.build(full, None).await?;
            println!(
                "added={} modified={} removed={} unchanged={}",
                stats.added, stats.modified, stats.removed, stats.unchanged
            );
        }

        Commands::Serve { config } => {
            let config_path = config.unwrap_or_else(config::default_daemon_config_path);
            gundog::daemon::run(&config_path).await?;
        }
    }

    Ok(())
}

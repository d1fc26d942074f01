mod config;
mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use server::{build_target, run_server};
use std::path::PathBuf;
use std::sync::Arc;
use tessera_core::{Bucket, PromoteFileParams, Target, XactBckCopy};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Mountpath-aware object storage target")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Copy a bucket on this node and exit
    CopyBucket {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        /// Source bucket, e.g. ais://src
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Import a local file as an object
    Promote {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        #[arg(long)]
        src: PathBuf,
        #[arg(long)]
        bucket: String,
        /// Object name; defaults to the file name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        overwrite: bool,
        /// Copy the file instead of moving it
        #[arg(long)]
        keep_orig: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera=info,tessera_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting Tessera target with config: {}", config);

            let cfg = match Config::from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            tracing::info!(
                "Node ID: {}, Bind: {}, Mountpaths: {}, Peers: {}",
                cfg.node.node_id,
                cfg.node.bind_addr,
                cfg.node.mountpaths.len(),
                cfg.cluster.peers.len()
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::CopyBucket { config, from, to } => {
            if let Err(e) = copy_bucket(&config, &from, &to).await {
                tracing::error!("copy-bucket failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Promote {
            config,
            src,
            bucket,
            name,
            overwrite,
            keep_orig,
        } => {
            let result = promote(&config, src, &bucket, name, overwrite, keep_orig).await;
            if let Err(e) = result {
                tracing::error!("promote failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn copy_bucket(config: &str, from: &str, to: &str) -> anyhow::Result<()> {
    let mut cfg = Config::from_file(config).context("loading config")?;
    if !cfg.cluster.peers.is_empty() {
        // no peer runs this job, so nothing may be routed to them
        tracing::info!("copy-bucket runs on {} only, ignoring {} peers", cfg.node.node_id, cfg.cluster.peers.len());
        cfg.cluster.peers.clear();
    }
    let from: Bucket = from.parse()?;
    let to: Bucket = to.parse()?;

    let (target, _handlers) = build_target(&cfg)?;
    let job = XactBckCopy::new(target, from, to, cfg.xaction)?;
    let base = Arc::clone(job.base());
    tracing::info!("{} started", base);

    let result = job.run().await;
    println!("{}", serde_json::to_string_pretty(&base.snap())?);
    result?;
    Ok(())
}

async fn promote(
    config: &str,
    src: PathBuf,
    bucket: &str,
    name: Option<String>,
    overwrite: bool,
    keep_orig: bool,
) -> anyhow::Result<()> {
    let cfg = Config::from_file(config).context("loading config")?;
    let bucket: Bucket = bucket.parse()?;
    let obj_name = match name {
        Some(name) => name,
        None => src
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .context("source path has no usable file name")?,
    };

    let (target, _handlers) = build_target(&cfg)?;
    let lom = target
        .promote_file(PromoteFileParams {
            src,
            bucket,
            obj_name,
            overwrite,
            keep_orig,
        })
        .await?;
    println!("{} ({} bytes)", lom.fqn().display(), lom.size());
    Ok(())
}

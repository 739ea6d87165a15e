// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! plfs-gateway: write-back caching RPC front end for namespace directories.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use plfs_gateway::{Backend, Gateway, GatewayConfig, LogDirBackend, MemoryBackend};

#[derive(Parser, Debug)]
#[command(name = "plfs-gateway")]
#[command(about = "Write-back caching RPC gateway for append-only namespace directories")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "PLFS_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Serve reads instead of writes
    #[arg(long)]
    read_mode: bool,

    /// Finalize namespaces left open by a previous writer before opening
    /// them for reading
    #[arg(long)]
    conversion: bool,

    /// RPC worker threads
    #[arg(short, long, env = "PLFS_GATEWAY_WORKERS")]
    workers: Option<usize>,

    /// Address to accept RPC connections on
    #[arg(short, long, env = "PLFS_GATEWAY_LISTEN")]
    listen: Option<String>,

    /// Root directory for namespace directories (in-memory store if unset)
    #[arg(short, long, env = "PLFS_GATEWAY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Milliseconds between background flushes
    #[arg(long)]
    flush_interval_ms: Option<u64>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_file(path)?,
            None => GatewayConfig::default(),
        };

        // CLI overrides
        config.read_mode |= self.read_mode;
        config.conversion |= self.conversion;
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = Some(data_dir);
        }
        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("plfs_gateway=info".parse()?),
        )
        .init();

    let config = Cli::parse().into_config()?;

    // Worker threads execute RPC calls in parallel
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .thread_name("plfs-gateway-worker")
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    info!(
        mode = %config.mode(),
        conversion = config.conversion,
        workers = config.workers,
        "Starting plfs-gateway"
    );

    // Bind before opening any namespace: a write-mode open unseals the
    // directories, and only shutdown seals them again.
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let backend: Arc<dyn Backend> = match &config.data_dir {
        Some(dir) => {
            let backend = LogDirBackend::new(dir);
            info!(data_dir = %backend.root().display(), "Using namespace directories on disk");
            Arc::new(backend)
        }
        None => {
            info!("No data dir configured, using in-memory store");
            Arc::new(MemoryBackend::new())
        }
    };

    let gateway = match Gateway::start(&config, backend).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    // Every exit from here on goes through gateway.shutdown()
    let (report, signal) = gateway.serve_until(listener, tokio::signal::ctrl_c()).await;
    signal.context("Failed to listen for interrupt")?;
    if report.unflushed > 0 || report.errors > 0 {
        anyhow::bail!(
            "Shutdown incomplete: {} values unflushed, {} handle errors",
            report.unflushed,
            report.errors
        );
    }
    Ok(())
}

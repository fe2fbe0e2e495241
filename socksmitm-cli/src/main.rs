mod pac;

use anyhow::{Context, Result};
use clap::Parser;
use socksmitm::{CaStore, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "socksmitm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Intercepting SOCKS5 proxy with TLS MITM termination", long_about = None)]
struct Cli {
    /// Address to listen for SOCKS5 connections on.
    #[arg(long, default_value = "0.0.0.0:5678")]
    listen: SocketAddr,

    /// Path to a PKCS#12 bundle (cert + private key) for the root CA.
    #[arg(long)]
    pkcs12: PathBuf,

    /// Passphrase protecting the PKCS#12 bundle.
    #[arg(long)]
    pkcs12_passphrase: String,

    /// Bind address for the PAC-file server. Omit to disable it.
    #[arg(long)]
    pac_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    socksmitm::install_default_crypto_provider();

    let cli = Cli::parse();

    let pkcs12_der =
        std::fs::read(&cli.pkcs12).with_context(|| format!("failed to read {:?}", cli.pkcs12))?;
    let ca = Arc::new(
        CaStore::load(&pkcs12_der, &cli.pkcs12_passphrase)
            .context("failed to load root CA from PKCS#12 bundle")?,
    );
    info!("root CA loaded from {:?}", cli.pkcs12);

    let server = Server::bind_default(&cli.listen.to_string(), ca)
        .await
        .context("failed to start socksmitm server")?;
    let bound_addr = server.local_addr()?;
    info!("socksmitm listening on {bound_addr}");

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    if let Some(pac_addr) = cli.pac_listen {
        tokio::spawn(async move {
            if let Err(e) = pac::run(pac_addr, bound_addr).await {
                error!("PAC server failed: {e:#}");
            }
        });
    }

    let server_task = tokio::spawn(server.run(cancel_rx));

    shutdown_signal().await;
    info!("shutdown signal received, stopping socksmitm");
    let _ = cancel_tx.send(true);

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("socksmitm server failed: {e}"),
        Err(e) => error!("socksmitm server task panicked: {e}"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for SIGINT: {e}");
            }
        }
        _ = sigterm.recv() => {}
    }
}

//! chunkvault upload client entry point.
//!
//! Usage: `chunkvault-upload <file> [name] [--stream]`

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chunkvault_protocol::types::TransferMode;
use chunkvault_rpc::RpcClient;
use chunkvault_uploader::{IntegrityReport, UploadEvent, Uploader};
use tracing_subscriber::EnvFilter;

/// Parsed command line.
#[derive(Debug, PartialEq)]
struct Args {
    source: PathBuf,
    name: String,
    mode: TransferMode,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut mode = TransferMode::Chunked;
        let mut positional = Vec::new();
        for arg in args {
            match arg.as_str() {
                "--stream" => mode = TransferMode::Stream,
                flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let Some(source) = positional.next().map(PathBuf::from) else {
            bail!("usage: chunkvault-upload <file> [name] [--stream]");
        };
        let name = match positional.next() {
            Some(name) => name,
            None => default_name(&source)?,
        };
        if let Some(extra) = positional.next() {
            bail!("unexpected argument: {extra}");
        }

        Ok(Self { source, name, mode })
    }
}

fn default_name(source: &Path) -> anyhow::Result<String> {
    source
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive artifact name from {}", source.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let config = config::Config::load()?;
    tracing::info!(server = %config.server, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, args))
}

async fn run(config: config::Config, args: Args) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host(&config.server)
        .await?
        .next()
        .with_context(|| format!("no address for {}", config.server))?;
    let client = Arc::new(RpcClient::new(addr));

    let mut uploader = Uploader::new(client, config.transfer);
    let cancel = uploader.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, cancelling upload");
            cancel.cancel();
        }
    });

    if let Some(mut events) = uploader.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    let report = uploader
        .upload(&args.source, &args.name, args.mode)
        .await
        .with_context(|| format!("upload of {} failed", args.source.display()))?;

    println!(
        "{}  {} bytes  sha256 {}  ({} chunks sent, {} bytes resumed)",
        report.name, report.size, report.digest, report.chunks_sent, report.bytes_skipped
    );
    if let IntegrityReport::Mismatch { local, remote } = &report.integrity {
        tracing::warn!(%local, %remote, "stored artifact differs from the local file");
    }
    Ok(())
}

fn log_event(event: &UploadEvent) {
    match event {
        UploadEvent::Progress {
            uploaded,
            total,
            bytes_per_second,
            eta,
        } => tracing::debug!(uploaded, total, bytes_per_second, ?eta, "progress"),
        UploadEvent::Resumed { bytes } => tracing::info!(bytes, "resuming from stored state"),
        UploadEvent::ChunkRetry { .. }
        | UploadEvent::Finalized { .. }
        | UploadEvent::IntegrityWarning { .. } => {}
    }
}

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use rtcdash::{PacketCounter, Recorder, RecorderConfig};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct RtcDashArgs {
    /// Path to a TOML config file. Missing keys keep their defaults.
    #[clap(short, long, env = "RTCDASH_CONFIG")]
    config: Option<PathBuf>,

    /// Recording directory. Wiped whenever a new client connects.
    #[clap(short, long, env = "RTCDASH_DIR")]
    dir: Option<PathBuf>,

    /// Address of the signaling websocket.
    #[clap(long, env = "RTCDASH_SIGNALING_ADDR")]
    signaling_addr: Option<SocketAddr>,

    /// Address of the HTTP file server.
    #[clap(long, env = "RTCDASH_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,

    #[clap(long, alias = "debug")]
    verbose: bool,
}

impl RtcDashArgs {
    fn config(&self) -> anyhow::Result<RecorderConfig> {
        let mut config = match &self.config {
            Some(path) => RecorderConfig::load(path)?,
            None => RecorderConfig::default(),
        };

        if let Some(dir) = &self.dir {
            config.recording_dir = dir.clone();
        }
        if let Some(addr) = self.signaling_addr {
            config.signaling_addr = addr;
        }
        if let Some(addr) = self.http_addr {
            config.http_addr = addr;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = RtcDashArgs::parse();

    let default_level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .try_from_env()
                .unwrap_or_else(|_| default_level.to_string().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config()?;
    log::debug!("{config:?}");
    let recorder = Arc::new(Recorder::new(config));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Received Ctrl-C, stopping...");
                    shutdown.cancel();
                }
                Err(e) => log::warn!("Failed to listen for Ctrl-C: {e}"),
            }
        }
    });

    // No muxer is linked in, received packets are only counted.
    rtcdash::run(recorder, PacketCounter::new, shutdown).await?;
    Ok(())
}

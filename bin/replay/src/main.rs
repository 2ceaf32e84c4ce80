use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use clap::Parser;
use relive::server;
use relive::StreamReplay;

/// Replay a recorded DASH channel as captured, time-shifted to now; once
/// the recording end lies in the past it wraps around.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Recording directory
    #[clap(long)]
    dumpdir: PathBuf,

    /// Address and port to listen on
    #[clap(long, default_value = "0.0.0.0:9080")]
    listen: SocketAddr,

    /// Set log level to debug
    #[clap(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut replay = StreamReplay::new(&args.dumpdir)?;
    replay.load_archive()?;
    let router = server::replay_router(Arc::new(RwLock::new(replay)), args.dumpdir.clone());
    server::serve(router, args.listen).await?;
    Ok(())
}

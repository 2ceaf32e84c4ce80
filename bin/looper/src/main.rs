use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relive::server;
use relive::StreamLooper;

/// Replay a recorded DASH channel indefinitely by looping its aggregate
/// timeline, synthesized live on every request.
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

    let looper = Arc::new(StreamLooper::new(&args.dumpdir)?);
    let router = server::looper_router(looper);
    server::serve(router, args.listen).await?;
    Ok(())
}

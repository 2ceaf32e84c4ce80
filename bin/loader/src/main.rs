use std::time::Duration;

use clap::Parser;
use relive::loader::{LoaderConfig, StreamLoader};
use url::Url;

/// Exercise a DASH origin with many concurrent polling sessions, including
/// session churn at a configurable rate.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Channel URL
    #[clap(long)]
    url: Url,

    /// Channel ID, used in log fields
    #[clap(long, default_value = "default")]
    name: String,

    /// Set log level to debug
    #[clap(long)]
    debug: bool,

    /// Number of sessions in parallel
    #[clap(long, default_value_t = 1)]
    sessions: usize,

    /// Average restarts per hour per session
    #[clap(long, default_value_t = 0.0)]
    restarts: f64,

    /// Use one TCP connection per session
    #[clap(long)]
    maxconn: bool,

    /// Poll interval in seconds
    #[clap(long = "pollInterval", default_value_t = 5)]
    poll_interval: u64,

    /// Time limit in seconds, 0 runs forever
    #[clap(long, default_value_t = 0)]
    timelimit: u64,
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

    let mut config = LoaderConfig::new(&args.name, args.url.clone());
    config.poll_interval = Duration::from_secs(args.poll_interval.max(1));
    config.sessions = args.sessions;
    config.restarts_per_hour = args.restarts;
    config.single_connection = args.maxconn;

    let mut loader = StreamLoader::new(config)?;
    let cancel = loader.cancel_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });
    if args.timelimit > 0 {
        let cancel = loader.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(args.timelimit)).await;
            cancel.cancel();
        });
    }

    loader.run().await?;
    loader.stop().await;
    Ok(())
}

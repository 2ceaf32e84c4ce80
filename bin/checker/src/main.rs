use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relive::checker::{CheckerConfig, FetchMode, StreamChecker};
use relive::replay::StreamReplay;
use relive::report::JsonReporter;
use relive::server;
use url::Url;

/// Observe a live DASH channel: poll its manifest, diff the timeline,
/// and optionally access, verify or mirror the media segments.
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

    /// Log checker observations as JSON
    #[clap(long)]
    jsonlog: bool,

    /// Directory to dump manifests and segments
    #[clap(long)]
    dumpdir: Option<PathBuf>,

    /// Access media segments with HEAD requests
    #[clap(long)]
    accessmedia: bool,

    /// Fetch media segments and verify container timing
    #[clap(long)]
    verifymedia: bool,

    /// Fetch, verify and store all media segments
    #[clap(long)]
    storemedia: bool,

    /// Parallel segment fetch workers
    #[clap(long, default_value_t = 1)]
    workers: usize,

    /// Poll interval in seconds
    #[clap(long = "pollInterval", default_value_t = 5)]
    poll_interval: u64,

    /// Time limit in seconds, 0 runs forever
    #[clap(long, default_value_t = 0)]
    timelimit: u64,

    /// Serve the recording time-shifted from this port while checking
    #[clap(long)]
    replayport: Option<u16>,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let fetch_mode = if args.storemedia {
        FetchMode::Store
    } else if args.verifymedia {
        FetchMode::Verify
    } else if args.accessmedia {
        FetchMode::Access
    } else {
        FetchMode::NoFetch
    };

    let mut config = CheckerConfig::new(&args.name, args.url.clone());
    config.dump_base = args.dumpdir.clone();
    config.poll_interval = Duration::from_secs(args.poll_interval.max(1));
    config.fetch_mode = fetch_mode;
    config.workers = args.workers;

    let mut checker = if args.jsonlog {
        StreamChecker::with_reporter(config, Arc::new(JsonReporter))?
    } else {
        StreamChecker::new(config)?
    };

    let mut replay_server = None;
    if let Some(port) = args.replayport {
        let dump_dir = checker
            .dump_dir()
            .context("--replayport requires --dumpdir")?
            .to_path_buf();
        let replay = Arc::new(RwLock::new(StreamReplay::new(&dump_dir)?));
        let sink = replay.clone();
        checker.add_fetch_callback(move |path, at| {
            if let Ok(mut replay) = sink.write() {
                replay.add_manifest(path, at);
            }
        });
        let router = server::replay_router(replay, dump_dir);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        replay_server = Some(tokio::spawn(server::serve(router, addr)));
    }

    let cancel = checker.cancel_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });
    if args.timelimit > 0 {
        let cancel = checker.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(args.timelimit)).await;
            cancel.cancel();
        });
    }

    checker.run().await?;
    checker.stop().await;

    if let Some(serving) = replay_server.take() {
        tracing::info!("recording finished, replay keeps serving");
        serving.await??;
    }
    Ok(())
}

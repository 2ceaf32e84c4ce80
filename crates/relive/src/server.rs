//! HTTP surface of the replay tools: synthesized manifests on
//! `/manifest.mpd`, metrics, and the recording directory as static files.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::looper::StreamLooper;
use crate::metrics::metrics_handler;
use crate::replay::StreamReplay;
use crate::ReliveResult;

#[derive(Debug, Deserialize, Default)]
pub struct ManifestQuery {
    /// Seconds into the past to replay from.
    to: Option<i64>,
    /// Absolute epoch seconds; answered with a redirect to `to`.
    at: Option<i64>,
    /// Advisory loop duration; accepted and currently unused.
    #[allow(dead_code)]
    ld: Option<i64>,
}

fn manifest_response(result: ReliveResult<String>) -> Response {
    match result {
        Ok(body) => (
            [(header::CONTENT_TYPE, "application/dash+xml")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("build manifest: {e}");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Sanity window for `to`: refuse offsets that cannot be meant seriously.
fn time_offset(query: &ManifestQuery) -> TimeDelta {
    match query.to {
        Some(to) if (0..1_000_000).contains(&to) => TimeDelta::seconds(to),
        Some(_) => {
            warn!("implausible time offset, ignoring");
            TimeDelta::zero()
        }
        None => TimeDelta::zero(),
    }
}

async fn looped_manifest(
    State(looper): State<Arc<StreamLooper>>,
    Query(query): Query<ManifestQuery>,
) -> Response {
    let now = Utc::now();
    let start_at = now - time_offset(&query);
    manifest_response(looper.get_looped(start_at, now))
}

async fn static_manifest(State(looper): State<Arc<StreamLooper>>) -> Response {
    manifest_response(looper.get_static())
}

/// Router of the looper tool: the looped manifest, the static export and
/// the mirrored media below the dump directory.
pub fn looper_router(looper: Arc<StreamLooper>) -> Router {
    let files = ServeDir::new(looper.dump_dir());
    Router::new()
        .route("/manifest.mpd", get(looped_manifest))
        .route("/static.mpd", get(static_manifest))
        .route("/metrics", get(metrics_handler))
        .with_state(looper)
        .fallback_service(files)
        .layer(TraceLayer::new_for_http())
}

async fn replay_manifest(
    State(replay): State<Arc<RwLock<StreamReplay>>>,
    Query(query): Query<ManifestQuery>,
) -> Response {
    let now = Utc::now();

    // An absolute time is answered with a redirect so that the offset
    // stays constant for all subsequent updates of the session.
    if query.to.is_none() {
        if let Some(at) = query.at {
            if !(1_000_000..3_000_000_000).contains(&at) {
                warn!("implausible time, ignoring");
            } else if let Some(at) = DateTime::from_timestamp(at, 0) {
                tracing::info!("redirecting to time {at}");
                let to = (now - at).num_seconds();
                return Redirect::to(&format!("/manifest.mpd?to={to}")).into_response();
            }
        }
    }

    let shift = time_offset(&query);
    let start_at = now - shift;
    let result = {
        let replay = match replay.read() {
            Ok(replay) => replay,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        };
        if replay.is_past() {
            replay.get_looped(start_at, now)
        } else {
            replay.get_archived(shift, now)
        }
    };
    manifest_response(result)
}

/// Router of the replay tool. The recording is behind a lock so a running
/// checker can append manifests while requests are served.
pub fn replay_router(replay: Arc<RwLock<StreamReplay>>, dump_dir: std::path::PathBuf) -> Router {
    let files = ServeDir::new(dump_dir);
    Router::new()
        .route("/manifest.mpd", get(replay_manifest))
        .route("/metrics", get(metrics_handler))
        .with_state(replay)
        .fallback_service(files)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process ends.
pub async fn serve(router: Router, addr: SocketAddr) -> ReliveResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, router).await?;
    Ok(())
}

use std::path::Path;
use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use relive::server;
use relive::storage::{self, StorageMeta, MANIFEST_DIR};
use relive::StreamReplay;
use tower::util::ServiceExt;

fn write_manifest(dir: &Path, at: DateTime<Utc>, first_tick: u64) {
    let xml = format!(
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="2025-03-01T10:00:00Z">
          <Period id="p0" start="PT0S">
            <BaseURL>dash/</BaseURL>
            <AdaptationSet id="1" mimeType="video/mp4">
              <SegmentTemplate media="$Time$.m4s" timescale="10">
                <SegmentTimeline><S t="{first_tick}" d="10" r="24"/></SegmentTimeline>
              </SegmentTemplate>
              <Representation id="v0" bandwidth="1000"/>
            </AdaptationSet>
          </Period>
        </MPD>"#
    );
    std::fs::write(
        dir.join(MANIFEST_DIR).join(storage::manifest_filename(at)),
        xml,
    )
    .unwrap();
}

fn replay_fixture() -> (tempfile::TempDir, Arc<RwLock<StreamReplay>>) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(MANIFEST_DIR)).unwrap();
    storage::write_meta(
        dir.path(),
        &StorageMeta {
            manifest_url: "https://origin.example.com/ch/manifest.mpd".to_string(),
            have_media: false,
        },
    )
    .unwrap();
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    for i in 0..20u64 {
        write_manifest(
            dir.path(),
            start + TimeDelta::seconds(i as i64 * 5),
            i * 50,
        );
    }
    let mut replay = StreamReplay::new(dir.path()).unwrap();
    replay.load_archive().unwrap();
    (dir, Arc::new(RwLock::new(replay)))
}

#[tokio::test]
async fn absolute_time_redirects_to_a_relative_offset() {
    let (dir, replay) = replay_fixture();
    let router = server::replay_router(replay, dir.path().to_path_buf());

    // An epoch within the plausible window is turned into `?to=`.
    let at = (Utc::now() - TimeDelta::seconds(90)).timestamp();
    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/manifest.mpd?at={at}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(
        location.starts_with("/manifest.mpd?to="),
        "location {location}"
    );
    let to: i64 = location.trim_start_matches("/manifest.mpd?to=").parse().unwrap();
    assert!((89..=91).contains(&to), "offset {to}");
}

#[tokio::test]
async fn looped_manifest_is_served_as_dash_xml() {
    let (dir, replay) = replay_fixture();
    let router = server::replay_router(replay, dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/manifest.mpd?to=30")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/dash+xml"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mpd = relive::mpd::parse(&String::from_utf8_lossy(&body)).unwrap();
    assert_eq!(mpd.periods.len(), 1);
}

#[tokio::test]
async fn other_paths_serve_recording_files() {
    let (dir, replay) = replay_fixture();
    let router = server::replay_router(replay, dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/meta.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let meta: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        meta["ManifestUrl"],
        "https://origin.example.com/ch/manifest.mpd"
    );
}

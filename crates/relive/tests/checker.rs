use chrono::{DateTime, TimeDelta, Utc};
use relive::checker::{CheckerConfig, FetchMode, StreamChecker};
use relive::{ReliveError, ReliveResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A single-track manifest with `count` segments of `duration` seconds,
/// starting at tick `first` (timescale 1).
fn manifest(ast: DateTime<Utc>, first: i64, duration: i64, count: i64) -> String {
    format!(
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="{}">
          <Period id="p0" start="PT0S">
            <AdaptationSet id="1" mimeType="video/mp4">
              <SegmentTemplate media="media/$RepresentationID$/$Time$.m4s" initialization="media/$RepresentationID$/init.mp4" timescale="1">
                <SegmentTimeline><S t="{first}" d="{duration}" r="{}"/></SegmentTimeline>
              </SegmentTemplate>
              <Representation id="v0" bandwidth="1000"/>
            </AdaptationSet>
          </Period>
        </MPD>"#,
        ast.format("%Y-%m-%dT%H:%M:%SZ"),
        count - 1,
    )
}

fn mpd_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/dash+xml")
        .set_body_string(body)
}

async fn checker_for(
    server: &MockServer,
    source_path: &str,
    dump: &std::path::Path,
    fetch_mode: FetchMode,
) -> ReliveResult<StreamChecker> {
    let url = Url::parse(&format!("{}{source_path}", server.uri())).unwrap();
    let mut config = CheckerConfig::new("test", url);
    config.dump_base = Some(dump.to_path_buf());
    config.fetch_mode = fetch_mode;
    StreamChecker::new(config)
}

fn stored_manifests(checker: &StreamChecker) -> usize {
    std::fs::read_dir(checker.dump_dir().unwrap().join("manifests"))
        .unwrap()
        .count()
}

#[tokio::test]
async fn session_redirect_rebinds_the_source() {
    let server = MockServer::start().await;
    let target = format!("{}/ch/1.mpd", server.uri());
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(format!(r#"{{"MediaUrl": "{target}"}}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ch/1.mpd"))
        .respond_with(mpd_response(manifest(Utc::now(), 0, 2, 5)))
        .expect(1)
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/session", dump.path(), FetchMode::NoFetch)
        .await
        .unwrap();
    checker.fetch_and_store_manifest().await.unwrap();
    assert_eq!(stored_manifests(&checker), 1);
}

#[tokio::test]
async fn empty_media_url_is_a_hard_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string("{}"),
        )
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/session", dump.path(), FetchMode::NoFetch)
        .await
        .unwrap();
    assert!(matches!(
        checker.fetch_and_store_manifest().await,
        Err(ReliveError::MissingMediaUrl)
    ));
}

#[tokio::test]
async fn not_modified_skips_the_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(
            mpd_response(manifest(Utc::now(), 0, 2, 5))
                .insert_header("date", "Mon, 03 Mar 2025 10:00:00 GMT"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Once a Date was seen, the revalidation carries If-Modified-Since.
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .and(header_exists("if-modified-since"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/manifest.mpd", dump.path(), FetchMode::NoFetch)
        .await
        .unwrap();
    checker.fetch_and_store_manifest().await.unwrap();
    checker.fetch_and_store_manifest().await.unwrap();
    assert_eq!(stored_manifests(&checker), 1);
}

#[tokio::test]
async fn fetch_callbacks_fire_on_persist() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(mpd_response(manifest(Utc::now(), 0, 2, 5)))
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/manifest.mpd", dump.path(), FetchMode::NoFetch)
        .await
        .unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    checker.add_fetch_callback(move |path, _at| {
        assert!(path.exists());
        counter.fetch_add(1, Ordering::SeqCst);
    });
    checker.fetch_and_store_manifest().await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_segments_are_cut_but_init_is_fetched() {
    let server = MockServer::start().await;
    // Ten 60 s segments ending just before now; the five starting more
    // than five minutes ago fall out of the fetch window.
    let ast = Utc::now() - TimeDelta::seconds(599);
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(mpd_response(manifest(ast, 0, 60, 10)))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/manifest.mpd", dump.path(), FetchMode::Access)
        .await
        .unwrap();
    checker.fetch_and_store_manifest().await.unwrap();
    checker.stop().await;

    let heads: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.method.as_str() == "HEAD")
        .map(|request| request.url.path().to_string())
        .collect();
    assert!(heads.contains(&"/media/v0/init.mp4".to_string()));
    // Segments at ticks 300..540 survive the cut-off.
    assert_eq!(heads.len(), 6, "unexpected HEADs: {heads:?}");
    assert!(heads.contains(&"/media/v0/300.m4s".to_string()));
    assert!(!heads.contains(&"/media/v0/240.m4s".to_string()));
}

#[tokio::test]
async fn store_mode_mirrors_segment_bodies() {
    let server = MockServer::start().await;
    let ast = Utc::now() - TimeDelta::seconds(60);
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(mpd_response(manifest(ast, 0, 60, 1)))
        .mount(&server)
        .await;
    // Bodies are not valid fMP4; verification logs and moves on.
    Mock::given(method("GET"))
        .and(path("/media/v0/init.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"init-bytes".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/v0/0.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"media-bytes".to_vec()))
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/manifest.mpd", dump.path(), FetchMode::Store)
        .await
        .unwrap();
    checker.fetch_and_store_manifest().await.unwrap();
    checker.stop().await;

    let dump_dir = checker.dump_dir().unwrap();
    assert_eq!(
        std::fs::read(dump_dir.join("media/v0/init.mp4")).unwrap(),
        b"init-bytes"
    );
    assert_eq!(
        std::fs::read(dump_dir.join("media/v0/0.m4s")).unwrap(),
        b"media-bytes"
    );
    // The metadata sidecar records the mirrored media.
    let meta = relive::storage::read_meta(dump_dir).unwrap();
    assert!(meta.have_media);
}

#[tokio::test]
async fn protocol_errors_drop_the_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/manifest.mpd", dump.path(), FetchMode::NoFetch)
        .await
        .unwrap();
    assert!(matches!(
        checker.fetch_and_store_manifest().await,
        Err(ReliveError::HttpStatus(status)) if status.as_u16() == 500
    ));
    assert_eq!(stored_manifests(&checker), 0);
}

/// Scenario: the manifest advertises `t=1_000_000, d=192_000` at timescale
/// 96_000 but the container carries an earliest presentation time 100 ticks
/// later. The mismatch is logged; the fetch succeeds and the body is
/// persisted regardless.
#[tokio::test]
async fn verify_mismatch_still_stores_the_body() {
    fn sidx(timescale: u32, earliest: u32, subsegment_duration: u32) -> Vec<u8> {
        let mut payload = vec![0, 0, 0, 0];
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&timescale.to_be_bytes());
        payload.extend_from_slice(&earliest.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&0u16.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&subsegment_duration.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        let mut buffer = (payload.len() as u32 + 8).to_be_bytes().to_vec();
        buffer.extend_from_slice(b"sidx");
        buffer.extend_from_slice(&payload);
        buffer
    }

    let server = MockServer::start().await;
    // One two-second segment starting 10.42 s after the availability start,
    // which is placed so the segment is fresh.
    let ast = Utc::now() - TimeDelta::seconds(13);
    let manifest = format!(
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="{}">
          <Period id="p0" start="PT0S">
            <AdaptationSet id="1" mimeType="video/mp4">
              <SegmentTemplate media="media/$Time$.m4s" timescale="96000">
                <SegmentTimeline><S t="1000000" d="192000"/></SegmentTimeline>
              </SegmentTemplate>
              <Representation id="v0" bandwidth="1000"/>
            </AdaptationSet>
          </Period>
        </MPD>"#,
        ast.format("%Y-%m-%dT%H:%M:%SZ"),
    );
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(mpd_response(manifest))
        .mount(&server)
        .await;
    let body = sidx(96_000, 1_000_100, 192_000);
    Mock::given(method("GET"))
        .and(path("/media/1000000.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dump = tempfile::tempdir().unwrap();
    let mut checker = checker_for(&server, "/manifest.mpd", dump.path(), FetchMode::Store)
        .await
        .unwrap();
    checker.fetch_and_store_manifest().await.unwrap();
    checker.stop().await;

    let stored = std::fs::read(
        checker.dump_dir().unwrap().join("media/1000000.m4s"),
    )
    .unwrap();
    assert_eq!(stored, body);
}

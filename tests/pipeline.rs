use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use scene_sync::config::{Config, IndexSinkConfig, KvSinkConfig, S3SinkConfig};
use scene_sync::dispatch::StopHandle;
use scene_sync::filter::DateWindow;
use scene_sync::ingest::{run_sync, SyncOptions};
use scene_sync::models::{CatalogRecord, FOOTPRINT_CRS};
use scene_sync::parse::{parse, parse_header};
use scene_sync::progress::NoProgress;
use scene_sync::reindex::reindex;
use scene_sync::s3::{AwsCredentials, S3Client};
use scene_sync::sinks::{DiskSink, IndexSink, KvSink, SinkWriter, ThumbsSink};
use scene_sync::source::FetchMode;

const HEADER: &str = "sceneID,acquisitionDate,cloudCoverFull,upperRightCornerLongitude,upperRightCornerLatitude,upperLeftCornerLongitude,upperLeftCornerLatitude,lowerLeftCornerLongitude,lowerLeftCornerLatitude,lowerRightCornerLongitude,lowerRightCornerLatitude";
const SCENE: &str = "LC80010092015001LGN00";
const ROW: &str = "LC80010092015001LGN00,2015-01-01,12.5,-60.1,5.2,-61.3,5.2,-61.3,4.0,-60.1,4.0";

// ─── Fake services ──────────────────────────────────────────────────

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone)]
struct Catalog {
    body: Arc<String>,
    hits: Arc<AtomicUsize>,
}

async fn catalog_csv(State(c): State<Catalog>) -> String {
    c.hits.fetch_add(1, Ordering::SeqCst);
    c.body.to_string()
}

/// Serve `rows` under `/LANDSAT_8.csv`; returns (url, hit counter).
async fn serve_catalog(rows: &[&str]) -> (String, Arc<AtomicUsize>) {
    let mut body = String::from(HEADER);
    for row in rows {
        body.push('\n');
        body.push_str(row);
    }
    body.push('\n');

    let state = Catalog {
        body: Arc::new(body),
        hits: Arc::new(AtomicUsize::new(0)),
    };
    let hits = state.hits.clone();
    let app = Router::new()
        .route("/LANDSAT_8.csv", get(catalog_csv))
        .with_state(state);
    let base = serve(app).await;
    (format!("{}/LANDSAT_8.csv", base), hits)
}

#[derive(Clone, Default)]
struct FakeIndex {
    docs: Arc<Mutex<HashMap<String, Value>>>,
    puts: Arc<AtomicUsize>,
    bulk_lines: Arc<Mutex<Vec<Value>>>,
    reject_geometry: bool,
}

async fn index_put(
    State(ix): State<FakeIndex>,
    Path((_index, id)): Path<(String, String)>,
    Json(doc): Json<Value>,
) -> (StatusCode, Json<Value>) {
    ix.puts.fetch_add(1, Ordering::SeqCst);
    if ix.reject_geometry && !doc["data_geometry"].is_null() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {"type": "mapper_parsing_exception", "reason": "failed to parse field [data_geometry]"},
                "status": 400
            })),
        );
    }
    ix.docs.lock().unwrap().insert(id, doc);
    (StatusCode::CREATED, Json(json!({"result": "created"})))
}

async fn index_bulk(State(ix): State<FakeIndex>, body: String) -> Json<Value> {
    let lines: Vec<Value> = body
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let items: Vec<Value> = lines
        .iter()
        .filter_map(|l| l.get("index"))
        .map(|a| json!({"index": {"_id": a["_id"], "status": 201}}))
        .collect();
    ix.bulk_lines.lock().unwrap().extend(lines);
    Json(json!({"errors": false, "items": items}))
}

async fn serve_index(reject_geometry: bool) -> (String, FakeIndex) {
    let state = FakeIndex {
        reject_geometry,
        ..FakeIndex::default()
    };
    let app = Router::new()
        .route("/{index}/_doc/{id}", put(index_put))
        .route("/_bulk", post(index_bulk))
        .with_state(state.clone());
    (serve(app).await, state)
}

#[derive(Clone, Default)]
struct FakeBucket {
    objects: Arc<Mutex<HashMap<String, (Vec<u8>, HeaderMap)>>>,
    puts: Arc<AtomicUsize>,
}

async fn bucket_get(State(b): State<FakeBucket>, Path(key): Path<String>) -> (StatusCode, Vec<u8>) {
    match b.objects.lock().unwrap().get(&key) {
        Some((body, _)) => (StatusCode::OK, body.clone()),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

async fn bucket_put(
    State(b): State<FakeBucket>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    b.puts.fetch_add(1, Ordering::SeqCst);
    b.objects
        .lock()
        .unwrap()
        .insert(key, (body.to_vec(), headers));
    StatusCode::OK
}

async fn browse_image() -> Vec<u8> {
    b"\xff\xd8JPEG".to_vec()
}

/// A path-style bucket `thumbs` plus a `/browse/{name}` image origin.
async fn serve_bucket() -> (String, FakeBucket) {
    let state = FakeBucket::default();
    let app = Router::new()
        .route("/thumbs/{key}", get(bucket_get).put(bucket_put))
        .route("/browse/{name}", get(browse_image))
        .with_state(state.clone());
    (serve(app).await, state)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn test_config(tmp: &TempDir, catalog_url: &str) -> Config {
    let mut cfg = Config::minimal();
    cfg.catalog.url = catalog_url.to_string();
    cfg.catalog.cache_dir = tmp.path().join("cache");
    cfg.sinks.kv.path = tmp.path().join("data/scenes.sqlite");
    cfg.sinks.disk.folder = tmp.path().join("meta").to_string_lossy().into_owned();
    cfg
}

fn options(cfg: &Config, start: &str, end: &str, mode: FetchMode, concurrency: usize) -> SyncOptions {
    let mut opts = SyncOptions::from_config(cfg, DateWindow::new(Some(d(start)), Some(d(end))));
    opts.mode = mode;
    opts.concurrency = concurrency;
    opts.queue_depth = concurrency * 2;
    opts
}

fn read_json(path: std::path::PathBuf) -> Value {
    serde_json::from_slice(&std::fs::read(&path).unwrap())
        .unwrap_or_else(|e| panic!("{} is not JSON: {}", path.display(), e))
}

fn record(line: &str) -> CatalogRecord {
    let header = parse_header(HEADER).unwrap();
    parse(&header, line)
}

fn creds() -> AwsCredentials {
    AwsCredentials {
        access_key_id: "test".to_string(),
        secret_access_key: "test".to_string(),
        session_token: None,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_single_scene_to_disk() {
    let tmp = TempDir::new().unwrap();
    let (url, _) = serve_catalog(&[ROW]).await;
    let cfg = test_config(&tmp, &url);
    let sinks: Vec<Arc<dyn SinkWriter>> = vec![Arc::new(DiskSink)];

    let report = run_sync(
        &cfg,
        sinks,
        &options(&cfg, "2015-01-01", "2015-01-01", FetchMode::Stream, 4),
        &NoProgress,
        &StopHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.lines_read, 1);
    assert_eq!(report.included, 1);
    assert!(report.failures.is_empty());

    let doc = read_json(tmp.path().join("meta/2015/1/1").join(format!("{}.json", SCENE)));
    assert_eq!(doc["scene_id"], SCENE);
    assert_eq!(doc["satellite_name"], "landsat-8");
    assert_eq!(doc["cloud_coverage"], 12.5);
    assert_eq!(doc["date"], "2015-01-01");
    assert_eq!(doc["data_geometry"]["type"], "Polygon");
    assert_eq!(doc["data_geometry"]["crs"]["properties"]["name"], FOOTPRINT_CRS);

    let ring = doc["data_geometry"]["coordinates"][0].as_array().unwrap();
    assert_eq!(ring.len(), 5);
    assert_eq!(ring[0], json!([-60.1, 5.2]));
    assert_eq!(ring[4], ring[0]);
    assert_eq!(ring[1], json!([-61.3, 5.2]));
    assert_eq!(ring[2], json!([-61.3, 4.0]));
    assert_eq!(ring[3], json!([-60.1, 4.0]));

    // Original catalog fields are merged in.
    assert_eq!(doc["sceneID"], SCENE);
    assert_eq!(doc["cloudCoverFull"], 12.5);
}

#[tokio::test]
async fn test_download_reuses_fresh_cache() {
    let tmp = TempDir::new().unwrap();
    let (url, hits) = serve_catalog(&[ROW]).await;
    let cfg = test_config(&tmp, &url);

    for _ in 0..2 {
        let sinks: Vec<Arc<dyn SinkWriter>> = vec![Arc::new(DiskSink)];
        let report = run_sync(
            &cfg,
            sinks,
            &options(&cfg, "2015-01-01", "2015-01-01", FetchMode::Download, 1),
            &NoProgress,
            &StopHandle::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.included, 1);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(tmp.path().join("cache/LANDSAT_8.csv").exists());
    assert!(!tmp.path().join("cache/LANDSAT_8.part").exists());
}

#[tokio::test]
async fn test_stream_fetches_every_run() {
    let tmp = TempDir::new().unwrap();
    let (url, hits) = serve_catalog(&[ROW]).await;
    let cfg = test_config(&tmp, &url);

    for _ in 0..2 {
        let sinks: Vec<Arc<dyn SinkWriter>> = vec![Arc::new(DiskSink)];
        run_sync(
            &cfg,
            sinks,
            &options(&cfg, "2015-01-01", "2015-01-01", FetchMode::Stream, 1),
            &NoProgress,
            &StopHandle::new(),
        )
        .await
        .unwrap();
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(!tmp.path().join("cache/LANDSAT_8.csv").exists());
}

#[tokio::test]
async fn test_unreachable_catalog_fails_before_dispatch() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "http://127.0.0.1:1/LANDSAT_8.csv");
    let sinks: Vec<Arc<dyn SinkWriter>> = vec![Arc::new(DiskSink)];

    let err = run_sync(
        &cfg,
        sinks,
        &options(&cfg, "2015-01-01", "2015-01-01", FetchMode::Download, 1),
        &NoProgress,
        &StopHandle::new(),
    )
    .await
    .unwrap_err();

    assert!(format!("{:#}", err).contains("Failed to obtain catalog"));
    assert!(!tmp.path().join("meta").exists());
}

/// Sends the header and one row of a much longer body, then either goes
/// silent or hangs up.
async fn serve_truncated_catalog(hang_up: bool) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let body = format!("{}\n{}\n", HEADER, ROW);
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Length: 1000000\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        if hang_up {
            drop(socket);
        } else {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
    });
    format!("http://{}/LANDSAT_8.csv", addr)
}

#[tokio::test]
async fn test_stream_cut_short_fails_after_finishing_dispatched_rows() {
    for (hang_up, cause) in [(false, "stalled"), (true, "interrupted")] {
        let tmp = TempDir::new().unwrap();
        let url = serve_truncated_catalog(hang_up).await;
        let mut cfg = test_config(&tmp, &url);
        cfg.catalog.chunk_timeout_secs = 1;
        let sinks: Vec<Arc<dyn SinkWriter>> = vec![Arc::new(DiskSink)];

        let err = run_sync(
            &cfg,
            sinks,
            &options(&cfg, "2015-01-01", "2015-01-01", FetchMode::Stream, 2),
            &NoProgress,
            &StopHandle::new(),
        )
        .await
        .unwrap_err();

        let msg = format!("{:#}", err);
        assert!(
            msg.contains("Catalog read failed after 1 lines (1 records dispatched)"),
            "{}",
            msg
        );
        assert!(msg.contains(cause), "{}", msg);
        assert!(tmp
            .path()
            .join("meta/2015/1/1")
            .join(format!("{}.json", SCENE))
            .exists());
    }
}

#[tokio::test]
async fn test_resync_is_idempotent_on_disk_and_kv() {
    let tmp = TempDir::new().unwrap();
    let (url, _) = serve_catalog(&[ROW]).await;
    let cfg = test_config(&tmp, &url);
    let kv = Arc::new(KvSink::open(&cfg.sinks.kv).await.unwrap());

    for _ in 0..2 {
        let sinks: Vec<Arc<dyn SinkWriter>> = vec![Arc::new(DiskSink), kv.clone()];
        run_sync(
            &cfg,
            sinks,
            &options(&cfg, "2015-01-01", "2015-01-01", FetchMode::Stream, 2),
            &NoProgress,
            &StopHandle::new(),
        )
        .await
        .unwrap();
    }

    let files: Vec<_> = std::fs::read_dir(tmp.path().join("meta/2015/1/1"))
        .unwrap()
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(kv.count().await.unwrap(), 1);

    let stored = kv.get(SCENE).await.unwrap().unwrap();
    assert_eq!(stored.record.get_f64("cloudCoverFull"), Some(12.5));
}

#[tokio::test]
async fn test_failing_sink_does_not_block_others() {
    let tmp = TempDir::new().unwrap();
    let rows = [
        "LC80010092015003LGN00,2015-01-03,1,-60.1,5.2,-61.3,5.2,-61.3,4.0,-60.1,4.0",
        "LC80010092015002LGN00,2015-01-02,2,-60.1,5.2,-61.3,5.2,-61.3,4.0,-60.1,4.0",
        ROW,
    ];
    let (url, _) = serve_catalog(&rows).await;
    let cfg = test_config(&tmp, &url);

    let down = IndexSink::new(&IndexSinkConfig {
        url: "http://127.0.0.1:1".to_string(),
        timeout_secs: 5,
        ..IndexSinkConfig::default()
    })
    .unwrap();
    let kv = Arc::new(KvSink::open(&cfg.sinks.kv).await.unwrap());
    let sinks: Vec<Arc<dyn SinkWriter>> = vec![Arc::new(DiskSink), Arc::new(down), kv.clone()];

    let report = run_sync(
        &cfg,
        sinks,
        &options(&cfg, "2015-01-01", "2015-01-03", FetchMode::Stream, 3),
        &NoProgress,
        &StopHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.included, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.failures.len(), 3);
    assert_eq!(report.failures_by_sink().get("es"), Some(&3));

    assert_eq!(kv.count().await.unwrap(), 3);
    for day in 1..=3 {
        let dir = tmp.path().join(format!("meta/2015/1/{}", day));
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 1);
    }
}

#[tokio::test]
async fn test_index_retries_without_geometry() {
    let (base, index) = serve_index(true).await;
    let sink = IndexSink::new(&IndexSinkConfig {
        url: base,
        ..IndexSinkConfig::default()
    })
    .unwrap();

    sink.write("./2015/1/1", &record(ROW)).await.unwrap();

    assert_eq!(index.puts.load(Ordering::SeqCst), 2);
    let docs = index.docs.lock().unwrap();
    let doc = docs.get(SCENE).unwrap();
    assert!(doc["data_geometry"].is_null());
    assert_eq!(doc["cloud_coverage"], 12.5);
}

#[tokio::test]
async fn test_index_accepts_geometry_first_time() {
    let (base, index) = serve_index(false).await;
    let sink = IndexSink::new(&IndexSinkConfig {
        url: base,
        ..IndexSinkConfig::default()
    })
    .unwrap();

    sink.write("./2015/1/1", &record(ROW)).await.unwrap();
    sink.write("./2015/1/1", &record(ROW)).await.unwrap();

    assert_eq!(index.puts.load(Ordering::SeqCst), 2);
    let docs = index.docs.lock().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[SCENE]["data_geometry"]["type"], "Polygon");
}

#[tokio::test]
async fn test_thumbnail_copied_once_and_record_enriched() {
    let tmp = TempDir::new().unwrap();
    let (base, bucket) = serve_bucket().await;

    let kv = Arc::new(
        KvSink::open(&KvSinkConfig {
            path: tmp.path().join("scenes.sqlite"),
        })
        .await
        .unwrap(),
    );
    let client = S3Client::new(
        &S3SinkConfig {
            bucket: "thumbs".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some(base.clone()),
        },
        creds(),
    );
    let sink = ThumbsSink::new(client, kv.clone()).unwrap();

    let header = format!("{},browseURL", HEADER);
    let header = parse_header(&header).unwrap();
    let shared = parse(&header, &format!("{},{}/browse/{}.jpg", ROW, base, SCENE));

    sink.write("./2015/1/1", &shared).await.unwrap();
    sink.write("./2015/1/1", &shared).await.unwrap();

    assert_eq!(bucket.puts.load(Ordering::SeqCst), 1);
    {
        let objects = bucket.objects.lock().unwrap();
        let (body, headers) = objects.get(&format!("{}.jpg", SCENE)).unwrap();
        assert_eq!(body.as_slice(), b"\xff\xd8JPEG");
        assert_eq!(headers["content-type"], "image/jpeg");
        assert_eq!(headers["x-amz-acl"], "public-read");
    }

    let stored = kv.get(SCENE).await.unwrap().unwrap();
    assert_eq!(
        stored.record.get_str("thumbnail"),
        Some(format!("{}/thumbs/{}.jpg", base, SCENE).as_str())
    );
    // The shared record is left alone.
    assert!(shared.get("thumbnail").is_none());
}

#[tokio::test]
async fn test_thumbnail_upload_failure_still_enriches() {
    let tmp = TempDir::new().unwrap();
    let (base, bucket) = serve_bucket().await;
    let kv = Arc::new(
        KvSink::open(&KvSinkConfig {
            path: tmp.path().join("scenes.sqlite"),
        })
        .await
        .unwrap(),
    );
    let client = S3Client::new(
        &S3SinkConfig {
            bucket: "thumbs".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some(base.clone()),
        },
        creds(),
    );
    let sink = ThumbsSink::new(client, kv.clone()).unwrap();

    // No browseURL column: nothing to copy from.
    sink.write("./2015/1/1", &record(ROW)).await.unwrap();

    assert_eq!(bucket.puts.load(Ordering::SeqCst), 0);
    let stored = kv.get(SCENE).await.unwrap().unwrap();
    assert!(stored.record.get_str("thumbnail").unwrap().ends_with(".jpg"));
}

#[tokio::test]
async fn test_reindex_pushes_every_stored_scene() {
    let tmp = TempDir::new().unwrap();
    let (base, index) = serve_index(false).await;

    let kv = KvSink::open(&KvSinkConfig {
        path: tmp.path().join("scenes.sqlite"),
    })
    .await
    .unwrap();
    for day in 1..=5 {
        let line = ROW
            .replace("2015001", &format!("201500{}", day))
            .replace("2015-01-01", &format!("2015-01-0{}", day));
        kv.write("", &record(&line)).await.unwrap();
    }

    let sink = IndexSink::new(&IndexSinkConfig {
        url: base,
        ..IndexSinkConfig::default()
    })
    .unwrap();
    let report = reindex(&kv, &sink, 2, &NoProgress).await.unwrap();

    assert_eq!(report.read, 5);
    assert_eq!(report.indexed, 5);
    assert_eq!(report.failed, 0);

    let lines = index.bulk_lines.lock().unwrap();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0]["index"]["_index"], "sat-api");
    assert_eq!(lines[0]["index"]["_id"], "LC80010092015001LGN00");
    assert_eq!(lines[1]["scene_id"], "LC80010092015001LGN00");
    assert_eq!(lines[1]["satellite_name"], "landsat-8");
}

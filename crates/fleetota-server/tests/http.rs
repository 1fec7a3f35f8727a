#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use fleetota_core::ServerConfig;
use fleetota_core::archive::decode_archive;
use fleetota_core::protocol::order_message;
use fleetota_crypto::TestSigner;
use fleetota_server::routes::{AppState, build_router};

const BOUNDARY: &str = "fleetota-test-boundary";

struct Fixture {
    storage: TempDir,
    state: AppState,
    app: Router,
    alice: TestSigner,
}

fn fixture_with(configure: impl FnOnce(&mut ServerConfig)) -> Fixture {
    let storage = tempfile::tempdir().unwrap();
    for (release, files) in [
        ("blinker-0.1.0", &[("main.py", "blink(1)\n")][..]),
        ("blinker-0.1.1", &[("main.py", "blink(2)\n"), ("config.py", "RATE = 2\n")][..]),
    ] {
        let dir = storage.path().join(release);
        std::fs::create_dir(&dir).unwrap();
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    let alice = TestSigner::new("alice", 11);
    alice.install(&storage.path().join("keys")).unwrap();

    let mut config = ServerConfig {
        storage_dir: storage.path().to_path_buf(),
        known_boards: vec!["b1".into(), "b2".into()],
        ..Default::default()
    };
    configure(&mut config);

    let state = AppState::from_config(&config).unwrap();
    let app = build_router(state.clone());
    Fixture {
        storage,
        state,
        app,
        alice,
    }
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

enum Part<'a> {
    Field(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Field(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(field, filename, content) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(content);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(method: Method, uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn json_request(method: Method, uri: &str, value: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

/// Send a request to the app and return (status, body bytes).
async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

async fn send_order(
    fx: &Fixture,
    method: Method,
    board_id: &str,
    version: &str,
    signed_for: &str,
) -> (StatusCode, Value) {
    let sig = hex::encode(fx.alice.sign(order_message("blinker", version, signed_for).as_bytes()));
    let request = multipart_request(
        method,
        &format!("/update/{board_id}"),
        &[
            Part::Field("firmware", "blinker"),
            Part::Field("version", version),
            Part::File("sig.asc", "sig.asc", sig.as_bytes()),
        ],
    );
    let (status, body) = send(&fx.app, request).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn board_request(board_id: &str, version: &str, secret: &str) -> Value {
    json!({"firmware": "blinker", "version": version, "id": board_id, "secret": secret})
}

#[tokio::test]
async fn status_from_unknown_board_is_unauthorized() {
    let fx = fixture();
    let body = json!({"firmware": "blinker", "version": "0.1.0", "id": "99", "uptime": 12});
    let (status, _) = send(&fx.app, json_request(Method::POST, "/status", &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_reports_pending_order() {
    let fx = fixture();
    let body = json!({"firmware": "blinker", "version": "0.1.0", "board_id": "b1"});

    let (status, resp) = send(&fx.app, json_request(Method::POST, "/status", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&resp).unwrap(), json!({"update": false}));

    let (status, created) = send_order(&fx, Method::POST, "b1", "0.1.1", "b1").await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, resp) = send(&fx.app, json_request(Method::POST, "/status", &body)).await;
    let resp: Value = serde_json::from_slice(&resp).unwrap();
    assert_eq!(resp["update"], true);
    assert_eq!(resp["secret"], created["secret"]);
    assert_eq!(resp["version"], "0.1.1");
}

#[tokio::test]
async fn malformed_status_is_bad_request() {
    let fx = fixture();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/status")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&fx.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_for_unknown_release_is_not_found() {
    let fx = fixture();
    let sig = hex::encode(fx.alice.sign(order_message("app", "2.0", "b1").as_bytes()));
    let request = multipart_request(
        Method::POST,
        "/update/b1",
        &[
            Part::Field("firmware", "app"),
            Part::Field("version", "2.0"),
            Part::File("sig.asc", "sig.asc", sig.as_bytes()),
        ],
    );
    let (status, _) = send(&fx.app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_for_unknown_board_is_not_found() {
    let fx = fixture();
    let (status, _) = send_order(&fx, Method::POST, "b9", "0.1.1", "b9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_without_signature_is_unprocessable() {
    let fx = fixture();
    let request = multipart_request(
        Method::POST,
        "/update/b1",
        &[
            Part::Field("firmware", "blinker"),
            Part::Field("version", "0.1.1"),
        ],
    );
    let (status, _) = send(&fx.app, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn order_signature_is_not_replayable_on_another_board() {
    let fx = fixture();
    let (status, _) = send_order(&fx, Method::POST, "b2", "0.1.1", "b1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(fx.state.orders.store().get("b2").await.is_none());
}

#[tokio::test]
async fn conflicting_order_then_overwrite() {
    let fx = fixture();
    let (status, first) = send_order(&fx, Method::POST, "b1", "0.1.1", "b1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["expires_in_secs"], 600);

    let (status, _) = send_order(&fx, Method::POST, "b1", "0.1.0", "b1").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, second) = send_order(&fx, Method::PUT, "b1", "0.1.0", "b1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(first["secret"], second["secret"]);

    let old = board_request("b1", "0.0.1", first["secret"].as_str().unwrap());
    let (status, _) = send(&fx.app, json_request(Method::GET, "/update/b1", &old)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let new = board_request("b1", "0.0.1", second["secret"].as_str().unwrap());
    let (status, _) = send(&fx.app, json_request(Method::GET, "/update/b1", &new)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn download_with_mismatched_id_is_bad_request() {
    let fx = fixture();
    let (_, created) = send_order(&fx, Method::POST, "b1", "0.1.1", "b1").await;
    let body = board_request("b2", "0.1.0", created["secret"].as_str().unwrap());
    let (status, _) = send(&fx.app, json_request(Method::GET, "/update/b1", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_install_confirm_cycle() {
    let fx = fixture();
    let (_, created) = send_order(&fx, Method::POST, "b1", "0.1.1", "b1").await;
    let body = board_request("b1", "0.1.0", created["secret"].as_str().unwrap());

    let resp = fx
        .app
        .clone()
        .oneshot(json_request(Method::GET, "/update/b1", &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/x-tar");
    let archive = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();

    let staging = tempfile::tempdir().unwrap();
    let decoded = decode_archive(archive.as_ref(), staging.path()).unwrap();
    assert!(decoded.is_intact());
    assert_eq!(decoded.files.keys().collect::<Vec<_>>(), ["config.py", "main.py"]);

    let (status, _) = send(&fx.app, json_request(Method::DELETE, "/update/b1", &body)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&fx.app, json_request(Method::DELETE, "/update/b1", &body)).await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn already_current_board_is_not_modified() {
    let fx = fixture();
    let (_, created) = send_order(&fx, Method::POST, "b1", "0.1.1", "b1").await;
    let body = board_request("b1", "0.1.1", created["secret"].as_str().unwrap());

    let (status, archive) = send(&fx.app, json_request(Method::GET, "/update/b1", &body)).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(archive.is_empty());

    let (status, _) = send(&fx.app, json_request(Method::DELETE, "/update/b1", &body)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&fx.app, json_request(Method::DELETE, "/update/b1", &body)).await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test(start_paused = true)]
async fn expired_order_is_gone() {
    let fx = fixture_with(|config| config.order_ttl_secs = 60);
    let (status, created) = send_order(&fx, Method::POST, "b1", "0.1.1", "b1").await;
    assert_eq!(status, StatusCode::CREATED);

    tokio::time::sleep(Duration::from_secs(61)).await;

    let body = board_request("b1", "0.1.0", created["secret"].as_str().unwrap());
    let (status, _) = send(&fx.app, json_request(Method::GET, "/update/b1", &body)).await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn back_to_back_overwrites_keep_one_cleanup_task() {
    let fx = fixture();
    for version in ["0.1.0", "0.1.1", "0.1.0", "0.1.1"] {
        let (status, _) = send_order(&fx, Method::PUT, "b1", version, "b1").await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let store = fx.state.orders.store();
    assert_eq!(store.peak_cleanup_tasks("b1"), 1);
    assert_eq!(store.live_cleanup_tasks("b1"), 1);
    assert_eq!(store.get("b1").await.unwrap().order.version, "0.1.1");
}

fn upload_parts<'a>(version: &'a str, sig: &'a [u8]) -> Vec<Part<'a>> {
    vec![
        Part::Field("firmware", "blinker"),
        Part::Field("version", version),
        Part::File("file", "ota.py", b"update()\n"),
        Part::File("file", "main.py", b"blink(3)\n"),
        Part::File("sig", "sig", sig),
    ]
}

#[tokio::test]
async fn upload_stores_release_once() {
    let fx = fixture();
    let sig = hex::encode(fx.alice.sign(b"blink(3)\nupdate()\n"));
    let parts = upload_parts("0.2.0", sig.as_bytes());

    let (status, _) = send(&fx.app, multipart_request(Method::PUT, "/upload", &parts)).await;
    assert_eq!(status, StatusCode::CREATED);
    let stored = fx.storage.path().join("blinker-0.2.0");
    assert_eq!(std::fs::read_to_string(stored.join("ota.py")).unwrap(), "update()\n");

    let (status, _) = send(&fx.app, multipart_request(Method::PUT, "/upload", &parts)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn upload_signed_over_wrong_order_is_unauthorized() {
    let fx = fixture();
    let sig = hex::encode(fx.alice.sign(b"update()\nblink(3)\n"));
    let parts = upload_parts("0.2.0", sig.as_bytes());
    let (status, _) = send(&fx.app, multipart_request(Method::PUT, "/upload", &parts)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!fx.storage.path().join("blinker-0.2.0").exists());
}

#[tokio::test]
async fn upload_without_files_or_signature() {
    let fx = fixture();
    let only_fields = [
        Part::Field("firmware", "blinker"),
        Part::Field("version", "0.2.0"),
    ];
    let (status, _) = send(&fx.app, multipart_request(Method::PUT, "/upload", &only_fields)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unsigned = [
        Part::Field("firmware", "blinker"),
        Part::Field("version", "0.2.0"),
        Part::File("file", "main.py", b"blink(3)\n"),
    ];
    let (status, _) = send(&fx.app, multipart_request(Method::PUT, "/upload", &unsigned)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_mode_upload_is_a_dry_run() {
    let fx = fixture_with(|config| config.test_mode.enabled = true);
    let sig = hex::encode(fx.alice.sign(b"blink(3)\n"));
    let parts = [
        Part::Field("firmware", "test"),
        Part::Field("version", "0.0.0"),
        Part::File("file", "main.py", b"blink(3)\n"),
        Part::File("sig.pgp", "sig.pgp", sig.as_bytes()),
    ];
    let (status, _) = send(&fx.app, multipart_request(Method::PUT, "/upload", &parts)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!fx.storage.path().join("test-0.0.0").exists());
}

#[tokio::test]
async fn catalog_lists_and_filters() {
    let fx = fixture();
    let request = Request::builder().uri("/firmware").body(Body::empty()).unwrap();
    let (status, body) = send(&fx.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_slice::<Value>(&body).unwrap(),
        json!({"blinker": ["0.1.0", "0.1.1"]})
    );

    let request = Request::builder()
        .uri("/firmware?firmware=blinker&version=0.1.1")
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&fx.app, request).await;
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"blinker": ["0.1.1"]}));

    let request = Request::builder()
        .uri("/firmware?version=0.1.1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&fx.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

//! Upload against a local stand-in for the ingestion api.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, routing::post, Router};
use enose_bridge::config::UploadConfig;
use enose_bridge::error::BridgeError;
use enose_bridge::upload::Uploader;

#[derive(Debug, Default, Clone)]
struct Captured {
    api_key: Option<String>,
    label: Option<String>,
    disallow_duplicates: Option<String>,
    content_type: Option<String>,
    body: String,
}

type Inbox = Arc<Mutex<Vec<Captured>>>;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn ingest(State(inbox): State<Inbox>, headers: HeaderMap, body: Bytes) -> (StatusCode, String) {
    let captured = Captured {
        api_key: header(&headers, "x-api-key"),
        label: header(&headers, "x-label"),
        disallow_duplicates: header(&headers, "x-disallow-duplicates"),
        content_type: header(&headers, "content-type"),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let authorized = captured.api_key.as_deref() == Some("ei_test_key");
    inbox.lock().unwrap().push(captured);

    if authorized {
        (StatusCode::OK, "melati.json".to_string())
    } else {
        (StatusCode::UNAUTHORIZED, "invalid api key".to_string())
    }
}

async fn ingestion_server() -> (String, Inbox) {
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/training/files", post(ingest))
        .with_state(inbox.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/api/training/files", addr), inbox)
}

fn json_file(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("enose-upload-{}-{}", std::process::id(), nanos));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, r#"{"protected":{"ver":"v1"},"signature":"0"}"#).unwrap();
    path
}

#[tokio::test]
async fn sends_key_label_and_multipart_file() {
    let (endpoint, inbox) = ingestion_server().await;
    let path = json_file("melati_20240517_093005.json");

    let config = UploadConfig {
        endpoint,
        api_key: Some("ei_test_key".into()),
        disallow_duplicates: true,
    };
    let uploader = Uploader::from_config(&config, None).unwrap();
    let receipt = uploader.upload(&path, Some("melati")).await.unwrap();
    assert_eq!(receipt.status, 200);
    assert_eq!(receipt.body, "melati.json");

    let captured = inbox.lock().unwrap()[0].clone();
    assert_eq!(captured.api_key.as_deref(), Some("ei_test_key"));
    assert_eq!(captured.label.as_deref(), Some("melati"));
    assert_eq!(captured.disallow_duplicates.as_deref(), Some("1"));
    assert!(captured
        .content_type
        .unwrap()
        .starts_with("multipart/form-data"));
    assert!(captured.body.contains(r#"name="data""#));
    assert!(captured.body.contains(r#"filename="melati_20240517_093005.json""#));
    assert!(captured.body.contains("application/json"));
    assert!(captured.body.contains(r#""signature":"0""#));

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

#[tokio::test]
async fn rejection_carries_status_and_body() {
    let (endpoint, inbox) = ingestion_server().await;
    let path = json_file("mawar_1.json");

    let config = UploadConfig {
        endpoint,
        api_key: Some("wrong".into()),
        disallow_duplicates: false,
    };
    let uploader = Uploader::from_config(&config, None).unwrap();
    match uploader.upload(&path, None).await {
        Err(BridgeError::Upload { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("expected upload rejection, got {:?}", other),
    }

    let captured = inbox.lock().unwrap()[0].clone();
    assert!(captured.label.is_none());
    assert!(captured.disallow_duplicates.is_none());

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

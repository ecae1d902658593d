//! In-process fakes for tests.
//!
//! [`MockDevice`] serves the REST endpoints the pipeline uses and records every
//! request so tests can assert call order, bodies and chunk offsets.
//! [`MockS3`] answers path-style `HEAD` and `PUT` object calls.

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, head, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{DeviceApi, DeviceClient, DeviceTarget, TransferMode};

#[derive(Debug, Clone)]
pub(crate) enum IdentityMode {
    Name(String),
    Status(u16),
    Malformed,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
    pub content_type: Option<String>,
    pub authorized: bool,
}

struct MockState {
    identity: IdentityMode,
    identity_delay: Duration,
    /// Configuration body written below a fresh timestamp line on each export
    config_body: Vec<u8>,
    fail_backup: bool,
    /// Overrides the size reported by the file-info endpoint
    reported_size: Option<String>,
    exports: usize,
    files: HashMap<String, Vec<u8>>,
    requests: Vec<RecordedRequest>,
}

type Shared = Arc<Mutex<MockState>>;

pub(crate) struct MockDevice {
    addr: SocketAddr,
    state: Shared,
}

impl MockDevice {
    pub async fn start(identity: &str) -> Self {
        let state = Arc::new(Mutex::new(MockState {
            identity: IdentityMode::Name(identity.to_string()),
            identity_delay: Duration::ZERO,
            config_body: b"/system identity\nset name=device\n".to_vec(),
            fail_backup: false,
            reported_size: None,
            exports: 0,
            files: HashMap::new(),
            requests: Vec::new(),
        }));

        let app = Router::new()
            .route("/rest/system/identity", get(identity_handler))
            .route("/rest/export", post(export_handler))
            .route("/rest/system/backup/save", post(backup_handler))
            .route("/rest/file", get(file_info_handler))
            .route("/rest/file/read", post(file_read_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn target(&self) -> DeviceTarget {
        DeviceTarget::new(&format!("http://{}", self.addr), "admin", "secret")
            .unwrap()
            .with_transfer(TransferMode::Chunked, 22)
    }

    pub fn api(&self) -> DeviceApi {
        DeviceApi::new(self.target(), Duration::from_secs(5)).unwrap()
    }

    pub fn client(&self) -> DeviceClient {
        DeviceClient::new(self.target(), Duration::from_secs(5)).unwrap()
    }

    pub fn set_identity(&self, mode: IdentityMode) {
        self.state.lock().unwrap().identity = mode;
    }

    pub fn set_identity_delay(&self, delay: Duration) {
        self.state.lock().unwrap().identity_delay = delay;
    }

    pub fn set_config_body(&self, body: &[u8]) {
        self.state.lock().unwrap().config_body = body.to_vec();
    }

    pub fn fail_backup(&self) {
        self.state.lock().unwrap().fail_backup = true;
    }

    pub fn set_reported_size(&self, size: Option<String>) {
        self.state.lock().unwrap().reported_size = size;
    }

    pub fn put_file(&self, name: &str, contents: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), contents);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    /// Paths of all requests, in arrival order.
    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

fn record(state: &Shared, method: &str, path: &str, headers: &HeaderMap, body: Option<Value>) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "));

    state.lock().unwrap().requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.to_string(),
        body,
        content_type,
        authorized,
    });
}

async fn identity_handler(State(state): State<Shared>, headers: HeaderMap) -> Response {
    record(&state, "GET", "/rest/system/identity", &headers, None);
    let (mode, delay) = {
        let s = state.lock().unwrap();
        (s.identity.clone(), s.identity_delay)
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    match mode {
        IdentityMode::Name(name) => Json(json!({ "name": name })).into_response(),
        IdentityMode::Status(code) => StatusCode::from_u16(code).unwrap().into_response(),
        IdentityMode::Malformed => (StatusCode::OK, "{\"name\": ").into_response(),
    }
}

async fn export_handler(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", "/rest/export", &headers, Some(body.clone()));
    let file = body["file"].as_str().unwrap_or_default().to_string();

    let mut s = state.lock().unwrap();
    s.exports += 1;
    let mut contents = format!("# 2026-10-15 10:{:02}:00 by RouterOS 7.14\n", s.exports).into_bytes();
    contents.extend_from_slice(&s.config_body);
    s.files.insert(file, contents);

    Json(json!([])).into_response()
}

async fn backup_handler(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", "/rest/system/backup/save", &headers, Some(body.clone()));
    let mut s = state.lock().unwrap();
    if s.fail_backup {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let name = body["name"].as_str().unwrap_or_default();
    let mut image = vec![0xB4u8; 12_000];
    image.extend_from_slice(name.as_bytes());
    s.files.insert(format!("{}.backup", name), image);

    Json(json!([])).into_response()
}

async fn file_info_handler(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "GET", "/rest/file", &headers, Some(json!(query)));
    let s = state.lock().unwrap();
    let name = query.get("name").cloned().unwrap_or_default();

    match s.files.get(&name) {
        // Devices report size as a string
        Some(contents) => {
            let size = s
                .reported_size
                .clone()
                .unwrap_or_else(|| contents.len().to_string());
            Json(json!([{ "name": name, "size": size }])).into_response()
        }
        None => Json(json!([])).into_response(),
    }
}

async fn file_read_handler(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&state, "POST", "/rest/file/read", &headers, Some(body.clone()));
    let s = state.lock().unwrap();
    let file = body["file"].as_str().unwrap_or_default();
    let chunk = body["chunk-size"].as_u64().unwrap_or(0) as usize;
    let offset = body["offset"].as_u64().unwrap_or(0) as usize;

    match s.files.get(file) {
        Some(contents) if offset <= contents.len() => {
            let end = (offset + chunk).min(contents.len());
            Bytes::copy_from_slice(&contents[offset..end]).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

const AMZ_CHECKSUM_SHA256: &str = "x-amz-checksum-sha256";
const AMZ_META_PREFIX: &str = "x-amz-meta-";

/// Object as received by the fake S3 endpoint.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoredObject {
    pub body: Vec<u8>,
    pub checksum_sha256: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Default)]
struct S3State {
    /// Keyed by `<bucket>/<key>`
    objects: HashMap<String, StoredObject>,
    puts: usize,
    deny_head: bool,
}

type SharedS3 = Arc<Mutex<S3State>>;

pub(crate) struct MockS3 {
    addr: SocketAddr,
    state: SharedS3,
}

impl MockS3 {
    pub async fn start() -> Self {
        let state: SharedS3 = Arc::new(Mutex::new(S3State::default()));

        let app = Router::new()
            .route("/{bucket}/{*key}", head(s3_head).put(s3_put))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// SDK client pointed at this endpoint with static test credentials.
    pub fn client(&self) -> aws_sdk_s3::Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "mock-s3"))
            .endpoint_url(format!("http://{}", self.addr))
            .force_path_style(true)
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }

    pub fn object(&self, bucket_key: &str) -> Option<StoredObject> {
        self.state.lock().unwrap().objects.get(bucket_key).cloned()
    }

    pub fn puts(&self) -> usize {
        self.state.lock().unwrap().puts
    }

    /// Answer every `HEAD` with 403 Forbidden.
    pub fn deny_head(&self) {
        self.state.lock().unwrap().deny_head = true;
    }
}

async fn s3_head(State(state): State<SharedS3>, Path((bucket, key)): Path<(String, String)>) -> Response {
    let s = state.lock().unwrap();
    if s.deny_head {
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(object) = s.objects.get(&format!("{}/{}", bucket, key)) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, HeaderValue::from_static("\"mock\""));
    if let Some(sum) = &object.checksum_sha256 {
        headers.insert(AMZ_CHECKSUM_SHA256, HeaderValue::from_str(sum).unwrap());
    }
    for (k, v) in &object.metadata {
        let name = HeaderName::from_bytes(format!("{}{}", AMZ_META_PREFIX, k).as_bytes()).unwrap();
        headers.insert(name, HeaderValue::from_str(v).unwrap());
    }
    (StatusCode::OK, headers).into_response()
}

async fn s3_put(
    State(state): State<SharedS3>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let checksum_sha256 = headers
        .get(AMZ_CHECKSUM_SHA256)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(AMZ_META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    let mut s = state.lock().unwrap();
    s.puts += 1;
    s.objects.insert(
        format!("{}/{}", bucket, key),
        StoredObject {
            body: body.to_vec(),
            checksum_sha256,
            metadata,
        },
    );
    (StatusCode::OK, [(header::ETAG, "\"mock\"")]).into_response()
}

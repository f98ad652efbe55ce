//! Shared setup for the HTTP integration tests
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use axum::Router;
use http::{Method, Request};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use ::common::cache::{CacheConfig, FixedUsage};
use ::common::label::{Classification, UserProfile};
use ::common::prelude::{
    CiphertextCache, MasterKey, MemoryLabelAuthority, PermissionResolver, ResourceString,
    TracingPublisher,
};
use drive_daemon::database::Database;
use drive_daemon::http_server;
use drive_daemon::object_service::{ObjectService, SchemaMismatch, ServiceOptions};
use drive_daemon::service_state::Impersonation;
use drive_daemon::ServiceState;

pub const BOUNDARY: &str = "drive-test-boundary";
pub const PROXY: &str = "CN=gateway,OU=Services,O=Drive,C=US";
pub const STRANGER: &str = "CN=nobody,OU=People,O=Elsewhere,C=US";

/// DN of tester `n`, 1 through 10. Testers 1-5 belong to DCTC/ODrive_G2.
pub fn tester(n: u32) -> String {
    format!("CN=test tester{n:02},OU=People,O=Drive,C=US")
}

pub fn g2() -> ResourceString {
    ResourceString::group("DCTC", "DCTC", "ODrive_G2")
}

pub fn unclassified() -> Value {
    json!({"classif": "U", "banner": "UNCLASSIFIED", "dissem_countries": ["USA"]})
}

pub struct TestApp {
    pub state: ServiceState,
    pub router: Router,
    _dir: TempDir,
}

pub async fn setup_app() -> TestApp {
    setup_app_with(None).await
}

pub async fn setup_app_with(read_only: Option<SchemaMismatch>) -> TestApp {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let cache = CiphertextCache::open(
        CacheConfig {
            root: dir.path().join("cache"),
            ..CacheConfig::default()
        },
        Arc::new(object_store::Storage::memory()),
        Arc::new(FixedUsage::new(0.1)),
        cancel.clone(),
    )
    .await
    .unwrap();

    let labels = MemoryLabelAuthority::new();
    for n in 1..=10 {
        let mut profile = UserProfile::new(tester(n), Classification::Secret);
        if n <= 5 {
            profile = profile.with_group(g2());
        }
        labels.register(profile);
    }
    let resolver = PermissionResolver::new(
        Arc::new(MasterKey::derive(b"integration-tests")),
        Arc::new(labels),
    );

    let objects = ObjectService::new(
        Database::in_memory().await.unwrap(),
        cache,
        resolver,
        Arc::new(TracingPublisher),
        ServiceOptions {
            name_path_delimiter: None,
            read_only,
        },
    );
    let impersonation = Impersonation {
        whitelist: vec![PROXY.to_string()],
        ..Impersonation::default()
    };
    let state = ServiceState::new(objects, impersonation, cancel);
    let router = http_server::router(state.clone());
    TestApp {
        state,
        router,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create a file through the multipart endpoint and return its JSON.
    pub async fn create_file(&self, dn: &str, metadata: Value, content: &[u8]) -> Value {
        let response = self.send(multipart_request("/api/v0/objects", dn, &metadata, content)).await;
        assert_eq!(response.status(), 200, "create failed");
        body_json(response).await
    }

    pub async fn get(&self, uri: &str, dn: &str) -> Response {
        self.send(request(Method::GET, uri, dn).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, dn: &str, body: &Value) -> Response {
        self.send(json_request(Method::POST, uri, dn, body)).await
    }
}

pub fn request(method: Method, uri: &str, dn: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("SSL_CLIENT_S_DN", dn)
}

pub fn json_request(method: Method, uri: &str, dn: &str, body: &Value) -> Request<Body> {
    request(method, uri, dn)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// `ObjectMetadata` + `filestream` multipart request.
pub fn multipart_request(uri: &str, dn: &str, metadata: &Value, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"ObjectMetadata\"\r\n\
             Content-Type: application/json\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"filestream\"; filename=\"blob\"\r\n\
             Content-Type: text/plain\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    request(Method::POST, uri, dn)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn id_of(object: &Value) -> String {
    object["id"].as_str().unwrap().to_string()
}

pub fn token_of(object: &Value) -> String {
    object["changeToken"].as_str().unwrap().to_string()
}

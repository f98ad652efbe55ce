//! End-to-end scenarios driven through the HTTP router
mod common;

use std::io::Read;

use http::header::{CONTENT_RANGE, ETAG, IF_NONE_MATCH, RANGE};
use http::Method;
use serde_json::{json, Value};

use self::common::*;

fn metadata(name: &str, acm: Value) -> Value {
    json!({ "name": name, "acm": acm })
}

fn g2_acm() -> Value {
    json!({
        "classif": "U",
        "dissem_countries": ["USA"],
        "share": { "projects": { "DCTC": { "disp_nm": "DCTC", "groups": ["ODrive_G2"] } } }
    })
}

#[tokio::test]
async fn test_public_object_is_readable_by_every_known_user() {
    let app = setup_app().await;
    let created = app
        .create_file(&tester(1), metadata("public.txt", unclassified()), b"hello")
        .await;
    let id = id_of(&created);

    for n in 1..=10 {
        let response = app
            .get(&format!("/api/v0/objects/{id}/properties"), &tester(n))
            .await;
        assert_eq!(response.status(), 200, "tester {n}");
    }

    let response = app
        .get(&format!("/api/v0/objects/{id}/properties"), STRANGER)
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_group_share_limits_readers() {
    let app = setup_app().await;
    let created = app
        .create_file(&tester(1), metadata("g2.txt", g2_acm()), b"group data")
        .await;
    let id = id_of(&created);

    for n in 1..=10 {
        let response = app
            .get(&format!("/api/v0/objects/{id}/stream"), &tester(n))
            .await;
        let expected = if n <= 5 { 200 } else { 403 };
        assert_eq!(response.status(), expected, "tester {n}");
        if n <= 5 {
            assert_eq!(body_bytes(response).await, b"group data");
        }
    }
}

#[tokio::test]
async fn test_add_share_removes_everyone() {
    let app = setup_app().await;
    let created = app
        .create_file(&tester(1), metadata("doc.txt", unclassified()), b"doc")
        .await;
    let id = id_of(&created);
    assert!(created["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["grantee"] == "-Everyone"));

    let share = json!({ "grantee": format!("user/{}", tester(10)), "allowRead": true });
    let response = app
        .post_json(&format!("/api/v0/shared/{id}"), &tester(1), &share)
        .await;
    assert_eq!(response.status(), 200);
    let shared = body_json(response).await;
    assert!(shared["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .all(|p| p["grantee"] != "-Everyone"));

    let uri = format!("/api/v0/objects/{id}/properties");
    assert_eq!(app.get(&uri, &tester(10)).await.status(), 200);
    assert_eq!(app.get(&uri, &tester(7)).await.status(), 403);
}

const ALPHABET: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/";

/// Create a file, replace its stream with the alphabet and return (id, etag).
async fn alphabet_object(app: &TestApp) -> (String, String) {
    let created = app
        .create_file(&tester(1), metadata("alpha.txt", unclassified()), b"old")
        .await;
    let id = id_of(&created);

    let response = app
        .send(multipart_request(
            &format!("/api/v0/objects/{id}/stream"),
            &tester(1),
            &json!({ "changeToken": token_of(&created) }),
            ALPHABET,
        ))
        .await;
    assert_eq!(response.status(), 200);
    let updated = body_json(response).await;
    assert_eq!(updated["contentLength"], 64);

    let response = app.get(&format!("/api/v0/objects/{id}/stream"), &tester(1)).await;
    assert_eq!(response.status(), 200);
    let etag = response.headers()[ETAG].to_str().unwrap().to_string();
    assert_eq!(body_bytes(response).await, ALPHABET);
    (id, etag)
}

#[tokio::test]
async fn test_range_read_after_stream_update() {
    let app = setup_app().await;
    let (id, _) = alphabet_object(&app).await;

    let request = request(Method::GET, &format!("/api/v0/objects/{id}/stream"), &tester(2))
        .header(RANGE, "bytes=5-34")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), 206);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 5-34/64");
    assert_eq!(body_bytes(response).await, b"fghijklmnopqrstuvwxyzABCDEFGHI");
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let app = setup_app().await;
    let (id, _) = alphabet_object(&app).await;

    let request = request(Method::GET, &format!("/api/v0/objects/{id}/stream"), &tester(1))
        .header(RANGE, "bytes=64-")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), 416);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes */64");
}

#[tokio::test]
async fn test_matching_etag_is_not_modified() {
    let app = setup_app().await;
    let (id, etag) = alphabet_object(&app).await;

    let request = request(Method::GET, &format!("/api/v0/objects/{id}/stream"), &tester(1))
        .header(IF_NONE_MATCH, etag.as_str())
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), 304);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_zip_dedups_and_adds_manifest() {
    let app = setup_app().await;
    let one = id_of(
        &app.create_file(&tester(1), metadata("one.txt", unclassified()), b"first")
            .await,
    );
    let two = id_of(
        &app.create_file(&tester(1), metadata("two.txt", unclassified()), b"second")
            .await,
    );

    let response = app
        .post_json(
            "/api/v0/zip",
            &tester(1),
            &json!({ "objectIds": [one, two, two], "fileName": "bundle.zip" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/zip");

    let bytes = body_bytes(response).await;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 3);

    let mut manifest = String::new();
    archive
        .by_name("classification_manifest.txt")
        .unwrap()
        .read_to_string(&mut manifest)
        .unwrap();
    assert!(manifest.starts_with("UNCLASSIFIED"));

    let mut first = String::new();
    archive
        .by_name("one.txt")
        .unwrap()
        .read_to_string(&mut first)
        .unwrap();
    assert_eq!(first, "first");
}

#[tokio::test]
async fn test_create_under_trashed_parent_is_rejected() {
    let app = setup_app().await;
    let response = app
        .post_json("/api/v0/objects", &tester(1), &metadata("folder", unclassified()))
        .await;
    assert_eq!(response.status(), 200);
    let folder = body_json(response).await;
    let folder_id = id_of(&folder);

    let response = app
        .post_json(
            &format!("/api/v0/objects/{folder_id}/trash"),
            &tester(1),
            &json!({ "changeToken": token_of(&folder) }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let child = json!({ "name": "child.txt", "acm": unclassified(), "parentId": folder_id });
    let response = app
        .send(multipart_request("/api/v0/objects", &tester(1), &child, b"x"))
        .await;
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_stale_change_token_conflicts() {
    let app = setup_app().await;
    let created = app
        .create_file(&tester(1), metadata("doc.txt", unclassified()), b"v1")
        .await;
    let id = id_of(&created);
    let uri = format!("/api/v0/objects/{id}/properties");

    let first = json!({ "changeToken": token_of(&created), "description": "first" });
    let response = app.post_json(&uri, &tester(1), &first).await;
    assert_eq!(response.status(), 200);
    let updated = body_json(response).await;
    assert_ne!(token_of(&updated), token_of(&created));

    let stale = json!({ "changeToken": token_of(&created), "description": "second" });
    let response = app.post_json(&uri, &tester(1), &stale).await;
    assert_eq!(response.status(), 409);
}

//! End-to-end protocol tests over the in-memory storage backend.
use std::sync::Arc;

use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use hyper::body::Body;
use tower::ServiceExt;

use stevedore_core::ContentDigest;
use stevedore_driver::InMemoryDriver;
use stevedore_http::Distribution;
use stevedore_storage::DriverRegistry;

const HELLO_DIGEST: &str =
    "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const SCHEMA2_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

fn app() -> Router {
    let registry = DriverRegistry::new(Arc::new(InMemoryDriver::new()));
    Distribution::new(registry, Some(b"test secret"))
        .router()
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    hyper::body::to_bytes(response.into_body())
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'r>(response: &'r Response, name: &str) -> &'r str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

async fn error_codes(response: Response) -> Vec<String> {
    let value = body_json(response).await;
    value["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["code"].as_str().unwrap().to_string())
        .collect()
}

/// POST a new upload session for `name`, returning `(location, uuid)`.
async fn start_upload(app: &Router, name: &str) -> (String, String) {
    let response = send(
        app,
        Request::post(format!("/v2/{name}/blobs/uploads/"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-0");
    let location = header_str(&response, "location").to_string();
    let uuid = header_str(&response, "docker-upload-uuid").to_string();
    assert!(location.contains("_state="));
    (location, uuid)
}

/// Push `content` into `name` through the chunked flow and return the blob
/// location.
async fn push_blob(app: &Router, name: &str, content: &'static [u8]) -> String {
    let digest = ContentDigest::from_content(content);
    let (location, _) = start_upload(app, name).await;
    let response = send(
        app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, content.len())
            .body(Body::from(content))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = header_str(&response, "location").to_string();

    let response = send(
        app,
        Request::put(format!("{location}&digest={digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    header_str(&response, "location").to_string()
}

#[tokio::test]
async fn base_check() {
    let app = app();
    let response = send(&app, Request::get("/v2/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
}

#[tokio::test]
async fn monolithic_upload_via_chunked_flow() {
    let app = app();

    // POST opens the session
    let (location, uuid) = start_upload(&app, "lib/app").await;

    // PATCH appends five bytes
    let response = send(
        &app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("content-range", "0-4")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-4");
    assert_eq!(header_str(&response, "docker-upload-uuid"), uuid);
    let location = header_str(&response, "location").to_string();

    // PUT completes against the expected digest
    let response = send(
        &app,
        Request::put(format!("{location}&digest={HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/lib/app/blobs/{HELLO_DIGEST}")
    );
    assert_eq!(header_str(&response, "docker-content-digest"), HELLO_DIGEST);

    // and the content round-trips
    let response = send(
        &app,
        Request::get(format!("/v2/lib/app/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), HELLO_DIGEST);
    assert_eq!(body_bytes(response).await, b"hello");
}

#[tokio::test]
async fn monolithic_post_with_digest() {
    let app = app();
    let response = send(
        &app,
        Request::post(format!("/v2/lib/app/blobs/uploads/?digest={HELLO_DIGEST}"))
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "docker-content-digest"), HELLO_DIGEST);
}

#[tokio::test]
async fn empty_monolithic_post_commits_zero_length_blob() {
    let app = app();
    let empty_digest = ContentDigest::from_content(b"");
    let response = send(
        &app,
        Request::post(format!("/v2/lib/app/blobs/uploads/?digest={empty_digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(
        &app,
        Request::get(format!("/v2/lib/app/blobs/{empty_digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn blob_head_and_range_get() {
    let app = app();
    push_blob(&app, "lib/app", b"hello").await;

    let response = send(
        &app,
        Request::head(format!("/v2/lib/app/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH.as_str()), "5");

    let response = send(
        &app,
        Request::get(format!("/v2/lib/app/blobs/{HELLO_DIGEST}"))
            .header(header::RANGE, "bytes=1-3")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, "content-range"), "bytes 1-3/5");
    assert_eq!(body_bytes(response).await, b"ell");
}

#[tokio::test]
async fn uncommitted_blob_is_404() {
    let app = app();
    let (_location, _uuid) = start_upload(&app, "lib/app").await;
    // nothing committed: the canonical path must not exist yet
    let response = send(
        &app,
        Request::get(format!("/v2/lib/app/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_codes(response).await, vec!["BLOB_UNKNOWN"]);
}

#[tokio::test]
async fn out_of_order_chunk_is_range_invalid() {
    let app = app();
    let (location, _) = start_upload(&app, "lib/app").await;

    let response = send(
        &app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("content-range", "20-29")
            .header(header::CONTENT_LENGTH, 10)
            .body(Body::from(vec![0u8; 10]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(error_codes(response).await, vec!["RANGE_INVALID"]);
}

#[tokio::test]
async fn zero_length_probe_leaves_offset_unchanged() {
    let app = app();
    let (location, _) = start_upload(&app, "lib/app").await;

    let response = send(
        &app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("content-range", "0-0")
            .header(header::CONTENT_LENGTH, 0)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-0");
}

#[tokio::test]
async fn stale_token_is_rejected() {
    let app = app();
    let (location, _) = start_upload(&app, "lib/app").await;

    // first chunk succeeds
    let response = send(
        &app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // replaying the original token's offset no longer matches
    let response = send(
        &app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"world"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(error_codes(response).await, vec!["RANGE_INVALID"]);
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let app = app();
    let (location, _) = start_upload(&app, "lib/app").await;
    let forged = format!("{}AAAA", location.trim_end_matches('='));

    let response = send(
        &app,
        Request::patch(forged.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_codes(response).await, vec!["BLOB_UPLOAD_INVALID"]);
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let app = app();
    let (_location, uuid) = start_upload(&app, "lib/app").await;

    let response = send(
        &app,
        Request::patch(format!("/v2/lib/app/blobs/uploads/{uuid}"))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_codes(response).await, vec!["BLOB_UPLOAD_INVALID"]);
}

#[tokio::test]
async fn tokens_work_across_instances_sharing_secret_and_storage() {
    // one driver, two registry instances
    let driver = Arc::new(InMemoryDriver::new());
    let registry = DriverRegistry::new(driver);
    let app_a = Distribution::new(registry.clone(), Some(b"shared"))
        .router()
        .unwrap();
    let app_b = Distribution::new(registry.clone(), Some(b"shared"))
        .router()
        .unwrap();
    let app_c = Distribution::new(registry, Some(b"different"))
        .router()
        .unwrap();

    let (location, _) = start_upload(&app_a, "lib/app").await;

    // instance with the same secret accepts the token
    let response = send(
        &app_b,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = header_str(&response, "location").to_string();

    // instance with a different secret rejects it
    let response = send(
        &app_c,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"world"[..]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_codes(response).await, vec!["BLOB_UPLOAD_INVALID"]);
}

#[tokio::test]
async fn wrong_digest_tears_down_session() {
    let app = app();
    let (location, uuid) = start_upload(&app, "lib/app").await;

    let response = send(
        &app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    let location = header_str(&response, "location").to_string();

    let wrong = ContentDigest::from_content(b"not hello");
    let response = send(
        &app,
        Request::put(format!("{location}&digest={wrong}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_codes(response).await, vec!["DIGEST_INVALID"]);

    // the session is gone
    let response = send(
        &app,
        Request::get(location.as_str()).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let _ = uuid;
}

#[tokio::test]
async fn upload_status_and_cancel() {
    let app = app();
    let (location, uuid) = start_upload(&app, "lib/app").await;

    let response = send(
        &app,
        Request::patch(location.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, 5)
            .body(Body::from(&b"hello"[..]))
            .unwrap(),
    )
    .await;
    let location = header_str(&response, "location").to_string();

    // status reports current progress
    let response = send(&app, Request::get(location.as_str()).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "range"), "0-4");
    assert_eq!(header_str(&response, "docker-upload-uuid"), uuid);

    // cancel tears the session down
    let response = send(
        &app,
        Request::delete(location.as_str()).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, Request::get(location.as_str()).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_codes(response).await, vec!["BLOB_UPLOAD_UNKNOWN"]);
}

#[tokio::test]
async fn cross_repository_mount() {
    let app = app();
    push_blob(&app, "lib/a", b"hello").await;

    let response = send(
        &app,
        Request::post(format!(
            "/v2/lib/b/blobs/uploads/?mount={HELLO_DIGEST}&from=lib/a"
        ))
        .body(Body::empty())
        .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/lib/b/blobs/{HELLO_DIGEST}")
    );

    let response = send(
        &app,
        Request::get(format!("/v2/lib/b/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"hello");
}

#[tokio::test]
async fn unmountable_blob_falls_back_to_session() {
    let app = app();
    push_blob(&app, "lib/a", b"hello").await;

    let absent = ContentDigest::from_content(b"never pushed");
    let response = send(
        &app,
        Request::post(format!(
            "/v2/lib/b/blobs/uploads/?mount={absent}&from=lib/a"
        ))
        .body(Body::empty())
        .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(header_str(&response, "location").contains("_state="));
}

fn manifest_for(config: &str, layers: &[String]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config,
            "size": 2
        },
        "layers": layers.iter().map(|l| serde_json::json!({
            "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
            "digest": l,
            "size": 5
        })).collect::<Vec<_>>()
    }))
    .unwrap()
}

/// Push config + layer blobs and a manifest tagged `tag`; returns the
/// manifest bytes and digest.
async fn push_manifest(app: &Router, name: &str, tag: &str) -> (Vec<u8>, String) {
    push_blob(app, name, b"{}").await;
    push_blob(app, name, b"hello").await;
    let config = ContentDigest::from_content(b"{}").to_string();
    let manifest = manifest_for(&config, &[HELLO_DIGEST.to_string()]);

    let response = send(
        app,
        Request::put(format!("/v2/{name}/manifests/{tag}"))
            .header(header::CONTENT_TYPE, OCI_MANIFEST)
            .body(Body::from(manifest.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let digest = header_str(&response, "docker-content-digest").to_string();
    (manifest, digest)
}

#[tokio::test]
async fn manifest_round_trip() {
    let app = app();
    let (manifest, digest) = push_manifest(&app, "lib/app", "v1").await;

    // by tag, byte-identical with the stored content type
    let response = send(
        &app,
        Request::get("/v2/lib/app/manifests/v1")
            .header(header::ACCEPT, OCI_MANIFEST)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
    assert_eq!(header_str(&response, "content-type"), OCI_MANIFEST);
    assert_eq!(body_bytes(response).await, manifest);

    // by digest
    let response = send(
        &app,
        Request::get(format!("/v2/lib/app/manifests/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, manifest);

    // HEAD negotiates like GET
    let response = send(
        &app,
        Request::head("/v2/lib/app/manifests/v1")
            .header(header::ACCEPT, OCI_MANIFEST)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
}

#[tokio::test]
async fn manifest_accept_negotiation() {
    let app = app();
    push_manifest(&app, "lib/app", "v1").await;

    // client only understands schema2: stored OCI manifest is "unknown"
    let response = send(
        &app,
        Request::get("/v2/lib/app/manifests/v1")
            .header(header::ACCEPT, SCHEMA2_MANIFEST)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_codes(response).await, vec!["MANIFEST_UNKNOWN"]);

    // wildcard accepts anything
    let response = send(
        &app,
        Request::get("/v2/lib/app/manifests/v1")
            .header(header::ACCEPT, "*/*")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn manifest_with_missing_layer_enumerates_failures() {
    let app = app();
    push_blob(&app, "lib/app", b"{}").await;
    let config = ContentDigest::from_content(b"{}").to_string();
    let missing = ContentDigest::from_content(b"missing").to_string();
    let manifest = manifest_for(&config, &[missing.clone()]);

    let response = send(
        &app,
        Request::put("/v2/lib/app/manifests/v1")
            .header(header::CONTENT_TYPE, OCI_MANIFEST)
            .body(Body::from(manifest))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = body_json(response).await;
    let errors = value["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["code"], "MANIFEST_BLOB_UNKNOWN");
    assert_eq!(errors[0]["detail"], missing);
}

#[tokio::test]
async fn tag_update_moves_current_and_preserves_history() {
    let app = app();
    let (_, d1) = push_manifest(&app, "lib/app", "v1").await;

    // retag v1 at a different manifest
    push_blob(&app, "lib/app", b"layer two").await;
    let config = ContentDigest::from_content(b"{}").to_string();
    let layer2 = ContentDigest::from_content(b"layer two").to_string();
    let manifest2 = manifest_for(&config, &[layer2]);
    let response = send(
        &app,
        Request::put("/v2/lib/app/manifests/v1")
            .header(header::CONTENT_TYPE, OCI_MANIFEST)
            .body(Body::from(manifest2))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let d2 = header_str(&response, "docker-content-digest").to_string();
    assert_ne!(d1, d2);

    let response = send(
        &app,
        Request::get("/v2/lib/app/manifests/v1")
            .header(header::ACCEPT, "*/*")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(header_str(&response, "docker-content-digest"), d2);
}

#[tokio::test]
async fn manifest_delete_is_repeatable_and_untags() {
    let app = app();
    let (_, digest) = push_manifest(&app, "lib/app", "v1").await;

    let response = send(
        &app,
        Request::delete(format!("/v2/lib/app/manifests/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // the tag it carried is gone too
    let response = send(
        &app,
        Request::get("/v2/lib/app/manifests/v1")
            .header(header::ACCEPT, "*/*")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // deleting again is MANIFEST_UNKNOWN, not a 500
    let response = send(
        &app,
        Request::delete(format!("/v2/lib/app/manifests/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_codes(response).await, vec!["MANIFEST_UNKNOWN"]);
}

#[tokio::test]
async fn tag_listing_paginates() {
    let app = app();
    push_manifest(&app, "lib/app", "v1").await;
    push_manifest(&app, "lib/app", "v2").await;

    let response = send(
        &app,
        Request::get("/v2/lib/app/tags/list")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["name"], "lib/app");
    assert_eq!(value["tags"], serde_json::json!(["v1", "v2"]));

    let response = send(
        &app,
        Request::get("/v2/lib/app/tags/list?n=1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(header_str(&response, "link").contains("last=v1"));
    let value = body_json(response).await;
    assert_eq!(value["tags"], serde_json::json!(["v1"]));

    let response = send(
        &app,
        Request::get("/v2/lib/app/tags/list?n=1&last=v1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let value = body_json(response).await;
    assert_eq!(value["tags"], serde_json::json!(["v2"]));
}

#[tokio::test]
async fn catalog_lists_repositories() {
    let app = app();
    push_blob(&app, "lib/a", b"a").await;
    push_blob(&app, "lib/b", b"b").await;
    push_blob(&app, "zoo", b"z").await;

    let response = send(
        &app,
        Request::get("/v2/_catalog").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(
        value["repositories"],
        serde_json::json!(["lib/a", "lib/b", "zoo"])
    );

    let response = send(
        &app,
        Request::get("/v2/_catalog?n=2").body(Body::empty()).unwrap(),
    )
    .await;
    let value = body_json(response).await;
    assert_eq!(value["repositories"], serde_json::json!(["lib/a", "lib/b"]));
}

#[tokio::test]
async fn repository_names_with_embedded_keywords_route_correctly() {
    let app = app();
    // repository literally named lib/manifests
    push_manifest(&app, "lib/manifests", "v1").await;
    let response = send(
        &app,
        Request::get("/v2/lib/manifests/manifests/v1")
            .header(header::ACCEPT, "*/*")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        Request::get("/v2/lib/manifests/tags/list")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let value = body_json(response).await;
    assert_eq!(value["name"], "lib/manifests");
}

#[tokio::test]
async fn invalid_and_unknown_names() {
    let app = app();

    let response = send(
        &app,
        Request::get(format!("/v2/Upper/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_codes(response).await, vec!["NAME_INVALID"]);

    let response = send(
        &app,
        Request::get(format!("/v2/ghost/town/blobs/{HELLO_DIGEST}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_codes(response).await, vec!["NAME_UNKNOWN"]);
}

#[tokio::test]
async fn malformed_digest_is_rejected() {
    let app = app();
    push_blob(&app, "lib/app", b"hello").await;

    let response = send(
        &app,
        Request::get("/v2/lib/app/blobs/sha256:nothex")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_codes(response).await, vec!["DIGEST_INVALID"]);
}

//! Integration tests for `SupabaseStorageClient` using wiremock HTTP mocks.

use bloglens_storage::{StorageError, SupabaseStorageClient};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(base_url: &str) -> SupabaseStorageClient {
    SupabaseStorageClient::new(base_url, "service-key", "blog-media").expect("client should build")
}

#[tokio::test]
async fn upload_object_returns_public_url() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/storage/v1/object/blog-media/42/avatar.jpg"))
        .and(header("authorization", "Bearer service-key"))
        .and(header("x-upsert", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Key": "blog-media/42/avatar.jpg"
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let url = client
        .upload_object("42/avatar.jpg", vec![0xFF, 0xD8], "image/jpeg")
        .await
        .expect("upload should succeed");

    assert!(url.ends_with("/storage/v1/object/public/blog-media/42/avatar.jpg"));
}

#[tokio::test]
async fn oversized_object_is_rejected_locally() {
    let server = MockServer::start().await;
    let client = test_client(&server.uri());

    let result = client
        .upload_object("42/avatar.jpg", vec![0_u8; 11 * 1024 * 1024], "image/jpeg")
        .await;

    assert!(
        matches!(result, Err(StorageError::TooLarge { .. })),
        "expected TooLarge, got {result:?}"
    );
    assert!(
        server.received_requests().await.unwrap_or_default().is_empty(),
        "no request should reach storage"
    );
}

#[tokio::test]
async fn mirror_profile_images_skips_failures() {
    let server = MockServer::start().await;

    // CDN host: avatar succeeds, one thumbnail 404s.
    Mock::given(method("GET"))
        .and(path("/cdn/avatar.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1_u8, 2, 3], "image/jpeg"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/m1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![4_u8, 5], "image/jpeg"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/m2.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/storage/v1/object/blog-media/42/avatar.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/blog-media/42/post_m1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let images = client
        .mirror_profile_images(
            42,
            Some(&format!("{}/cdn/avatar.jpg", server.uri())),
            &[
                ("m1".to_string(), format!("{}/cdn/m1.jpg", server.uri())),
                ("m2".to_string(), format!("{}/cdn/m2.jpg", server.uri())),
            ],
        )
        .await;

    assert!(images.avatar_url.is_some());
    assert_eq!(images.thumbnails.len(), 1);
    assert!(images.thumbnails.contains_key("m1"));
    assert!(!images.thumbnails.contains_key("m2"), "failed mirror is skipped");
}

#[tokio::test]
async fn list_and_delete_roundtrip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/storage/v1/object/list/blog-media"))
        .and(body_partial_json(serde_json::json!({ "prefix": "" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "42" },
            { "name": "99" }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/storage/v1/object/blog-media"))
        .and(body_partial_json(serde_json::json!({
            "prefixes": ["99/avatar.jpg"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());

    let folders = client.list_folders().await.expect("list should succeed");
    assert_eq!(folders, vec!["42".to_string(), "99".to_string()]);

    client
        .delete_objects(&["99/avatar.jpg".to_string()])
        .await
        .expect("delete should succeed");
}

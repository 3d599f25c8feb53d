//! Integration tests for `InstagrapiClient` using wiremock HTTP mocks.

use bloglens_scraper::{InstagrapiClient, ScrapeError};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(base_url: &str) -> InstagrapiClient {
    InstagrapiClient::new(base_url, Some("bridge-token"), 30)
        .expect("client construction should not fail")
}

#[tokio::test]
async fn scrape_profile_uses_bearer_auth_and_bridge_shapes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/info"))
        .and(query_param("username", "blogger2"))
        .and(header("authorization", "Bearer bridge-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "pk": "777", "username": "blogger2", "full_name": "Second Blogger",
            "biography": "кулинария и быт", "follower_count": 25_000,
            "following_count": 300, "media_count": 210,
            "is_private": false, "is_business": false,
            "profile_pic_url": "https://cdn.example.com/b2.jpg"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/medias"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "pk": "bm1", "caption_text": "рецепт", "media_type": "reel",
                "like_count": 900, "comment_count": 40, "play_count": 15_000,
                "taken_at": 1_735_000_000
            }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/highlights"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let profile = client.scrape_profile("blogger2").await.expect("scrape should succeed");

    assert_eq!(profile.platform_id, "777");
    assert_eq!(profile.posts.len(), 1);
    assert_eq!(profile.posts[0].media_type, "reel");
    assert!(profile.highlights.is_empty());
}

#[tokio::test]
async fn bridge_503_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/info"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client.scrape_profile("blogger2").await.expect_err("should fail");

    assert!(matches!(err, ScrapeError::Transient { .. }));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn account_stats_reports_pool() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": 5, "available": 3
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let stats = client.account_stats().await;

    assert_eq!(stats.total, 5);
    assert_eq!(stats.available, 3);
}

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use moveit_core::{TokenClient, TokenError};

#[test]
fn token_url_is_appended_to_base_path() {
    let client = TokenClient::new("https://transfer.example/moveit/").expect("client should build");
    assert_eq!(
        client.token_url().as_str(),
        "https://transfer.example/moveit/api/v1/token"
    );
}

#[tokio::test]
async fn request_token_posts_password_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice"))
        .and(body_string_contains("password=s%3Acret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-1",
            "token_type": "bearer",
            "expires_in": 1200,
            "refresh_token": "refresh-1"
        })))
        .mount(&server)
        .await;

    let client = TokenClient::new(&server.uri()).unwrap();
    let token = client.request_token("alice", "s:cret").await.unwrap();

    assert_eq!(token.access_token, "token-1");
    assert_eq!(token.token_type.as_deref(), Some("bearer"));
    assert_eq!(token.expires_in, Some(1200));
}

#[tokio::test]
async fn request_token_reports_rejected_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid username or password"
        })))
        .mount(&server)
        .await;

    let client = TokenClient::new(&server.uri()).unwrap();
    let err = client.request_token("alice", "wrong").await.unwrap_err();

    assert!(err.is_rejected_credentials());
    assert!(matches!(err, TokenError::Api { .. }));
}

#[tokio::test]
async fn request_token_rejects_empty_access_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": ""
        })))
        .mount(&server)
        .await;

    let client = TokenClient::new(&server.uri()).unwrap();
    let err = client.request_token("alice", "pw").await.unwrap_err();

    assert!(matches!(err, TokenError::EmptyToken));
}

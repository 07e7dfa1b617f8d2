use async_trait::async_trait;
use moveit_core::{TokenClient, TokenError};

use crate::config::Credentials;
use crate::sync::remote::{AuthError, AuthProvider};

/// Exchanges the session credentials for a fresh token on every request;
/// tokens are neither cached nor refreshed.
pub struct PasswordTokenProvider {
    client: TokenClient,
    credentials: Credentials,
}

impl PasswordTokenProvider {
    pub fn new(client: TokenClient, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl AuthProvider for PasswordTokenProvider {
    async fn token(&self) -> Result<String, AuthError> {
        let token = self
            .client
            .request_token(&self.credentials.username, &self.credentials.password)
            .await?;
        Ok(token.access_token)
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        if err.is_rejected_credentials() {
            AuthError::Rejected(err.to_string())
        } else {
            AuthError::Unavailable(Box::new(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn requests_a_new_token_each_time() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/token"))
            .and(body_string_contains("username=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh",
                "token_type": "bearer"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = PasswordTokenProvider::new(
            TokenClient::new(&server.uri()).unwrap(),
            Credentials::new("alice", "pw"),
        );

        assert_eq!(provider.token().await.unwrap(), "fresh");
        assert_eq!(provider.token().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = PasswordTokenProvider::new(
            TokenClient::new(&server.uri()).unwrap(),
            Credentials::new("alice", "bad"),
        );

        assert!(matches!(
            provider.token().await,
            Err(AuthError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn server_failure_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = PasswordTokenProvider::new(
            TokenClient::new(&server.uri()).unwrap(),
            Credentials::new("alice", "pw"),
        );

        assert!(matches!(
            provider.token().await,
            Err(AuthError::Unavailable(_))
        ));
    }
}

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    CannotBeABase(String),
    #[error("token endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("token response has an empty access_token")]
    EmptyToken,
}

impl TokenError {
    /// True when the server rejected the credentials rather than failing to answer.
    pub fn is_rejected_credentials(&self) -> bool {
        matches!(
            self,
            TokenError::Api { status, .. }
                if matches!(*status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }
}

#[derive(Clone)]
pub struct TokenClient {
    http: Client,
    token_url: Url,
}

impl TokenClient {
    pub fn new(base_url: &str) -> Result<Self, TokenError> {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(http: Client, base_url: &str) -> Result<Self, TokenError> {
        let mut token_url = Url::parse(base_url)?;
        token_url
            .path_segments_mut()
            .map_err(|_| TokenError::CannotBeABase(base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "v1", "token"]);
        Ok(Self { http, token_url })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    pub async fn request_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AccessToken, TokenError> {
        let form = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await?;
        if response.status().is_success() {
            let token = response.json::<AccessToken>().await?;
            if token.access_token.is_empty() {
                return Err(TokenError::EmptyToken);
            }
            Ok(token)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(TokenError::Api { status, body })
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

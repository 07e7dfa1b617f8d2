use std::path::Path;

use async_trait::async_trait;
use moveit_core::{MoveitClient, MoveitError};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
}

impl RemoteFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    #[error("remote file not found: {0}")]
    NotFound(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        RemoteError::Transport(err.into())
    }
}

impl From<MoveitError> for RemoteError {
    fn from(err: MoveitError) -> Self {
        if err.is_not_found() {
            return RemoteError::NotFound(err.to_string());
        }
        match err {
            MoveitError::MissingHomeFolder => RemoteError::InvalidResponse(err.to_string()),
            MoveitError::Request(ref inner) if inner.is_decode() => {
                RemoteError::InvalidResponse(err.to_string())
            }
            other => RemoteError::Transport(Box::new(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials rejected: {0}")]
    Rejected(String),
    #[error("token exchange failed: {0}")]
    Unavailable(#[source] BoxError),
}

/// Hands out a bearer token for one logical group of remote calls.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list(&self, token: &str) -> Result<Vec<RemoteFile>, RemoteError>;

    async fn upload(
        &self,
        token: &str,
        container_id: &str,
        local_path: &Path,
    ) -> Result<(), RemoteError>;

    async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>, RemoteError>;

    async fn delete(&self, token: &str, file_id: &str) -> Result<(), RemoteError>;

    async fn home_container_id(&self, token: &str) -> Result<String, RemoteError>;
}

/// One remote listing, shared by every decision of a single pass.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    files: Vec<RemoteFile>,
}

impl RemoteSnapshot {
    pub fn new(files: Vec<RemoteFile>) -> Self {
        Self { files }
    }

    /// First file carrying `name`; the store does not forbid duplicate names.
    pub fn find(&self, name: &str) -> Option<&RemoteFile> {
        self.files.iter().find(|file| file.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn files(&self) -> &[RemoteFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub struct MoveitRemote {
    client: MoveitClient,
    page_size: u32,
}

impl MoveitRemote {
    pub fn new(client: MoveitClient, page_size: u32) -> Self {
        Self { client, page_size }
    }
}

#[async_trait]
impl RemoteStore for MoveitRemote {
    async fn list(&self, token: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let items = self.client.list_files_all(token, self.page_size).await?;
        Ok(items
            .into_iter()
            .map(|item| RemoteFile::new(item.id, item.name))
            .collect())
    }

    async fn upload(
        &self,
        token: &str,
        container_id: &str,
        local_path: &Path,
    ) -> Result<(), RemoteError> {
        self.client
            .upload_file(token, container_id, local_path)
            .await?;
        Ok(())
    }

    async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(self.client.download_file(token, file_id).await?)
    }

    async fn delete(&self, token: &str, file_id: &str) -> Result<(), RemoteError> {
        Ok(self.client.delete_file(token, file_id).await?)
    }

    async fn home_container_id(&self, token: &str) -> Result<String, RemoteError> {
        Ok(self.client.get_home_folder_id(token).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn snapshot_matches_names_exactly() {
        let snapshot = RemoteSnapshot::new(vec![
            RemoteFile::new("1", "Report.txt"),
            RemoteFile::new("2", "report.txt"),
        ]);
        assert_eq!(snapshot.find("report.txt").map(|f| f.id.as_str()), Some("2"));
        assert!(!snapshot.contains("REPORT.TXT"));
    }

    #[tokio::test]
    async fn maps_missing_home_folder_to_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/self"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": "alice" })))
            .mount(&server)
            .await;

        let remote = MoveitRemote::new(MoveitClient::new(&server.uri()).unwrap(), 100);
        let err = remote.home_container_id("t").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn maps_404_to_not_found_and_5xx_to_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/files/gone/download"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/files/busy"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let remote = MoveitRemote::new(MoveitClient::new(&server.uri()).unwrap(), 100);
        assert!(matches!(
            remote.download("t", "gone").await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(
            remote.delete("t", "busy").await,
            Err(RemoteError::Transport(_))
        ));
    }
}

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum MoveitError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    CannotBeABase(Url),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("user profile is missing homeFolderID")]
    MissingHomeFolder,
    #[error("upload source has no file name: {0}")]
    MissingFileName(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Thin typed client over the MOVEit Transfer `/api/v1` surface.
///
/// The client is token-agnostic: every call takes the bearer token, so one
/// instance can be shared by tasks holding tokens from different exchanges.
#[derive(Clone)]
pub struct MoveitClient {
    http: Client,
    base_url: Url,
}

impl MoveitClient {
    pub fn new(base_url: &str) -> Result<Self, MoveitError> {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(http: Client, base_url: &str) -> Result<Self, MoveitError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(MoveitError::CannotBeABase(base_url));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get_self(&self, token: &str) -> Result<UserProfile, MoveitError> {
        let url = self.endpoint(&["api", "v1", "users", "self"])?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_home_folder_id(&self, token: &str) -> Result<String, MoveitError> {
        self.get_self(token)
            .await?
            .home_folder_id
            .filter(|id| !id.is_empty())
            .ok_or(MoveitError::MissingHomeFolder)
    }

    pub async fn list_files(
        &self,
        token: &str,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<FileList, MoveitError> {
        let mut url = self.endpoint(&["api", "v1", "files"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(page) = page {
                query.append_pair("page", &page.to_string());
            }
            if let Some(per_page) = per_page {
                query.append_pair("perPage", &per_page.to_string());
            }
        }
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Walks every page of the file listing. Responses without a `paging`
    /// block are treated as a single complete page.
    pub async fn list_files_all(
        &self,
        token: &str,
        per_page: u32,
    ) -> Result<Vec<FileItem>, MoveitError> {
        let per_page = per_page.max(1);
        let mut page = 1u32;
        let mut items = Vec::new();
        loop {
            let list = self.list_files(token, Some(page), Some(per_page)).await?;
            let fetched = list.items.len();
            items.extend(list.items);
            let Some(paging) = list.paging else {
                break;
            };
            if fetched == 0 || page >= paging.total_pages {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(items)
    }

    pub async fn upload_file(
        &self,
        token: &str,
        folder_id: &str,
        source: &Path,
    ) -> Result<FileItem, MoveitError> {
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| MoveitError::MissingFileName(source.display().to_string()))?;
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length).file_name(file_name);
        let form = Form::new().part("file", part);

        let url = self.endpoint(&["api", "v1", "folders", folder_id, "files"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn download_file(&self, token: &str, file_id: &str) -> Result<Vec<u8>, MoveitError> {
        let url = self.endpoint(&["api", "v1", "files", file_id, "download"])?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn delete_file(&self, token: &str, file_id: &str) -> Result<(), MoveitError> {
        let url = self.endpoint(&["api", "v1", "files", file_id])?;
        let response = self
            .http
            .delete(url)
            .bearer_auth(token)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, MoveitError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MoveitError::CannotBeABase(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, MoveitError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MoveitError::Api { status, body })
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, MoveitError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl MoveitError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MoveitError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

// The API is inconsistent about ids: file ids are strings, folder ids are numbers.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_id_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileItem {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "folderID", deserialize_with = "optional_id_string")]
    pub folder_id: Option<String>,
    #[serde(default, rename = "uploadStamp")]
    pub upload_stamp: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FileList {
    #[serde(default)]
    pub items: Vec<FileItem>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UserProfile {
    #[serde(default, deserialize_with = "optional_id_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "homeFolderID", deserialize_with = "optional_id_string")]
    pub home_folder_id: Option<String>,
}

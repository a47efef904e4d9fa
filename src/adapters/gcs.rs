//! Cloud Storage staging over the JSON API.
//!
//! Artifacts are written with a resumable upload session, so a table is
//! streamed to the bucket in fixed-size chunks instead of being held in
//! memory. Listing pages through `objects.list` lazily.

use crate::adapters::auth::TokenProvider;
use crate::adapters::{api_url, describe_failure};
use crate::domain::ports::{ArtifactWriter, KeyStream, StagingStore};
use crate::utils::error::{Result, TransferError};
use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use reqwest::header::{CONTENT_RANGE, LOCATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

/// Resumable chunks must be a multiple of 256 KiB, except the last one.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 32 * CHUNK_ALIGNMENT;

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

pub struct GcsStagingStore {
    client: Client,
    endpoint: String,
    bucket: String,
    tokens: Arc<dyn TokenProvider>,
    chunk_size: usize,
}

impl GcsStagingStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        // Upload sessions answer 308 for a partial chunk; that is not a redirect.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            tokens,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Rounds `chunk_size` up to the next multiple of [`CHUNK_ALIGNMENT`].
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let chunks = chunk_size.max(1).div_ceil(CHUNK_ALIGNMENT);
        self.chunk_size = chunks * CHUNK_ALIGNMENT;
        self
    }

    async fn list_page(&self, prefix: &str, page_token: Option<&str>) -> Result<ObjectList> {
        let url = api_url(&self.endpoint, &["storage", "v1", "b", self.bucket.as_str(), "o"])?;
        let mut request = self
            .client
            .get(url)
            .bearer_auth(self.tokens.token().await?)
            .query(&[("prefix", prefix)]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransferError::StagingError {
                message: format!(
                    "listing gs://{}/{} failed: {}",
                    self.bucket,
                    prefix,
                    describe_failure(response).await
                ),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl StagingStore for GcsStagingStore {
    async fn open_write(&self, key: &str) -> Result<Box<dyn ArtifactWriter>> {
        let url = api_url(
            &self.endpoint,
            &["upload", "storage", "v1", "b", self.bucket.as_str(), "o"],
        )?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.tokens.token().await?)
            .query(&[("uploadType", "resumable"), ("name", key)])
            .header("X-Upload-Content-Type", "text/csv")
            .body(Vec::new())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransferError::StagingError {
                message: format!(
                    "opening upload for {} failed: {}",
                    self.uri(key),
                    describe_failure(response).await
                ),
            });
        }

        let session_uri = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| TransferError::StagingError {
                message: format!("upload session for {} has no Location", self.uri(key)),
            })?
            .to_string();

        tracing::debug!("Opened upload session for {}", self.uri(key));
        Ok(Box::new(ResumableUpload {
            client: self.client.clone(),
            session_uri,
            key: key.to_string(),
            buffer: Vec::new(),
            offset: 0,
            chunk_size: self.chunk_size,
            finished: false,
        }))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        // State: Some(page token) while pages remain, None once exhausted.
        let pages = stream::try_unfold(Some(None::<String>), move |state| async move {
            let Some(page_token) = state else {
                return Ok(None);
            };
            let page = self.list_page(prefix, page_token.as_deref()).await?;
            let next = page.next_page_token.map(Some);
            Ok::<_, TransferError>(Some((page.items, next)))
        });

        Box::pin(
            pages
                .map_ok(|items| {
                    stream::iter(items.into_iter().map(|item| Ok::<_, TransferError>(item.name)))
                })
                .try_flatten(),
        )
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }
}

struct ResumableUpload {
    client: Client,
    session_uri: String,
    key: String,
    buffer: Vec<u8>,
    offset: u64,
    chunk_size: usize,
    finished: bool,
}

impl ResumableUpload {
    async fn put(&self, body: Vec<u8>, content_range: String) -> Result<StatusCode> {
        let response = self
            .client
            .put(&self.session_uri)
            .header(CONTENT_RANGE, content_range)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::PERMANENT_REDIRECT {
            Ok(status)
        } else {
            Err(TransferError::StagingError {
                message: format!(
                    "uploading {} failed: {}",
                    self.key,
                    describe_failure(response).await
                ),
            })
        }
    }
}

#[async_trait]
impl ArtifactWriter for ResumableUpload {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);

        while self.buffer.len() >= self.chunk_size {
            let rest = self.buffer.split_off(self.chunk_size);
            let body = std::mem::replace(&mut self.buffer, rest);
            let end = self.offset + body.len() as u64 - 1;
            let range = format!("bytes {}-{}/*", self.offset, end);

            let status = self.put(body, range).await?;
            if status != StatusCode::PERMANENT_REDIRECT {
                return Err(TransferError::StagingError {
                    message: format!("upload of {} closed early ({})", self.key, status),
                });
            }
            self.offset = end + 1;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let body = std::mem::take(&mut self.buffer);
        let total = self.offset + body.len() as u64;
        let range = if body.is_empty() {
            format!("bytes */{}", total)
        } else {
            format!("bytes {}-{}/{}", self.offset, total - 1, total)
        };

        let status = self.put(body, range).await?;
        if status == StatusCode::PERMANENT_REDIRECT {
            return Err(TransferError::StagingError {
                message: format!("upload of {} left incomplete", self.key),
            });
        }
        self.offset = total;
        Ok(())
    }
}

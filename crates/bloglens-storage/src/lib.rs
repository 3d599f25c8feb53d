//! Supabase Storage client for blog media.
//!
//! Scraped avatar and thumbnail URLs point at short-lived CDN hosts, so the
//! full_scrape handler mirrors them into object storage under
//! `{blog_id}/avatar.jpg` and `{blog_id}/post_{platform_id}.jpg` and stores
//! the durable public URLs instead. Mirroring is bounded (4 concurrent
//! transfers, 15 s per call, 10 MB per object) and best-effort: a failed
//! image is logged and skipped, never a task failure.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Per-transfer timeout.
const TRANSFER_TIMEOUT_SECS: u64 = 15;

/// Hard cap on a single mirrored object.
const MAX_OBJECT_BYTES: usize = 10 * 1024 * 1024;

/// Simultaneous transfers per mirroring pass.
const MAX_CONCURRENT_TRANSFERS: usize = 4;

/// How many post thumbnails one scrape mirrors.
pub const MAX_THUMBNAILS: usize = 6;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("object of {size} bytes exceeds the {MAX_OBJECT_BYTES} byte cap")]
    TooLarge { size: usize },
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

/// Durable URLs produced by one mirroring pass.
#[derive(Debug, Default)]
pub struct MirroredImages {
    pub avatar_url: Option<String>,
    /// Post `platform_id` → public thumbnail URL.
    pub thumbnails: HashMap<String, String>,
}

pub struct SupabaseStorageClient {
    client: Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseStorageClient {
    /// Creates a client for one bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(base_url: &str, service_key: &str, bucket: &str) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TRANSFER_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            service_key: service_key.to_owned(),
            bucket: bucket.to_owned(),
        })
    }

    /// Public URL for an object path in this bucket.
    #[must_use]
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.base_url, self.bucket
        )
    }

    /// Upload bytes to `path`, overwriting any existing object.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TooLarge`] past the object cap and
    /// [`StorageError::Api`] on a non-2xx storage response.
    pub async fn upload_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if bytes.len() > MAX_OBJECT_BYTES {
            return Err(StorageError::TooLarge { size: bytes.len() });
        }

        let url = format!("{}/storage/v1/object/{}/{path}", self.base_url, self.bucket);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(self.public_url(path))
    }

    /// Download a CDN image and re-upload it under `path`. Returns the
    /// durable public URL.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when either leg fails or the image busts
    /// the size cap.
    pub async fn mirror_image(&self, source_url: &str, path: &str) -> Result<String, StorageError> {
        let response = self.client.get(source_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Api {
                status: status.as_u16(),
                message: format!("image fetch from {source_url} failed"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_owned();
        let bytes = response.bytes().await?;
        if bytes.len() > MAX_OBJECT_BYTES {
            return Err(StorageError::TooLarge { size: bytes.len() });
        }

        self.upload_object(path, bytes.to_vec(), &content_type).await
    }

    /// Mirror a profile's avatar and up to [`MAX_THUMBNAILS`] post
    /// thumbnails, at most [`MAX_CONCURRENT_TRANSFERS`] at a time.
    ///
    /// Every failure is logged with the blog id and skipped; callers get
    /// whatever subset succeeded.
    pub async fn mirror_profile_images(
        &self,
        blog_id: i64,
        avatar_cdn_url: Option<&str>,
        post_thumbnails: &[(String, String)],
    ) -> MirroredImages {
        let mut jobs: Vec<(Option<String>, String, String)> = Vec::new();

        if let Some(cdn_url) = avatar_cdn_url {
            jobs.push((None, cdn_url.to_owned(), format!("{blog_id}/avatar.jpg")));
        }
        for (platform_id, cdn_url) in post_thumbnails.iter().take(MAX_THUMBNAILS) {
            jobs.push((
                Some(platform_id.clone()),
                cdn_url.clone(),
                format!("{blog_id}/post_{platform_id}.jpg"),
            ));
        }

        let results = stream::iter(jobs)
            .map(|(platform_id, cdn_url, path)| async move {
                let mirrored = self.mirror_image(&cdn_url, &path).await;
                (platform_id, cdn_url, mirrored)
            })
            .buffer_unordered(MAX_CONCURRENT_TRANSFERS)
            .collect::<Vec<_>>()
            .await;

        let mut images = MirroredImages::default();
        for (platform_id, cdn_url, mirrored) in results {
            match (platform_id, mirrored) {
                (None, Ok(url)) => images.avatar_url = Some(url),
                (Some(pid), Ok(url)) => {
                    images.thumbnails.insert(pid, url);
                }
                (_, Err(e)) => {
                    tracing::warn!(blog_id, source = %cdn_url, error = %e, "image mirror failed");
                }
            }
        }

        images
    }

    /// Top-level folder names in the bucket (one folder per blog id).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Api`] on a non-2xx storage response.
    pub async fn list_folders(&self) -> Result<Vec<String>, StorageError> {
        self.list(None).await
    }

    /// Object names under a folder.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Api`] on a non-2xx storage response.
    pub async fn list_objects(&self, folder: &str) -> Result<Vec<String>, StorageError> {
        self.list(Some(folder)).await
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({
                "prefix": prefix.unwrap_or(""),
                "limit": 1000,
                "offset": 0,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let objects: Vec<ListedObject> = response.json().await?;
        Ok(objects.into_iter().map(|o| o.name).collect())
    }

    /// Delete a set of object paths in one call.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Api`] on a non-2xx storage response.
    pub async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError> {
        if paths.is_empty() {
            return Ok(());
        }

        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_layout_matches_the_object_keys() {
        let client =
            SupabaseStorageClient::new("https://proj.supabase.co/", "key", "blog-media").unwrap();

        assert_eq!(
            client.public_url("42/avatar.jpg"),
            "https://proj.supabase.co/storage/v1/object/public/blog-media/42/avatar.jpg"
        );
        assert_eq!(
            client.public_url("42/post_m1.jpg"),
            "https://proj.supabase.co/storage/v1/object/public/blog-media/42/post_m1.jpg"
        );
    }
}

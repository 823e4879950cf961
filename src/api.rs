//! Thin HTTP facade over the STAC catalog service.
//!
//! Read calls swallow transport failures: they log the error and return an
//! empty or absent value, so an empty result means "unknown, possibly
//! failed" rather than "confirmed zero". No caching, no retries.

use std::path::Path;

use futures::TryStreamExt;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

use crate::config::Config;
use crate::error::DownloaderError;
use crate::types::{CatalogItem, Collection};

/// Byte-level progress hook: `(percent, bytes_so_far, total_bytes)`.
/// Percent stays 0 while the response carries no content length.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(f64, u64, u64) + Send);

/// Body of a `POST /search` request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchParams {
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(rename = "filter-lang", skip_serializing_if = "Option::is_none")]
    pub filter_lang: Option<String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: crate::config::DEFAULT_SEARCH_LIMIT,
            collections: None,
            bbox: None,
            datetime: None,
            query: None,
            filter: None,
            filter_lang: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectionsResponse {
    #[serde(default)]
    collections: Vec<Collection>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    features: Vec<CatalogItem>,
}

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    chunk_size: usize,
}

impl CatalogClient {
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built from its static
    /// configuration, which does not happen in practice.
    pub fn new(config: &Config) -> Self {
        let mut headers = HeaderMap::new();
        if !config.api_key.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", config.api_key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("failed to build HTTP client with static configuration");

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size,
        }
    }

    /// All collections, or empty when the call failed (logged).
    pub async fn get_collections(&self) -> Vec<Collection> {
        let url = format!("{}/collections", self.base_url);
        match self.fetch_collections(&url).await {
            Ok(collections) => collections,
            Err(e) => {
                error!("Error fetching collections: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_collections(&self, url: &str) -> Result<Vec<Collection>, DownloaderError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let body: CollectionsResponse = response.json().await?;
        Ok(body.collections)
    }

    pub async fn get_collection(&self, collection_id: &str) -> Option<Collection> {
        let url = format!("{}/collections/{}", self.base_url, collection_id);
        match self.fetch_json::<Collection>(&url).await {
            Ok(collection) => Some(collection),
            Err(e) => {
                error!("Error fetching collection {}: {}", collection_id, e);
                None
            }
        }
    }

    pub async fn get_item(&self, collection_id: &str, item_id: &str) -> Option<CatalogItem> {
        let url = format!(
            "{}/collections/{}/items/{}",
            self.base_url, collection_id, item_id
        );
        match self.fetch_json::<CatalogItem>(&url).await {
            Ok(item) => Some(item),
            Err(e) => {
                error!("Error fetching item {}: {}", item_id, e);
                None
            }
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, DownloaderError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// One filtered search request; the limit is set high enough that all
    /// matches come back at once. Empty on failure (logged).
    pub async fn search_items(&self, params: &SearchParams) -> Vec<CatalogItem> {
        debug!(
            "Search request: {}",
            serde_json::to_string(params).unwrap_or_default()
        );
        match self.post_search(params).await {
            Ok(items) => items,
            Err(e) => {
                error!("Error searching items: {}", e);
                Vec::new()
            }
        }
    }

    async fn post_search(&self, params: &SearchParams) -> Result<Vec<CatalogItem>, DownloaderError> {
        let url = format!("{}/search", self.base_url);
        let response = self.http.post(&url).json(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            // Keep the response body; the server explains filter errors there.
            let body = response.text().await.unwrap_or_default();
            return Err(DownloaderError::ApiStatus { status, body });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.features)
    }

    /// Streams `url` to `local_path`, reporting per-chunk progress.
    /// Returns `false` on any failure (logged); a partially written file
    /// is left in place.
    pub async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> bool {
        match self.stream_to_file(url, local_path, on_progress).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error downloading {}: {}", url, e);
                false
            }
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        local_path: &Path,
        mut on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<(), DownloaderError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let total_size = response.content_length().unwrap_or(0);

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(stream);

        let mut file = File::create(local_path).await?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut downloaded: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            downloaded += n as u64;

            if let Some(callback) = on_progress.as_mut() {
                let percent = if total_size > 0 {
                    downloaded as f64 / total_size as f64 * 100.0
                } else {
                    0.0
                };
                callback(percent, downloaded, total_size);
            }
        }

        file.flush().await?;
        Ok(())
    }
}

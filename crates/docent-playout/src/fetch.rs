use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PlayoutError, Result};

/// A fetched, decodable image ready to be handed to a render surface.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub url: String,
    pub bytes: Arc<Vec<u8>>,
}

impl ImageHandle {
    pub fn new(url: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            bytes: Arc::new(bytes),
        }
    }
}

/// Image transport, injected so the scheduler can be exercised without a
/// network.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ImageHandle>;
}

/// CDN fetcher over reqwest.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<ImageHandle> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(PlayoutError::Fetch {
                url: url.to_string(),
                message: format!("status {}", resp.status()),
            });
        }
        let bytes = resp.bytes().await?.to_vec();
        debug!(url, bytes = bytes.len(), "image fetched");
        Ok(ImageHandle::new(url, bytes))
    }
}

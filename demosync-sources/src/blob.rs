//! Replay bodies streamed straight from the replay servers.

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use demosync_sync::{BlobReader, BlobSource, SourceError};

use crate::http::{check_status, network};

pub struct HttpBlobSource {
    client: reqwest::Client,
}

impl HttpBlobSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobSource for HttpBlobSource {
    async fn open(&self, locator: &str) -> Result<BlobReader, SourceError> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response, locator)?;
        tracing::debug!(locator, length = ?response.content_length(), "replay stream opened");

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}

//! # Sync Transport
//!
//! The network seam of the engine. [`SyncTransport`] is the whole server
//! contract the orchestrator depends on:
//!
//! - `POST /watch-progress/sync` with a [`SyncRequest`], answered by a
//!   [`SyncResponse`]
//! - `GET /watch-progress/:itemId`, answered by one [`ProgressRecord`]
//!
//! [`HttpTransport`] implements it over `reqwest` with JSON bodies. Tests
//! substitute scripted implementations.

use crate::shared::config::SyncConfig;
use crate::shared::error::TransportError;
use crate::shared::progress::ProgressRecord;
use crate::shared::protocol::{SyncRequest, SyncResponse, ITEM_PATH, SYNC_PATH};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::{Client, Response, Url};
use std::fmt::Debug;

/// Round trips to the progress service
pub trait SyncTransport: Send + Sync + Debug {
    /// Push a batch of queued updates
    fn sync<'a>(
        &'a self,
        request: &'a SyncRequest,
    ) -> BoxFuture<'a, Result<SyncResponse, TransportError>>;

    /// Fetch the server copy of one item
    fn fetch_item<'a>(
        &'a self,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<ProgressRecord, TransportError>>;
}

/// JSON-over-HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a client with the configured request timeout
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn item_url(&self, item_id: &str) -> Result<Url, TransportError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, ITEM_PATH))
            .map_err(|e| TransportError::network(format!("invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| TransportError::network("base URL cannot carry a path"))?
            .push(item_id);
        Ok(url)
    }

    async fn post_sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        let url = format!("{}{}", self.base_url, SYNC_PATH);
        tracing::debug!(
            "POST {} with {} update(s)",
            url,
            request.updates.len()
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::network(e.to_string()))?;

        decode(response).await
    }

    async fn get_item(&self, item_id: &str) -> Result<ProgressRecord, TransportError> {
        let url = self.item_url(item_id)?;
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::network(e.to_string()))?;

        decode(response).await
    }
}

/// Map non-2xx to `Http`, then parse the JSON body
async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| TransportError::network(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl SyncTransport for HttpTransport {
    fn sync<'a>(
        &'a self,
        request: &'a SyncRequest,
    ) -> BoxFuture<'a, Result<SyncResponse, TransportError>> {
        self.post_sync(request).boxed()
    }

    fn fetch_item<'a>(
        &'a self,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<ProgressRecord, TransportError>> {
        self.get_item(item_id).boxed()
    }
}

//! Stream list providers.
//!
//! The engine only consumes a provider through [`StreamListProvider`]; it
//! never retries a failed fetch itself.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::descriptor::StreamDescriptor;
use crate::error::{Result, SyncError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[async_trait]
pub trait StreamListProvider: Send + Sync {
    /// Fetches the playable streams. Any network or parse failure is a
    /// transport error.
    async fn fetch_stream_list(&self) -> Result<Vec<StreamDescriptor>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StreamEntry {
    Url(String),
    Descriptor(StreamDescriptor),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StreamListBody {
    Wrapped { streams: Vec<StreamEntry> },
    Bare(Vec<StreamEntry>),
}

/// Parses a stream list response body.
///
/// Accepts `{"streams": [...]}` or a bare array. Entries are either URL
/// strings, named `stream{n}`/`Camera {n}` by position, or full descriptor
/// objects. Blank URLs are dropped and at most `limit` streams are kept.
pub fn parse_stream_list(body: &str, limit: usize) -> Result<Vec<StreamDescriptor>> {
    let parsed: StreamListBody = serde_json::from_str(body)
        .map_err(|e| SyncError::transport(format!("invalid stream list: {e}")))?;
    let entries = match parsed {
        StreamListBody::Wrapped { streams } => streams,
        StreamListBody::Bare(streams) => streams,
    };

    let mut descriptors = Vec::with_capacity(entries.len().min(limit));
    for entry in entries {
        if descriptors.len() >= limit {
            break;
        }
        match entry {
            StreamEntry::Url(url) if url.trim().is_empty() => {
                warn!("Skipping blank stream url");
            }
            StreamEntry::Url(url) => {
                descriptors.push(StreamDescriptor::camera(descriptors.len(), url.trim()));
            }
            StreamEntry::Descriptor(descriptor) => descriptors.push(descriptor),
        }
    }
    Ok(descriptors)
}

/// Fetches the stream list from an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpStreamListProvider {
    client: reqwest::Client,
    endpoint: Url,
    method: Method,
    limit: usize,
}

impl HttpStreamListProvider {
    /// Creates a provider that `POST`s to `endpoint`.
    pub fn new(endpoint: &str, limit: usize) -> Result<Self> {
        install_rustls_provider();
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Self::with_client(client, endpoint, limit)
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str, limit: usize) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            SyncError::configuration(format!("invalid stream list endpoint `{endpoint}`: {e}"))
        })?;
        Ok(Self {
            client,
            endpoint,
            method: Method::POST,
            limit,
        })
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl StreamListProvider for HttpStreamListProvider {
    async fn fetch_stream_list(&self) -> Result<Vec<StreamDescriptor>> {
        debug!(endpoint = %self.endpoint, method = %self.method, "Fetching stream list");
        let response = self
            .client
            .request(self.method.clone(), self.endpoint.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::transport(format!(
                "stream list endpoint returned {status}"
            )));
        }

        let body = response.text().await?;
        let descriptors = parse_stream_list(&body, self.limit)?;
        debug!(count = descriptors.len(), "Fetched stream list");
        Ok(descriptors)
    }
}

/// Serves a fixed stream list.
#[derive(Debug, Clone, Default)]
pub struct StaticStreamList {
    descriptors: Vec<StreamDescriptor>,
}

impl StaticStreamList {
    pub fn new(descriptors: Vec<StreamDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let descriptors = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| StreamDescriptor::camera(index, url))
            .collect();
        Self { descriptors }
    }
}

#[async_trait]
impl StreamListProvider for StaticStreamList {
    async fn fetch_stream_list(&self) -> Result<Vec<StreamDescriptor>> {
        Ok(self.descriptors.clone())
    }
}

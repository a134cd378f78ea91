//! Torrent payload fetching
//!
//! The fetcher places the raw torrent payload into quarantine. It never
//! touches a permanent disk; promotion happens only after a clean scan.

use crate::config::FetcherConfig;
use crate::error::{Error, PipelineError, Result};
use crate::storage::Disk;
use async_trait::async_trait;

/// Links a payload can be fetched from
#[derive(Clone, Debug, Default)]
pub struct FetchRequest {
    /// Magnet URI
    pub magnet_link: Option<String>,
    /// HTTP(S) link to a .torrent file
    pub torrent_link: Option<String>,
}

impl FetchRequest {
    /// Extension of the payload this request produces
    pub fn extension(&self) -> &'static str {
        if self.torrent_link.is_some() {
            "torrent"
        } else {
            "magnet"
        }
    }
}

/// Places torrent payloads into quarantine
#[async_trait]
pub trait TorrentFetcher: Send + Sync {
    /// Fetch the payload and store it under `key` on `quarantine`
    ///
    /// Returns the key actually written.
    async fn fetch(&self, request: &FetchRequest, quarantine: &Disk, key: &str) -> Result<String>;
}

/// Fetches `.torrent` files over HTTP and stores magnet-only requests as `.magnet` files
pub struct HttpTorrentFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl HttpTorrentFetcher {
    /// Build a fetcher from configuration
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    async fn fetch_torrent(&self, link: &str, quarantine: &Disk, key: &str) -> Result<()> {
        let url = url::Url::parse(link).map_err(|e| PipelineError::InvalidUrl {
            url: link.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::InvalidUrl {
                url: link.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }
            .into());
        }

        let response = self.client.get(url).send().await.map_err(|e| Error::Fetch {
            message: format!("request to {} failed: {}", link, e),
            retryable: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                message: format!("{} returned HTTP {}", link, status.as_u16()),
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        let limit = self.config.max_torrent_size;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(Error::Fetch {
                message: format!("{} exceeds the {} byte torrent size limit", link, limit),
                retryable: false,
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::Fetch {
            message: format!("reading {} failed: {}", link, e),
            retryable: true,
        })?;
        if bytes.len() as u64 > limit {
            return Err(Error::Fetch {
                message: format!("{} exceeds the {} byte torrent size limit", link, limit),
                retryable: false,
            });
        }

        quarantine.put(key, &bytes).await?;
        tracing::debug!(link, key, size = bytes.len(), "torrent file stored in quarantine");
        Ok(())
    }
}

#[async_trait]
impl TorrentFetcher for HttpTorrentFetcher {
    async fn fetch(&self, request: &FetchRequest, quarantine: &Disk, key: &str) -> Result<String> {
        match (&request.torrent_link, &request.magnet_link) {
            (Some(link), _) => {
                self.fetch_torrent(link, quarantine, key).await?;
            }
            (None, Some(magnet)) => {
                if !self.config.allow_magnet_only {
                    return Err(Error::config(
                        "magnet-only downloads are disabled",
                        "fetcher.allow_magnet_only",
                    ));
                }
                if !magnet.starts_with("magnet:") {
                    return Err(PipelineError::InvalidUrl {
                        url: magnet.clone(),
                        reason: "not a magnet URI".to_string(),
                    }
                    .into());
                }
                quarantine.put(key, format!("{}\n", magnet).as_bytes()).await?;
                tracing::debug!(key, "magnet link stored in quarantine");
            }
            (None, None) => return Err(PipelineError::MissingLink.into()),
        }
        Ok(key.to_string())
    }
}

//! VirusTotal v3 client

use super::{AnalysisReport, DomainInfo, DomainVotes, ObjectAttributes, ScanReport, ThreatIntel};
use crate::config::{RetryConfig, ThreatIntelConfig};
use crate::error::{ApiErrorCode, Result, ThreatIntelError};
use crate::rate_limiter::RequestLimiter;
use crate::retry::{IsRetryable, with_retry};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

/// Identifier of a URL object: unpadded URL-safe base64 of the URL
pub fn url_id(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

/// Wraps a client error with transport-level retry semantics
///
/// Inside a single API call only throttling (429), server errors (5xx) and
/// network failures are retried; every other 4xx returns at once.
struct RequestFailure(ThreatIntelError);

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl IsRetryable for RequestFailure {
    fn is_retryable(&self) -> bool {
        match &self.0 {
            ThreatIntelError::Api { status, .. } => *status == 429 || *status >= 500,
            ThreatIntelError::Network(_) => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match &self.0 {
            ThreatIntelError::Api {
                status: 429,
                retry_after,
                ..
            } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ApiObject {
    id: String,
    #[serde(default)]
    attributes: ObjectAttributes,
}

#[derive(Deserialize)]
struct VoteObject {
    #[serde(default)]
    attributes: VoteAttributes,
}

#[derive(Deserialize)]
#[serde(default)]
struct VoteAttributes {
    verdict: String,
    value: u32,
}

impl Default for VoteAttributes {
    fn default() -> Self {
        Self {
            verdict: String::new(),
            value: 1,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> std::result::Result<T, ThreatIntelError> {
    serde_json::from_value(value).map_err(|e| ThreatIntelError::Decode(e.to_string()))
}

fn parse_report(value: serde_json::Value) -> std::result::Result<ScanReport, ThreatIntelError> {
    let envelope: DataEnvelope<ApiObject> = decode(value)?;
    // Objects exist before their first analysis finishes
    if envelope.data.attributes.last_analysis_date.is_none() {
        return Ok(ScanReport::Pending);
    }
    Ok(ScanReport::Ready(AnalysisReport {
        id: envelope.data.id,
        attributes: envelope.data.attributes,
    }))
}

/// Hex SHA-256 of a file, the identifier of its file report
async fn sha256_file(path: &Path) -> std::result::Result<String, ThreatIntelError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Streamed multipart part for a file upload
async fn file_part(path: &Path) -> std::result::Result<Part, ThreatIntelError> {
    let file = tokio::fs::File::open(path).await?;
    let length = file.metadata().await?.len();
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    Ok(Part::stream_with_length(body, length)
        .file_name(file_name)
        .mime_str("application/octet-stream")?)
}

/// Rate-limited, retrying VirusTotal v3 client
pub struct VirusTotalClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
    default_retry_after: Duration,
    limiter: Option<RequestLimiter>,
}

impl VirusTotalClient {
    /// Build a client from configuration
    pub fn new(config: &ThreatIntelConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ThreatIntelError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            retry: config.retry.clone(),
            default_retry_after: config.default_retry_after,
            limiter: config.requests_per_minute.map(RequestLimiter::per_minute),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::RequestBuilder, ThreatIntelError> {
        match &self.api_key {
            Some(key) => Ok(request.header("x-apikey", key)),
            None => Err(ThreatIntelError::NotConfigured(
                "threat_intel.api_key is not set".to_string(),
            )),
        }
    }

    /// Send a request built by `build`, retrying transient failures in place
    ///
    /// `build` runs once per attempt since upload bodies cannot be replayed.
    async fn execute<F, Fut>(
        &self,
        operation: &'static str,
        build: F,
    ) -> std::result::Result<serde_json::Value, ThreatIntelError>
    where
        F: Fn() -> Fut + Sync,
        Fut: Future<Output = std::result::Result<reqwest::RequestBuilder, ThreatIntelError>>
            + Send,
    {
        let this = self;
        let build = &build;

        with_retry(&self.retry, move || async move {
            if let Some(limiter) = &this.limiter {
                limiter.acquire().await;
            }
            let request = build().await.map_err(RequestFailure)?;
            let request = this.authorize(request).map_err(RequestFailure)?;
            let response = request
                .send()
                .await
                .map_err(|e| RequestFailure(ThreatIntelError::Network(e)))?;
            this.read_response(response).await.map_err(RequestFailure)
        })
        .await
        .map_err(|RequestFailure(e)| {
            tracing::warn!(operation, error = %e, status = e.status(), "threat-intel request failed");
            e
        })
    }

    async fn get_json(&self, operation: &'static str, path: &str) -> std::result::Result<serde_json::Value, ThreatIntelError> {
        let url = self.endpoint(path);
        let url = url.as_str();
        let http = &self.http;
        self.execute(operation, move || {
            let request = http.get(url);
            async move { Ok::<_, ThreatIntelError>(request) }
        })
        .await
    }

    async fn read_response(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<serde_json::Value, ThreatIntelError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| ThreatIntelError::Decode(e.to_string()));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let retry_after = if status.as_u16() == 429 {
            Some(retry_after.unwrap_or(self.default_retry_after))
        } else {
            retry_after
        };

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => (
                ApiErrorCode::from_code(&envelope.error.code)
                    .or_else(|| ApiErrorCode::from_status(status.as_u16())),
                envelope.error.message,
            ),
            Err(_) => (
                ApiErrorCode::from_status(status.as_u16()),
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            ),
        };

        Err(ThreatIntelError::Api {
            status: status.as_u16(),
            code,
            message,
            retry_after,
        })
    }

    async fn fetch_report(
        &self,
        operation: &'static str,
        path: &str,
    ) -> std::result::Result<ScanReport, ThreatIntelError> {
        match self.get_json(operation, path).await {
            Ok(value) => parse_report(value),
            // Freshly submitted objects are unknown until the first analysis lands
            Err(ThreatIntelError::Api {
                code: Some(ApiErrorCode::NotFound | ApiErrorCode::NotAvailableYet),
                ..
            }) => Ok(ScanReport::Pending),
            Err(e) => Err(e),
        }
    }

    async fn upload(
        &self,
        operation: &'static str,
        url: &str,
        path: &Path,
    ) -> std::result::Result<String, ThreatIntelError> {
        let sha256 = sha256_file(path).await?;
        let http = &self.http;

        let response = self
            .execute(operation, move || async move {
                let part = file_part(path).await?;
                Ok::<_, ThreatIntelError>(http.post(url).multipart(Form::new().part("file", part)))
            })
            .await?;

        tracing::debug!(
            operation,
            sha256 = %sha256,
            analysis_id = ?response["data"]["id"].as_str(),
            "file submitted for analysis"
        );
        Ok(sha256)
    }
}

#[async_trait]
impl ThreatIntel for VirusTotalClient {
    async fn scan_url(&self, url: &str) -> std::result::Result<String, ThreatIntelError> {
        let endpoint = self.endpoint("urls");
        let endpoint = endpoint.as_str();
        let http = &self.http;

        let response = self
            .execute("scan_url", move || {
                let request = http.post(endpoint).form(&[("url", url)]);
                async move { Ok::<_, ThreatIntelError>(request) }
            })
            .await?;

        tracing::debug!(
            url,
            analysis_id = ?response["data"]["id"].as_str(),
            "URL submitted for analysis"
        );
        Ok(url_id(url))
    }

    async fn get_url_report(&self, scan_id: &str) -> std::result::Result<ScanReport, ThreatIntelError> {
        self.fetch_report("get_url_report", &format!("urls/{}", scan_id))
            .await
    }

    async fn scan_file(&self, path: &Path) -> std::result::Result<String, ThreatIntelError> {
        let endpoint = self.endpoint("files");
        self.upload("scan_file", &endpoint, path).await
    }

    async fn get_upload_url(&self) -> std::result::Result<String, ThreatIntelError> {
        let value = self.get_json("get_upload_url", "files/upload_url").await?;
        let envelope: DataEnvelope<String> = decode(value)?;
        Ok(envelope.data)
    }

    async fn upload_large_file(
        &self,
        path: &Path,
        upload_url: &str,
    ) -> std::result::Result<String, ThreatIntelError> {
        self.upload("upload_large_file", upload_url, path).await
    }

    async fn get_file_report(&self, scan_id: &str) -> std::result::Result<ScanReport, ThreatIntelError> {
        self.fetch_report("get_file_report", &format!("files/{}", scan_id))
            .await
    }

    async fn get_domain_info(&self, domain: &str) -> std::result::Result<DomainInfo, ThreatIntelError> {
        let value = self
            .get_json("get_domain_info", &format!("domains/{}", domain))
            .await?;
        let envelope: DataEnvelope<ApiObject> = decode(value)?;
        Ok(DomainInfo {
            domain: envelope.data.id,
            attributes: envelope.data.attributes,
        })
    }

    async fn get_domain_votes(&self, domain: &str) -> std::result::Result<DomainVotes, ThreatIntelError> {
        let value = self
            .get_json("get_domain_votes", &format!("domains/{}/votes", domain))
            .await?;
        let envelope: DataEnvelope<Vec<VoteObject>> = decode(value)?;

        let mut votes = DomainVotes::default();
        for vote in envelope.data {
            match vote.attributes.verdict.as_str() {
                "harmless" => votes.harmless += vote.attributes.value,
                "malicious" => votes.malicious += vote.attributes.value,
                _ => {}
            }
        }
        Ok(votes)
    }
}

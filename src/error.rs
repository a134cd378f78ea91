//! Error types for torrent-quarantine
//!
//! This module provides the error taxonomy for the pipeline:
//! - Configuration errors (fatal, never retried)
//! - Not-found and precondition errors (fatal for the job that hit them)
//! - Threat-intel API errors, classified retryable or not per API error code
//! - Transient fetch and I/O failures

use crate::types::DownloadStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for torrent-quarantine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for torrent-quarantine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage.default_disk")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Threat-intel API error
    #[error("threat-intel error: {0}")]
    ThreatIntel(#[from] ThreatIntelError),

    /// Pipeline state or input error
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Quarantine storage error
    #[error("quarantine error: {0}")]
    Quarantine(#[from] QuarantineError),

    /// Torrent fetch failed
    #[error("fetch error: {message}")]
    Fetch {
        /// What went wrong
        message: String,
        /// Whether a later attempt may succeed
        retryable: bool,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a config key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Pipeline state and input errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Download record does not exist (or was soft-deleted)
    #[error("download {id} not found")]
    NotFound {
        /// The download ID that was not found
        id: i64,
    },

    /// Status write rejected by the transition table
    #[error("download {id}: illegal status transition {from} -> {to}")]
    InvalidTransition {
        /// The download ID
        id: i64,
        /// Status the record was in
        from: DownloadStatus,
        /// Status that was requested
        to: DownloadStatus,
    },

    /// Neither a magnet link nor a torrent link was supplied
    #[error("a magnet link or a torrent link is required")]
    MissingLink,

    /// A supplied link could not be parsed
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Quarantine storage errors
#[derive(Debug, Error)]
pub enum QuarantineError {
    /// Operation requires the payload to be in quarantine
    #[error("download {id} is not in quarantine (location: {location})")]
    NotInQuarantine {
        /// The download ID
        id: i64,
        /// Where the payload currently lives
        location: String,
    },

    /// Record has no stored payload
    #[error("download {id} has no stored payload")]
    NoPayload {
        /// The download ID
        id: i64,
    },

    /// Stored object is missing from its disk
    #[error("object {key} missing from disk {disk}")]
    ObjectMissing {
        /// Disk name
        disk: String,
        /// Storage key
        key: String,
    },

    /// Destination disk is not configured
    #[error("unknown storage disk '{name}'")]
    UnknownDisk {
        /// Requested disk name
        name: String,
    },

    /// Storage key escapes its disk root
    #[error("invalid storage key '{key}'")]
    InvalidKey {
        /// The rejected key
        key: String,
    },
}

/// Threat-intel API error codes
///
/// Each code carries its HTTP status, whether the failure is transient, and the
/// status string persisted on the record that hit it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    /// Malformed request
    BadRequest,
    /// A request parameter is invalid
    InvalidArgument,
    /// The requested analysis is not available yet
    NotAvailableYet,
    /// Content search query is not selective enough
    UnselectiveContentQuery,
    /// Unsupported content search query
    UnsupportedContentQuery,
    /// No API key supplied
    AuthenticationRequired,
    /// The API key's user is not active
    UserNotActive,
    /// The API key is wrong
    WrongCredentials,
    /// Not allowed to perform the operation
    Forbidden,
    /// Object not found
    NotFound,
    /// Resource already exists
    AlreadyExists,
    /// Upstream dependency failed
    FailedDependency,
    /// Account quota exceeded
    QuotaExceeded,
    /// Too many requests
    TooManyRequests,
    /// Transient server error
    Transient,
    /// Operation took too long
    DeadlineExceeded,
}

impl ApiErrorCode {
    /// Parse a wire error code (e.g. "NotFoundError")
    pub fn from_code(code: &str) -> Option<Self> {
        let parsed = match code {
            "BadRequestError" => ApiErrorCode::BadRequest,
            "InvalidArgumentError" => ApiErrorCode::InvalidArgument,
            "NotAvailableYet" => ApiErrorCode::NotAvailableYet,
            "UnselectiveContentQueryError" => ApiErrorCode::UnselectiveContentQuery,
            "UnsupportedContentQueryError" => ApiErrorCode::UnsupportedContentQuery,
            "AuthenticationRequiredError" => ApiErrorCode::AuthenticationRequired,
            "UserNotActiveError" => ApiErrorCode::UserNotActive,
            "WrongCredentialsError" => ApiErrorCode::WrongCredentials,
            "ForbiddenError" => ApiErrorCode::Forbidden,
            "NotFoundError" => ApiErrorCode::NotFound,
            "AlreadyExistsError" => ApiErrorCode::AlreadyExists,
            "FailedDependencyError" => ApiErrorCode::FailedDependency,
            "QuotaExceededError" => ApiErrorCode::QuotaExceeded,
            "TooManyRequestsError" => ApiErrorCode::TooManyRequests,
            "TransientError" => ApiErrorCode::Transient,
            "DeadlineExceededError" => ApiErrorCode::DeadlineExceeded,
            _ => return None,
        };
        Some(parsed)
    }

    /// Best-effort code for a response that carried no error body
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            400 => Some(ApiErrorCode::BadRequest),
            401 => Some(ApiErrorCode::AuthenticationRequired),
            403 => Some(ApiErrorCode::Forbidden),
            404 => Some(ApiErrorCode::NotFound),
            409 => Some(ApiErrorCode::AlreadyExists),
            424 => Some(ApiErrorCode::FailedDependency),
            429 => Some(ApiErrorCode::TooManyRequests),
            503 => Some(ApiErrorCode::Transient),
            504 => Some(ApiErrorCode::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wire representation
    pub fn as_code(&self) -> &'static str {
        match self {
            ApiErrorCode::BadRequest => "BadRequestError",
            ApiErrorCode::InvalidArgument => "InvalidArgumentError",
            ApiErrorCode::NotAvailableYet => "NotAvailableYet",
            ApiErrorCode::UnselectiveContentQuery => "UnselectiveContentQueryError",
            ApiErrorCode::UnsupportedContentQuery => "UnsupportedContentQueryError",
            ApiErrorCode::AuthenticationRequired => "AuthenticationRequiredError",
            ApiErrorCode::UserNotActive => "UserNotActiveError",
            ApiErrorCode::WrongCredentials => "WrongCredentialsError",
            ApiErrorCode::Forbidden => "ForbiddenError",
            ApiErrorCode::NotFound => "NotFoundError",
            ApiErrorCode::AlreadyExists => "AlreadyExistsError",
            ApiErrorCode::FailedDependency => "FailedDependencyError",
            ApiErrorCode::QuotaExceeded => "QuotaExceededError",
            ApiErrorCode::TooManyRequests => "TooManyRequestsError",
            ApiErrorCode::Transient => "TransientError",
            ApiErrorCode::DeadlineExceeded => "DeadlineExceededError",
        }
    }

    /// HTTP status the API returns for this code
    pub fn http_status(&self) -> u16 {
        match self {
            ApiErrorCode::BadRequest
            | ApiErrorCode::InvalidArgument
            | ApiErrorCode::NotAvailableYet
            | ApiErrorCode::UnselectiveContentQuery
            | ApiErrorCode::UnsupportedContentQuery => 400,
            ApiErrorCode::AuthenticationRequired
            | ApiErrorCode::UserNotActive
            | ApiErrorCode::WrongCredentials => 401,
            ApiErrorCode::Forbidden => 403,
            ApiErrorCode::NotFound => 404,
            ApiErrorCode::AlreadyExists => 409,
            ApiErrorCode::FailedDependency => 424,
            ApiErrorCode::QuotaExceeded | ApiErrorCode::TooManyRequests => 429,
            ApiErrorCode::Transient => 503,
            ApiErrorCode::DeadlineExceeded => 504,
        }
    }

    /// Whether a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiErrorCode::Transient
                | ApiErrorCode::DeadlineExceeded
                | ApiErrorCode::TooManyRequests
                | ApiErrorCode::QuotaExceeded
                | ApiErrorCode::FailedDependency
                | ApiErrorCode::NotAvailableYet
        )
    }

    /// Status string persisted on the scanned record
    pub fn status(&self) -> &'static str {
        match self {
            ApiErrorCode::BadRequest
            | ApiErrorCode::InvalidArgument
            | ApiErrorCode::UnselectiveContentQuery
            | ApiErrorCode::UnsupportedContentQuery => "invalid_request",
            ApiErrorCode::NotAvailableYet => "pending",
            ApiErrorCode::AuthenticationRequired
            | ApiErrorCode::UserNotActive
            | ApiErrorCode::WrongCredentials => "auth_failed",
            ApiErrorCode::Forbidden => "forbidden",
            ApiErrorCode::NotFound => "not_found",
            ApiErrorCode::AlreadyExists => "already_exists",
            ApiErrorCode::FailedDependency => "dependency_failed",
            ApiErrorCode::QuotaExceeded | ApiErrorCode::TooManyRequests => "rate_limited",
            ApiErrorCode::Transient => "service_unavailable",
            ApiErrorCode::DeadlineExceeded => "timeout",
        }
    }
}

impl std::fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Threat-intel client errors
#[derive(Debug, Error)]
pub enum ThreatIntelError {
    /// The API answered with a non-success status
    #[error("API returned {status}{}: {message}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Api {
        /// HTTP status
        status: u16,
        /// Parsed error code, if the body carried a known one
        code: Option<ApiErrorCode>,
        /// Error message from the body
        message: String,
        /// Server-requested wait before retrying
        retry_after: Option<Duration>,
    },

    /// Request never produced a response
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Response body did not match the expected envelope
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Local file could not be read for upload
    #[error("failed to read upload: {0}")]
    Io(#[from] std::io::Error),

    /// Client is missing required configuration (API key, base URL)
    #[error("threat-intel client not configured: {0}")]
    NotConfigured(String),
}

impl ThreatIntelError {
    /// Whether the job that hit this error should be retried later
    ///
    /// Known API codes follow the code table; responses without a known code
    /// fall back to the HTTP status (5xx and 429 are transient).
    pub fn is_retryable(&self) -> bool {
        match self {
            ThreatIntelError::Api { status, code, .. } => match code {
                Some(code) => code.is_retryable(),
                None => *status >= 500 || *status == 429,
            },
            ThreatIntelError::Network(_) => true,
            ThreatIntelError::Decode(_)
            | ThreatIntelError::Io(_)
            | ThreatIntelError::NotConfigured(_) => false,
        }
    }

    /// HTTP status, when the API answered at all
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ThreatIntelError::Api { status, .. } => Some(*status),
            ThreatIntelError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Parsed API error code
    pub fn code(&self) -> Option<ApiErrorCode> {
        match self {
            ThreatIntelError::Api { code, .. } => *code,
            _ => None,
        }
    }

    /// Status string persisted on the scanned record
    pub fn status(&self) -> &'static str {
        match self {
            ThreatIntelError::Api { code: Some(code), .. } => code.status(),
            ThreatIntelError::Api { status, .. } if *status >= 500 => "service_unavailable",
            ThreatIntelError::Api { .. } => "invalid_request",
            ThreatIntelError::Network(_) => "network_error",
            ThreatIntelError::Decode(_) => "invalid_response",
            ThreatIntelError::Io(_) => "io_error",
            ThreatIntelError::NotConfigured(_) => "not_configured",
        }
    }
}

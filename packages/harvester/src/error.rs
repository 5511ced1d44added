//! Typed errors for the harvester library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so the stage runner can
//! tell per-company failures apart from failures that must stop a stage.

use thiserror::Error;

/// Top-level errors. Anything surfacing as a `PipelineError` aborts the
/// current stage (or the whole run, for setup errors).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing credentials, unreadable config, invalid settings
    #[error("setup error: {0}")]
    Setup(String),

    /// The durable cache could not be read or written
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Company list could not be loaded
    #[error("input error: {0}")]
    Input(String),

    /// Output tables could not be produced
    #[error("export error: {0}")]
    Export(String),

    /// CSV reader/writer failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem failure outside of per-company work
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable or query failed
    #[error("cache backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Value could not be (de)serialized
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that fail a single company within a stage.
///
/// These never propagate past the stage runner; they are logged and
/// recorded as a failure sentinel.
#[derive(Debug, Error)]
pub enum StageError {
    /// Crawl capability failed
    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    /// Generative capability failed
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Blob storage capability failed
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Local file access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External call exceeded its deadline
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The work ran but found nothing usable
    #[error("not found: {0}")]
    NotFound(String),

    /// Output failed validation
    #[error("invalid result: {0}")]
    Invalid(String),

    /// Any other failure from an ad-hoc work function
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur during crawl operations.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Security validation failed
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Non-success status code
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Crawl service reported a failure
    #[error("crawl service error: {0}")]
    Service(String),

    /// Writing a download to disk failed
    #[error("download I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing API key or invalid settings
    #[error("crawler config error: {0}")]
    Config(String),
}

impl CrawlError {
    /// HTTP status code, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Security-related errors, primarily for SSRF protection.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g., file://, ftp://)
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// Host is blocked (e.g., localhost, internal IPs)
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// IP in blocked CIDR range (e.g., 10.0.0.0/8)
    #[error("blocked IP range: {0}")]
    BlockedCidr(String),

    /// URL has no host
    #[error("URL has no host")]
    NoHost,

    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Errors from the generative model.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Configuration error (missing API key, invalid settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// API error (non-2xx response, quota, invalid request)
    #[error("API error: {0}")]
    Api(String),

    /// The model returned no usable candidate
    #[error("no candidate returned: {0}")]
    Empty(String),

    /// Output was not valid JSON for the requested schema
    #[error("malformed model output: {0}")]
    Malformed(String),

    /// Output parsed but violated field constraints
    #[error("model output failed validation: {0}")]
    Invalid(String),
}

/// Errors from blob storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing credentials or bucket
    #[error("storage config error: {0}")]
    Config(String),

    /// Local file to upload is missing or unreadable
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote store rejected the upload
    #[error("upload failed: {0}")]
    Upload(#[from] object_store::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result type alias for per-company stage work.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for security operations.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

/// Result type alias for generation operations.
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

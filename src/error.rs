//! Error taxonomy for scrape operations.
//!
//! Kinds are stable identifiers consumed by the transport layer; the core
//! never attaches page bodies or other large payloads to error details.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Error produced by the scraping core.
#[derive(Debug, Clone)]
pub enum ScrapeError {
    /// URL failed syntactic validation
    InvalidUrl(String),
    /// Required input absent
    MissingParam(String),
    /// Execution deadline exceeded
    Timeout(String),
    /// Wait-in-queue deadline exceeded
    QueueTimeout(String),
    /// Upstream cancellation
    Cancelled,
    /// Navigation failed (DNS/TCP/TLS/HTTP)
    Navigation(String),
    /// Article extractor returned empty or failed
    Extraction(String),
    /// Pool could not provide a healthy context or page
    BrowserError(String),
    /// Unexpected failure
    Internal(String),
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
            Self::MissingParam(msg) => write!(f, "Missing parameter: {msg}"),
            Self::Timeout(msg) => write!(f, "Request timed out: {msg}"),
            Self::QueueTimeout(msg) => write!(f, "Timed out waiting in queue: {msg}"),
            Self::Cancelled => write!(f, "Operation was cancelled"),
            Self::Navigation(msg) => write!(f, "Navigation failed: {msg}"),
            Self::Extraction(msg) => write!(f, "Content extraction failed: {msg}"),
            Self::BrowserError(msg) => write!(f, "Browser error: {msg}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ScrapeError {}

impl ScrapeError {
    /// Stable kind identifier for the transport envelope.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::MissingParam(_) => "missing_param",
            Self::Timeout(_) => "timeout",
            Self::QueueTimeout(_) => "queue_timeout",
            Self::Cancelled => "cancelled",
            Self::Navigation(_) => "navigation",
            Self::Extraction(_) => "extraction",
            Self::BrowserError(_) => "browser_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the scraper's retry driver may re-attempt after this error.
    ///
    /// Timeouts are surfaced without retry so the request deadline stays
    /// meaningful; queue rejections and cancellations are final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Navigation(_) | Self::BrowserError(_) | Self::Extraction(_) => true,
            Self::InvalidUrl(_)
            | Self::MissingParam(_)
            | Self::Timeout(_)
            | Self::QueueTimeout(_)
            | Self::Cancelled
            | Self::Internal(_) => false,
        }
    }

    /// Build the user-visible error envelope for a failed request.
    #[must_use]
    pub fn to_envelope(&self, request_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            error: ErrorInfo {
                kind: self.kind().to_string(),
                message: self.to_string(),
                details: None,
            },
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl From<anyhow::Error> for ScrapeError {
    fn from(err: anyhow::Error) -> Self {
        // {:#} preserves the context chain built up through the pool and
        // scraper layers.
        classify_message(&format!("{err:#}"))
    }
}

/// Classify a low-level failure into a taxonomy kind by message pattern.
///
/// Used when an error crosses the anyhow boundary (pool internals, CDP
/// calls) without an explicit kind. Pattern order matters: timeout strings
/// often also mention "navigation", so timeouts are checked first.
fn classify_message(msg: &str) -> ScrapeError {
    let lower = msg.to_lowercase();

    // Pool-internal stalls (context acquire, page creation) stay
    // retryable browser errors even when they read as timeouts; only
    // page-operation deadlines surface as Timeout.
    if lower.contains("context acquire")
        || lower.contains("page creation")
        || lower.contains("context pool")
    {
        return ScrapeError::BrowserError(msg.to_string());
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return ScrapeError::Timeout(msg.to_string());
    }
    if lower.contains("dns")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("net::")
        || lower.contains("navigation")
        || lower.contains("unreachable")
    {
        return ScrapeError::Navigation(msg.to_string());
    }
    if lower.contains("browser")
        || lower.contains("chrome")
        || lower.contains("cdp")
        || lower.contains("target")
        || lower.contains("context")
        || lower.contains("page")
        || lower.contains("websocket")
    {
        return ScrapeError::BrowserError(msg.to_string());
    }
    if lower.contains("extract") || lower.contains("parse") || lower.contains("selector") {
        return ScrapeError::Extraction(msg.to_string());
    }

    ScrapeError::Internal(msg.to_string())
}

/// Convenience alias used throughout the crate's public surface.
pub type ScrapeResult<T> = Result<T, ScrapeError>;

/// Error payload inside results and envelopes.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorInfo {
    #[must_use]
    pub fn from_error(err: &ScrapeError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            details: None,
        }
    }
}

/// The user-visible shape of a failed request.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorInfo,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

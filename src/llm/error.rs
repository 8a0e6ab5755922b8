//! Model provider error types with retry classification.
//!
//! Distinguishes between transient errors (retried inside the client) and
//! permanent errors (surfaced to the orchestrator immediately).

use std::time::Duration;

/// Error from a model provider call.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// The kind of error
    pub kind: ProviderErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Timeout,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create an authentication/authorization error.
    pub fn auth(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Auth,
            status_code: Some(status_code),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a rate limit error.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimit,
            status_code: Some(429),
            message: message.into(),
            retry_after,
        }
    }

    /// Create an error for any other HTTP failure.
    pub fn http(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unknown,
            status_code: Some(status_code),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create an error without a status (connection failure, bad body, ...).
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unknown,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build the error matching an HTTP status.
    pub fn from_status(status_code: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match classify_http_status(status_code) {
            ProviderErrorKind::RateLimit => Self::rate_limited(body, retry_after),
            ProviderErrorKind::Auth => Self::auth(status_code, body),
            _ => Self::http(status_code, body),
        }
    }

    /// Check if this error is transient and worth retrying.
    ///
    /// Rate limits and server-side (5xx) failures are transient. Timeouts are
    /// not: a retry would double the time the caller already waited.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ProviderErrorKind::RateLimit => true,
            ProviderErrorKind::Unknown => self.status_code.map_or(false, |c| c >= 500),
            ProviderErrorKind::Timeout | ProviderErrorKind::Auth => false,
        }
    }

    /// Get the suggested delay before retry.
    ///
    /// Returns `retry_after` if set, otherwise an exponential backoff based on the kind.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }

        let base_delay = match self.kind {
            ProviderErrorKind::RateLimit => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        };

        let multiplier = 2u64.saturating_pow(attempt);
        let delay_secs = base_delay.as_secs().saturating_mul(multiplier);

        // Deterministic jitter (up to 25%) before capping
        let jitter_range = delay_secs / 4;
        let jitter = if jitter_range > 0 {
            (attempt as u64 * 7) % jitter_range
        } else {
            0
        };

        Duration::from_secs((delay_secs + jitter).min(30))
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Classification of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Request exceeded the configured timeout
    Timeout,
    /// Rejected credentials (401, 403)
    Auth,
    /// Rate limited (429)
    RateLimit,
    /// Anything else: network failure, 4xx/5xx, unparsable body
    Unknown,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Timeout => write!(f, "Timeout"),
            ProviderErrorKind::Auth => write!(f, "Authentication failed"),
            ProviderErrorKind::RateLimit => write!(f, "Rate limited"),
            ProviderErrorKind::Unknown => write!(f, "Provider error"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_retry_duration: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::ZERO,
        }
    }

    /// Check if the given error should be retried on this attempt.
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::Auth,
        429 => ProviderErrorKind::RateLimit,
        _ => ProviderErrorKind::Unknown,
    }
}
